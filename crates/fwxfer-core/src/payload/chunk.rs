//! Chunk planning.
//!
//! Splits a firmware blob into address-tagged chunks no larger than the
//! configured maximum. When a page size is set, a chunk never crosses a
//! page boundary: the chunk that would straddle it is shortened so the
//! next one starts on the boundary.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("Maximum chunk size must be non-zero")]
    ZeroChunkSize,
    #[error("Image size {size} is not a multiple of the {alignment}-byte block size")]
    Misaligned { size: usize, alignment: usize },
    #[error("{what} 0x{value:X} is not a multiple of the {alignment}-byte block size")]
    AlignmentConflict {
        what: &'static str,
        value: u64,
        alignment: usize,
    },
}

/// Inputs of [`plan_chunks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanParams {
    /// Device address of the first byte.
    pub origin_address: u64,
    /// Boundary a chunk may not cross; 0 disables the constraint.
    pub page_size: usize,
    pub max_chunk_size: usize,
    /// Hardware block size the blob length must be a multiple of.
    pub block_alignment: Option<usize>,
}

impl PlanParams {
    pub fn new(max_chunk_size: usize) -> Self {
        Self {
            origin_address: 0,
            page_size: 0,
            max_chunk_size,
            block_alignment: None,
        }
    }

    pub fn with_origin(mut self, origin_address: u64) -> Self {
        self.origin_address = origin_address;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.block_alignment = Some(alignment).filter(|&a| a > 1);
        self
    }

    fn validate(&self, blob_len: usize) -> Result<(), PlanError> {
        if self.max_chunk_size == 0 {
            return Err(PlanError::ZeroChunkSize);
        }
        let Some(alignment) = self.block_alignment.filter(|&a| a > 1) else {
            return Ok(());
        };
        if blob_len % alignment != 0 {
            return Err(PlanError::Misaligned {
                size: blob_len,
                alignment,
            });
        }
        // Chunk boundaries must land on block boundaries too.
        let checks = [
            ("Maximum chunk size", self.max_chunk_size as u64),
            ("Page size", self.page_size as u64),
            ("Origin address", self.origin_address),
        ];
        for (what, value) in checks {
            if value % alignment as u64 != 0 {
                return Err(PlanError::AlignmentConflict {
                    what,
                    value,
                    alignment,
                });
            }
        }
        Ok(())
    }
}

/// One bounded slice of the blob and where it lands on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub index: usize,
    pub address: u64,
    /// Offset of `data` within the source blob.
    pub offset: usize,
    pub data: &'a [u8],
}

impl Chunk<'_> {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Address one past the last byte of this chunk.
    pub fn end_address(&self) -> u64 {
        self.address + self.data.len() as u64
    }
}

/// Lazy, restartable chunk sequence. Cloning yields an independent cursor
/// positioned where the original was.
#[derive(Debug, Clone)]
pub struct ChunkPlan<'a> {
    blob: &'a [u8],
    params: PlanParams,
    offset: usize,
    index: usize,
    total: usize,
}

impl<'a> ChunkPlan<'a> {
    fn new(blob: &'a [u8], params: PlanParams) -> Self {
        let mut plan = Self {
            blob,
            params,
            offset: 0,
            index: 0,
            total: 0,
        };
        plan.total = plan.count_remaining();
        plan
    }

    fn next_len(&self, offset: usize) -> usize {
        let remaining = self.blob.len() - offset;
        let mut len = remaining.min(self.params.max_chunk_size);
        if self.params.page_size > 0 {
            let page = self.params.page_size as u64;
            let address = self.params.origin_address + offset as u64;
            let to_boundary = (page - address % page) as usize;
            len = len.min(to_boundary);
        }
        len
    }

    fn count_remaining(&self) -> usize {
        if self.params.page_size == 0 {
            return (self.blob.len() - self.offset).div_ceil(self.params.max_chunk_size);
        }
        let mut offset = self.offset;
        let mut count = 0;
        while offset < self.blob.len() {
            offset += self.next_len(offset);
            count += 1;
        }
        count
    }

    /// Total number of chunks in the full plan.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of chunks already yielded.
    pub fn position(&self) -> usize {
        self.index
    }

    pub fn params(&self) -> &PlanParams {
        &self.params
    }

    /// Rewind to the first chunk.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.index = 0;
    }
}

impl<'a> Iterator for ChunkPlan<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.blob.len() {
            return None;
        }

        let len = self.next_len(self.offset);
        let chunk = Chunk {
            index: self.index,
            address: self.params.origin_address + self.offset as u64,
            offset: self.offset,
            data: &self.blob[self.offset..self.offset + len],
        };
        self.offset += len;
        self.index += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.index;
        (left, Some(left))
    }
}

impl ExactSizeIterator for ChunkPlan<'_> {}

/// Plan the chunk sequence for `blob`.
///
/// Fails before yielding anything if the parameters are unusable or the
/// blob violates the mandated block alignment.
pub fn plan_chunks<'a>(blob: &'a [u8], params: &PlanParams) -> Result<ChunkPlan<'a>, PlanError> {
    params.validate(blob.len())?;
    Ok(ChunkPlan::new(blob, *params))
}

/// Shorthand for [`plan_chunks`] without an alignment requirement.
pub fn plan(
    blob: &[u8],
    origin_address: u64,
    page_size: usize,
    max_chunk_size: usize,
) -> Result<ChunkPlan<'_>, PlanError> {
    let params = PlanParams::new(max_chunk_size)
        .with_origin(origin_address)
        .with_page_size(page_size);
    plan_chunks(blob, &params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exact_multiple() {
        let blob = vec![0xAAu8; 256];
        let chunks: Vec<_> = plan(&blob, 0x1000, 0, 64).unwrap().collect();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[3].address, 0x1000 + 192);
        assert!(chunks.iter().all(|c| c.len() == 64));
    }

    #[test]
    fn test_short_final_chunk() {
        let blob = vec![0u8; 130];
        let plan = plan(&blob, 0, 0, 64).unwrap();
        assert_eq!(plan.total(), 3);
        let lens: Vec<_> = plan.map(|c| c.len()).collect();
        assert_eq!(lens, vec![64, 64, 2]);
    }

    #[test]
    fn test_empty_blob_has_no_chunks() {
        let plan = plan(&[], 0, 0, 64).unwrap();
        assert_eq!(plan.total(), 0);
        assert_eq!(plan.count(), 0);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert_eq!(plan(&[1, 2, 3], 0, 0, 0).unwrap_err(), PlanError::ZeroChunkSize);
    }

    #[test]
    fn test_page_boundary_shortens_straddling_chunk() {
        // Origin sits 16 bytes before a 256-byte page boundary.
        let blob = vec![0u8; 200];
        let chunks: Vec<_> = plan(&blob, 240, 256, 64).unwrap().collect();
        let spans: Vec<_> = chunks.iter().map(|c| (c.address, c.len())).collect();
        assert_eq!(spans, vec![(240, 16), (256, 64), (320, 64), (384, 56)]);
        for c in &chunks {
            assert_eq!(c.address / 256, (c.end_address() - 1) / 256);
        }
    }

    #[test]
    fn test_misaligned_size() {
        let blob = vec![0u8; 1000];
        let params = PlanParams::new(512).with_alignment(512);
        assert_eq!(
            plan_chunks(&blob, &params).unwrap_err(),
            PlanError::Misaligned {
                size: 1000,
                alignment: 512
            }
        );
    }

    #[test]
    fn test_chunk_size_must_respect_alignment() {
        let blob = vec![0u8; 1024];
        let params = PlanParams::new(102).with_alignment(4);
        assert!(matches!(
            plan_chunks(&blob, &params),
            Err(PlanError::AlignmentConflict { what: "Maximum chunk size", .. })
        ));
    }

    #[test]
    fn test_plan_is_restartable() {
        let blob: Vec<u8> = (0..=255).collect();
        let mut plan = plan(&blob, 0, 100, 48).unwrap();
        let first: Vec<_> = plan.clone().collect();
        plan.next();
        plan.next();
        assert_eq!(plan.position(), 2);
        assert_eq!(plan.len(), first.len() - 2);
        plan.reset();
        let second: Vec<_> = plan.collect();
        assert_eq!(first, second);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(256))]

        #[test]
        fn prop_chunks_reconstruct_blob(
            blob in proptest::collection::vec(any::<u8>(), 0..2048),
            max_chunk in 1usize..300,
            page_size in prop_oneof![Just(0usize), 1usize..512],
            origin in 0u64..4096,
        ) {
            let plan = plan(&blob, origin, page_size, max_chunk).unwrap();
            let total = plan.total();
            let chunks: Vec<_> = plan.collect();
            prop_assert_eq!(chunks.len(), total);

            let rebuilt: Vec<u8> = chunks.iter().flat_map(|c| c.data.iter().copied()).collect();
            prop_assert_eq!(&rebuilt, &blob);

            for c in &chunks {
                prop_assert!(!c.is_empty());
                prop_assert!(c.len() <= max_chunk);
                prop_assert_eq!(c.address, origin + c.offset as u64);
            }
        }

        #[test]
        fn prop_chunk_order_is_monotonic(
            len in 0usize..4096,
            max_chunk in 1usize..300,
            page_size in prop_oneof![Just(0usize), 1usize..512],
        ) {
            let blob = vec![0u8; len];
            let chunks: Vec<_> = plan(&blob, 0, page_size, max_chunk).unwrap().collect();
            for pair in chunks.windows(2) {
                prop_assert!(pair[0].address < pair[1].address);
                prop_assert_eq!(pair[0].index + 1, pair[1].index);
            }
            if let Some(first) = chunks.first() {
                prop_assert_eq!(first.index, 0);
            }
        }

        #[test]
        fn prop_unpaged_count_is_ceil(len in 0usize..8192, max_chunk in 1usize..1024) {
            let blob = vec![0u8; len];
            let plan = plan(&blob, 0, 0, max_chunk).unwrap();
            prop_assert_eq!(plan.total(), len.div_ceil(max_chunk));
        }
    }
}
