//! Transfer policy: the knobs a device class exposes to the orchestrator.

use serde::{Deserialize, Serialize};

use crate::error::XferError;
use crate::payload::PlanParams;
use crate::protocol::DeviceIdentity;

/// Half-open device address range `[start, start + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRange {
    pub start: u64,
    pub len: u64,
}

impl AddressRange {
    pub fn new(start: u64, len: u64) -> Self {
        Self { start, len }
    }

    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.len)
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end()
    }

    /// True when `[address, address + len)` lies entirely inside the range.
    pub fn covers(&self, address: u64, len: u64) -> bool {
        address >= self.start && address.saturating_add(len) <= self.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferPolicy {
    /// Maximum bytes per chunk.
    pub chunk_size: usize,
    pub requires_erase: bool,
    pub requires_verify: bool,
    /// Image length must be a multiple of this; 0 or 1 disables the check.
    pub block_alignment: usize,
    pub max_poll_attempts: u32,
    pub poll_interval_ms: u64,
    /// Device address of the first image byte.
    pub origin_address: u64,
    /// Boundary a chunk may not cross; 0 disables.
    pub page_size: usize,
    pub erase_block_size: usize,
    /// Value an erased byte reads back as.
    pub erase_sentinel: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_image_size: Option<usize>,
    /// Per-transaction timeout.
    pub timeout_ms: u64,
    /// Activation resets the device, so its reply is never read.
    pub activation_resets: bool,
    /// Region skipped by the verify pass, e.g. a boot-config sector that
    /// the device rewrites itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_exclude: Option<AddressRange>,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            chunk_size: 256,
            requires_erase: false,
            requires_verify: false,
            block_alignment: 0,
            max_poll_attempts: 100,
            poll_interval_ms: 10,
            origin_address: 0,
            page_size: 0,
            erase_block_size: 0x1000,
            erase_sentinel: 0xFF,
            max_image_size: None,
            timeout_ms: 5000,
            activation_resets: false,
            verify_exclude: None,
        }
    }
}

impl TransferPolicy {
    /// Reject values no transfer could run with.
    pub fn validate(&self) -> Result<(), XferError> {
        if self.chunk_size == 0 {
            return Err(XferError::Config("chunk_size must be non-zero".into()));
        }
        if self.max_poll_attempts == 0 {
            return Err(XferError::Config("max_poll_attempts must be at least 1".into()));
        }
        if self.timeout_ms == 0 {
            return Err(XferError::Config("timeout_ms must be non-zero".into()));
        }
        if self.requires_erase && self.erase_block_size == 0 {
            return Err(XferError::Config(
                "erase_block_size must be set when erase is required".into(),
            ));
        }
        Ok(())
    }

    pub fn alignment(&self) -> Option<usize> {
        Some(self.block_alignment).filter(|&a| a > 1)
    }

    pub fn plan_params(&self) -> PlanParams {
        PlanParams {
            origin_address: self.origin_address,
            page_size: self.page_size,
            max_chunk_size: self.chunk_size,
            block_alignment: self.alignment(),
        }
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }

    /// Narrow the policy to what an identified device declares.
    pub fn constrain_to(&self, identity: &DeviceIdentity) -> Self {
        let mut policy = self.clone();
        if let Some(chunk) = identity.preferred_chunk_size.filter(|&c| c > 0) {
            policy.chunk_size = chunk;
        }
        if let Some(device_max) = identity.max_image_size {
            policy.max_image_size = Some(
                policy
                    .max_image_size
                    .map_or(device_max, |max| max.min(device_max)),
            );
        }
        if let Some(erase) = identity.erase_block_size.filter(|&e| e > 0) {
            policy.erase_block_size = erase;
        }
        if policy.page_size == 0
            && let Some(page) = identity.page_size
        {
            policy.page_size = page;
        }
        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(TransferPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_zero_values_rejected() {
        let policy = TransferPolicy {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(policy.validate(), Err(XferError::Config(_))));

        let policy = TransferPolicy {
            max_poll_attempts: 0,
            ..Default::default()
        };
        assert!(policy.validate().is_err());

        let policy = TransferPolicy {
            requires_erase: true,
            erase_block_size: 0,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_constrain_to_identity() {
        let policy = TransferPolicy {
            max_image_size: Some(1 << 20),
            ..Default::default()
        };
        let identity = DeviceIdentity {
            preferred_chunk_size: Some(1024),
            max_image_size: Some(0x2_0000),
            erase_block_size: Some(0x8000),
            page_size: Some(0x100),
            ..Default::default()
        };
        let narrowed = policy.constrain_to(&identity);
        assert_eq!(narrowed.chunk_size, 1024);
        assert_eq!(narrowed.max_image_size, Some(0x2_0000));
        assert_eq!(narrowed.erase_block_size, 0x8000);
        assert_eq!(narrowed.page_size, 0x100);

        // An explicit page size is kept.
        let policy = TransferPolicy {
            page_size: 64,
            ..Default::default()
        };
        assert_eq!(policy.constrain_to(&identity).page_size, 64);
    }

    #[test]
    fn test_address_range() {
        let range = AddressRange::new(0x1000, 0x100);
        assert!(range.contains(0x1000));
        assert!(range.contains(0x10FF));
        assert!(!range.contains(0x1100));
        assert!(range.covers(0x1080, 0x80));
        assert!(!range.covers(0x1080, 0x81));
    }

    #[test]
    fn test_toml_roundtrip() {
        let policy = TransferPolicy {
            verify_exclude: Some(AddressRange::new(0, 0x1000)),
            ..Default::default()
        };
        let text = toml::to_string_pretty(&policy).unwrap();
        let back: TransferPolicy = toml::from_str(&text).unwrap();
        assert_eq!(back, policy);

        // Missing keys fall back to defaults.
        let partial: TransferPolicy = toml::from_str("chunk_size = 64").unwrap();
        assert_eq!(partial.chunk_size, 64);
        assert_eq!(partial.erase_sentinel, 0xFF);
    }
}
