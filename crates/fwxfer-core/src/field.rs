//! Bounds-checked field access for raw device buffers.
//!
//! Every reader validates `offset + width <= len` before touching the
//! buffer, so a truncated or hostile response surfaces as a [`FieldError`]
//! instead of a panic.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("Field of {width} bytes at 0x{offset:X} exceeds buffer of {len} bytes")]
    OutOfBounds {
        offset: usize,
        width: usize,
        len: usize,
    },
    #[error("Buffer size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("Invalid unit range {start}..={end}")]
    InvalidRange { start: usize, end: usize },
}

/// Byte order of a multi-byte field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

fn check_bounds(len: usize, offset: usize, width: usize) -> Result<(), FieldError> {
    match offset.checked_add(width) {
        Some(end) if end <= len => Ok(()),
        _ => Err(FieldError::OutOfBounds { offset, width, len }),
    }
}

/// Reject any buffer whose length is not exactly `expected`.
pub fn expect_size(buf: &[u8], expected: usize) -> Result<(), FieldError> {
    if buf.len() != expected {
        return Err(FieldError::SizeMismatch {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

pub fn read_u8(buf: &[u8], offset: usize) -> Result<u8, FieldError> {
    check_bounds(buf.len(), offset, 1)?;
    Ok(buf[offset])
}

pub fn read_u16(buf: &[u8], offset: usize, endian: Endian) -> Result<u16, FieldError> {
    check_bounds(buf.len(), offset, 2)?;
    let field = &buf[offset..offset + 2];
    Ok(match endian {
        Endian::Little => LittleEndian::read_u16(field),
        Endian::Big => BigEndian::read_u16(field),
    })
}

pub fn read_u32(buf: &[u8], offset: usize, endian: Endian) -> Result<u32, FieldError> {
    check_bounds(buf.len(), offset, 4)?;
    let field = &buf[offset..offset + 4];
    Ok(match endian {
        Endian::Little => LittleEndian::read_u32(field),
        Endian::Big => BigEndian::read_u32(field),
    })
}

pub fn write_u16(
    buf: &mut [u8],
    offset: usize,
    value: u16,
    endian: Endian,
) -> Result<(), FieldError> {
    check_bounds(buf.len(), offset, 2)?;
    let field = &mut buf[offset..offset + 2];
    match endian {
        Endian::Little => LittleEndian::write_u16(field, value),
        Endian::Big => BigEndian::write_u16(field, value),
    }
    Ok(())
}

pub fn write_u32(
    buf: &mut [u8],
    offset: usize,
    value: u32,
    endian: Endian,
) -> Result<(), FieldError> {
    check_bounds(buf.len(), offset, 4)?;
    let field = &mut buf[offset..offset + 4];
    match endian {
        Endian::Little => LittleEndian::write_u32(field, value),
        Endian::Big => BigEndian::write_u32(field, value),
    }
    Ok(())
}

/// Normalize raw text bytes: cut at the first NUL, strip surrounding
/// whitespace, and map an empty result to `None`.
fn finish_text(bytes: &[u8]) -> Option<String> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let text: String = bytes[..end].iter().map(|&b| char::from(b)).collect();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Decode a string stored as little-endian 16-bit units, each holding two
/// characters high byte first (the ATA identify layout).
///
/// `start_unit` and `end_unit` are inclusive unit indices. Returns `None`
/// when the field is all whitespace or all zero.
pub fn read_string(
    buf: &[u8],
    start_unit: usize,
    end_unit: usize,
) -> Result<Option<String>, FieldError> {
    if start_unit > end_unit {
        return Err(FieldError::InvalidRange {
            start: start_unit,
            end: end_unit,
        });
    }
    let units = end_unit - start_unit + 1;
    check_bounds(buf.len(), start_unit * 2, units * 2)?;

    let mut bytes = Vec::with_capacity(units * 2);
    for unit in start_unit..=end_unit {
        let value = LittleEndian::read_u16(&buf[unit * 2..unit * 2 + 2]);
        bytes.push((value >> 8) as u8);
        bytes.push((value & 0xff) as u8);
    }
    Ok(finish_text(&bytes))
}

/// Encode `text` into the unit range using the same layout as
/// [`read_string`], padding with spaces. Text longer than the field is
/// truncated.
pub fn write_string(
    buf: &mut [u8],
    start_unit: usize,
    end_unit: usize,
    text: &str,
) -> Result<(), FieldError> {
    if start_unit > end_unit {
        return Err(FieldError::InvalidRange {
            start: start_unit,
            end: end_unit,
        });
    }
    let units = end_unit - start_unit + 1;
    check_bounds(buf.len(), start_unit * 2, units * 2)?;

    let mut padded = text.as_bytes().to_vec();
    padded.resize(units * 2, b' ');
    for (i, pair) in padded.chunks_exact(2).enumerate() {
        let value = (u16::from(pair[0]) << 8) | u16::from(pair[1]);
        let at = (start_unit + i) * 2;
        LittleEndian::write_u16(&mut buf[at..at + 2], value);
    }
    Ok(())
}

/// Read a plain byte string of `len` bytes at `offset`.
pub fn read_ascii(buf: &[u8], offset: usize, len: usize) -> Result<Option<String>, FieldError> {
    check_bounds(buf.len(), offset, len)?;
    Ok(finish_text(&buf[offset..offset + len]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u16_both_orders() {
        let buf = [0x34, 0x12];
        assert_eq!(read_u16(&buf, 0, Endian::Little).unwrap(), 0x1234);
        assert_eq!(read_u16(&buf, 0, Endian::Big).unwrap(), 0x3412);
    }

    #[test]
    fn test_read_past_end_is_error() {
        let buf = [0u8; 4];
        assert_eq!(
            read_u32(&buf, 1, Endian::Little),
            Err(FieldError::OutOfBounds {
                offset: 1,
                width: 4,
                len: 4
            })
        );
        assert!(read_u8(&buf, 4).is_err());
        assert!(read_u16(&buf, usize::MAX, Endian::Big).is_err());
    }

    #[test]
    fn test_write_u32_big_endian() {
        let mut buf = [0u8; 6];
        write_u32(&mut buf, 2, 0xDEADBEEF, Endian::Big).unwrap();
        assert_eq!(buf, [0, 0, 0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(write_u32(&mut buf, 3, 1, Endian::Big).is_err());
    }

    #[test]
    fn test_string_roundtrip_strips_whitespace() {
        let mut buf = vec![0u8; 64];
        write_string(&mut buf, 10, 19, "  WD-WX12345  ").unwrap();
        assert_eq!(read_string(&buf, 10, 19).unwrap().as_deref(), Some("WD-WX12345"));
    }

    #[test]
    fn test_string_unit_byte_swap() {
        // "AB" stored as one LE unit 0x4142 -> bytes [0x42, 0x41]
        let buf = [0x42, 0x41, 0x44, 0x43];
        assert_eq!(read_string(&buf, 0, 1).unwrap().as_deref(), Some("ABCD"));
    }

    #[test]
    fn test_blank_and_zero_fields_are_absent() {
        let zeros = [0u8; 8];
        assert_eq!(read_string(&zeros, 0, 3).unwrap(), None);

        let mut spaces = [0u8; 8];
        write_string(&mut spaces, 0, 3, "").unwrap();
        assert_eq!(read_string(&spaces, 0, 3).unwrap(), None);
    }

    #[test]
    fn test_string_never_reads_past_end_unit() {
        let mut buf = vec![0u8; 8];
        write_string(&mut buf, 0, 0, "XY").unwrap();
        write_string(&mut buf, 1, 3, "TAIL").unwrap();
        assert_eq!(read_string(&buf, 0, 0).unwrap().as_deref(), Some("XY"));
        assert!(read_string(&buf, 2, 4).is_err());
        assert!(read_string(&buf, 3, 2).is_err());
    }

    #[test]
    fn test_expect_size() {
        assert!(expect_size(&[0u8; 512], 512).is_ok());
        assert_eq!(
            expect_size(&[0u8; 511], 512),
            Err(FieldError::SizeMismatch {
                expected: 512,
                actual: 511
            })
        );
    }

    #[test]
    fn test_read_ascii() {
        let buf = b"\0\0\0\0 1.07\0\0";
        assert_eq!(read_ascii(buf, 4, 5).unwrap().as_deref(), Some("1.07"));
        assert_eq!(read_ascii(buf, 0, 4).unwrap(), None);
        assert!(read_ascii(buf, 8, 4).is_err());
    }
}
