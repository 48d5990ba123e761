//! SPI flash behind a vendor USB bridge.
//!
//! Every request is a 10-byte frame `[op, sub, addr u32 BE, len u16 BE, 0, 0]`
//! followed by any payload. Every reply starts with `[status, detail]`.
//! Flash reads, writes and erases address a 64 KiB window chosen with
//! SET_OFFSET, so `addr` in those frames is the offset inside the window.

use serde::{Deserialize, Serialize};

use super::command::{CommandTransaction, DeviceStatus, Opcode, ReplyHeader, WriteStatusTable};
use super::constants::*;
use super::identify::DeviceIdentity;
use crate::error::XferError;
use crate::field::{self, Endian};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Size of the window selected by SET_OFFSET.
    pub window_size: u64,
    /// Largest read or write payload per frame.
    pub max_transfer: usize,
    pub write_status: WriteStatusTable,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            window_size: BRIDGE_WINDOW_SIZE,
            max_transfer: BRIDGE_MAX_TRANSFER,
            write_status: WriteStatusTable::bridge_default(),
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<(), XferError> {
        if !self.window_size.is_power_of_two() || self.window_size > u64::from(u32::MAX) {
            return Err(XferError::Config(format!(
                "bridge window size 0x{:X} must be a power of two",
                self.window_size
            )));
        }
        if self.max_transfer == 0 || self.max_transfer > usize::from(u16::MAX) {
            return Err(XferError::Config(format!(
                "bridge max transfer {} out of range",
                self.max_transfer
            )));
        }
        Ok(())
    }

    /// Split a flash address into window base and offset inside it.
    pub fn split_address(&self, address: u64) -> (u64, u32) {
        let base = address & !(self.window_size - 1);
        (base, (address - base) as u32)
    }

    /// Reject spans that would cross a window edge.
    pub fn check_span(&self, address: u64, len: usize) -> Result<(), XferError> {
        if len > self.max_transfer {
            return Err(XferError::InvalidData(format!(
                "transfer of {} bytes exceeds bridge limit of {}",
                len, self.max_transfer
            )));
        }
        let (base, _) = self.split_address(address);
        if len > 0 && address + len as u64 > base + self.window_size {
            return Err(XferError::Misaligned {
                what: "Span start",
                value: address,
                alignment: self.window_size as usize,
            });
        }
        Ok(())
    }
}

fn frame(op: u8, sub: u8, addr: u32, len: u16, payload: &[u8]) -> Result<Vec<u8>, XferError> {
    let mut buf = vec![0u8; BRIDGE_FRAME_LEN];
    buf[0] = op;
    buf[1] = sub;
    field::write_u32(&mut buf, 2, addr, Endian::Big)?;
    field::write_u16(&mut buf, 6, len, Endian::Big)?;
    buf.extend_from_slice(payload);
    Ok(buf)
}

fn control(opcode: Opcode, sub: u8, addr: u32) -> Result<CommandTransaction, XferError> {
    Ok(CommandTransaction::new(
        opcode,
        frame(BRIDGE_OP_CONTROL, sub, addr, 0, &[])?,
        BRIDGE_REPLY_HEADER_LEN,
    ))
}

pub fn encode_identify() -> Result<CommandTransaction, XferError> {
    Ok(CommandTransaction::new(
        Opcode::Identify,
        frame(BRIDGE_OP_GET_VERSION, 0, 0, BRIDGE_IDENTIFY_SIZE as u16, &[])?,
        BRIDGE_REPLY_HEADER_LEN + BRIDGE_IDENTIFY_SIZE,
    ))
}

pub fn encode_read(offset: u32, len: usize) -> Result<CommandTransaction, XferError> {
    let len16 = u16::try_from(len)
        .map_err(|_| XferError::InvalidData(format!("read length {} too large", len)))?;
    Ok(CommandTransaction::new(
        Opcode::Read,
        frame(BRIDGE_OP_READ, BRIDGE_SUB_FLASH, offset, len16, &[])?,
        BRIDGE_REPLY_HEADER_LEN + len,
    ))
}

pub fn encode_write(offset: u32, data: &[u8]) -> Result<CommandTransaction, XferError> {
    let len16 = u16::try_from(data.len())
        .map_err(|_| XferError::InvalidData(format!("write length {} too large", data.len())))?;
    Ok(CommandTransaction::new(
        Opcode::Write,
        frame(BRIDGE_OP_WRITE, BRIDGE_SUB_FLASH, offset, len16, data)?,
        BRIDGE_REPLY_HEADER_LEN,
    ))
}

pub fn encode_set_offset(window_base: u64) -> Result<CommandTransaction, XferError> {
    let base = u32::try_from(window_base).map_err(|_| {
        XferError::InvalidData(format!("address 0x{:X} beyond 32 bits", window_base))
    })?;
    control(Opcode::SetOffset, BRIDGE_SUB_SET_OFFSET, base)
}

pub fn encode_erase(offset: u32) -> Result<CommandTransaction, XferError> {
    control(Opcode::Erase, BRIDGE_SUB_SECTOR_ERASE, offset)
}

pub fn encode_status() -> Result<CommandTransaction, XferError> {
    control(Opcode::Status, BRIDGE_SUB_READ_STATUS, 0)
}

pub fn encode_write_enable() -> Result<CommandTransaction, XferError> {
    control(Opcode::WriteEnable, BRIDGE_SUB_WRITE_ENABLE, 0)
}

pub fn encode_write_disable() -> Result<CommandTransaction, XferError> {
    control(Opcode::WriteDisable, BRIDGE_SUB_WRITE_DISABLE, 0)
}

/// The bridge resets immediately, so there is never a reply to read.
pub fn encode_reset() -> Result<CommandTransaction, XferError> {
    Ok(CommandTransaction::fire_and_forget(
        Opcode::Activate,
        frame(BRIDGE_OP_RESET, 0, 0, 0, &[])?,
    ))
}

pub fn decode_header(reply: &[u8]) -> Result<ReplyHeader, XferError> {
    let status = field::read_u8(reply, 0).map_err(|_| empty_reply(reply.len()))?;
    let detail = field::read_u8(reply, 1).map_err(|_| empty_reply(reply.len()))?;
    let status = match status {
        BRIDGE_STATUS_IDLE_SUCCESS => DeviceStatus::Ready,
        BRIDGE_STATUS_BUSY => DeviceStatus::Busy(status),
        BRIDGE_STATUS_IDLE_FAILURE => DeviceStatus::Error { status, detail },
        other => {
            return Err(XferError::ProtocolViolation(format!(
                "unknown bridge status 0x{:02X}",
                other
            )));
        }
    };
    Ok(ReplyHeader {
        status,
        detail,
        len: BRIDGE_REPLY_HEADER_LEN,
    })
}

fn empty_reply(len: usize) -> XferError {
    XferError::ProtocolViolation(format!(
        "reply of {} bytes is shorter than the {}-byte header",
        len, BRIDGE_REPLY_HEADER_LEN
    ))
}

/// Parse the 0x2E-byte version block.
///
/// The sector size drives erase addressing, so it must be a power of two
/// that fits both the flash and one address window.
pub fn parse_identify(config: &BridgeConfig, buf: &[u8]) -> Result<DeviceIdentity, XferError> {
    field::expect_size(buf, BRIDGE_IDENTIFY_SIZE)?;

    let sector_size = u64::from(field::read_u32(buf, BRIDGE_ID_SECTOR_SIZE, Endian::Big)?);
    let page_size = field::read_u16(buf, BRIDGE_ID_PAGE_SIZE, Endian::Big)? as usize;
    let flash_size = u64::from(field::read_u32(buf, BRIDGE_ID_FLASH_SIZE, Endian::Big)?);
    if sector_size == 0 || flash_size == 0 {
        return Err(XferError::InvalidData(
            "version block reports empty flash geometry".into(),
        ));
    }
    if !sector_size.is_power_of_two()
        || sector_size > flash_size
        || sector_size > config.window_size
    {
        return Err(XferError::InvalidData(format!(
            "version block reports sector size 0x{:X} for 0x{:X} bytes of flash",
            sector_size, flash_size
        )));
    }

    Ok(DeviceIdentity {
        vendor_id: field::read_u16(buf, BRIDGE_ID_VENDOR, Endian::Big)?,
        product_id: Some(field::read_u16(buf, BRIDGE_ID_PRODUCT, Endian::Big)?),
        model: field::read_ascii(buf, BRIDGE_ID_MODEL, BRIDGE_ID_MODEL_LEN)?,
        firmware_version: field::read_ascii(buf, BRIDGE_ID_VERSION, BRIDGE_ID_VERSION_LEN)?,
        flash_size: Some(flash_size),
        max_image_size: Some(flash_size as usize),
        erase_block_size: Some(sector_size as usize),
        page_size: Some(page_size).filter(|&p| p > 0),
        ..Default::default()
    })
}

/// Flash geometry and naming for [`build_identify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub flash_size: u32,
    pub sector_size: u32,
    pub page_size: u16,
    pub model: String,
    pub version: String,
}

pub fn build_identify(id: &BridgeIdentity) -> Result<Vec<u8>, XferError> {
    let mut buf = vec![0u8; BRIDGE_IDENTIFY_SIZE];
    field::write_u16(&mut buf, BRIDGE_ID_VENDOR, id.vendor_id, Endian::Big)?;
    field::write_u16(&mut buf, BRIDGE_ID_PRODUCT, id.product_id, Endian::Big)?;
    field::write_u32(&mut buf, BRIDGE_ID_FLASH_SIZE, id.flash_size, Endian::Big)?;
    field::write_u32(&mut buf, BRIDGE_ID_SECTOR_SIZE, id.sector_size, Endian::Big)?;
    field::write_u16(&mut buf, BRIDGE_ID_PAGE_SIZE, id.page_size, Endian::Big)?;
    for (dst, src) in buf[BRIDGE_ID_MODEL..BRIDGE_ID_MODEL + BRIDGE_ID_MODEL_LEN]
        .iter_mut()
        .zip(id.model.bytes())
    {
        *dst = src;
    }
    for (dst, src) in buf[BRIDGE_ID_VERSION..BRIDGE_ID_VERSION + BRIDGE_ID_VERSION_LEN]
        .iter_mut()
        .zip(id.version.bytes())
    {
        *dst = src;
    }
    Ok(buf)
}
