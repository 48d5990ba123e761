//! Wire constants for the supported command sets.

use std::time::Duration;

// ============================================================================
// ATA passthrough (ATA PASS-THROUGH 12 over SCSI generic)
// ============================================================================

/// Identify block and transfer block size.
pub const ATA_BLOCK_SIZE: usize = 512;
pub const ATA_IDENTIFY_SIZE: usize = 512;

/// Sense buffer returned ahead of any inbound data.
pub const ATA_SENSE_LEN: usize = 32;
pub const ATA_CDB_LEN: usize = 12;

pub const ATA_USING_LBA: u8 = 0x40;
/// Device register value for DOWNLOAD MICROCODE.
pub const ATA_DEV_MICROCODE: u8 = 0xA0 | ATA_USING_LBA;

pub const ATA_STAT_DRQ: u8 = 0x08;
pub const ATA_STAT_ERR: u8 = 0x01;

pub const ATA_OP_IDENTIFY: u8 = 0xEC;
pub const ATA_OP_FLUSH_CACHE: u8 = 0xE7;
pub const ATA_OP_DOWNLOAD_MICROCODE: u8 = 0x92;
pub const ATA_OP_STANDBY_IMMEDIATE: u8 = 0xE0;

/// Segmented download, activated on the last segment.
pub const ATA_SUBCMD_DOWNLOAD_CHUNKS_ACTIVATE: u8 = 0x03;
/// Whole image in a single command.
pub const ATA_SUBCMD_DOWNLOAD_CHUNK: u8 = 0x07;
/// Segmented download, activated later.
pub const ATA_SUBCMD_DOWNLOAD_CHUNKS: u8 = 0x0E;
pub const ATA_SUBCMD_ACTIVATE: u8 = 0x0F;

pub const SG_ATA_12: u8 = 0xA1;

pub const SG_ATA_PROTO_NON_DATA: u8 = 3 << 1;
pub const SG_ATA_PROTO_PIO_IN: u8 = 4 << 1;
pub const SG_ATA_PROTO_PIO_OUT: u8 = 5 << 1;

pub const SG_CDB2_TLEN_NSECT: u8 = 2;
pub const SG_CDB2_TLEN_SECTORS: u8 = 1 << 2;
pub const SG_CDB2_TDIR_TO_DEV: u8 = 0;
pub const SG_CDB2_TDIR_FROM_DEV: u8 = 1 << 3;
pub const SG_CDB2_CHECK_COND: u8 = 1 << 5;

/// Task-file register offsets inside the descriptor-format sense buffer.
pub const ATA_SENSE_ERROR: usize = 8 + 3;
pub const ATA_SENSE_NSECT: usize = 8 + 5;
pub const ATA_SENSE_LBAL: usize = 8 + 7;
pub const ATA_SENSE_LBAM: usize = 8 + 9;
pub const ATA_SENSE_LBAH: usize = 8 + 11;
pub const ATA_SENSE_DEV: usize = 8 + 12;
pub const ATA_SENSE_STATUS: usize = 8 + 13;

pub const ATA_IDENTIFY_TIMEOUT: Duration = Duration::from_millis(1000);
/// Flush, standby and activation can take a long time.
pub const ATA_LONG_TIMEOUT: Duration = Duration::from_secs(120);

/// Largest block count expressible in the 16-bit count registers.
pub const ATA_MAX_BLOCKS: usize = 0xFFFF;
/// PCI vendor id reported for Dell-owned drives.
pub const DELL_VENDOR_ID: u16 = 0x1028;

// ============================================================================
// SPI flash bridge
// ============================================================================

/// Command frame: [op, sub, addr u32 BE, len u16 BE, 0, 0] then payload.
pub const BRIDGE_FRAME_LEN: usize = 10;
/// Reply header: [status, detail] then data.
pub const BRIDGE_REPLY_HEADER_LEN: usize = 2;

pub const BRIDGE_OP_GET_VERSION: u8 = 0x12;
pub const BRIDGE_OP_READ: u8 = 0xE4;
pub const BRIDGE_OP_WRITE: u8 = 0xE5;
pub const BRIDGE_OP_RESET: u8 = 0xE6;
pub const BRIDGE_OP_CONTROL: u8 = 0xF3;

/// Data-path subcommand for read/write.
pub const BRIDGE_SUB_FLASH: u8 = 0x08;
pub const BRIDGE_SUB_WRITE_DISABLE: u8 = 0x04;
pub const BRIDGE_SUB_READ_STATUS: u8 = 0x05;
pub const BRIDGE_SUB_WRITE_ENABLE: u8 = 0x06;
pub const BRIDGE_SUB_SECTOR_ERASE: u8 = 0x20;
pub const BRIDGE_SUB_SET_OFFSET: u8 = 0x8E;

pub const BRIDGE_STATUS_IDLE_SUCCESS: u8 = 0x11;
pub const BRIDGE_STATUS_IDLE_FAILURE: u8 = 0x12;
pub const BRIDGE_STATUS_BUSY: u8 = 0xBB;

/// Version block returned by GET_VERSION.
pub const BRIDGE_IDENTIFY_SIZE: usize = 0x2E;
pub const BRIDGE_ID_VENDOR: usize = 0x00;
pub const BRIDGE_ID_PRODUCT: usize = 0x02;
pub const BRIDGE_ID_FLASH_SIZE: usize = 0x04;
pub const BRIDGE_ID_SECTOR_SIZE: usize = 0x08;
pub const BRIDGE_ID_PAGE_SIZE: usize = 0x0C;
pub const BRIDGE_ID_MODEL: usize = 0x10;
pub const BRIDGE_ID_MODEL_LEN: usize = 0x10;
pub const BRIDGE_ID_VERSION: usize = 0x20;
pub const BRIDGE_ID_VERSION_LEN: usize = 4;

/// Read/write addresses are relative to a window selected by SET_OFFSET.
pub const BRIDGE_WINDOW_SIZE: u64 = 0x1_0000;
/// Largest data payload in a single read or write frame.
pub const BRIDGE_MAX_TRANSFER: usize = 0x1000;
