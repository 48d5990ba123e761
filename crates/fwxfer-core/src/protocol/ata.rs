//! ATA DOWNLOAD MICROCODE over ATA PASS-THROUGH (12).
//!
//! Request envelope: 12-byte CDB followed by any outbound data.
//! Reply envelope: 32-byte descriptor sense buffer (carrying the returned
//! task file) followed by any inbound data.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::command::{CommandTransaction, DeviceStatus, Opcode, ReplyHeader, WriteStatusTable};
use super::constants::*;
use super::identify::DeviceIdentity;
use super::vendor::identify_vendor;
use crate::error::XferError;
use crate::field::{self, Endian};

/// Target configuration for an ATA drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtaConfig {
    /// DOWNLOAD MICROCODE subcommand: 0x03, 0x07 or 0x0E.
    pub transfer_mode: u8,
    /// Blocks per segment. 0 selects the drive minimum, 0xFFFF the maximum.
    pub transfer_blocks: u16,
    pub write_status: WriteStatusTable,
}

impl Default for AtaConfig {
    fn default() -> Self {
        Self {
            // 0x03 would activate mid-transfer and reset the link under the
            // kernel's feet.
            transfer_mode: ATA_SUBCMD_DOWNLOAD_CHUNKS,
            transfer_blocks: 0,
            write_status: WriteStatusTable::ata_default(),
        }
    }
}

impl AtaConfig {
    pub fn validate(&self) -> Result<(), XferError> {
        match self.transfer_mode {
            ATA_SUBCMD_DOWNLOAD_CHUNKS_ACTIVATE
            | ATA_SUBCMD_DOWNLOAD_CHUNK
            | ATA_SUBCMD_DOWNLOAD_CHUNKS => Ok(()),
            other => Err(XferError::NotSupported(format!(
                "ATA transfer mode 0x{:02X}, only 0x3, 0x7 or 0xE are supported",
                other
            ))),
        }
    }

    /// Largest image the configured mode can carry.
    pub fn max_image_size(&self) -> usize {
        if self.transfer_mode == ATA_SUBCMD_DOWNLOAD_CHUNK {
            ATA_MAX_BLOCKS
        } else {
            ATA_MAX_BLOCKS * ATA_BLOCK_SIZE
        }
    }

    fn is_segmented(&self) -> bool {
        matches!(
            self.transfer_mode,
            ATA_SUBCMD_DOWNLOAD_CHUNKS_ACTIVATE | ATA_SUBCMD_DOWNLOAD_CHUNKS
        )
    }
}

/// Data phase of a passthrough command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirection {
    None,
    ToDevice,
    FromDevice,
}

/// ATA task-file registers (28-bit LBA form).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFile {
    pub feat: u8,
    pub nsect: u8,
    pub lbal: u8,
    pub lbam: u8,
    pub lbah: u8,
    pub dev: u8,
    pub command: u8,
    pub error: u8,
    pub status: u8,
}

impl TaskFile {
    pub fn to_cdb(&self, direction: DataDirection, data_len: usize) -> [u8; ATA_CDB_LEN] {
        let mut cdb = [0u8; ATA_CDB_LEN];
        cdb[0] = SG_ATA_12;
        cdb[1] = match direction {
            DataDirection::ToDevice => SG_ATA_PROTO_PIO_OUT,
            DataDirection::FromDevice => SG_ATA_PROTO_PIO_IN,
            DataDirection::None => SG_ATA_PROTO_NON_DATA,
        };
        // libata: don't demand sense data for IDENTIFY
        cdb[2] = if data_len > 0 {
            SG_CDB2_TLEN_NSECT
                | SG_CDB2_TLEN_SECTORS
                | if direction == DataDirection::ToDevice {
                    SG_CDB2_TDIR_TO_DEV
                } else {
                    SG_CDB2_TDIR_FROM_DEV
                }
        } else {
            SG_CDB2_CHECK_COND
        };
        cdb[3] = self.feat;
        cdb[4] = self.nsect;
        cdb[5] = self.lbal;
        cdb[6] = self.lbam;
        cdb[7] = self.lbah;
        cdb[8] = self.dev;
        cdb[9] = self.command;
        cdb
    }

    /// Returned registers from the descriptor sense buffer.
    pub fn from_sense(sense: &[u8]) -> Result<Self, XferError> {
        field::expect_size(sense, ATA_SENSE_LEN)?;
        Ok(Self {
            error: field::read_u8(sense, ATA_SENSE_ERROR)?,
            nsect: field::read_u8(sense, ATA_SENSE_NSECT)?,
            lbal: field::read_u8(sense, ATA_SENSE_LBAL)?,
            lbam: field::read_u8(sense, ATA_SENSE_LBAM)?,
            lbah: field::read_u8(sense, ATA_SENSE_LBAH)?,
            dev: field::read_u8(sense, ATA_SENSE_DEV)?,
            status: field::read_u8(sense, ATA_SENSE_STATUS)?,
            ..Default::default()
        })
    }

    /// Inverse of [`TaskFile::from_sense`], used by simulated devices.
    pub fn to_sense(&self) -> [u8; ATA_SENSE_LEN] {
        let mut sense = [0u8; ATA_SENSE_LEN];
        // descriptor format, ATA status return descriptor
        sense[0] = 0x72;
        sense[8] = 0x09;
        sense[9] = 0x0C;
        sense[ATA_SENSE_ERROR] = self.error;
        sense[ATA_SENSE_NSECT] = self.nsect;
        sense[ATA_SENSE_LBAL] = self.lbal;
        sense[ATA_SENSE_LBAM] = self.lbam;
        sense[ATA_SENSE_LBAH] = self.lbah;
        sense[ATA_SENSE_DEV] = self.dev;
        sense[ATA_SENSE_STATUS] = self.status;
        sense
    }
}

fn transaction(
    opcode: Opcode,
    tf: &TaskFile,
    direction: DataDirection,
    data: &[u8],
    reply_data_len: usize,
) -> CommandTransaction {
    let data_len = data.len().max(reply_data_len);
    let mut payload = tf.to_cdb(direction, data_len).to_vec();
    payload.extend_from_slice(data);
    CommandTransaction::new(opcode, payload, ATA_SENSE_LEN + reply_data_len)
}

pub fn encode_identify() -> CommandTransaction {
    let tf = TaskFile {
        dev: ATA_USING_LBA,
        command: ATA_OP_IDENTIFY,
        nsect: 1,
        ..Default::default()
    };
    transaction(Opcode::Identify, &tf, DataDirection::FromDevice, &[], ATA_IDENTIFY_SIZE)
        .with_timeout(ATA_IDENTIFY_TIMEOUT)
}

/// One DOWNLOAD MICROCODE segment. Block count goes in nsect/lbal and the
/// block offset in lbam/lbah.
pub fn encode_write(
    config: &AtaConfig,
    address: u64,
    data: &[u8],
) -> Result<CommandTransaction, XferError> {
    if data.len() % ATA_BLOCK_SIZE != 0 {
        return Err(XferError::Misaligned {
            what: "Segment length",
            value: data.len() as u64,
            alignment: ATA_BLOCK_SIZE,
        });
    }
    if address % ATA_BLOCK_SIZE as u64 != 0 {
        return Err(XferError::Misaligned {
            what: "Segment address",
            value: address,
            alignment: ATA_BLOCK_SIZE,
        });
    }
    let block_count = data.len() / ATA_BLOCK_SIZE;
    let buffer_offset = address / ATA_BLOCK_SIZE as u64;
    if block_count > ATA_MAX_BLOCKS || buffer_offset > ATA_MAX_BLOCKS as u64 {
        return Err(XferError::InvalidData(format!(
            "segment of {} blocks at block {} exceeds the 16-bit register range",
            block_count, buffer_offset
        )));
    }

    let tf = TaskFile {
        dev: ATA_DEV_MICROCODE,
        command: ATA_OP_DOWNLOAD_MICROCODE,
        feat: config.transfer_mode,
        nsect: (block_count & 0xff) as u8,
        lbal: (block_count >> 8) as u8,
        lbam: (buffer_offset & 0xff) as u8,
        lbah: (buffer_offset >> 8) as u8,
        ..Default::default()
    };
    Ok(transaction(Opcode::Write, &tf, DataDirection::ToDevice, data, 0))
}

fn encode_non_data(opcode: Opcode, tf: TaskFile) -> CommandTransaction {
    transaction(opcode, &tf, DataDirection::None, &[], 0).with_timeout(ATA_LONG_TIMEOUT)
}

pub fn encode_flush() -> CommandTransaction {
    encode_non_data(
        Opcode::Flush,
        TaskFile {
            dev: ATA_USING_LBA,
            command: ATA_OP_FLUSH_CACHE,
            ..Default::default()
        },
    )
}

pub fn encode_standby() -> CommandTransaction {
    encode_non_data(
        Opcode::Standby,
        TaskFile {
            dev: ATA_USING_LBA,
            command: ATA_OP_STANDBY_IMMEDIATE,
            ..Default::default()
        },
    )
}

pub fn encode_activate() -> CommandTransaction {
    encode_non_data(
        Opcode::Activate,
        TaskFile {
            dev: ATA_DEV_MICROCODE,
            command: ATA_OP_DOWNLOAD_MICROCODE,
            feat: ATA_SUBCMD_ACTIVATE,
            ..Default::default()
        },
    )
}

/// Classify the returned task file. ERR or DRQ set is a device I/O error;
/// the returned sector count is the command-specific detail.
pub fn decode_header(reply: &[u8]) -> Result<ReplyHeader, XferError> {
    if reply.len() < ATA_SENSE_LEN {
        return Err(XferError::ProtocolViolation(format!(
            "reply of {} bytes is shorter than the {}-byte sense buffer",
            reply.len(),
            ATA_SENSE_LEN
        )));
    }
    let tf = TaskFile::from_sense(&reply[..ATA_SENSE_LEN])?;
    debug!(
        stat = %format!("0x{:02X}", tf.status),
        err = %format!("0x{:02X}", tf.error),
        nsect = %format!("0x{:02X}", tf.nsect),
        "ATA task file"
    );
    let status = if tf.status & (ATA_STAT_ERR | ATA_STAT_DRQ) != 0 {
        DeviceStatus::Error {
            status: tf.status,
            detail: tf.error,
        }
    } else {
        DeviceStatus::Ready
    };
    Ok(ReplyHeader {
        status,
        detail: tf.nsect,
        len: ATA_SENSE_LEN,
    })
}

/// Parse a 512-byte identify block.
pub fn parse_identify(config: &AtaConfig, buf: &[u8]) -> Result<DeviceIdentity, XferError> {
    if buf.len() != ATA_IDENTIFY_SIZE {
        return Err(XferError::InvalidData(format!(
            "ID incorrect size, got 0x{:02X}",
            buf.len()
        )));
    }
    let word = |index: usize| field::read_u16(buf, index * 2, Endian::Little);

    if word(83)? & 1 == 0 || word(86)? & 1 == 0 {
        return Err(XferError::NotSupported(
            "DOWNLOAD_MICROCODE not supported by device".into(),
        ));
    }
    config.validate()?;

    let (mut xfer_min, mut xfer_max) = (1u16, 0xFFFFu16);
    if config.is_segmented() {
        xfer_min = match word(234)? {
            0 | 0xFFFF => 1,
            v => v,
        };
        xfer_max = match word(235)? {
            0 | 0xFFFF => xfer_min,
            v => v,
        };
    }
    let transfer_blocks = match config.transfer_blocks {
        0 => xfer_min,
        0xFFFF => xfer_max,
        v => v,
    };

    let serial = field::read_string(buf, 10, 19)?;
    let firmware_version = field::read_string(buf, 23, 26)?;
    let model = field::read_string(buf, 27, 46)?;
    let sku = field::read_string(buf, 170, 173)?;

    let oui = (u32::from(word(108)? & 0x0FFF) << 12) | (u32::from(word(109)? & 0xFFF0) >> 4);

    let mut identity = DeviceIdentity {
        serial,
        sku,
        oui: Some(oui).filter(|&o| o > 0),
        preferred_chunk_size: Some(usize::from(transfer_blocks) * ATA_BLOCK_SIZE),
        max_image_size: Some(config.max_image_size()),
        needs_reboot: config.transfer_mode == ATA_SUBCMD_DOWNLOAD_CHUNKS,
        ..Default::default()
    };
    if let Some(name) = model {
        let vendor = identify_vendor(&name, firmware_version.as_deref());
        identity.vendor = vendor.vendor.map(str::to_string);
        identity.vendor_id = vendor.vendor_id;
        identity.model = Some(vendor.name).filter(|n| !n.is_empty());
    }
    identity.firmware_version = firmware_version;
    parse_dell_component(buf, &mut identity)?;
    Ok(identity)
}

/// Dell-owned drives carry a component id in words 137..=140; when present
/// the drive is reported as Dell's whatever its model string says.
fn parse_dell_component(buf: &[u8], identity: &mut DeviceIdentity) -> Result<(), XferError> {
    let Some(component) = field::read_string(buf, 137, 140)? else {
        return Ok(());
    };
    if !component.is_ascii() || component.len() < 6 {
        debug!(component = %component.escape_debug(), "Invalid Dell component id, skipping");
        return Ok(());
    }
    identity.component_id = Some(format!("STORAGE-DELL-{}", component));
    identity.vendor = Some("Dell".into());
    identity.vendor_id = DELL_VENDOR_ID;
    Ok(())
}

/// Build an identify block; the inverse of [`parse_identify`] for the
/// fields it reads.
pub fn build_identify(
    model: &str,
    serial: &str,
    revision: &str,
    xfer_min: u16,
    xfer_max: u16,
) -> Result<Vec<u8>, XferError> {
    let mut buf = vec![0u8; ATA_IDENTIFY_SIZE];
    field::write_string(&mut buf, 10, 19, serial)?;
    field::write_string(&mut buf, 23, 26, revision)?;
    field::write_string(&mut buf, 27, 46, model)?;
    field::write_u16(&mut buf, 83 * 2, 0x0001, Endian::Little)?;
    field::write_u16(&mut buf, 86 * 2, 0x0001, Endian::Little)?;
    field::write_u16(&mut buf, 234 * 2, xfer_min, Endian::Little)?;
    field::write_u16(&mut buf, 235 * 2, xfer_max, Endian::Little)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_with(tf: TaskFile) -> Vec<u8> {
        tf.to_sense().to_vec()
    }

    #[test]
    fn test_write_cdb_layout() {
        let config = AtaConfig::default();
        let data = vec![0xAB; 3 * 512];
        let tx = encode_write(&config, 0x2_0000, &data).unwrap();
        let cdb = &tx.payload[..ATA_CDB_LEN];
        assert_eq!(cdb[0], SG_ATA_12);
        assert_eq!(cdb[1], SG_ATA_PROTO_PIO_OUT);
        assert_eq!(cdb[2], SG_CDB2_TLEN_NSECT | SG_CDB2_TLEN_SECTORS);
        assert_eq!(cdb[3], ATA_SUBCMD_DOWNLOAD_CHUNKS);
        // 3 blocks at block offset 0x100
        assert_eq!(&cdb[4..10], &[0x03, 0x00, 0x00, 0x01, 0xE0, 0x92]);
        assert_eq!(tx.payload.len(), ATA_CDB_LEN + data.len());
        assert_eq!(tx.reply_len, ATA_SENSE_LEN);
    }

    #[test]
    fn test_write_rejects_partial_block() {
        let err = encode_write(&AtaConfig::default(), 0, &[0u8; 100]).unwrap_err();
        assert!(matches!(err, XferError::Misaligned { .. }));
    }

    #[test]
    fn test_identify_cdb_requests_pio_in() {
        let tx = encode_identify();
        assert_eq!(tx.payload.len(), ATA_CDB_LEN);
        assert_eq!(tx.payload[1], SG_ATA_PROTO_PIO_IN);
        assert_eq!(tx.payload[2] & SG_CDB2_TDIR_FROM_DEV, SG_CDB2_TDIR_FROM_DEV);
        assert_eq!(tx.payload[9], ATA_OP_IDENTIFY);
        assert_eq!(tx.reply_len, ATA_SENSE_LEN + ATA_IDENTIFY_SIZE);
    }

    #[test]
    fn test_non_data_commands_check_condition() {
        for tx in [encode_flush(), encode_standby(), encode_activate()] {
            assert_eq!(tx.payload[1], SG_ATA_PROTO_NON_DATA);
            assert_eq!(tx.payload[2], SG_CDB2_CHECK_COND);
            assert_eq!(tx.timeout, Some(ATA_LONG_TIMEOUT));
        }
        assert_eq!(encode_activate().payload[3], ATA_SUBCMD_ACTIVATE);
    }

    #[test]
    fn test_error_bits_classified() {
        for status in [ATA_STAT_ERR, ATA_STAT_DRQ, 0x51] {
            let reply = reply_with(TaskFile {
                status,
                error: 0x04,
                ..Default::default()
            });
            let header = decode_header(&reply).unwrap();
            assert_eq!(header.status, DeviceStatus::Error { status, detail: 0x04 });
        }

        let ok = decode_header(&reply_with(TaskFile {
            status: 0x50,
            nsect: 0x02,
            ..Default::default()
        }))
        .unwrap();
        assert_eq!(ok.status, DeviceStatus::Ready);
        assert_eq!(ok.detail, 0x02);
    }

    #[test]
    fn test_short_sense_is_protocol_violation() {
        assert!(matches!(decode_header(&[0u8; 10]), Err(XferError::ProtocolViolation(_))));
    }

    #[test]
    fn test_parse_identify() {
        let buf =
            build_identify("Samsung SSD 860 EVO 500GB", "S3Z1NB0K123456", "RVT04B6Q", 2, 64)
                .unwrap();
        let id = parse_identify(&AtaConfig::default(), &buf).unwrap();
        assert_eq!(id.vendor.as_deref(), Some("Samsung"));
        assert_eq!(id.vendor_id, 0x144d);
        assert_eq!(id.model.as_deref(), Some("SSD 860 EVO 500GB"));
        assert_eq!(id.serial.as_deref(), Some("S3Z1NB0K123456"));
        assert_eq!(id.firmware_version.as_deref(), Some("RVT04B6Q"));
        assert_eq!(id.sku, None);
        assert_eq!(id.oui, None);
        // transfer_blocks 0 selects the drive minimum
        assert_eq!(id.preferred_chunk_size, Some(2 * 512));
        assert!(id.needs_reboot);
    }

    #[test]
    fn test_dell_component_id_overrides_vendor() {
        let mut buf =
            build_identify("Samsung SSD 860 EVO 500GB", "S3Z1", "RVT04B6Q", 1, 1).unwrap();
        field::write_string(&mut buf, 137, 140, "ABC123").unwrap();
        let id = parse_identify(&AtaConfig::default(), &buf).unwrap();
        assert_eq!(id.component_id.as_deref(), Some("STORAGE-DELL-ABC123"));
        assert_eq!(id.vendor.as_deref(), Some("Dell"));
        assert_eq!(id.vendor_id, 0x1028);

        // too short to be a component id
        let mut buf =
            build_identify("Samsung SSD 860 EVO 500GB", "S3Z1", "RVT04B6Q", 1, 1).unwrap();
        field::write_string(&mut buf, 137, 140, "AB1").unwrap();
        let id = parse_identify(&AtaConfig::default(), &buf).unwrap();
        assert_eq!(id.component_id, None);
        assert_eq!(id.vendor.as_deref(), Some("Samsung"));
    }

    #[test]
    fn test_transfer_block_selection() {
        let buf = build_identify("ST2000DM008", "Z1", "CC26", 0xFFFF, 0).unwrap();
        let max = AtaConfig {
            transfer_blocks: 0xFFFF,
            ..Default::default()
        };
        // both words unset: min falls back to 1, max to min
        assert_eq!(parse_identify(&max, &buf).unwrap().preferred_chunk_size, Some(512));

        let single = AtaConfig {
            transfer_mode: ATA_SUBCMD_DOWNLOAD_CHUNK,
            transfer_blocks: 0xFFFF,
            ..Default::default()
        };
        let id = parse_identify(&single, &buf).unwrap();
        assert_eq!(id.preferred_chunk_size, Some(0xFFFF * 512));
        assert_eq!(id.max_image_size, Some(0xFFFF));
    }

    #[test]
    fn test_identify_rejects_wrong_size() {
        let err = parse_identify(&AtaConfig::default(), &[0u8; 256]).unwrap_err();
        assert!(matches!(err, XferError::InvalidData(_)));
    }

    #[test]
    fn test_identify_requires_microcode_support() {
        let mut buf = build_identify("WDC WD10EZEX", "WX1", "01.01A01", 1, 1).unwrap();
        field::write_u16(&mut buf, 86 * 2, 0, Endian::Little).unwrap();
        let err = parse_identify(&AtaConfig::default(), &buf).unwrap_err();
        assert!(matches!(err, XferError::NotSupported(_)));
    }

    #[test]
    fn test_oui_extraction() {
        let mut buf = build_identify("ST1000", "Z", "SC13", 1, 1).unwrap();
        field::write_u16(&mut buf, 108 * 2, 0x5000, Endian::Little).unwrap();
        field::write_u16(&mut buf, 109 * 2, 0xC500, Endian::Little).unwrap();
        let id = parse_identify(&AtaConfig::default(), &buf).unwrap();
        // NAA 5, OUI 0x000C50 (Seagate)
        assert_eq!(id.oui, Some(0x000C50));
    }

    #[test]
    fn test_unknown_transfer_mode() {
        let buf = build_identify("ST1000", "Z", "SC13", 1, 1).unwrap();
        let config = AtaConfig {
            transfer_mode: 0x05,
            ..Default::default()
        };
        assert!(matches!(parse_identify(&config, &buf), Err(XferError::NotSupported(_))));
    }
}
