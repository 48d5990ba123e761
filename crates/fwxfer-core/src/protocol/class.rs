//! Supported device classes.
//!
//! The set is closed: each variant carries its immutable target
//! configuration and every class-specific decision is a `match` here, so
//! the engine and orchestrator stay generic over the transport only.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ata::{self, AtaConfig};
use super::bridge::{self, BridgeConfig};
use super::command::{CommandTransaction, Opcode, ReplyHeader, WriteStatusTable};
use super::constants::{ATA_BLOCK_SIZE, ATA_LONG_TIMEOUT};
use super::identify::DeviceIdentity;
use crate::error::XferError;
use crate::policy::TransferPolicy;

/// A request before encoding. Addresses are absolute device addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    Identify,
    Read { address: u64, len: usize },
    Write { address: u64, data: &'a [u8] },
    SetOffset { address: u64 },
    Erase { address: u64 },
    Status,
    WriteEnable,
    WriteDisable,
    Flush,
    Standby,
    Activate,
}

impl Request<'_> {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::Identify => Opcode::Identify,
            Request::Read { .. } => Opcode::Read,
            Request::Write { .. } => Opcode::Write,
            Request::SetOffset { .. } => Opcode::SetOffset,
            Request::Erase { .. } => Opcode::Erase,
            Request::Status => Opcode::Status,
            Request::WriteEnable => Opcode::WriteEnable,
            Request::WriteDisable => Opcode::WriteDisable,
            Request::Flush => Opcode::Flush,
            Request::Standby => Opcode::Standby,
            Request::Activate => Opcode::Activate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DeviceClass {
    /// ATA drive, DOWNLOAD MICROCODE over ATA PASS-THROUGH (12).
    Ata(AtaConfig),
    /// SPI flash behind a vendor bridge with windowed addressing.
    SpiBridge(BridgeConfig),
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl DeviceClass {
    pub fn label(&self) -> &'static str {
        match self {
            DeviceClass::Ata(_) => "ata",
            DeviceClass::SpiBridge(_) => "spi-bridge",
        }
    }

    pub fn validate(&self) -> Result<(), XferError> {
        match self {
            DeviceClass::Ata(config) => config.validate(),
            DeviceClass::SpiBridge(config) => config.validate(),
        }
    }

    pub fn supports(&self, opcode: Opcode) -> bool {
        match self {
            DeviceClass::Ata(_) => matches!(
                opcode,
                Opcode::Identify
                    | Opcode::Write
                    | Opcode::Flush
                    | Opcode::Standby
                    | Opcode::Activate
            ),
            DeviceClass::SpiBridge(_) => !matches!(opcode, Opcode::Flush | Opcode::Standby),
        }
    }

    pub fn encode(&self, request: &Request<'_>) -> Result<CommandTransaction, XferError> {
        let unsupported = || {
            XferError::NotSupported(format!("{} on {} devices", request.opcode(), self.label()))
        };
        match self {
            DeviceClass::Ata(config) => match *request {
                Request::Identify => Ok(ata::encode_identify()),
                Request::Write { address, data } => ata::encode_write(config, address, data),
                Request::Flush => Ok(ata::encode_flush()),
                Request::Standby => Ok(ata::encode_standby()),
                Request::Activate => Ok(ata::encode_activate()),
                _ => Err(unsupported()),
            },
            DeviceClass::SpiBridge(config) => match *request {
                Request::Identify => bridge::encode_identify(),
                Request::Read { address, len } => {
                    config.check_span(address, len)?;
                    bridge::encode_read(config.split_address(address).1, len)
                }
                Request::Write { address, data } => {
                    config.check_span(address, data.len())?;
                    bridge::encode_write(config.split_address(address).1, data)
                }
                Request::SetOffset { address } => {
                    bridge::encode_set_offset(config.split_address(address).0)
                }
                Request::Erase { address } => bridge::encode_erase(config.split_address(address).1),
                Request::Status => bridge::encode_status(),
                Request::WriteEnable => bridge::encode_write_enable(),
                Request::WriteDisable => bridge::encode_write_disable(),
                Request::Activate => bridge::encode_reset(),
                Request::Flush | Request::Standby => Err(unsupported()),
            },
        }
    }

    pub fn decode_header(&self, reply: &[u8]) -> Result<ReplyHeader, XferError> {
        match self {
            DeviceClass::Ata(_) => ata::decode_header(reply),
            DeviceClass::SpiBridge(_) => bridge::decode_header(reply),
        }
    }

    pub fn write_status(&self) -> &WriteStatusTable {
        match self {
            DeviceClass::Ata(config) => &config.write_status,
            DeviceClass::SpiBridge(config) => &config.write_status,
        }
    }

    pub fn parse_identify(&self, body: &[u8]) -> Result<DeviceIdentity, XferError> {
        match self {
            DeviceClass::Ata(config) => ata::parse_identify(config, body),
            DeviceClass::SpiBridge(config) => bridge::parse_identify(config, body),
        }
    }

    /// Size of the address window selected by SET_OFFSET, if the class
    /// addresses memory through one.
    pub fn window_size(&self) -> Option<u64> {
        match self {
            DeviceClass::Ata(_) => None,
            DeviceClass::SpiBridge(config) => Some(config.window_size),
        }
    }

    /// Block multiple every image for this class must have, whatever the
    /// policy says.
    pub fn required_alignment(&self) -> Option<usize> {
        match self {
            DeviceClass::Ata(_) => Some(ATA_BLOCK_SIZE),
            DeviceClass::SpiBridge(_) => None,
        }
    }

    /// Largest payload of one read.
    pub fn max_read(&self) -> Option<usize> {
        match self {
            DeviceClass::Ata(_) => None,
            DeviceClass::SpiBridge(config) => Some(config.max_transfer),
        }
    }

    /// Program and erase need the write latch set first.
    pub fn needs_write_enable(&self) -> bool {
        matches!(self, DeviceClass::SpiBridge(_))
    }

    /// Commands issued, in order, to make the new image take effect.
    pub fn activation_sequence(&self) -> &'static [Opcode] {
        match self {
            DeviceClass::Ata(_) => &[Opcode::Flush, Opcode::Standby, Opcode::Activate],
            DeviceClass::SpiBridge(_) => &[Opcode::WriteDisable, Opcode::Activate],
        }
    }

    pub fn default_policy(&self) -> TransferPolicy {
        match self {
            DeviceClass::Ata(config) => TransferPolicy {
                chunk_size: ATA_BLOCK_SIZE,
                requires_erase: false,
                requires_verify: false,
                block_alignment: ATA_BLOCK_SIZE,
                max_poll_attempts: 1,
                poll_interval_ms: 0,
                erase_block_size: 0,
                max_image_size: Some(config.max_image_size()),
                timeout_ms: ATA_LONG_TIMEOUT.as_millis() as u64,
                ..Default::default()
            },
            DeviceClass::SpiBridge(config) => TransferPolicy {
                chunk_size: 256.min(config.max_transfer),
                requires_erase: true,
                requires_verify: true,
                page_size: 256,
                erase_block_size: 0x1000,
                timeout_ms: 1500,
                activation_resets: true,
                ..Default::default()
            },
        }
    }
}

impl Default for DeviceClass {
    fn default() -> Self {
        DeviceClass::SpiBridge(BridgeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ata_rejects_bridge_only_requests() {
        let class = DeviceClass::Ata(AtaConfig::default());
        assert!(!class.supports(Opcode::Read));
        assert!(matches!(
            class.encode(&Request::Erase { address: 0 }),
            Err(XferError::NotSupported(_))
        ));
    }

    #[test]
    fn test_bridge_encodes_window_offsets() {
        let class = DeviceClass::SpiBridge(BridgeConfig::default());
        let tx = class
            .encode(&Request::Write {
                address: 0x1_0040,
                data: &[1, 2, 3, 4],
            })
            .unwrap();
        // offset inside the window, not the absolute address
        assert_eq!(&tx.payload[2..6], &[0, 0, 0x00, 0x40]);

        let tx = class.encode(&Request::SetOffset { address: 0x1_0040 }).unwrap();
        assert_eq!(&tx.payload[2..6], &[0, 1, 0, 0]);
    }

    #[test]
    fn test_required_alignment() {
        assert_eq!(DeviceClass::Ata(AtaConfig::default()).required_alignment(), Some(512));
        assert_eq!(DeviceClass::SpiBridge(BridgeConfig::default()).required_alignment(), None);
    }

    #[test]
    fn test_default_policies_are_valid() {
        for class in [
            DeviceClass::Ata(AtaConfig::default()),
            DeviceClass::SpiBridge(BridgeConfig::default()),
        ] {
            assert!(class.default_policy().validate().is_ok(), "{}", class);
        }
    }

    #[test]
    fn test_class_toml_tagging() {
        let class = DeviceClass::Ata(AtaConfig::default());
        let text = toml::to_string(&class).unwrap();
        assert!(text.contains("kind = \"ata\""));
        let back: DeviceClass = toml::from_str(&text).unwrap();
        assert_eq!(back, class);

        let bridge: DeviceClass =
            toml::from_str("kind = \"spi-bridge\"\nmax_transfer = 512\n").unwrap();
        match bridge {
            DeviceClass::SpiBridge(config) => {
                assert_eq!(config.max_transfer, 512);
                assert_eq!(config.window_size, 0x1_0000);
            }
            other => panic!("unexpected class {other}"),
        }
    }
}
