//! Error taxonomy shared by the protocol engine and the orchestrator.

use thiserror::Error;

use crate::field::FieldError;
use crate::payload::PlanError;
use crate::protocol::DeviceStatus;
use crate::state::TransferState;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum XferError {
    /// Malformed or undersized buffer, bad declared length, or a
    /// device-specific status that flags the data itself as wrong.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("{what} 0x{value:X} is not a multiple of the {alignment}-byte block size")]
    Misaligned {
        what: &'static str,
        value: u64,
        alignment: usize,
    },

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Channel error: {0}")]
    Channel(#[from] TransportError),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Device reported error: status=0x{status:02X} detail=0x{detail:02X}")]
    Device { status: u8, detail: u8 },

    #[error("Timed out after {attempts} poll attempts, last status {last_status}")]
    Timeout {
        attempts: u32,
        last_status: DeviceStatus,
    },

    #[error("Readback mismatch @0x{address:X}: expected 0x{expected:02X}, got 0x{actual:02X}")]
    VerifyMismatch { address: u64, expected: u8, actual: u8 },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl XferError {
    /// Attach the orchestrator state and step in which this error surfaced.
    pub fn at(self, state: TransferState, step: impl Into<String>) -> TransferError {
        TransferError {
            state,
            step: step.into(),
            source: self,
        }
    }

    pub fn is_channel(&self) -> bool {
        matches!(self, XferError::Channel(_))
    }
}

impl From<FieldError> for XferError {
    fn from(e: FieldError) -> Self {
        XferError::InvalidData(e.to_string())
    }
}

impl From<PlanError> for XferError {
    fn from(e: PlanError) -> Self {
        match e {
            PlanError::Misaligned { size, alignment } => XferError::Misaligned {
                what: "Image size",
                value: size as u64,
                alignment,
            },
            PlanError::AlignmentConflict {
                what: "Origin address",
                value,
                alignment,
            } => XferError::Misaligned {
                what: "Origin address",
                value,
                alignment,
            },
            other => XferError::Config(other.to_string()),
        }
    }
}

/// Final error of a transfer attempt: the failing state and step prefixed
/// onto the lowest-level cause.
#[derive(Error, Debug)]
#[error("{state}: {step}: {source}")]
pub struct TransferError {
    pub state: TransferState,
    pub step: String,
    #[source]
    pub source: XferError,
}

impl TransferError {
    pub fn kind(&self) -> &XferError {
        &self.source
    }

    pub fn into_kind(self) -> XferError {
        self.source
    }
}
