//! Command transactions and the status values they resolve to.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Operation kinds. Each device class maps these onto its own wire
/// encoding; there is no shared numeric space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Identify,
    Read,
    Write,
    SetOffset,
    Erase,
    Status,
    WriteEnable,
    WriteDisable,
    Flush,
    Standby,
    Activate,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::Identify => "IDENTIFY",
            Opcode::Read => "READ",
            Opcode::Write => "WRITE",
            Opcode::SetOffset => "SET_OFFSET",
            Opcode::Erase => "ERASE",
            Opcode::Status => "STATUS",
            Opcode::WriteEnable => "WRITE_ENABLE",
            Opcode::WriteDisable => "WRITE_DISABLE",
            Opcode::Flush => "FLUSH",
            Opcode::Standby => "STANDBY",
            Opcode::Activate => "ACTIVATE",
        };
        f.write_str(name)
    }
}

/// Device state as reported in a reply header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Ready,
    /// Benign not-ready signal; the raw status byte is kept for reporting.
    Busy(u8),
    Error { status: u8, detail: u8 },
}

impl DeviceStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, DeviceStatus::Ready)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Ready => write!(f, "ready"),
            DeviceStatus::Busy(raw) => write!(f, "busy (0x{:02X})", raw),
            DeviceStatus::Error { status, detail } => {
                write!(f, "error (status=0x{:02X} detail=0x{:02X})", status, detail)
            }
        }
    }
}

/// Decoded reply header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHeader {
    pub status: DeviceStatus,
    /// Command-specific byte returned alongside the status, such as the
    /// in-band write status.
    pub detail: u8,
    /// Bytes occupied by the header at the front of the reply.
    pub len: usize,
}

/// Outcome recorded on a transaction once it has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Success,
    NotReady(u8),
    DeviceError { status: u8, detail: u8 },
    /// Reply arrived but falls outside the response grammar.
    Malformed,
    ChannelError,
}

impl TransactionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TransactionStatus::Success)
    }
}

/// One outbound request and its optional reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTransaction {
    pub opcode: Opcode,
    /// Fully encoded request bytes.
    pub payload: Vec<u8>,
    pub expects_reply: bool,
    /// Exact reply length including the header.
    pub reply_len: usize,
    /// Overrides the engine default when set.
    pub timeout: Option<Duration>,
    pub status: Option<TransactionStatus>,
}

impl CommandTransaction {
    pub fn new(opcode: Opcode, payload: Vec<u8>, reply_len: usize) -> Self {
        Self {
            opcode,
            payload,
            expects_reply: true,
            reply_len,
            timeout: None,
            status: None,
        }
    }

    /// A request whose reply is never read.
    pub fn fire_and_forget(opcode: Opcode, payload: Vec<u8>) -> Self {
        Self {
            expects_reply: false,
            ..Self::new(opcode, payload, 0)
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// In-band write acknowledgement, resolved once at the engine boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Continue,
    Done,
    AlignmentError,
    UnknownCode(u8),
}

/// Per-class mapping from raw write-status codes to [`WriteStatus`].
///
/// Several vendors document these codes only by observed value, so the
/// mapping is data rather than logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteStatusTable {
    pub continue_codes: Vec<u8>,
    pub done_codes: Vec<u8>,
    pub alignment_error_codes: Vec<u8>,
}

impl WriteStatusTable {
    pub fn resolve(&self, code: u8) -> WriteStatus {
        if self.continue_codes.contains(&code) {
            WriteStatus::Continue
        } else if self.done_codes.contains(&code) {
            WriteStatus::Done
        } else if self.alignment_error_codes.contains(&code) {
            WriteStatus::AlignmentError
        } else {
            WriteStatus::UnknownCode(code)
        }
    }

    /// ATA DOWNLOAD MICROCODE: 0 and 1 ask for more data, 2 reports the
    /// image complete, 4 flags a bad buffer offset.
    pub fn ata_default() -> Self {
        Self {
            continue_codes: vec![0x00, 0x01],
            done_codes: vec![0x02],
            alignment_error_codes: vec![0x04],
        }
    }

    pub fn bridge_default() -> Self {
        Self {
            continue_codes: vec![0x00],
            done_codes: vec![0x01],
            alignment_error_codes: vec![0x04],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ata_write_status_table() {
        let table = WriteStatusTable::ata_default();
        assert_eq!(table.resolve(0x00), WriteStatus::Continue);
        assert_eq!(table.resolve(0x01), WriteStatus::Continue);
        assert_eq!(table.resolve(0x02), WriteStatus::Done);
        assert_eq!(table.resolve(0x04), WriteStatus::AlignmentError);
        assert_eq!(table.resolve(0x03), WriteStatus::UnknownCode(0x03));
    }

    #[test]
    fn test_fire_and_forget_has_no_reply() {
        let tx = CommandTransaction::fire_and_forget(Opcode::Activate, vec![0xE6]);
        assert!(!tx.expects_reply);
        assert_eq!(tx.reply_len, 0);
        assert_eq!(tx.status, None);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(DeviceStatus::Busy(0xBB).to_string(), "busy (0xBB)");
        assert_eq!(
            DeviceStatus::Error {
                status: 0x51,
                detail: 0x04
            }
            .to_string(),
            "error (status=0x51 detail=0x04)"
        );
    }
}
