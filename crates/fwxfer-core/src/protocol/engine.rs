//! Command protocol engine.
//!
//! Runs one transaction at a time over a borrowed transport, classifies the
//! reply and implements the bounded busy-poll loop. Holds no state besides
//! the currently selected address window.

use std::thread;
use std::time::Duration;

use tracing::{debug, instrument, trace};

use super::class::{DeviceClass, Request};
use super::command::{CommandTransaction, DeviceStatus, Opcode, TransactionStatus, WriteStatus};
use super::identify::DeviceIdentity;
use crate::error::XferError;
use crate::policy::TransferPolicy;
use crate::transport::Transport;

/// Bounded polling for asynchronously completing operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    /// Delay between attempts; never applied after the last one.
    pub interval: Duration,
}

impl PollPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

/// Validated reply of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: DeviceStatus,
    pub detail: u8,
    /// Bytes after the reply header.
    pub data: Vec<u8>,
}

pub struct CommandEngine<'t, T: Transport + ?Sized> {
    transport: &'t mut T,
    class: &'t DeviceClass,
    timeout: Duration,
    poll: PollPolicy,
    window: Option<u64>,
}

impl<'t, T: Transport + ?Sized> CommandEngine<'t, T> {
    pub fn new(
        transport: &'t mut T,
        class: &'t DeviceClass,
        timeout: Duration,
        poll: PollPolicy,
    ) -> Self {
        Self {
            transport,
            class,
            timeout,
            poll,
            window: None,
        }
    }

    pub fn from_policy(
        transport: &'t mut T,
        class: &'t DeviceClass,
        policy: &TransferPolicy,
    ) -> Self {
        Self::new(
            transport,
            class,
            policy.timeout(),
            PollPolicy::new(
                policy.max_poll_attempts,
                Duration::from_millis(policy.poll_interval_ms),
            ),
        )
    }

    pub fn class(&self) -> &DeviceClass {
        self.class
    }

    /// Apply new limits after the policy has been narrowed.
    pub fn reconfigure(&mut self, policy: &TransferPolicy) {
        self.timeout = policy.timeout();
        self.poll = PollPolicy::new(
            policy.max_poll_attempts,
            Duration::from_millis(policy.poll_interval_ms),
        );
    }

    /// Run one transaction and classify the result, in order: channel
    /// failure, device-reported error, reply length mismatch.
    ///
    /// A busy status is returned as a successful reply; whether to wait is
    /// the caller's decision.
    pub fn execute(&mut self, tx: &mut CommandTransaction) -> Result<Reply, XferError> {
        let timeout = tx.timeout.unwrap_or(self.timeout);
        let expected = if tx.expects_reply { tx.reply_len } else { 0 };
        trace!(op = %tx.opcode, len = tx.payload.len(), expected, "Transaction");

        let raw = match self.transport.transact(&tx.payload, expected, timeout) {
            Ok(raw) => raw,
            Err(e) => {
                tx.status = Some(TransactionStatus::ChannelError);
                return Err(e.into());
            }
        };

        if !tx.expects_reply {
            tx.status = Some(TransactionStatus::Success);
            return Ok(Reply {
                status: DeviceStatus::Ready,
                detail: 0,
                data: Vec::new(),
            });
        }

        let header = match self.class.decode_header(&raw) {
            Ok(header) => header,
            Err(e) => {
                tx.status = Some(TransactionStatus::Malformed);
                return Err(e);
            }
        };
        if let DeviceStatus::Error { status, detail } = header.status {
            tx.status = Some(TransactionStatus::DeviceError { status, detail });
            debug!(op = %tx.opcode, status, detail, "Device reported error");
            return Err(XferError::Device { status, detail });
        }
        if raw.len() != tx.reply_len {
            tx.status = Some(TransactionStatus::Malformed);
            return Err(XferError::ProtocolViolation(format!(
                "{} reply is {} bytes, expected {}",
                tx.opcode,
                raw.len(),
                tx.reply_len
            )));
        }

        tx.status = Some(match header.status {
            DeviceStatus::Busy(code) => TransactionStatus::NotReady(code),
            _ => TransactionStatus::Success,
        });
        Ok(Reply {
            status: header.status,
            detail: header.detail,
            data: raw[header.len..].to_vec(),
        })
    }

    /// Encode and execute a request.
    pub fn request(&mut self, request: Request<'_>) -> Result<Reply, XferError> {
        let opcode = request.opcode();
        if !self.class.supports(opcode) {
            return Err(XferError::NotSupported(format!("{} on {} devices", opcode, self.class)));
        }
        let mut tx = self.class.encode(&request)?;
        self.execute(&mut tx)
    }

    /// Poll the status register until the device is ready.
    ///
    /// Gives up with [`XferError::Timeout`] after exactly
    /// `max_attempts` polls, carrying the last observed status.
    pub fn poll_until_ready(&mut self) -> Result<Reply, XferError> {
        let max_attempts = self.poll.max_attempts.max(1);
        let mut last_status = DeviceStatus::Busy(0);
        for attempt in 1..=max_attempts {
            let reply = self.request(Request::Status)?;
            if reply.status.is_ready() {
                trace!(attempt, "Device ready");
                return Ok(reply);
            }
            last_status = reply.status;
            debug!(attempt, status = %last_status, "Device busy");
            if attempt < max_attempts && !self.poll.interval.is_zero() {
                thread::sleep(self.poll.interval);
            }
        }
        Err(XferError::Timeout {
            attempts: max_attempts,
            last_status,
        })
    }

    fn select_window(&mut self, address: u64) -> Result<(), XferError> {
        let Some(size) = self.class.window_size() else {
            return Ok(());
        };
        let base = address & !(size - 1);
        if self.window != Some(base) {
            debug!(base = %format!("0x{:X}", base), "Selecting address window");
            self.request(Request::SetOffset { address: base })?;
            self.window = Some(base);
        }
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    pub fn identify(&mut self) -> Result<DeviceIdentity, XferError> {
        let reply = self.request(Request::Identify)?;
        self.class.parse_identify(&reply.data)
    }

    /// Write one chunk and resolve its in-band status.
    pub fn write_chunk(&mut self, address: u64, data: &[u8]) -> Result<WriteStatus, XferError> {
        self.select_window(address)?;
        if self.class.needs_write_enable() {
            self.request(Request::WriteEnable)?;
        }
        let mut reply = self.request(Request::Write { address, data })?;
        if !reply.status.is_ready() {
            // program still running; the final status carries the result
            reply = self.poll_until_ready()?;
        }
        Ok(self.class.write_status().resolve(reply.detail))
    }

    pub fn read(&mut self, address: u64, len: usize) -> Result<Vec<u8>, XferError> {
        if !self.class.supports(Opcode::Read) {
            return Err(XferError::NotSupported(format!("READ on {} devices", self.class)));
        }
        self.select_window(address)?;
        let reply = self.request(Request::Read { address, len })?;
        if !reply.status.is_ready() {
            return Err(XferError::ProtocolViolation(format!(
                "READ @0x{:X} answered {}",
                address, reply.status
            )));
        }
        Ok(reply.data)
    }

    /// Erase the block at `address` and wait for completion.
    pub fn erase(&mut self, address: u64) -> Result<(), XferError> {
        self.select_window(address)?;
        if self.class.needs_write_enable() {
            self.request(Request::WriteEnable)?;
        }
        self.request(Request::Erase { address })?;
        self.poll_until_ready()?;
        Ok(())
    }

    /// Issue the activation sequence. With `resets` set, the final command
    /// is sent without reading a reply because the device drops off the
    /// bus immediately.
    pub fn activate(&mut self, resets: bool) -> Result<(), XferError> {
        let sequence = self.class.activation_sequence();
        for (i, &opcode) in sequence.iter().enumerate() {
            let request = match opcode {
                Opcode::Flush => Request::Flush,
                Opcode::Standby => Request::Standby,
                Opcode::WriteDisable => Request::WriteDisable,
                _ => Request::Activate,
            };
            let mut tx = self.class.encode(&request)?;
            if resets && i + 1 == sequence.len() {
                tx.expects_reply = false;
            }
            debug!(op = %opcode, "Activation step");
            self.execute(&mut tx)?;
        }
        self.window = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ata::{AtaConfig, TaskFile};
    use crate::protocol::bridge::BridgeConfig;
    use crate::protocol::constants::*;
    use crate::transport::{MockReply, MockTransport, TransportError};

    fn bridge() -> DeviceClass {
        DeviceClass::SpiBridge(BridgeConfig::default())
    }

    fn engine<'t>(
        mock: &'t mut MockTransport,
        class: &'t DeviceClass,
        attempts: u32,
    ) -> CommandEngine<'t, MockTransport> {
        let poll = PollPolicy::new(attempts, Duration::ZERO);
        CommandEngine::new(mock, class, Duration::from_millis(100), poll)
    }

    #[test]
    fn test_channel_error_never_success() {
        let class = bridge();
        let mut mock = MockTransport::new();
        mock.queue(MockReply::Disconnect);
        let mut engine = engine(&mut mock, &class, 3);

        let mut tx = class.encode(&Request::Status).unwrap();
        let err = engine.execute(&mut tx).unwrap_err();
        assert!(matches!(err, XferError::Channel(TransportError::Disconnected)));
        assert_eq!(tx.status, Some(TransactionStatus::ChannelError));
    }

    #[test]
    fn test_device_error_bit_wins_over_channel_success() {
        let class = DeviceClass::Ata(AtaConfig::default());
        let mut mock = MockTransport::new();
        // Error status and a truncated body: the status is checked first.
        mock.queue_reply(
            &TaskFile {
                status: 0x51,
                error: 0x04,
                ..Default::default()
            }
            .to_sense(),
        );
        let mut engine = engine(&mut mock, &class, 1);

        let mut tx = class.encode(&Request::Identify).unwrap();
        let err = engine.execute(&mut tx).unwrap_err();
        assert!(matches!(err, XferError::Device { status: 0x51, detail: 0x04 }));
        assert_eq!(
            tx.status,
            Some(TransactionStatus::DeviceError {
                status: 0x51,
                detail: 0x04
            })
        );
    }

    #[test]
    fn test_reply_length_mismatch() {
        let class = bridge();
        let mut mock = MockTransport::new();
        mock.queue_reply(&[BRIDGE_STATUS_IDLE_SUCCESS, 0, 0xFF]);
        let mut engine = engine(&mut mock, &class, 1);

        let mut tx = class.encode(&Request::Status).unwrap();
        assert!(matches!(engine.execute(&mut tx), Err(XferError::ProtocolViolation(_))));
        assert_eq!(tx.status, Some(TransactionStatus::Malformed));
    }

    #[test]
    fn test_poll_exhaustion_is_exact() {
        let class = bridge();
        let mut mock = MockTransport::new();
        let handle = mock.clone();
        mock.set_fallback_reply(&[BRIDGE_STATUS_BUSY, 0]);
        let mut engine = engine(&mut mock, &class, 3);

        let err = engine.poll_until_ready().unwrap_err();
        match err {
            XferError::Timeout { attempts, last_status } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_status, DeviceStatus::Busy(BRIDGE_STATUS_BUSY));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(handle.request_count(), 3);
    }

    #[test]
    fn test_poll_stops_on_first_ready() {
        let class = bridge();
        let mut mock = MockTransport::new();
        let handle = mock.clone();
        mock.queue_reply(&[BRIDGE_STATUS_BUSY, 0]);
        mock.queue_reply(&[BRIDGE_STATUS_IDLE_SUCCESS, 0]);
        mock.set_fallback_reply(&[BRIDGE_STATUS_BUSY, 0]);
        let mut engine = engine(&mut mock, &class, 10);

        assert!(engine.poll_until_ready().is_ok());
        assert_eq!(handle.request_count(), 2);
    }

    #[test]
    fn test_window_selected_once_per_window() {
        let class = bridge();
        let mut mock = MockTransport::new();
        let handle = mock.clone();
        mock.set_fallback_reply(&[BRIDGE_STATUS_IDLE_SUCCESS, 0]);
        let mut engine = engine(&mut mock, &class, 1);

        for address in [0x0, 0x100, 0x1_0000] {
            assert_eq!(engine.write_chunk(address, &[0u8; 16]).unwrap(), WriteStatus::Continue);
        }
        let set_offsets = handle
            .requests()
            .iter()
            .filter(|r| r.bytes[0] == BRIDGE_OP_CONTROL && r.bytes[1] == BRIDGE_SUB_SET_OFFSET)
            .count();
        assert_eq!(set_offsets, 2);
    }

    #[test]
    fn test_ata_write_status_resolved() {
        let class = DeviceClass::Ata(AtaConfig::default());
        let mut mock = MockTransport::new();
        mock.queue_reply(
            &TaskFile {
                status: 0x50,
                nsect: 0x04,
                ..Default::default()
            }
            .to_sense(),
        );
        let mut engine = engine(&mut mock, &class, 1);
        assert_eq!(engine.write_chunk(0, &[0u8; 512]).unwrap(), WriteStatus::AlignmentError);
    }

    #[test]
    fn test_activation_without_reply() {
        let class = bridge();
        let mut mock = MockTransport::new();
        let handle = mock.clone();
        mock.queue_reply(&[BRIDGE_STATUS_IDLE_SUCCESS, 0]);
        let mut engine = engine(&mut mock, &class, 1);

        engine.activate(true).unwrap();
        let requests = handle.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].bytes[0], BRIDGE_OP_RESET);
        assert_eq!(requests[1].expected_reply_len, 0);
    }

    #[test]
    fn test_ata_activation_uses_long_timeout() {
        let class = DeviceClass::Ata(AtaConfig::default());
        let mut mock = MockTransport::new();
        let handle = mock.clone();
        mock.set_fallback_reply(&TaskFile { status: 0x50, ..Default::default() }.to_sense());
        let mut engine = engine(&mut mock, &class, 1);

        engine.activate(false).unwrap();
        let commands: Vec<u8> = handle.requests().iter().map(|r| r.bytes[9]).collect();
        assert_eq!(
            commands,
            vec![ATA_OP_FLUSH_CACHE, ATA_OP_STANDBY_IMMEDIATE, ATA_OP_DOWNLOAD_MICROCODE]
        );
        assert!(handle.requests().iter().all(|r| r.timeout == ATA_LONG_TIMEOUT));
    }
}
