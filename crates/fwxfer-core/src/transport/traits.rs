//! Transport layer abstraction.
//!
//! Defines the `Transport` trait: one bounded-time request/response
//! exchange over whatever channel reaches the device (USB bulk pipe,
//! SCSI generic passthrough, bridged register access, or a simulator).

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Endpoint not found: type={ep_type}, direction={direction}")]
    EndpointNotFound { ep_type: String, direction: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract request/response channel.
///
/// Taking `&mut self` makes the session that holds the channel its only
/// user for the duration of an update attempt.
pub trait Transport: Send {
    /// Send `request` and, when `expected_reply_len > 0`, wait up to
    /// `timeout` for the reply. The returned bytes are whatever the device
    /// produced; length validation belongs to the caller.
    fn transact(
        &mut self,
        request: &[u8],
        expected_reply_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;

    /// Check if device is still connected.
    fn is_connected(&self) -> bool;

    /// Short human-readable name of the channel for logs.
    fn describe(&self) -> String {
        "transport".to_string()
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn transact(
        &mut self,
        request: &[u8],
        expected_reply_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        (**self).transact(request, expected_reply_len, timeout)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn transact(
        &mut self,
        request: &[u8],
        expected_reply_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        (**self).transact(request, expected_reply_len, timeout)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
