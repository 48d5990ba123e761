//! Event system for UI decoupling.
//!
//! Lets the CLI or any other front end follow a transfer without the core
//! depending on it. Events are observational only.

use std::fmt;

use crate::protocol::DeviceIdentity;
use crate::state::TransferState;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Events emitted by a transfer session.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    StateChanged {
        from: TransferState,
        to: TransferState,
    },
    /// Emitted after each erase unit, written chunk and verified chunk.
    Progress {
        state: TransferState,
        completed: u64,
        total: u64,
    },
    Identified { identity: DeviceIdentity },
    /// One frame on the channel.
    Packet {
        direction: PacketDirection,
        length: usize,
        /// Leading bytes of the frame.
        head: Vec<u8>,
    },
    Log { level: LogLevel, message: String },
    Failed {
        state: TransferState,
        message: String,
    },
    Complete,
}

/// Packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // host -> device
    Rx, // device -> host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving transfer events.
///
/// Implement this in the UI layer to receive updates.
pub trait TransferObserver: Send + Sync {
    fn on_event(&self, event: &TransferEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl TransferObserver for NullObserver {
    fn on_event(&self, _event: &TransferEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl TransferObserver for TracingObserver {
    fn on_event(&self, event: &TransferEvent) {
        match event {
            TransferEvent::StateChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Stage changed");
            }
            TransferEvent::Progress {
                state,
                completed,
                total,
            } => {
                let pct = if *total > 0 {
                    (*completed * 100) / *total
                } else {
                    0
                };
                tracing::debug!(
                    state = %state,
                    completed,
                    total,
                    progress = %format!("{}%", pct),
                    "Progress"
                );
            }
            TransferEvent::Identified { identity } => {
                tracing::info!(device = %identity, "Device identified");
            }
            TransferEvent::Packet {
                direction, length, ..
            } => {
                tracing::trace!(dir = %direction, len = length, "Packet");
            }
            TransferEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            TransferEvent::Failed { state, message } => {
                tracing::error!(state = %state, "Transfer failed: {}", message);
            }
            TransferEvent::Complete => {
                tracing::info!("Transfer complete");
            }
        }
    }
}
