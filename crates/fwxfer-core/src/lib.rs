//! fwxfer-core: chunked firmware transfer for ATA drives and SPI flash
//! behind USB bridges.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Field**: bounds-checked reads of fixed-layout binary fields
//! - **Payload**: image loading and chunk planning
//! - **Transport**: request/response channel abstraction (nusb, mock, simulator)
//! - **Protocol**: per-class command encoding, reply classification, polling
//! - **State**: stage machine and stage handlers
//! - **Events**: observer pattern for UI decoupling
//! - **Session**: high-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use fwxfer_core::config::UpdateConfig;
//! use fwxfer_core::payload::get_firmware_blob;
//! use fwxfer_core::session::TransferSession;
//! use fwxfer_core::transport::open_channel;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = UpdateConfig::load_from_file("update.toml")?;
//! let blob = get_firmware_blob("firmware.bin")?;
//! let usb = config.usb.ok_or_else(|| anyhow::anyhow!("no usb device configured"))?;
//! let mut channel = open_channel(&usb)?;
//!
//! let session = TransferSession::new(config.device.clone(), config.effective_policy());
//! let report = session.run(blob.as_bytes(), &mut channel)?;
//! println!("wrote {} chunks", report.chunks_written);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod field;
pub mod payload;
pub mod policy;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use config::UpdateConfig;
pub use error::{TransferError, XferError};
pub use events::{LogLevel, NullObserver, TracingObserver, TransferEvent, TransferObserver};
pub use payload::{Chunk, FirmwareBlob, PlanParams, get_firmware_blob, plan_chunks};
pub use policy::{AddressRange, TransferPolicy};
pub use protocol::{DeviceClass, DeviceIdentity, WriteStatus};
pub use session::{TransferSession, run_transfer};
pub use state::{TransferReport, TransferState};
pub use transport::{
    FlashSimulator, MockTransport, NusbTransport, Transport, TransportError, UsbDescriptor,
    open_channel,
};
