//! Transport layer module.

pub mod mock;
pub mod nusb;
pub mod sim;
pub mod traits;

pub use mock::{MockReply, MockRequest, MockTransport};
pub use self::nusb::{NusbTransport, UsbDescriptor, open_channel};
pub use sim::{FlashSimulator, SimFaults, SimStats};
pub use traits::{Transport, TransportError};
