//! Command protocol: request encoding, reply classification and polling.

pub mod ata;
pub mod bridge;
pub mod class;
pub mod command;
pub mod constants;
pub mod engine;
pub mod identify;
pub mod vendor;

pub use class::{DeviceClass, Request};
pub use command::{
    CommandTransaction, DeviceStatus, Opcode, ReplyHeader, TransactionStatus, WriteStatus,
    WriteStatusTable,
};
pub use engine::{CommandEngine, PollPolicy, Reply};
pub use identify::DeviceIdentity;
