//! Transfer stage machine and the handlers that run each stage.

pub mod handlers;
pub mod machine;

pub use handlers::{HandlerContext, TransferReport};
pub use machine::{StateMachineContext, TransferState};
