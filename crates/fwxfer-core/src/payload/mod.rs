//! Payload handling module.
//!
//! Provides image loading and chunk planning.

pub mod chunk;
pub mod image;

pub use chunk::{Chunk, ChunkPlan, PlanError, PlanParams, plan, plan_chunks};
pub use image::{FirmwareBlob, ImageError, get_firmware_blob};
