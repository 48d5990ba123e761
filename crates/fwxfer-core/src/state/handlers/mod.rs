//! Stage handlers, one submodule per transfer stage:
//! - `validate`: static checks, identify, policy narrowing
//! - `erase`: sector erase with erased-state readback
//! - `write`: chunked write with in-band status
//! - `verify`: readback comparison
//! - `commit`: activation sequence

mod commit;
mod erase;
mod verify;
mod validate;
mod write;

pub use commit::handle_commit;
pub use erase::handle_erase;
pub use validate::handle_validate;
pub use verify::handle_verify;
pub use write::handle_write;

use crate::error::{TransferError, XferError};
use crate::events::{LogLevel, TransferEvent, TransferObserver};
use crate::payload::PlanParams;
use crate::policy::TransferPolicy;
use crate::protocol::{CommandEngine, DeviceClass, DeviceIdentity};
use crate::state::machine::{StateMachineContext, TransferState};
use crate::transport::Transport;

/// What an attempt achieved, filled in stage by stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub identity: Option<DeviceIdentity>,
    pub total_chunks: usize,
    pub chunks_written: usize,
    pub bytes_written: u64,
    pub erased_blocks: usize,
    pub verified_bytes: u64,
    /// Device declared the image complete before the last chunk.
    pub stopped_early: bool,
    pub final_state: TransferState,
}

/// Everything a stage handler needs.
pub struct HandlerContext<'a, 't, T: Transport + ?Sized, O: TransferObserver + ?Sized> {
    pub engine: CommandEngine<'t, T>,
    pub class: &'t DeviceClass,
    pub observer: &'a O,
    pub machine: StateMachineContext,
    pub blob: &'a [u8],
    /// Narrowed to the device once identified.
    pub policy: TransferPolicy,
    pub report: TransferReport,
}

impl<'a, 't, T: Transport + ?Sized, O: TransferObserver + ?Sized> HandlerContext<'a, 't, T, O> {
    pub fn new(
        engine: CommandEngine<'t, T>,
        class: &'t DeviceClass,
        observer: &'a O,
        blob: &'a [u8],
        policy: TransferPolicy,
    ) -> Self {
        Self {
            engine,
            class,
            observer,
            machine: StateMachineContext::new(policy.requires_erase, policy.requires_verify),
            blob,
            policy,
            report: TransferReport::default(),
        }
    }

    pub(crate) fn emit(&self, event: TransferEvent) {
        self.observer.on_event(&event);
    }

    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(TransferEvent::Log {
            level,
            message: message.into(),
        });
    }

    pub(crate) fn progress(&self, completed: usize, total: usize) {
        self.emit(TransferEvent::Progress {
            state: self.machine.state,
            completed: completed as u64,
            total: total as u64,
        });
    }

    /// Wrap an error with the current stage and a step description.
    pub(crate) fn fail_at(
        &self,
        step: impl Into<String>,
    ) -> impl FnOnce(XferError) -> TransferError {
        let state = self.machine.state;
        let step = step.into();
        move |e| e.at(state, step)
    }

    /// Chunking used by every pass over the image. Chunks never straddle
    /// the class's address window, and the class alignment is a floor the
    /// policy can tighten but not remove.
    pub(crate) fn plan_params(&self) -> PlanParams {
        let mut params = self.policy.plan_params();
        if let Some(required) = self.class.required_alignment() {
            params.block_alignment = Some(match params.block_alignment {
                Some(a) if a % required == 0 => a,
                Some(a) => lcm(a, required),
                None => required,
            });
        }
        if let Some(window) = self.class.window_size().and_then(|w| usize::try_from(w).ok())
            && (params.page_size == 0 || window % params.page_size != 0)
        {
            params.page_size = window;
        }
        if let Some(max) = self.class.max_read() {
            params.max_chunk_size = params.max_chunk_size.min(max);
        }
        params
    }
}

fn lcm(a: usize, b: usize) -> usize {
    let (mut x, mut y) = (a, b);
    while y != 0 {
        (x, y) = (y, x % y);
    }
    a / x * b
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use crate::events::{TransferEvent, TransferObserver};
    use crate::state::machine::TransferState;

    /// Observer that records every event.
    #[derive(Default)]
    pub struct RecordingObserver {
        pub events: Mutex<Vec<TransferEvent>>,
    }

    impl RecordingObserver {
        pub fn progress(&self, state: TransferState) -> Vec<(u64, u64)> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    TransferEvent::Progress {
                        state: s,
                        completed,
                        total,
                    } if *s == state => Some((*completed, *total)),
                    _ => None,
                })
                .collect()
        }

        pub fn states(&self) -> Vec<TransferState> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    TransferEvent::StateChanged { to, .. } => Some(*to),
                    _ => None,
                })
                .collect()
        }
    }

    impl TransferObserver for RecordingObserver {
        fn on_event(&self, event: &TransferEvent) {
            // packets are noise for these assertions
            if !matches!(event, TransferEvent::Packet { .. }) {
                self.events.lock().unwrap().push(event.clone());
            }
        }
    }
}
