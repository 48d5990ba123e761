//! Stage machine for one update attempt.

use std::fmt;

use crate::error::XferError;

/// Stage of a transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransferState {
    #[default]
    Idle,
    Validating,
    Erasing,
    Writing,
    Verifying,
    Committing,
    Done,
    Failed,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferState::Idle => write!(f, "idle"),
            TransferState::Validating => write!(f, "validating"),
            TransferState::Erasing => write!(f, "erasing"),
            TransferState::Writing => write!(f, "writing"),
            TransferState::Verifying => write!(f, "verifying"),
            TransferState::Committing => write!(f, "committing"),
            TransferState::Done => write!(f, "done"),
            TransferState::Failed => write!(f, "failed"),
        }
    }
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Done | TransferState::Failed)
    }
}

/// Runtime state of the attempt: where it is and which optional stages
/// apply.
#[derive(Debug, Default, Clone)]
pub struct StateMachineContext {
    pub state: TransferState,
    pub requires_erase: bool,
    pub requires_verify: bool,
    /// Stages completed so far.
    pub erased: bool,
    pub written: bool,
    pub verified: bool,
}

impl StateMachineContext {
    pub fn new(requires_erase: bool, requires_verify: bool) -> Self {
        Self {
            requires_erase,
            requires_verify,
            ..Default::default()
        }
    }

    /// Stage that follows the current one on success.
    pub fn next_stage(&self) -> Option<TransferState> {
        match self.state {
            TransferState::Idle => Some(TransferState::Validating),
            TransferState::Validating if self.requires_erase => Some(TransferState::Erasing),
            TransferState::Validating | TransferState::Erasing => Some(TransferState::Writing),
            TransferState::Writing if self.requires_verify => Some(TransferState::Verifying),
            TransferState::Writing | TransferState::Verifying => Some(TransferState::Committing),
            TransferState::Committing => Some(TransferState::Done),
            TransferState::Done | TransferState::Failed => None,
        }
    }

    /// Transition to `next`. Only the successor stage or `Failed` is
    /// reachable, and nothing leaves a terminal state.
    pub fn goto_state(&mut self, next: TransferState) -> Result<(), XferError> {
        let legal = if next == TransferState::Failed {
            !self.state.is_terminal()
        } else {
            self.next_stage() == Some(next)
        };
        if !legal {
            return Err(XferError::Config(format!(
                "illegal stage transition {} -> {}",
                self.state, next
            )));
        }

        tracing::info!(from = %self.state, to = %next, "State transition");
        if next != TransferState::Failed {
            match self.state {
                TransferState::Erasing => self.erased = true,
                TransferState::Writing => self.written = true,
                TransferState::Verifying => self.verified = true,
                _ => {}
            }
        }
        self.state = next;
        Ok(())
    }

    /// Move to `Failed` from wherever the attempt is.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            tracing::info!(from = %self.state, to = %TransferState::Failed, "State transition");
            self.state = TransferState::Failed;
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_done(ctx: &mut StateMachineContext) -> Vec<TransferState> {
        let mut seen = vec![ctx.state];
        while let Some(next) = ctx.next_stage() {
            ctx.goto_state(next).unwrap();
            seen.push(next);
        }
        seen
    }

    #[test]
    fn test_full_sequence_with_erase_and_verify() {
        let mut ctx = StateMachineContext::new(true, true);
        use TransferState::*;
        assert_eq!(
            run_to_done(&mut ctx),
            vec![Idle, Validating, Erasing, Writing, Verifying, Committing, Done]
        );
        assert!(ctx.erased && ctx.written && ctx.verified);
    }

    #[test]
    fn test_optional_stages_skipped() {
        let mut ctx = StateMachineContext::new(false, false);
        use TransferState::*;
        assert_eq!(run_to_done(&mut ctx), vec![Idle, Validating, Writing, Committing, Done]);
        assert!(!ctx.erased && !ctx.verified);
    }

    #[test]
    fn test_stage_cannot_be_skipped() {
        let mut ctx = StateMachineContext::new(true, false);
        ctx.goto_state(TransferState::Validating).unwrap();
        assert!(ctx.goto_state(TransferState::Writing).is_err());
        assert_eq!(ctx.state, TransferState::Validating);
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut ctx = StateMachineContext::new(false, false);
        ctx.goto_state(TransferState::Validating).unwrap();
        ctx.goto_state(TransferState::Failed).unwrap();
        assert!(ctx.is_terminal());
        assert!(ctx.goto_state(TransferState::Writing).is_err());
        assert!(ctx.goto_state(TransferState::Failed).is_err());
        ctx.fail();
        assert_eq!(ctx.state, TransferState::Failed);
    }

    #[test]
    fn test_display_is_lowercase() {
        assert_eq!(TransferState::Committing.to_string(), "committing");
    }
}
