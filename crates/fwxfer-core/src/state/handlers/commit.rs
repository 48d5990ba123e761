use super::HandlerContext;
use crate::error::TransferError;
use crate::events::{LogLevel, TransferObserver};
use crate::transport::Transport;

/// Issue the activation sequence. Devices that reset on activation are
/// done once the last command is sent.
pub fn handle_commit<T: Transport + ?Sized, O: TransferObserver + ?Sized>(
    ctx: &mut HandlerContext<'_, '_, T, O>,
) -> Result<(), TransferError> {
    let resets = ctx.policy.activation_resets;
    ctx.engine.activate(resets).map_err(ctx.fail_at("activate"))?;
    if resets {
        ctx.log(LogLevel::Info, "Activation sent, device is resetting");
    } else if ctx.report.identity.as_ref().is_some_and(|id| id.needs_reboot) {
        ctx.log(LogLevel::Warn, "Image is staged; the device applies it on next reboot");
    }
    Ok(())
}
