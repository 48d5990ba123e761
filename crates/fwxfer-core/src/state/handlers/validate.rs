//! Validation: everything that can be rejected before wire traffic is
//! rejected here, then the device is identified and the policy narrowed.

use super::HandlerContext;
use crate::error::{TransferError, XferError};
use crate::events::{LogLevel, TransferEvent, TransferObserver};
use crate::payload::plan_chunks;
use crate::protocol::Opcode;
use crate::transport::Transport;

pub fn handle_validate<T: Transport + ?Sized, O: TransferObserver + ?Sized>(
    ctx: &mut HandlerContext<'_, '_, T, O>,
) -> Result<(), TransferError> {
    check_static(ctx).map_err(ctx.fail_at("image checks"))?;

    if !ctx.class.supports(Opcode::Identify) {
        ctx.log(
            LogLevel::Debug,
            format!("{} devices have no identify command", ctx.class),
        );
        return Ok(());
    }

    let identity = ctx.engine.identify().map_err(ctx.fail_at("identify"))?;
    ctx.emit(TransferEvent::Identified {
        identity: identity.clone(),
    });

    ctx.policy = ctx.policy.constrain_to(&identity);
    ctx.engine.reconfigure(&ctx.policy);
    ctx.report.identity = Some(identity);

    // the device may declare tighter limits than the configured ones
    check_static(ctx).map_err(ctx.fail_at("device limits"))?;
    tracing::info!(
        chunk_size = ctx.policy.chunk_size,
        total_chunks = ctx.report.total_chunks,
        "Transfer validated"
    );
    Ok(())
}

fn check_static<T: Transport + ?Sized, O: TransferObserver + ?Sized>(
    ctx: &mut HandlerContext<'_, '_, T, O>,
) -> Result<(), XferError> {
    if ctx.blob.is_empty() {
        return Err(XferError::InvalidData("image is empty".into()));
    }
    ctx.policy.validate()?;
    ctx.class.validate()?;

    // the limit is device capacity, so the origin offset counts against it
    let end = ctx.policy.origin_address.saturating_add(ctx.blob.len() as u64);
    if let Some(max) = ctx.policy.max_image_size
        && end > max as u64
    {
        return Err(XferError::InvalidData(format!(
            "image of {} bytes at 0x{:X} ends past the limit of {} bytes",
            ctx.blob.len(),
            ctx.policy.origin_address,
            max
        )));
    }

    let plan = plan_chunks(ctx.blob, &ctx.plan_params())?;
    ctx.report.total_chunks = plan.total();

    if ctx.policy.requires_erase && !ctx.class.supports(Opcode::Erase) {
        return Err(XferError::NotSupported(format!("erase on {} devices", ctx.class)));
    }
    if ctx.policy.requires_verify && !ctx.class.supports(Opcode::Read) {
        return Err(XferError::NotSupported(format!(
            "readback on {} devices",
            ctx.class
        )));
    }
    Ok(())
}
