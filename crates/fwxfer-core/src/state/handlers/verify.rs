//! Byte-exact readback of the written image.

use super::HandlerContext;
use crate::error::{TransferError, XferError};
use crate::events::TransferObserver;
use crate::payload::{Chunk, plan_chunks};
use crate::transport::Transport;

pub fn handle_verify<T: Transport + ?Sized, O: TransferObserver + ?Sized>(
    ctx: &mut HandlerContext<'_, '_, T, O>,
) -> Result<(), TransferError> {
    // a device that declared completion early never saw the tail
    let written = usize::try_from(ctx.report.bytes_written).unwrap_or(usize::MAX);
    let blob = &ctx.blob[..written.min(ctx.blob.len())];
    let plan = plan_chunks(blob, &ctx.plan_params())
        .map_err(|e| XferError::from(e).at(ctx.machine.state, "plan"))?;
    let total = plan.total();
    let exclude = ctx.policy.verify_exclude;

    for chunk in plan {
        let skipped = exclude.is_some_and(|r| r.covers(chunk.address, chunk.len() as u64));
        if !skipped {
            let step = format!("chunk {} @0x{:X}", chunk.index, chunk.address);
            let compared = compare(ctx, &chunk).map_err(ctx.fail_at(step))?;
            ctx.report.verified_bytes += compared;
        }
        ctx.progress(chunk.index + 1, total);
    }
    Ok(())
}

/// Read back one chunk and compare it, skipping excluded addresses.
/// Returns the number of bytes compared.
fn compare<T: Transport + ?Sized, O: TransferObserver + ?Sized>(
    ctx: &mut HandlerContext<'_, '_, T, O>,
    chunk: &Chunk<'_>,
) -> Result<u64, XferError> {
    let actual = ctx.engine.read(chunk.address, chunk.len())?;
    let exclude = ctx.policy.verify_exclude;
    let mut compared = 0;
    for (i, (&want, &got)) in chunk.data.iter().zip(&actual).enumerate() {
        let address = chunk.address + i as u64;
        if exclude.is_some_and(|r| r.contains(address)) {
            continue;
        }
        if want != got {
            return Err(XferError::VerifyMismatch {
                address,
                expected: want,
                actual: got,
            });
        }
        compared += 1;
    }
    Ok(compared)
}
