//! Erase every block the image will land on and check it reads back as the
//! erase sentinel. Any failure leaves the device erased but incomplete.

use super::HandlerContext;
use crate::error::{TransferError, XferError};
use crate::events::{LogLevel, TransferObserver};
use crate::payload::PlanParams;
use crate::transport::Transport;

pub fn handle_erase<T: Transport + ?Sized, O: TransferObserver + ?Sized>(
    ctx: &mut HandlerContext<'_, '_, T, O>,
) -> Result<(), TransferError> {
    let block = ctx.policy.erase_block_size as u64;
    let start = ctx.policy.origin_address - ctx.policy.origin_address % block;
    let end = (ctx.policy.origin_address + ctx.blob.len() as u64).div_ceil(block) * block;
    let total = ((end - start) / block) as usize;

    ctx.log(
        LogLevel::Info,
        format!("Erasing {} blocks of {} bytes from 0x{:X}", total, block, start),
    );

    let read_params = ctx.plan_params();
    for (i, address) in (start..end).step_by(block as usize).enumerate() {
        let step = format!("block @0x{:X}", address);
        ctx.engine.erase(address).map_err(ctx.fail_at(step.clone()))?;
        check_erased(ctx, address, block, &read_params).map_err(ctx.fail_at(step))?;
        ctx.report.erased_blocks += 1;
        ctx.progress(i + 1, total);
    }
    Ok(())
}

/// Read `[address, address + len)` back in planner-sized pieces and compare
/// each byte with the sentinel.
fn check_erased<T: Transport + ?Sized, O: TransferObserver + ?Sized>(
    ctx: &mut HandlerContext<'_, '_, T, O>,
    address: u64,
    len: u64,
    read_params: &PlanParams,
) -> Result<(), XferError> {
    let sentinel = ctx.policy.erase_sentinel;
    let max_piece = read_params.max_chunk_size.max(1) as u64;
    let page = read_params.page_size as u64;
    let end = address + len;
    let mut at = address;
    while at < end {
        let mut piece = max_piece.min(end - at);
        if page > 0 {
            piece = piece.min(page - at % page);
        }
        let data = ctx.engine.read(at, piece as usize)?;
        if let Some(pos) = data.iter().position(|&b| b != sentinel) {
            return Err(XferError::VerifyMismatch {
                address: at + pos as u64,
                expected: sentinel,
                actual: data[pos],
            });
        }
        at += piece;
    }
    Ok(())
}
