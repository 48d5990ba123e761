//! Chunked write. Chunks go out strictly in index order; the in-band
//! status of each acknowledgement decides whether to go on.

use super::HandlerContext;
use crate::error::{TransferError, XferError};
use crate::events::{LogLevel, TransferObserver};
use crate::payload::plan_chunks;
use crate::protocol::WriteStatus;
use crate::transport::Transport;

pub fn handle_write<T: Transport + ?Sized, O: TransferObserver + ?Sized>(
    ctx: &mut HandlerContext<'_, '_, T, O>,
) -> Result<(), TransferError> {
    let blob = ctx.blob;
    let plan = plan_chunks(blob, &ctx.plan_params())
        .map_err(|e| XferError::from(e).at(ctx.machine.state, "plan"))?;
    let total = plan.total();
    ctx.report.total_chunks = total;

    for chunk in plan {
        let step = format!("chunk {} @0x{:X}", chunk.index, chunk.address);
        let status = ctx
            .engine
            .write_chunk(chunk.address, chunk.data)
            .map_err(ctx.fail_at(step.clone()))?;

        match status {
            WriteStatus::Continue | WriteStatus::Done => {}
            WriteStatus::AlignmentError => {
                return Err(XferError::InvalidData("device reported alignment error".into())
                    .at(ctx.machine.state, step));
            }
            WriteStatus::UnknownCode(code) => {
                return Err(
                    XferError::InvalidData(format!("unknown write status 0x{:02X}", code))
                        .at(ctx.machine.state, step),
                );
            }
        }

        ctx.report.chunks_written += 1;
        ctx.report.bytes_written += chunk.len() as u64;
        ctx.progress(chunk.index + 1, total);

        if status == WriteStatus::Done && chunk.index + 1 < total {
            ctx.report.stopped_early = true;
            ctx.log(
                LogLevel::Warn,
                format!(
                    "Device reported completion after chunk {} of {}",
                    chunk.index + 1,
                    total
                ),
            );
            break;
        }
    }
    Ok(())
}
