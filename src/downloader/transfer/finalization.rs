//! Transfer finalization: move the `.part` file to its canonical name.

use crate::error::TransferError;

use super::context::{TransferContext, TransferOutcome};

/// Rename `.part` → final and report the final size
///
/// An existing destination is never overwritten; the task fails instead and
/// the `.part` file stays in place.
pub(super) async fn finalize_transfer(
    ctx: &TransferContext,
) -> Result<TransferOutcome, TransferError> {
    if tokio::fs::try_exists(&ctx.final_path)
        .await
        .unwrap_or(false)
    {
        return Err(TransferError::Rename {
            from: ctx.part_path.clone(),
            to: ctx.final_path.clone(),
            reason: "destination already exists".to_string(),
        });
    }

    tokio::fs::rename(&ctx.part_path, &ctx.final_path)
        .await
        .map_err(|e| TransferError::Rename {
            from: ctx.part_path.clone(),
            to: ctx.final_path.clone(),
            reason: e.to_string(),
        })?;

    if ctx.cancel_token.is_cancelled() {
        // Cancelled while renaming; the task no longer owns a completed file
        if let Err(e) = tokio::fs::remove_file(&ctx.final_path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(
                task_id = %ctx.id,
                path = %ctx.final_path.display(),
                error = %e,
                "Failed to remove file of cancelled transfer"
            );
        }
        return Ok(TransferOutcome::Cancelled);
    }

    let size = tokio::fs::metadata(&ctx.final_path)
        .await
        .map(|m| m.len())
        .map_err(|source| TransferError::Io {
            path: ctx.final_path.clone(),
            source,
        })?;

    tracing::info!(
        task_id = %ctx.id,
        path = %ctx.final_path.display(),
        size,
        "Transfer complete"
    );

    Ok(TransferOutcome::Completed {
        path: ctx.final_path.clone(),
        size,
    })
}
