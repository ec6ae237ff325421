//! Transfer orchestration: ranged GET into the `.part` file for a single task.

use crate::error::TransferError;
use bytes::Bytes;
use futures::StreamExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::context::{ByteStream, TransferContext, TransferOutcome, parse_content_range};
use super::finalization::finalize_transfer;
use super::progress::ProgressThrottle;

/// Where the response tells us to start writing
enum WriteStart {
    /// Full body; the `.part` file is truncated
    Fresh { total: u64 },
    /// Partial body appended after the existing bytes
    Append { existing: u64, total: u64 },
    /// Server says the `.part` file already holds the whole resource
    AlreadyComplete { existing: u64 },
}

/// Core transfer task -- moves bytes for one task until it completes, pauses,
/// is cancelled or fails.
///
/// Phases:
/// 1. Measure the existing `.part` file
/// 2. Open the source with a range request from that length
/// 3. Stream the body into the file, checking the pause flag before every chunk
/// 4. Verify the length and rename into place
///
/// Errors never escape: they are returned as [`TransferOutcome::Failed`].
pub(crate) async fn run_transfer(ctx: TransferContext) -> TransferOutcome {
    match transfer(&ctx).await {
        Ok(outcome) => outcome,
        Err(_) if ctx.cancel_token.is_cancelled() => TransferOutcome::Cancelled,
        Err(e) => {
            tracing::error!(
                task_id = %ctx.id,
                url = %ctx.source_url,
                error = %e,
                "Transfer failed"
            );
            TransferOutcome::Failed(e)
        }
    }
}

async fn transfer(ctx: &TransferContext) -> Result<TransferOutcome, TransferError> {
    if let Some(parent) = ctx.part_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| TransferError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    let existing = match tokio::fs::metadata(&ctx.part_path).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(source) => {
            return Err(TransferError::Io {
                path: ctx.part_path.clone(),
                source,
            });
        }
    };

    if ctx.pause_requested() {
        return Ok(TransferOutcome::Paused);
    }

    let response = tokio::select! {
        biased;
        _ = ctx.cancel_token.cancelled() => return Ok(TransferOutcome::Cancelled),
        response = ctx.client.open(&ctx.source_url, existing) => response?,
    };

    let start = classify_response(
        response.status,
        response.content_length,
        response.content_range.as_deref(),
        existing,
        &ctx.source_url,
    )?;

    tracing::debug!(
        task_id = %ctx.id,
        status = response.status,
        existing,
        "Transfer opened"
    );

    if ctx.cancel_token.is_cancelled() {
        return Ok(TransferOutcome::Cancelled);
    }

    let (mut file, mut downloaded, total) = match start {
        WriteStart::AlreadyComplete { existing } => {
            let mut throttle = ProgressThrottle::new(ctx.progress_interval);
            ctx.report_progress(existing, existing, &mut throttle);
            return finalize_transfer(ctx).await;
        }
        WriteStart::Fresh { total } => (open_part(ctx, false).await?, 0, total),
        WriteStart::Append { existing, total } => {
            (open_part(ctx, true).await?, existing, total)
        }
    };

    let mut throttle = ProgressThrottle::new(ctx.progress_interval);
    ctx.report_progress(downloaded, total, &mut throttle);

    let mut body = response.body;
    let copied = copy_body(
        ctx,
        &mut body,
        &mut file,
        &mut downloaded,
        total,
        &mut throttle,
    )
    .await;

    // Written bytes must reach disk before the next attempt measures the file
    let flushed = flush_part(ctx, &mut file).await;
    drop(file);

    if let Some(stopped) = copied? {
        return Ok(stopped);
    }
    flushed?;

    if total > 0 && downloaded < total {
        return Err(TransferError::Incomplete {
            received: downloaded,
            expected: total,
        });
    }

    if ctx.cancel_token.is_cancelled() {
        return Ok(TransferOutcome::Cancelled);
    }

    finalize_transfer(ctx).await
}

/// Stream the body into the `.part` file in `chunk_size` writes
///
/// Returns `Some` if the transfer stopped early for a pause or cancel, `None`
/// once the body is exhausted.
async fn copy_body(
    ctx: &TransferContext,
    body: &mut ByteStream,
    file: &mut File,
    downloaded: &mut u64,
    total: u64,
    throttle: &mut ProgressThrottle,
) -> Result<Option<TransferOutcome>, TransferError> {
    while let Some(bytes) = next_chunk(ctx, body).await? {
        for chunk in bytes.chunks(ctx.chunk_size) {
            if ctx.cancel_token.is_cancelled() {
                return Ok(Some(TransferOutcome::Cancelled));
            }
            if ctx.pause_requested() {
                tracing::debug!(task_id = %ctx.id, downloaded = *downloaded, "Transfer paused");
                return Ok(Some(TransferOutcome::Paused));
            }

            file.write_all(chunk)
                .await
                .map_err(|source| TransferError::Io {
                    path: ctx.part_path.clone(),
                    source,
                })?;
            *downloaded += chunk.len() as u64;
            ctx.report_progress(*downloaded, total, throttle);
        }
    }

    Ok(None)
}

/// Decide how to treat the response relative to the existing `.part` length
fn classify_response(
    status: u16,
    content_length: Option<u64>,
    content_range: Option<&str>,
    existing: u64,
    url: &str,
) -> Result<WriteStart, TransferError> {
    let range = content_range.and_then(parse_content_range);

    match status {
        200 => Ok(WriteStart::Fresh {
            total: content_length.unwrap_or(0),
        }),
        206 => {
            let start = range.and_then(|r| r.start).unwrap_or(existing);
            if start != existing {
                return Err(TransferError::RangeMismatch {
                    expected_start: existing,
                    received_start: start,
                });
            }

            let total = range
                .and_then(|r| r.total)
                .or_else(|| content_length.map(|len| existing + len))
                .unwrap_or(0);
            Ok(WriteStart::Append { existing, total })
        }
        416 if existing > 0 && range.and_then(|r| r.total) == Some(existing) => {
            Ok(WriteStart::AlreadyComplete { existing })
        }
        status => Err(TransferError::HttpStatus {
            status,
            url: url.to_string(),
        }),
    }
}

async fn open_part(ctx: &TransferContext, append: bool) -> Result<File, TransferError> {
    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }

    options
        .open(&ctx.part_path)
        .await
        .map_err(|source| TransferError::Io {
            path: ctx.part_path.clone(),
            source,
        })
}

async fn flush_part(ctx: &TransferContext, file: &mut File) -> Result<(), TransferError> {
    file.flush().await.map_err(|source| TransferError::Io {
        path: ctx.part_path.clone(),
        source,
    })
}

/// Next body chunk, bounded by the read timeout and interrupted by cancellation
///
/// A cancelled transfer reports end-of-body; the caller checks the token next.
async fn next_chunk(
    ctx: &TransferContext,
    body: &mut ByteStream,
) -> Result<Option<Bytes>, TransferError> {
    tokio::select! {
        biased;
        _ = ctx.cancel_token.cancelled() => Ok(None),
        next = tokio::time::timeout(ctx.read_timeout, body.next()) => match next {
            Ok(Some(chunk)) => chunk.map(Some),
            Ok(None) => Ok(None),
            Err(_) => Err(TransferError::Network(format!(
                "no data received for {:?}",
                ctx.read_timeout
            ))),
        },
    }
}
