//! Accepting download requests.

use crate::error::{DownloadError, Error, Result};
use crate::probe::SUPPORTED_EXTENSIONS;
use crate::store::NewRecord;
use crate::types::{DownloadRequest, DownloadTask, Status, SubmitOutcome, TaskId};
use std::sync::atomic::Ordering;

use super::MediaDownloader;

impl MediaDownloader {
    /// Submit a track for download
    ///
    /// The request is rejected if the track is already on disk or already
    /// waiting/downloading. Submitting a paused or failed track resumes it
    /// (with the new URL and metadata). Otherwise the track starts immediately
    /// when a slot is free and no global pause is active, or joins the back of
    /// the FIFO queue.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::AlreadyDownloaded`] if a complete artifact exists
    /// - [`DownloadError::AlreadyActive`] if the id is waiting or downloading
    /// - [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown) started
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use media_dl::*;
    /// # async fn example(downloader: MediaDownloader) -> Result<()> {
    /// let request = DownloadRequest::new("track-42", "https://music.example.com/rest/stream?id=42");
    /// match downloader.submit(request).await? {
    ///     SubmitOutcome::Started => println!("downloading"),
    ///     SubmitOutcome::Queued => println!("waiting for a slot"),
    ///     SubmitOutcome::Resumed => println!("resumed from the partial file"),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn submit(&self, request: DownloadRequest) -> Result<SubmitOutcome> {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let id = request.id.clone();

        if let Some(path) = self.probe.downloaded_path(&id).await {
            return Err(Error::Download(DownloadError::AlreadyDownloaded {
                id: id.to_string(),
                path,
            }));
        }

        // A leftover `.part` file decides the extension unless the caller asked for one
        let requested = request
            .extension
            .as_deref()
            .map(str::to_ascii_lowercase)
            .filter(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()));
        let extension = match requested {
            Some(ext) => ext,
            None => match self.probe.find_partial(&id).await {
                Some(partial) => partial.ext,
                None => self.config.target_extension(),
            },
        };

        let prior_retries = self.prior_retry_count(&id).await;

        let mut adm = self.lock_admission();

        let existing = self.queue_state.tasks.get(&id).map(|t| t.status);
        match existing {
            Some(status @ (Status::Waiting | Status::Downloading)) => {
                return Err(Error::Download(DownloadError::AlreadyActive {
                    id: id.to_string(),
                    state: status.label().to_string(),
                }));
            }
            Some(status @ (Status::Paused | Status::Failed)) => {
                if let Some(mut task) = self.queue_state.tasks.get_mut(&id) {
                    task.source_url = request.source_url.clone();
                    task.metadata = request.metadata.clone();
                }
                self.records.upsert(NewRecord {
                    id: id.clone(),
                    metadata: request.metadata,
                    source_url: request.source_url,
                    status,
                });
                self.resume_locked(&mut adm, &id)?;
                tracing::debug!(task_id = %id, "Submit of paused task treated as resume");
                return Ok(SubmitOutcome::Resumed);
            }
            Some(Status::NotDownloaded | Status::Downloaded) | None => {}
        }

        let seq = self.queue_state.next_seq.fetch_add(1, Ordering::SeqCst);
        let task = DownloadTask {
            id: id.clone(),
            status: Status::Waiting,
            downloaded_bytes: 0,
            total_bytes: 0,
            file_path: self.probe.part_path(&id, &extension),
            error_message: None,
            retry_count: prior_retries,
            metadata: request.metadata.clone(),
            source_url: request.source_url.clone(),
            extension,
            seq,
        };
        self.queue_state.tasks.insert(id.clone(), task);

        self.records.upsert(NewRecord {
            id: id.clone(),
            metadata: request.metadata,
            source_url: request.source_url,
            status: Status::Waiting,
        });

        if adm.global_paused {
            adm.enqueue(&id);
            tracing::debug!(task_id = %id, "Global pause active, task waiting");
            return Ok(SubmitOutcome::Queued);
        }

        let outcome = if self.admit_locked(&mut adm, &id) {
            SubmitOutcome::Started
        } else {
            SubmitOutcome::Queued
        };

        tracing::info!(task_id = %id, ?outcome, "Download submitted");
        Ok(outcome)
    }

    /// Failure count carried by the durable record of an earlier attempt
    async fn prior_retry_count(&self, id: &TaskId) -> u32 {
        self.records.flush().await;
        match self.store.get(id).await {
            Ok(record) => record.map_or(0, |r| r.retry_count),
            Err(e) => {
                tracing::warn!(task_id = %id, error = %e, "Failed to load download record");
                0
            }
        }
    }
}
