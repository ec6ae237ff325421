//! Startup reconciliation and shutdown coordination.

use crate::error::Result;
use crate::store::DownloadRecord;
use crate::types::{DownloadTask, Event, ReconcileReport, Status};
use dashmap::mapref::entry::Entry;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::MediaDownloader;

/// Upper bound on how long shutdown waits for workers to reach a chunk boundary
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl MediaDownloader {
    /// Bring durable records back in line with the download directory
    ///
    /// Runs automatically from [`new`](Self::new) and
    /// [`with_components`](Self::with_components). For every record without an
    /// in-memory task:
    /// - a complete artifact on disk marks it `Downloaded`
    /// - `Waiting`, `Downloading`, `Paused` or `Failed` with a non-empty `.part`
    ///   file becomes `Paused`; if the record has a source URL the task is
    ///   restored in memory so [`resume`](Self::resume) works
    /// - any other non-terminal record becomes `NotDownloaded`
    /// - a `Downloaded` record whose artifact vanished becomes `NotDownloaded`
    ///
    /// Never fails; store errors are logged and yield a partial report.
    pub async fn reconcile_on_startup(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let records = match self
            .store
            .list_by_status(&[
                Status::Waiting,
                Status::Downloading,
                Status::Paused,
                Status::Failed,
                Status::Downloaded,
            ])
            .await
        {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load records for reconciliation");
                return report;
            }
        };

        for record in records {
            if self.queue_state.tasks.contains_key(&record.id) {
                continue;
            }
            self.reconcile_record(record, &mut report).await;
        }

        self.records.flush().await;

        if report != ReconcileReport::default() {
            tracing::info!(
                paused = report.paused.len(),
                reset = report.reset.len(),
                completed = report.completed.len(),
                rehydrated = report.rehydrated,
                "Reconciled download records"
            );
        }

        report
    }

    async fn reconcile_record(&self, record: DownloadRecord, report: &mut ReconcileReport) {
        let id = record.id.clone();

        if let Some(path) = self.probe.downloaded_path(&id).await {
            if record.status != Status::Downloaded {
                let size = self.probe.size_of(&id).await;
                self.records.completed(&id, path, size);
                report.completed.push(id);
            }
            return;
        }

        if record.status == Status::Downloaded {
            tracing::debug!(task_id = %id, "Downloaded file is gone, resetting record");
            self.records.status(&id, Status::NotDownloaded);
            report.reset.push(id);
            return;
        }

        let partial = self
            .probe
            .find_partial(&id)
            .await
            .filter(|partial| partial.len > 0);

        let Some(partial) = partial else {
            self.records.status(&id, Status::NotDownloaded);
            report.reset.push(id);
            return;
        };

        self.records.status(&id, Status::Paused);

        if let Some(source_url) = record.source_url.clone() {
            let task = DownloadTask {
                id: id.clone(),
                status: Status::Paused,
                downloaded_bytes: partial.len,
                total_bytes: 0,
                file_path: partial.path,
                error_message: record.error_message.clone(),
                retry_count: record.retry_count,
                metadata: record.metadata(),
                source_url,
                extension: partial.ext,
                seq: self.queue_state.next_seq.fetch_add(1, Ordering::SeqCst),
            };

            if let Entry::Vacant(slot) = self.queue_state.tasks.entry(id.clone()) {
                slot.insert(task);
                report.rehydrated += 1;
            }
        }

        report.paused.push(id);
    }

    /// Gracefully shut down the downloader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new submissions
    /// 2. Pauses everything; running transfers stop at their next chunk, keeping `.part` files
    /// 3. Waits for workers to exit with a timeout (30 seconds)
    /// 4. Flushes pending record writes
    /// 5. Marks a clean shutdown in the store and emits [`Event::Shutdown`]
    ///
    /// # Errors
    ///
    /// Returns an error if the clean-shutdown marker can't be written. Every
    /// step before that is attempted regardless.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.queue_state.accepting_new.store(false, Ordering::SeqCst);

        let paused = self.pause_all().await;
        tracing::info!(paused, "Signaled pause to all active downloads");

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wait_for_active_transfers()).await {
            Ok(()) => tracing::info!("All transfers stopped"),
            Err(_) => tracing::warn!(
                running = self.lock_admission().running.len(),
                "Timeout waiting for transfers to stop, proceeding with shutdown"
            ),
        }

        self.records.flush().await;

        self.store.set_clean_shutdown().await?;
        tracing::info!("Marked clean shutdown");

        self.emit_event(Event::Shutdown);

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Wait until no transfer holds a slot
    async fn wait_for_active_transfers(&self) {
        loop {
            let running = self.lock_admission().running.len();
            if running == 0 {
                return;
            }

            tracing::debug!(running, "Waiting for transfers to stop");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
