//! Read-only views of orchestrator state, plus probe and store passthroughs.

use crate::error::{DownloadError, Error, Result};
use crate::store::DownloadRecord;
use crate::types::{DownloadTask, QueueStats, Status, TaskId};

use super::MediaDownloader;

impl MediaDownloader {
    /// Snapshot of the in-memory task for `id`
    pub fn task(&self, id: &TaskId) -> Option<DownloadTask> {
        self.queue_state.tasks.get(id).map(|t| t.clone())
    }

    /// Snapshot of every in-memory task, in submission order
    pub fn tasks(&self) -> Vec<DownloadTask> {
        let mut tasks: Vec<DownloadTask> = self
            .queue_state
            .tasks
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        tasks.sort_by_key(|t| t.seq);
        tasks
    }

    /// Ids currently waiting for a slot, head first
    pub fn waiting_ids(&self) -> Vec<TaskId> {
        self.lock_admission().waiting.iter().cloned().collect()
    }

    /// Admission counters
    pub fn stats(&self) -> QueueStats {
        let (running, waiting, global_paused) = {
            let adm = self.lock_admission();
            (adm.running.len(), adm.waiting.len(), adm.global_paused)
        };

        let (mut paused, mut failed) = (0, 0);
        for entry in self.queue_state.tasks.iter() {
            match entry.status {
                Status::Paused => paused += 1,
                Status::Failed => failed += 1,
                _ => {}
            }
        }

        QueueStats {
            running,
            waiting,
            paused,
            failed,
            global_paused,
            max_concurrent: self.config.download.max_concurrent_downloads,
        }
    }

    /// Durable record for `id`, after pending writes have been applied
    pub async fn record(&self, id: &TaskId) -> Result<Option<DownloadRecord>> {
        self.records.flush().await;
        self.store.get(id).await
    }

    /// Wait until every record write issued so far has reached the store
    pub async fn flush_records(&self) {
        self.records.flush().await;
    }

    /// Delete failed records; returns how many were removed
    pub async fn clear_failed_records(&self) -> Result<u64> {
        self.records.flush().await;
        self.store.clear_failed().await
    }

    /// Delete every record; returns how many were removed
    pub async fn clear_all_records(&self) -> Result<u64> {
        self.records.flush().await;
        self.store.clear_all().await
    }

    /// Whether a complete artifact exists for `id`
    pub async fn is_downloaded(&self, id: &TaskId) -> bool {
        self.probe.is_downloaded(id).await
    }

    /// Ids of every complete artifact in the download directory
    pub async fn downloaded_ids(&self) -> Result<Vec<TaskId>> {
        self.probe.list_downloaded_ids().await
    }

    /// Total bytes of complete artifacts
    pub async fn total_downloaded_size(&self) -> Result<u64> {
        self.probe.total_size().await
    }

    /// Remove truncated artifacts (see [`FileProbe::cleanup_corrupted`](crate::probe::FileProbe::cleanup_corrupted))
    ///
    /// Records for removed files are left alone; the next reconciliation
    /// resets them.
    pub async fn cleanup_corrupted(&self) -> Result<usize> {
        self.probe.cleanup_corrupted().await
    }

    /// Delete the complete artifact for `id` and persist `NotDownloaded`
    ///
    /// Stray `.part` files for the id are removed as well. Returns whether a
    /// complete artifact was removed.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::AlreadyActive`] if a task for `id` is in memory
    pub async fn delete_downloaded(&self, id: &TaskId) -> Result<bool> {
        if let Some(status) = self.queue_state.tasks.get(id).map(|t| t.status) {
            return Err(Error::Download(DownloadError::AlreadyActive {
                id: id.to_string(),
                state: status.label().to_string(),
            }));
        }

        let removed = self.probe.remove_downloaded(id).await?;
        let partials = self.probe.remove_partials(id).await;
        if removed || partials > 0 {
            self.records.status(id, Status::NotDownloaded);
            tracing::info!(task_id = %id, removed, partials, "Deleted downloaded file");
        }
        Ok(removed)
    }
}
