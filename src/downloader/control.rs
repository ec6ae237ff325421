//! Download lifecycle control: pause, resume, cancel, and their global forms.

use crate::error::{DownloadError, Error, Result};
use crate::types::{Event, Status, TaskId};

use super::MediaDownloader;
use super::queue::Admission;

impl MediaDownloader {
    /// Pause a download
    ///
    /// A waiting task leaves the queue. A running transfer stops at its next
    /// chunk boundary, keeping the `.part` file for resume; its slot frees once
    /// the worker has exited. Does not wait for the worker.
    ///
    /// Returns false (and does nothing) if the id is unknown or not waiting or
    /// downloading.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use media_dl::*;
    /// # async fn example(downloader: MediaDownloader) {
    /// let id = TaskId::from("track-42");
    /// downloader.pause(&id).await;
    /// # }
    /// ```
    pub async fn pause(&self, id: &TaskId) -> bool {
        let mut adm = self.lock_admission();

        let status = self.queue_state.tasks.get(id).map(|t| t.status);
        if !matches!(status, Some(Status::Waiting | Status::Downloading)) {
            return false;
        }

        self.pause_locked(&mut adm, id);
        tracing::info!(task_id = %id, "Download paused");
        true
    }

    /// Resume a paused or failed download
    ///
    /// The transfer continues from the `.part` length. It starts immediately if
    /// a slot is free, otherwise it waits in the queue. This is also the
    /// single-item override of [`pause_all`](Self::pause_all): the task is
    /// admitted even while the global pause is active, and nothing else is
    /// drained.
    ///
    /// Resuming a waiting or downloading task is a no-op.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::NotFound`] if no task exists for the id
    pub async fn resume(&self, id: &TaskId) -> Result<()> {
        let mut adm = self.lock_admission();
        self.resume_locked(&mut adm, id)?;
        tracing::info!(task_id = %id, "Download resumed");
        Ok(())
    }

    /// Cancel a download and delete its partial file
    ///
    /// Interrupts a running transfer, removes the task from the queue and from
    /// memory, persists `NotDownloaded` and publishes `Canceled`. Returns false
    /// if no task exists for the id.
    pub async fn cancel(&self, id: &TaskId) -> bool {
        let mut adm = self.lock_admission();
        let cancelled = self.cancel_locked(&mut adm, id);
        self.drain_locked(&mut adm);

        if cancelled {
            tracing::info!(task_id = %id, "Download cancelled");
        }
        cancelled
    }

    /// Cancel every task; returns how many were cancelled
    pub async fn cancel_all(&self) -> usize {
        let mut adm = self.lock_admission();

        let ids: Vec<TaskId> = self
            .queue_state
            .tasks
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let count = ids
            .iter()
            .filter(|id| self.cancel_locked(&mut adm, id))
            .count();
        adm.waiting.clear();

        tracing::info!(count, "Cancelled all downloads");
        count
    }

    /// Pause everything
    ///
    /// Sets the global pause flag, pauses every waiting and downloading task,
    /// and clears the queue. While the flag is set, new submissions wait and
    /// nothing is admitted except through [`resume`](Self::resume).
    pub async fn pause_all(&self) -> usize {
        let mut adm = self.lock_admission();
        adm.global_paused = true;

        let ids: Vec<TaskId> = self
            .queue_state
            .tasks
            .iter()
            .filter(|entry| matches!(entry.status, Status::Waiting | Status::Downloading))
            .map(|entry| entry.key().clone())
            .collect();

        for id in &ids {
            self.pause_locked(&mut adm, id);
        }
        adm.waiting.clear();

        tracing::info!(count = ids.len(), "Paused all downloads");
        ids.len()
    }

    /// Clear the global pause and re-queue every paused task
    ///
    /// Tasks rejoin the queue in their original submission order, then the
    /// pool is filled. Failed tasks stay failed.
    pub async fn resume_all(&self) -> usize {
        let mut adm = self.lock_admission();
        adm.global_paused = false;

        let mut paused: Vec<(u64, TaskId)> = self
            .queue_state
            .tasks
            .iter()
            .filter(|entry| entry.status == Status::Paused)
            .map(|entry| (entry.seq, entry.key().clone()))
            .collect();
        paused.sort();

        let count = paused.len();
        for (_, id) in &paused {
            self.queue_state.pause_flags.remove(id);

            if adm.running.contains(id) {
                // Worker hasn't reached a chunk boundary yet; it keeps its slot
                self.set_status(id, Status::Downloading);
                self.records.status(id, Status::Downloading);
            } else {
                self.set_status(id, Status::Waiting);
                self.records.status(id, Status::Waiting);
                adm.enqueue(id);
            }
        }

        // Merge with anything queued during the pause, oldest submission first
        let mut queued: Vec<(u64, TaskId)> = adm
            .waiting
            .drain(..)
            .filter_map(|id| {
                let seq = self.queue_state.tasks.get(&id).map(|t| t.seq)?;
                Some((seq, id))
            })
            .collect();
        queued.sort();
        adm.waiting.extend(queued.into_iter().map(|(_, id)| id));

        self.drain_locked(&mut adm);

        tracing::info!(count, queued = adm.waiting.len(), "Resumed all downloads");
        count
    }

    /// Flag, mark and persist a waiting or downloading task as paused
    fn pause_locked(&self, adm: &mut Admission, id: &TaskId) {
        self.queue_state.pause_flags.insert(id.clone());
        adm.remove_waiting(id);

        let percent = self.queue_state.tasks.get_mut(id).map(|mut task| {
            task.status = Status::Paused;
            task.percent()
        });

        self.records.status(id, Status::Paused);
        if let Some(percent) = percent {
            self.emit_event(Event::Progress {
                id: id.clone(),
                percent,
            });
        }
    }

    /// Resume under the admission lock (shared with submit)
    pub(crate) fn resume_locked(&self, adm: &mut Admission, id: &TaskId) -> Result<()> {
        let status = self
            .queue_state
            .tasks
            .get(id)
            .map(|t| t.status)
            .ok_or_else(|| {
                Error::Download(DownloadError::NotFound { id: id.to_string() })
            })?;

        match status {
            Status::Downloading => Ok(()),
            Status::Waiting => {
                // Only the override path admits a queued task directly
                if adm.global_paused
                    && adm.has_free_slot(self.config.download.max_concurrent_downloads)
                {
                    self.start_locked(adm, id);
                }
                Ok(())
            }
            Status::Paused | Status::Failed => {
                self.queue_state.pause_flags.remove(id);

                if adm.running.contains(id) {
                    // Worker still holds its slot; it will see the cleared flag
                    self.set_status(id, Status::Downloading);
                    self.records.status(id, Status::Downloading);
                } else {
                    self.admit_locked(adm, id);
                }
                Ok(())
            }
            Status::NotDownloaded | Status::Downloaded => {
                Err(Error::Download(DownloadError::InvalidState {
                    id: id.to_string(),
                    operation: "resume".to_string(),
                    current_state: status.label().to_string(),
                }))
            }
        }
    }

    /// Cancel under the admission lock; returns false if nothing was known about `id`
    fn cancel_locked(&self, adm: &mut Admission, id: &TaskId) -> bool {
        // Fire the token before evicting the task so the worker can't publish
        // progress after Canceled
        let handle = self.queue_state.handles.remove(id);
        if let Some((_, ref running)) = handle {
            running.cancel_token.cancel();
        }

        adm.running.remove(id);
        adm.remove_waiting(id);
        self.queue_state.pause_flags.remove(id);
        let task = self.queue_state.tasks.remove(id);

        // Deleted while the lock is held so a re-submit of this id starts from
        // zero bytes. Each removal is a single unlink.
        let removed_partials = self.probe.remove_partials_blocking(id);

        match task {
            Some((_, task)) => {
                if handle.is_some() {
                    // The worker may have renamed into place just before the token fired
                    self.probe
                        .remove_file_blocking(id, &self.probe.final_path(id, &task.extension));
                }
            }
            // Only a durable record (not rehydrated) knew about this id
            None if removed_partials > 0 => {}
            None => return handle.is_some(),
        }

        self.records.status(id, Status::NotDownloaded);
        self.emit_event(Event::Canceled { id: id.clone() });
        true
    }
}
