//! FIFO admission and slot accounting.
//!
//! Every method taking `&mut Admission` runs with the admission lock held. They
//! never await; record writes go through the background writer and events are
//! broadcast without blocking.

use crate::store::MAX_RETRY_COUNT;
use crate::types::{Event, Status, TaskId};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::Ordering;

use super::transfer::{TransferContext, TransferOutcome, run_transfer};
use super::{MediaDownloader, TransferHandle};

/// State guarded by the single coarse lock
#[derive(Debug, Default)]
pub(crate) struct Admission {
    /// Ids waiting for a slot, oldest first; each id appears at most once
    pub(crate) waiting: VecDeque<TaskId>,
    /// Ids holding a pool slot
    pub(crate) running: HashSet<TaskId>,
    /// While set, nothing is drained from `waiting`
    pub(crate) global_paused: bool,
}

impl Admission {
    /// Append `id` unless it is already queued
    pub(crate) fn enqueue(&mut self, id: &TaskId) {
        if !self.waiting.contains(id) {
            self.waiting.push_back(id.clone());
        }
    }

    /// Remove `id` from the waiting queue; returns whether it was there
    pub(crate) fn remove_waiting(&mut self, id: &TaskId) -> bool {
        let before = self.waiting.len();
        self.waiting.retain(|queued| queued != id);
        self.waiting.len() < before
    }

    pub(crate) fn has_free_slot(&self, max_concurrent: usize) -> bool {
        self.running.len() < max_concurrent
    }
}

impl MediaDownloader {
    fn max_concurrent(&self) -> usize {
        self.config.download.max_concurrent_downloads
    }

    /// Start `id` now if a slot is free, otherwise queue it as Waiting
    ///
    /// Ignores the global pause flag; callers decide whether admission is allowed.
    /// Returns true if the transfer started.
    pub(crate) fn admit_locked(&self, adm: &mut Admission, id: &TaskId) -> bool {
        if adm.has_free_slot(self.max_concurrent()) {
            self.start_locked(adm, id);
            true
        } else {
            self.set_status(id, Status::Waiting);
            self.records.status(id, Status::Waiting);
            adm.enqueue(id);
            tracing::debug!(task_id = %id, queued = adm.waiting.len(), "Pool full, task waiting");
            false
        }
    }

    /// Start transfers from the queue head until the pool is full or the queue is empty
    pub(crate) fn drain_locked(&self, adm: &mut Admission) {
        while !adm.global_paused && adm.has_free_slot(self.max_concurrent()) {
            let Some(id) = adm.waiting.pop_front() else {
                break;
            };

            let status = self.queue_state.tasks.get(&id).map(|t| t.status);
            if status != Some(Status::Waiting) {
                tracing::debug!(task_id = %id, ?status, "Skipping stale queue entry");
                continue;
            }

            self.start_locked(adm, &id);
        }
    }

    /// Take a slot for `id` and spawn its transfer
    pub(crate) fn start_locked(&self, adm: &mut Admission, id: &TaskId) {
        let Some((source_url, extension)) = self.queue_state.tasks.get_mut(id).map(|mut task| {
            task.status = Status::Downloading;
            task.error_message = None;
            task.file_path = self.probe.part_path(id, &task.extension);
            (task.source_url.clone(), task.extension.clone())
        }) else {
            return;
        };

        adm.remove_waiting(id);
        adm.running.insert(id.clone());
        self.queue_state.pause_flags.remove(id);

        let attempt = self.queue_state.next_attempt.fetch_add(1, Ordering::SeqCst);
        let cancel_token = tokio_util::sync::CancellationToken::new();
        self.queue_state.handles.insert(
            id.clone(),
            TransferHandle {
                attempt,
                cancel_token: cancel_token.clone(),
            },
        );

        self.records.status(id, Status::Downloading);

        let ctx = TransferContext {
            id: id.clone(),
            source_url,
            part_path: self.probe.part_path(id, &extension),
            final_path: self.probe.final_path(id, &extension),
            chunk_size: self.config.download.chunk_size,
            progress_interval: self.config.download.progress_interval,
            read_timeout: self.config.http.read_timeout,
            client: self.client.clone(),
            tasks: self.queue_state.tasks.clone(),
            pause_flags: self.queue_state.pause_flags.clone(),
            cancel_token,
            event_tx: self.event_tx.clone(),
        };

        tracing::debug!(
            task_id = %id,
            attempt,
            running = adm.running.len(),
            "Starting transfer"
        );

        let downloader = self.clone();
        let task_id = id.clone();
        tokio::spawn(async move {
            let outcome = run_transfer(ctx).await;
            downloader.on_transfer_finished(&task_id, attempt, outcome);
        });
    }

    /// Apply a worker's outcome and refill the freed slot
    ///
    /// Outcomes from a superseded attempt (the task was cancelled, possibly
    /// re-submitted since) are dropped.
    pub(crate) fn on_transfer_finished(&self, id: &TaskId, attempt: u64, outcome: TransferOutcome) {
        let mut adm = self.lock_admission();

        let current = self
            .queue_state
            .handles
            .get(id)
            .is_some_and(|h| h.attempt == attempt);
        if !current {
            tracing::debug!(task_id = %id, attempt, "Ignoring outcome of superseded transfer");
            return;
        }

        self.queue_state.handles.remove(id);
        adm.running.remove(id);

        match outcome {
            TransferOutcome::Completed { path, size } => {
                self.queue_state.tasks.remove(id);
                self.queue_state.pause_flags.remove(id);
                self.records.completed(id, path, size);
                self.emit_event(Event::Complete { id: id.clone() });
            }
            TransferOutcome::Failed(error) => {
                let message = error.to_string();
                self.queue_state.pause_flags.remove(id);
                if let Some(mut task) = self.queue_state.tasks.get_mut(id) {
                    task.status = Status::Failed;
                    task.error_message = Some(message.clone());
                    task.retry_count = (task.retry_count + 1).min(MAX_RETRY_COUNT);
                }
                // The store increments its own counter
                self.records.failed(id, message.clone());
                self.emit_event(Event::Failed {
                    id: id.clone(),
                    error_message: message,
                });
            }
            TransferOutcome::Paused => {
                if !self.queue_state.pause_flags.contains(id) {
                    // Resumed before the worker noticed the pause
                    tracing::debug!(task_id = %id, "Pause withdrawn, restarting transfer");
                    self.start_locked(&mut adm, id);
                }
            }
            TransferOutcome::Cancelled => {
                // cancel() removes the handle before firing the token, so this
                // only happens if the token was fired from elsewhere
                tracing::warn!(task_id = %id, "Transfer cancelled without a cancel request");
            }
        }

        self.drain_locked(&mut adm);
    }

    /// Set the in-memory status of a task, if present
    pub(crate) fn set_status(&self, id: &TaskId, status: Status) {
        if let Some(mut task) = self.queue_state.tasks.get_mut(id) {
            task.status = status;
        }
    }
}
