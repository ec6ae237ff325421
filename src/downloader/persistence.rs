//! Ordered, fire-and-forget record writes.
//!
//! Control operations run under the admission lock and cannot await the store.
//! They hand writes to a single background task through an unbounded channel,
//! which applies them one at a time in the order they were sent.

use crate::store::{NewRecord, RecordStore};
use crate::types::{Status, TaskId};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// One queued store operation
#[derive(Debug)]
enum RecordOp {
    Upsert(NewRecord),
    Status(TaskId, Status),
    Completed {
        id: TaskId,
        path: PathBuf,
        size: u64,
    },
    Failed {
        id: TaskId,
        message: String,
    },
    Flush(oneshot::Sender<()>),
}

/// Handle to the background record writer (cheap to clone)
#[derive(Clone, Debug)]
pub(crate) struct RecordWriter {
    tx: mpsc::UnboundedSender<RecordOp>,
}

impl RecordWriter {
    /// Spawn the writer task; it runs until every handle is dropped
    pub(crate) fn spawn(store: Arc<dyn RecordStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(store, rx));
        Self { tx }
    }

    pub(crate) fn upsert(&self, record: NewRecord) {
        self.send(RecordOp::Upsert(record));
    }

    pub(crate) fn status(&self, id: &TaskId, status: Status) {
        self.send(RecordOp::Status(id.clone(), status));
    }

    pub(crate) fn completed(&self, id: &TaskId, path: PathBuf, size: u64) {
        self.send(RecordOp::Completed {
            id: id.clone(),
            path,
            size,
        });
    }

    pub(crate) fn failed(&self, id: &TaskId, message: String) {
        self.send(RecordOp::Failed {
            id: id.clone(),
            message,
        });
    }

    /// Wait until every write sent before this call has been applied
    pub(crate) async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(RecordOp::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    fn send(&self, op: RecordOp) {
        if let Err(e) = self.tx.send(op) {
            tracing::warn!(op = ?e.0, "Record writer stopped; dropping record update");
        }
    }
}

async fn run_writer(store: Arc<dyn RecordStore>, mut rx: mpsc::UnboundedReceiver<RecordOp>) {
    while let Some(op) = rx.recv().await {
        let (id, result) = match op {
            RecordOp::Flush(done) => {
                let _ = done.send(());
                continue;
            }
            RecordOp::Upsert(record) => {
                let result = store.upsert_record(&record).await;
                (record.id, result)
            }
            RecordOp::Status(id, status) => {
                let result = store.upsert_status(&id, status).await;
                (id, result)
            }
            RecordOp::Completed { id, path, size } => {
                let result = store.mark_completed(&id, &path, size).await;
                (id, result)
            }
            RecordOp::Failed { id, message } => {
                let result = store.mark_failed(&id, &message).await;
                (id, result)
            }
        };

        if let Err(e) = result {
            tracing::warn!(task_id = %id, error = %e, "Failed to persist download record");
        }
    }

    tracing::debug!("Record writer stopped");
}
