//! Transfer execution -- ranged HTTP GET into a `.part` file for one task.
//!
//! Split into focused submodules:
//! - [`context`] - HTTP client seam, shared per-task state, progress publication
//! - [`orchestration`] - Top-level transfer lifecycle and response classification
//! - [`progress`] - Progress event throttling
//! - [`finalization`] - Rename into place

mod context;
mod finalization;
mod orchestration;
mod progress;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use context::{ByteStream, HttpTransferClient, TransferClient, TransferResponse};
pub(crate) use context::{TransferContext, TransferOutcome};
pub(crate) use orchestration::run_transfer;
