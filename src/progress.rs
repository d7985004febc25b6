//! Observer callbacks for the email ingestion loop.
//!
//! Inject an [`Arc<dyn IngestObserver>`] via
//! [`crate::ingest::IngestLoop::with_observer`] to follow a polling cycle as
//! it runs: forward events to a progress bar, a metrics sink or a test
//! recorder without the loop knowing about any of them.
//!
//! # Example
//!
//! ```rust
//! use travelsync::IngestObserver;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct FailureCounter(AtomicUsize);
//!
//! impl IngestObserver for FailureCounter {
//!     fn on_attachment_error(&self, uid: u32, filename: &str, error: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("message {uid}: {filename} failed: {error}");
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by the ingestion loop as it works through a cycle.
///
/// All methods default to no-ops so implementors override only what they
/// need. Calls arrive from the loop's task, one at a time.
pub trait IngestObserver: Send + Sync {
    /// A cycle found `unseen` unread messages.
    fn on_cycle_start(&self, unseen: usize) {
        let _ = unseen;
    }

    /// A message with `attachments` qualifying attachments is about to be processed.
    fn on_message_start(&self, uid: u32, subject: &str, attachments: usize) {
        let _ = (uid, subject, attachments);
    }

    /// An attachment produced a record.
    fn on_attachment_complete(&self, uid: u32, filename: &str, title: &str) {
        let _ = (uid, filename, title);
    }

    /// An attachment failed; the message will go to the failed folder.
    fn on_attachment_error(&self, uid: u32, filename: &str, error: &str) {
        let _ = (uid, filename, error);
    }

    /// The message was moved (or the move failed) to `folder`.
    fn on_message_complete(&self, uid: u32, folder: &str, moved: bool) {
        let _ = (uid, folder, moved);
    }

    /// The cycle finished with `handled` messages processed.
    fn on_cycle_complete(&self, handled: usize, failed: usize) {
        let _ = (handled, failed);
    }
}

/// The default observer.
pub struct NoopObserver;

impl IngestObserver for NoopObserver {}

/// Shared observer handle as stored by the loop.
pub type Observer = Arc<dyn IngestObserver>;
