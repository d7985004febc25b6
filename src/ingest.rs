//! Email ingestion loop.
//!
//! ## One cycle
//!
//! ```text
//! connect + select INBOX
//!   └─ UID SEARCH UNSEEN
//!        └─ for each uid: peek-fetch, parse
//!             ├─ no qualifying attachment → leave untouched (stays unread)
//!             └─ otherwise
//!                  mark \Seen (when mark_read_on_select)
//!                  each attachment → Extractor::process → outcome
//!                  zero errors → processed folder, else → failed folder
//! logout
//! ```
//!
//! A message reaches exactly one terminal folder per cycle. Per-attachment
//! failures are recorded in [`ProcessingOutcome`] and never abort the
//! message; per-message failures never abort the cycle.
//!
//! ## The loop
//!
//! [`IngestLoop::run`] repeats cycles until its [`CancellationToken`] fires.
//! A failed cycle (server down, login rejected) is logged and followed by the
//! normal interval. A mailbox worker panic is treated as a loop-level fault
//! and followed by the longer `error_backoff`. Cancellation is only observed
//! between cycles, so an in-flight cycle always finishes its moves.

use crate::config::MailConfig;
use crate::error::MailError;
use crate::extract::Extractor;
use crate::mail::{parse_message, InboxMessage, MailTransport, Mailbox, Uid};
use crate::progress::{NoopObserver, Observer};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One failed attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentError {
    pub filename: String,
    pub error: String,
}

/// Result of processing every attachment of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingOutcome {
    pub attachments_processed: usize,
    pub events_created: usize,
    pub errors: Vec<AttachmentError>,
}

impl ProcessingOutcome {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Terminal folder choice for a handled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Processed,
    Failed,
}

/// What happened to one handled message.
#[derive(Debug, Clone, Serialize)]
pub struct MessageReport {
    pub uid: Uid,
    pub subject: String,
    pub outcome: ProcessingOutcome,
    pub destination: Destination,
    /// Set when the terminal move failed; the message stays in the inbox.
    pub move_error: Option<String>,
}

/// Summary of one polling cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    /// Unread messages found by the search.
    pub unseen: usize,
    /// Messages with at least one qualifying attachment.
    pub messages: Vec<MessageReport>,
    /// Unread messages left untouched (no qualifying attachment or unreadable).
    pub skipped: usize,
}

impl CycleReport {
    pub fn processed(&self) -> usize {
        self.count(Destination::Processed)
    }

    pub fn failed(&self) -> usize {
        self.count(Destination::Failed)
    }

    fn count(&self, d: Destination) -> usize {
        self.messages.iter().filter(|m| m.destination == d).count()
    }
}

/// Polls a mailbox and feeds attachments through an [`Extractor`].
pub struct IngestLoop {
    extractor: Arc<Extractor>,
    transport: Arc<dyn MailTransport>,
    config: MailConfig,
    observer: Observer,
}

impl IngestLoop {
    /// Missing credentials fail here, once, instead of on every cycle.
    pub fn new(
        extractor: Arc<Extractor>,
        transport: Arc<dyn MailTransport>,
        config: MailConfig,
    ) -> Result<Self, MailError> {
        if config.address.trim().is_empty() || config.password.is_empty() {
            return Err(MailError::MissingCredentials(
                "EMAIL_ADDRESS and EMAIL_PASSWORD".to_string(),
            ));
        }
        Ok(Self {
            extractor,
            transport,
            config,
            observer: Arc::new(NoopObserver),
        })
    }

    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &MailConfig {
        &self.config
    }

    /// Run cycles until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Mail ingestion started: {}@{} every {:?}",
            self.config.address, self.config.server, self.config.check_interval
        );
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let pause = match self.run_cycle().await {
                Ok(report) => {
                    if report.unseen > 0 {
                        info!(
                            "Cycle done: {} unseen, {} processed, {} failed, {} skipped",
                            report.unseen,
                            report.processed(),
                            report.failed(),
                            report.skipped
                        );
                    }
                    self.config.check_interval
                }
                Err(e @ MailError::Worker(_)) => {
                    error!("Mail ingestion fault, backing off: {}", e);
                    self.config.error_backoff
                }
                Err(e) => {
                    warn!("Mail cycle failed: {}", e);
                    self.config.check_interval
                }
            };

            if !sleep_or_cancel(pause, &cancel).await {
                break;
            }
        }
        info!("Mail ingestion stopped");
    }

    /// One polling cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport, MailError> {
        let mailbox = Mailbox::open(Arc::clone(&self.transport), &self.config.inbox).await?;
        let result = self.cycle_on(&mailbox).await;
        mailbox.close().await;
        result
    }

    async fn cycle_on(&self, mailbox: &Mailbox) -> Result<CycleReport, MailError> {
        let uids = mailbox.search_unseen().await?;
        let mut report = CycleReport {
            unseen: uids.len(),
            ..Default::default()
        };
        self.observer.on_cycle_start(uids.len());
        debug!("{} unseen message(s)", uids.len());

        for uid in uids {
            let message = match self.load(mailbox, uid).await {
                Some(m) if m.has_qualifying_attachment() => m,
                Some(m) => {
                    debug!("Message {} '{}' has no travel document", uid, m.subject);
                    report.skipped += 1;
                    continue;
                }
                None => {
                    report.skipped += 1;
                    continue;
                }
            };
            report.messages.push(self.handle(mailbox, message).await);
        }

        self.observer
            .on_cycle_complete(report.messages.len(), report.failed());
        Ok(report)
    }

    async fn load(&self, mailbox: &Mailbox, uid: Uid) -> Option<InboxMessage> {
        let raw = match mailbox.fetch(uid).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Cannot fetch message {}: {}", uid, e);
                return None;
            }
        };
        match parse_message(uid, &raw) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!("Cannot parse message {}: {}", uid, e);
                None
            }
        }
    }

    async fn handle(&self, mailbox: &Mailbox, message: InboxMessage) -> MessageReport {
        let uid = message.uid;
        if self.config.mark_read_on_select {
            if let Err(e) = mailbox.mark_seen(uid).await {
                warn!("Cannot flag message {} as read: {}", uid, e);
            }
        }

        info!(
            "Processing message {} '{}' from {} ({} attachment(s))",
            uid,
            message.subject,
            message.sender,
            message.attachments.len()
        );
        self.observer
            .on_message_start(uid, &message.subject, message.attachments.len());

        let outcome = self.process_message(&message).await;
        let (destination, folder) = if outcome.is_success() {
            (Destination::Processed, &self.config.processed_folder)
        } else {
            (Destination::Failed, &self.config.failed_folder)
        };

        if !self.config.mark_read_on_select {
            if let Err(e) = mailbox.mark_seen(uid).await {
                warn!("Cannot flag message {} as read: {}", uid, e);
            }
        }

        let move_error = match mailbox.move_to(uid, folder).await {
            Ok(()) => {
                info!("Message {} → {}", uid, folder);
                None
            }
            Err(e) => {
                warn!("Cannot move message {} to {}: {}", uid, folder, e);
                Some(e.to_string())
            }
        };
        self.observer
            .on_message_complete(uid, folder, move_error.is_none());

        MessageReport {
            uid,
            subject: message.subject,
            outcome,
            destination,
            move_error,
        }
    }

    /// Run every qualifying attachment of `message` through the pipeline.
    pub async fn process_message(&self, message: &InboxMessage) -> ProcessingOutcome {
        let mut outcome = ProcessingOutcome::default();
        for attachment in message.attachments.iter().filter(|a| a.qualifies()) {
            match self.extractor.process(attachment.to_document()).await {
                Ok(done) => {
                    outcome.attachments_processed += 1;
                    if done.calendar_event_id.is_some() {
                        outcome.events_created += 1;
                    }
                    self.observer
                        .on_attachment_complete(message.uid, &attachment.filename, &done.record.title);
                }
                Err(e) => {
                    warn!("Attachment '{}' of message {} failed: {}", attachment.filename, message.uid, e);
                    self.observer
                        .on_attachment_error(message.uid, &attachment.filename, &e.to_string());
                    outcome.errors.push(AttachmentError {
                        filename: attachment.filename.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        outcome
    }
}

/// Sleep for `duration`; `false` when `cancel` fired first.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
