//! Mail transport seam.
//!
//! Mailbox protocols are blocking and ordered: every command in a session
//! must finish before the next starts. [`MailSession`] models that directly
//! as a synchronous trait. [`Mailbox`] owns one session per polling cycle
//! behind a mutex and dispatches each command through `spawn_blocking`, so
//! the async loop never blocks a runtime worker and commands stay serialised.

use super::Uid;
use crate::error::MailError;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Opens authenticated sessions.
pub trait MailTransport: Send + Sync {
    fn connect(&self) -> Result<Box<dyn MailSession>, MailError>;
}

/// One authenticated, blocking mailbox session.
pub trait MailSession: Send {
    fn select(&mut self, folder: &str) -> Result<(), MailError>;
    fn search_unseen(&mut self) -> Result<Vec<Uid>, MailError>;
    /// Full raw message, without setting `\Seen`.
    fn fetch(&mut self, uid: Uid) -> Result<Vec<u8>, MailError>;
    fn mark_seen(&mut self, uid: Uid) -> Result<(), MailError>;
    /// Create `folder` unless it already exists.
    fn ensure_folder(&mut self, folder: &str) -> Result<(), MailError>;
    fn copy(&mut self, uid: Uid, folder: &str) -> Result<(), MailError>;
    fn mark_deleted(&mut self, uid: Uid) -> Result<(), MailError>;
    fn expunge(&mut self) -> Result<(), MailError>;
    fn logout(&mut self) -> Result<(), MailError>;
}

/// Async handle over one [`MailSession`].
pub struct Mailbox {
    session: Arc<Mutex<Box<dyn MailSession>>>,
}

impl Mailbox {
    /// Connect and select `inbox`.
    pub async fn open(transport: Arc<dyn MailTransport>, inbox: &str) -> Result<Self, MailError> {
        let inbox = inbox.to_string();
        let session = tokio::task::spawn_blocking(move || {
            let mut session = transport.connect()?;
            session.select(&inbox)?;
            Ok::<_, MailError>(session)
        })
        .await
        .map_err(|e| MailError::Worker(e.to_string()))??;

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
        })
    }

    async fn run<T, F>(&self, op: F) -> Result<T, MailError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn MailSession) -> Result<T, MailError> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let mut guard = session.lock().unwrap_or_else(|e| e.into_inner());
            op(&mut **guard)
        })
        .await
        .map_err(|e| MailError::Worker(e.to_string()))?
    }

    pub async fn search_unseen(&self) -> Result<Vec<Uid>, MailError> {
        let mut uids = self.run(|s| s.search_unseen()).await?;
        uids.sort_unstable();
        Ok(uids)
    }

    pub async fn fetch(&self, uid: Uid) -> Result<Vec<u8>, MailError> {
        self.run(move |s| s.fetch(uid)).await
    }

    pub async fn mark_seen(&self, uid: Uid) -> Result<(), MailError> {
        self.run(move |s| s.mark_seen(uid)).await
    }

    /// Move = ensure folder, copy, flag `\Deleted`, expunge.
    pub async fn move_to(&self, uid: Uid, folder: &str) -> Result<(), MailError> {
        let folder = folder.to_string();
        self.run(move |s| {
            s.ensure_folder(&folder)?;
            s.copy(uid, &folder)?;
            s.mark_deleted(uid)?;
            s.expunge()?;
            debug!("Moved message {} to {}", uid, folder);
            Ok(())
        })
        .await
    }

    /// Log out; failures are logged, the session is gone either way.
    pub async fn close(self) {
        if let Err(e) = self.run(|s| s.logout()).await {
            warn!("Mailbox logout failed: {}", e);
        }
    }
}
