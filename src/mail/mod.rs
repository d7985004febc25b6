//! Mailbox access for the email ingestion loop.
//!
//! * [`mime`]: raw RFC 822 bytes → [`InboxMessage`] with its qualifying attachments
//! * [`transport`]: blocking [`MailTransport`]/[`MailSession`] seam and the
//!   async [`Mailbox`] wrapper that runs every command on the blocking pool
//! * [`imap_client`]: the IMAP-over-TLS implementation
//!
//! Messages are addressed by IMAP UID throughout, so an expunge after one
//! move never shifts the id of the next message in the same cycle.

pub mod imap_client;
pub mod mime;
pub mod transport;

pub use imap_client::ImapTransport;
pub use mime::parse_message;
pub use transport::{MailSession, MailTransport, Mailbox};

use crate::document::{essence, RawDocument};
use std::fmt;

/// IMAP UID of a message in the inbox.
pub type Uid = u32;

/// An attachment extracted from a message.
#[derive(Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// `image/*` and `application/pdf` go through the pipeline; nothing else does.
    pub fn qualifies(&self) -> bool {
        is_qualifying_type(&self.content_type)
    }

    pub fn to_document(&self) -> RawDocument {
        RawDocument::new(self.bytes.clone(), self.content_type.clone())
            .with_filename(self.filename.clone())
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

pub fn is_qualifying_type(content_type: &str) -> bool {
    let mime = essence(content_type);
    mime.starts_with("image/") || mime == "application/pdf"
}

/// A parsed inbox message. `attachments` holds only qualifying attachments.
#[derive(Debug, Clone)]
pub struct InboxMessage {
    pub uid: Uid,
    pub subject: String,
    pub sender: String,
    pub date: String,
    pub attachments: Vec<Attachment>,
}

impl InboxMessage {
    pub fn has_qualifying_attachment(&self) -> bool {
        self.attachments.iter().any(Attachment::qualifies)
    }
}
