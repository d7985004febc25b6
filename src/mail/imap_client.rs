//! IMAP-over-TLS implementation of the mail transport.

use super::transport::{MailSession, MailTransport};
use super::Uid;
use crate::config::MailConfig;
use crate::error::MailError;
use native_tls::{TlsConnector, TlsStream};
use std::net::TcpStream;
use tracing::{debug, info};

/// Connects to `config.server:config.port` with implicit TLS.
#[derive(Debug, Clone)]
pub struct ImapTransport {
    config: MailConfig,
}

impl ImapTransport {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }
}

impl MailTransport for ImapTransport {
    fn connect(&self) -> Result<Box<dyn MailSession>, MailError> {
        let cfg = &self.config;
        let connect_err = |detail: String| MailError::Connect {
            server: cfg.server.clone(),
            port: cfg.port,
            detail,
        };

        let tls = TlsConnector::builder()
            .build()
            .map_err(|e| connect_err(e.to_string()))?;
        let client = imap::connect((cfg.server.as_str(), cfg.port), &cfg.server, &tls)
            .map_err(|e| connect_err(e.to_string()))?;

        let session = client
            .login(&cfg.address, &cfg.password)
            .map_err(|(e, _client)| MailError::Auth {
                user: cfg.address.clone(),
                detail: e.to_string(),
            })?;

        info!("Connected to {}:{} as {}", cfg.server, cfg.port, cfg.address);
        Ok(Box::new(ImapSession { session }))
    }
}

struct ImapSession {
    session: imap::Session<TlsStream<TcpStream>>,
}

impl MailSession for ImapSession {
    fn select(&mut self, folder: &str) -> Result<(), MailError> {
        let mailbox = self
            .session
            .select(folder)
            .map_err(|e| MailError::protocol("SELECT", e))?;
        debug!("Selected {} ({} messages)", folder, mailbox.exists);
        Ok(())
    }

    fn search_unseen(&mut self) -> Result<Vec<Uid>, MailError> {
        let uids = self
            .session
            .uid_search("UNSEEN")
            .map_err(|e| MailError::protocol("UID SEARCH", e))?;
        Ok(uids.into_iter().collect())
    }

    fn fetch(&mut self, uid: Uid) -> Result<Vec<u8>, MailError> {
        // BODY.PEEK leaves \Seen untouched; messages without a ticket stay unread.
        let fetches = self
            .session
            .uid_fetch(uid.to_string(), "BODY.PEEK[]")
            .map_err(|e| MailError::protocol("UID FETCH", e))?;
        fetches
            .iter()
            .find_map(|f| f.body())
            .map(<[u8]>::to_vec)
            .ok_or_else(|| MailError::Protocol {
                op: "UID FETCH",
                detail: format!("message {uid} has no body"),
            })
    }

    fn mark_seen(&mut self, uid: Uid) -> Result<(), MailError> {
        self.session
            .uid_store(uid.to_string(), "+FLAGS (\\Seen)")
            .map_err(|e| MailError::protocol("UID STORE", e))?;
        Ok(())
    }

    fn ensure_folder(&mut self, folder: &str) -> Result<(), MailError> {
        let existing = self
            .session
            .list(None, Some(folder))
            .map_err(|e| MailError::protocol("LIST", e))?;
        if existing.iter().any(|n| n.name() == folder) {
            return Ok(());
        }
        match self.session.create(folder) {
            Ok(()) => {
                info!("Created mailbox folder {}", folder);
                Ok(())
            }
            Err(e) if e.to_string().to_ascii_lowercase().contains("exist") => Ok(()),
            Err(e) => Err(MailError::protocol("CREATE", e)),
        }
    }

    fn copy(&mut self, uid: Uid, folder: &str) -> Result<(), MailError> {
        self.session
            .uid_copy(uid.to_string(), folder)
            .map_err(|e| MailError::protocol("UID COPY", e))
    }

    fn mark_deleted(&mut self, uid: Uid) -> Result<(), MailError> {
        self.session
            .uid_store(uid.to_string(), "+FLAGS (\\Deleted)")
            .map_err(|e| MailError::protocol("UID STORE", e))?;
        Ok(())
    }

    fn expunge(&mut self) -> Result<(), MailError> {
        self.session
            .expunge()
            .map_err(|e| MailError::protocol("EXPUNGE", e))?;
        Ok(())
    }

    fn logout(&mut self) -> Result<(), MailError> {
        self.session
            .logout()
            .map_err(|e| MailError::protocol("LOGOUT", e))
    }
}
