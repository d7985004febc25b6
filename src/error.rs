//! Error types for the travelsync library.
//!
//! Three error types mirror the three external boundaries of the system:
//!
//! * [`ExtractError`]: a single document could not be turned into a
//!   [`crate::document::TravelRecord`]. Returned as `Err(ExtractError)` from
//!   [`crate::extract::Extractor`]. Inside the email loop these are recorded
//!   per attachment in [`crate::ingest::ProcessingOutcome`] instead of being
//!   propagated, so one unreadable ticket never hides its siblings.
//!
//! * [`MailError`]: the mailbox could not be reached or refused an operation.
//!   Surfaced for the current polling cycle; the loop tries again next tick.
//!
//! * [`CalendarError`]: the calendar rejected an event. Never fatal: the
//!   calendar adapter logs it and reports "no event id".

use thiserror::Error;

/// Fatal errors for one document extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors (400-class) ──────────────────────────────────────────
    /// Content-type is not an image or PDF, or the image bytes do not decode.
    #[error("Unsupported format '{content_type}': {detail}")]
    UnsupportedFormat {
        content_type: String,
        detail: String,
    },

    /// The PDF has no pages or could not be parsed.
    #[error("Invalid document: {detail}")]
    InvalidDocument { detail: String },

    /// Upload exceeded the intake size limit.
    #[error("Document is {size} bytes, the limit is {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Local input path could not be read.
    #[error("Cannot read '{path}': {reason}")]
    InputUnreadable { path: String, reason: String },

    /// URL input could not be downloaded.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    // ── Model errors ──────────────────────────────────────────────────────
    /// A single candidate did not answer within the per-candidate budget.
    #[error("Model '{model}' timed out after {secs}s")]
    ModelTimeout { model: String, secs: u64 },

    /// A single candidate answered with an error.
    #[error("Model '{model}' failed: {detail}")]
    ModelCall { model: String, detail: String },

    /// Every configured candidate failed; `last` is the final candidate's error.
    #[error("No model candidate succeeded after {attempted} attempt(s). Last error: {last}")]
    ModelUnavailable {
        attempted: usize,
        #[source]
        last: Box<ExtractError>,
    },

    /// The model answered but the text is not a usable travel record.
    #[error("Malformed model response: {detail}")]
    MalformedResponse { detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// The model provider is not initialised (missing API key etc.).
    #[error("Model provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (worker panic, encoder failure).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// `true` for errors caused by the submitted document itself.
    ///
    /// An HTTP layer maps these to 400; everything else is a 5xx.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ExtractError::UnsupportedFormat { .. }
                | ExtractError::InvalidDocument { .. }
                | ExtractError::PayloadTooLarge { .. }
                | ExtractError::InputUnreadable { .. }
        )
    }

    /// `true` for configuration errors. The orchestrator returns these at
    /// once instead of trying the next candidate.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ExtractError::ProviderNotConfigured { .. }
                | ExtractError::InvalidConfig(_)
                | ExtractError::PdfiumBindingFailed(_)
        )
    }
}

/// Mailbox transport errors.
#[derive(Debug, Clone, Error)]
pub enum MailError {
    /// `EMAIL_ADDRESS` / `EMAIL_PASSWORD` are not set.
    #[error("Mailbox credentials missing: set {0}")]
    MissingCredentials(String),

    /// TCP/TLS connection to the IMAP server failed.
    #[error("Cannot connect to {server}:{port}: {detail}")]
    Connect {
        server: String,
        port: u16,
        detail: String,
    },

    /// The server rejected the login.
    #[error("Login rejected for '{user}': {detail}")]
    Auth { user: String, detail: String },

    /// A protocol command failed.
    #[error("IMAP {op} failed: {detail}")]
    Protocol { op: &'static str, detail: String },

    /// The blocking mailbox worker panicked or was cancelled.
    #[error("Mailbox worker failed: {0}")]
    Worker(String),
}

impl MailError {
    pub(crate) fn protocol(op: &'static str, err: impl std::fmt::Display) -> Self {
        MailError::Protocol {
            op,
            detail: err.to_string(),
        }
    }
}

/// Calendar adapter errors. Always swallowed by
/// [`crate::calendar::add_record_to_calendar`].
#[derive(Debug, Error)]
pub enum CalendarError {
    /// The record's dates do not parse as naive ISO-8601.
    #[error("Cannot schedule '{value}': {detail}")]
    InvalidDate { value: String, detail: String },

    /// No access token was supplied.
    #[error("Calendar is not authorised: {0}")]
    NotAuthorised(String),

    /// The HTTP request failed before a response arrived.
    #[error("Calendar request failed: {0}")]
    Http(String),

    /// The calendar API answered with a non-success status.
    #[error("Calendar API returned {status}: {body}")]
    Api { status: u16, body: String },
}
