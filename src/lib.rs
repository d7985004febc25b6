//! # travelsync
//!
//! Turn tickets, boarding passes and booking confirmations into calendar
//! events using Vision Language Models.
//!
//! A document (photo, screenshot or PDF) is normalised to a single canonical
//! payload, optionally enriched with OCR hints, sent to an ordered list of
//! candidate models until one answers, and the answer is parsed into a
//! [`TravelRecord`]. A mailbox poller feeds email attachments through the same
//! chain and files each message into a processed or failed folder.
//!
//! ## Pipeline Overview
//!
//! ```text
//! bytes (upload | path | URL | email attachment)
//!  │
//!  ├─ 1. Normalize  image → flat RGB; PDF → text layer or page-1 render
//!  ├─ 2. OCR        optional tesseract hints for image payloads
//!  ├─ 3. Models     ordered candidates, per-call timeout, cached winner
//!  ├─ 4. Parse      strip fences → TravelRecord JSON
//!  └─ 5. Calendar   optional event creation; failures never fail the document
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use travelsync::{ExtractionConfig, Extractor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider key comes from the environment (GEMINI_API_KEY, ...).
//!     let config = ExtractionConfig::builder().build()?;
//!     let extractor = Extractor::from_config(&config);
//!     let done = extractor.process_input("boarding-pass.png").await?;
//!     println!("{} at {}", done.record.title, done.record.start_date);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `cli`     | on      | Enables the `travelsync` binary (clap + anyhow + tracing-subscriber) |
//! | `enhance` | on      | imageproc denoise/equalise before OCR |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod calendar;
pub mod config;
pub mod document;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod mail;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use calendar::{CalendarEvent, CalendarService, GoogleCalendarClient};
pub use config::{CalendarConfig, ExtractionConfig, ExtractionConfigBuilder, MailConfig, ModelPolicy};
pub use document::{
    ExtractedText, NormalizedPayload, PayloadMode, ProcessedDocument, RawDocument, TravelRecord,
};
pub use error::{CalendarError, ExtractError, MailError};
pub use extract::Extractor;
pub use ingest::{CycleReport, IngestLoop, ProcessingOutcome};
pub use mail::{Attachment, ImapTransport, InboxMessage, MailSession, MailTransport};
pub use pipeline::llm::{ModelBackend, ModelRequest};
pub use pipeline::ocr::TextRecognizer;
pub use pipeline::pdf::PdfEngine;
pub use progress::{IngestObserver, NoopObserver};
