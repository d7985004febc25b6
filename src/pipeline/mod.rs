//! Pipeline stages for travel-document extraction.
//!
//! Each submodule implements one transformation step and is testable on its
//! own; the seams that touch the outside world ([`pdf::PdfEngine`],
//! [`ocr::TextRecognizer`], [`llm::ModelBackend`]) are traits so tests can
//! substitute fakes.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ normalize ──▶ ocr ──▶ orchestrator ──▶ parse
//! (path/URL) (RGB|text)  (hints)  (encode + llm)   (JSON record)
//! ```
//!
//! 1. [`input`] turns a path or URL into a `RawDocument`
//! 2. [`normalize`] decodes images to flat RGB and short-circuits PDFs with a
//!    text layer; rasterisation goes through [`pdf`] on the blocking pool
//! 3. [`ocr`] optionally extracts text hints from image payloads
//! 4. [`orchestrator`] walks the model candidates with a per-call timeout,
//!    caching the last model that worked; [`encode`] and [`llm`] do the
//!    request building
//! 5. [`parse`] strips code fences and decodes the travel record

pub mod encode;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod ocr;
pub mod orchestrator;
pub mod parse;
pub mod pdf;
