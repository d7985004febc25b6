//! End-to-end extraction entry points.
//!
//! [`Extractor`] owns one instance of every pipeline stage and is meant to be
//! built once and shared (`Arc<Extractor>`) by the upload path and the email
//! loop. The orchestrator's model cache lives inside it, so a process that
//! keeps one extractor pays for model discovery once.
//!
//! ```text
//! RawDocument ─▶ normalize ─▶ [ocr] ─▶ orchestrator ─▶ parse ─▶ [calendar]
//! ```

use crate::calendar::{add_record_to_calendar, CalendarService};
use crate::config::ExtractionConfig;
use crate::document::{essence, NormalizedPayload, ProcessedDocument, RawDocument, TravelRecord};
use crate::error::ExtractError;
use crate::pipeline::llm::{EdgequakeBackend, ModelBackend};
use crate::pipeline::normalize::Normalizer;
use crate::pipeline::ocr::{self, TesseractRecognizer, TextRecognizer};
use crate::pipeline::orchestrator::Orchestrator;
use crate::pipeline::pdf::{PdfEngine, PdfiumEngine};
use crate::pipeline::{input, parse};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Content-types the upload intake accepts.
pub const UPLOAD_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png", "application/pdf"];

/// The document-to-record pipeline.
pub struct Extractor {
    normalizer: Normalizer,
    ocr: Option<Arc<dyn TextRecognizer>>,
    orchestrator: Orchestrator,
    calendar: Option<Arc<dyn CalendarService>>,
    max_upload_bytes: usize,
    download_timeout_secs: u64,
}

impl Extractor {
    /// Assemble the production pipeline from a validated config.
    ///
    /// Uses `config.backend` when set, otherwise an [`EdgequakeBackend`] for
    /// `config.provider_name`. pdfium is bound lazily on first PDF.
    pub fn from_config(config: &ExtractionConfig) -> Self {
        let backend: Arc<dyn ModelBackend> = match &config.backend {
            Some(b) => Arc::clone(b),
            None => Arc::new(EdgequakeBackend::new(config.provider_name.clone())),
        };
        let pdf: Arc<dyn PdfEngine> = Arc::new(PdfiumEngine::new(config.pdfium_lib_path.clone()));

        let mut extractor = Self::new(Arc::clone(&pdf), backend, config);
        if config.ocr_enabled {
            extractor.ocr = Some(Arc::new(TesseractRecognizer::new(
                config.ocr_languages.clone(),
                Duration::from_secs(config.ocr_timeout_secs),
            )));
        }
        extractor
    }

    /// Assemble a pipeline around explicit PDF and model backends.
    pub fn new(pdf: Arc<dyn PdfEngine>, backend: Arc<dyn ModelBackend>, config: &ExtractionConfig) -> Self {
        Self {
            normalizer: Normalizer::new(pdf),
            ocr: None,
            orchestrator: Orchestrator::new(backend, config.policy.clone())
                .with_sampling(config.temperature, config.max_tokens),
            calendar: None,
            max_upload_bytes: config.max_upload_bytes,
            download_timeout_secs: config.download_timeout_secs,
        }
    }

    pub fn with_ocr(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.ocr = Some(recognizer);
        self
    }

    pub fn with_calendar(mut self, calendar: Arc<dyn CalendarService>) -> Self {
        self.calendar = Some(calendar);
        self
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn has_calendar(&self) -> bool {
        self.calendar.is_some()
    }

    /// Run one document through the pipeline without touching the calendar.
    pub async fn extract(&self, doc: RawDocument) -> Result<ProcessedDocument, ExtractError> {
        let start = Instant::now();
        let label = doc.label().to_string();

        let payload = self.normalizer.normalize(doc).await?;
        let mode = payload.mode();
        debug!("{}: normalised to {:?}", label, payload);

        let ocr_text = match (&self.ocr, &payload) {
            (Some(recognizer), NormalizedPayload::Image(img)) => {
                Some(ocr::extract_text(recognizer.as_ref(), img).await)
            }
            _ => None,
        };

        let reply = self.orchestrator.call(&payload, ocr_text.as_ref()).await?;
        drop(payload);

        let record = parse::parse_record(&reply.text)?;
        info!(
            "{}: '{}' starting {} via {} ({:?} mode, {:?})",
            label,
            record.title,
            record.start_date,
            reply.model,
            mode,
            start.elapsed()
        );

        Ok(ProcessedDocument {
            record,
            mode,
            model: reply.model,
            calendar_event_id: None,
        })
    }

    /// Extract and, when a calendar is configured, create the event.
    ///
    /// A calendar failure leaves `calendar_event_id` as `None`; it never
    /// turns a successful extraction into an error.
    pub async fn process(&self, doc: RawDocument) -> Result<ProcessedDocument, ExtractError> {
        let mut processed = self.extract(doc).await?;
        processed.calendar_event_id = self.add_to_calendar(&processed.record).await;
        Ok(processed)
    }

    /// Calendar step on its own; `None` without a calendar or on failure.
    pub async fn add_to_calendar(&self, record: &TravelRecord) -> Option<String> {
        match &self.calendar {
            Some(calendar) => add_record_to_calendar(calendar.as_ref(), record).await,
            None => None,
        }
    }

    /// Upload intake: validate type and size before any decoding, then process.
    pub async fn process_upload(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        filename: Option<&str>,
    ) -> Result<ProcessedDocument, ExtractError> {
        let mime = essence(content_type);
        if !UPLOAD_TYPES.contains(&mime.as_str()) {
            return Err(ExtractError::UnsupportedFormat {
                content_type: mime,
                detail: format!("uploads must be one of {}", UPLOAD_TYPES.join(", ")),
            });
        }
        if bytes.len() > self.max_upload_bytes {
            return Err(ExtractError::PayloadTooLarge {
                size: bytes.len(),
                limit: self.max_upload_bytes,
            });
        }

        let mut doc = RawDocument::new(bytes, content_type);
        if let Some(name) = filename {
            doc = doc.with_filename(name);
        }
        self.process(doc).await
    }

    /// Resolve a local path or URL and process it.
    pub async fn process_input(&self, input_str: &str) -> Result<ProcessedDocument, ExtractError> {
        let doc = input::resolve_input(input_str, self.download_timeout_secs).await?;
        self.process(doc).await
    }
}
