//! Data carried through one extraction invocation.
//!
//! ```text
//! RawDocument ──▶ NormalizedPayload ──▶ (model text) ──▶ TravelRecord
//!  bytes + type     RGB bitmap | text                      title, dates, …
//! ```
//!
//! Everything except [`TravelRecord`] is scoped to a single invocation and
//! dropped as soon as the model call returns.

use chrono::{NaiveDate, NaiveDateTime};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bytes as received from an upload or an email attachment.
#[derive(Clone)]
pub struct RawDocument {
    pub bytes: Vec<u8>,
    /// MIME type, possibly with parameters (`image/png; name="x.png"`).
    pub content_type: String,
    /// Used only for logging.
    pub filename: Option<String>,
}

impl RawDocument {
    pub fn new(bytes: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
            filename: None,
        }
    }

    pub fn with_filename(mut self, name: impl Into<String>) -> Self {
        self.filename = Some(name.into());
        self
    }

    /// Lower-cased MIME type without parameters.
    pub fn mime(&self) -> String {
        essence(&self.content_type)
    }

    /// A short label for log lines.
    pub fn label(&self) -> &str {
        self.filename.as_deref().unwrap_or("<unnamed>")
    }
}

impl fmt::Debug for RawDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawDocument")
            .field("content_type", &self.content_type)
            .field("filename", &self.filename)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Lower-cased `type/subtype` with parameters stripped.
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// The single canonical input handed to the model.
#[derive(Clone)]
pub enum NormalizedPayload {
    /// Canonical RGB bitmap (image uploads, scanned PDFs).
    Image(RgbImage),
    /// Text layer of a PDF's first page.
    Text(String),
}

impl NormalizedPayload {
    pub fn mode(&self) -> PayloadMode {
        match self {
            NormalizedPayload::Image(_) => PayloadMode::Image,
            NormalizedPayload::Text(_) => PayloadMode::Text,
        }
    }

    pub fn as_image(&self) -> Option<&RgbImage> {
        match self {
            NormalizedPayload::Image(img) => Some(img),
            NormalizedPayload::Text(_) => None,
        }
    }
}

impl fmt::Debug for NormalizedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizedPayload::Image(img) => {
                write!(f, "Image({}x{})", img.width(), img.height())
            }
            NormalizedPayload::Text(t) => write!(f, "Text({} chars)", t.chars().count()),
        }
    }
}

/// Which prompt branch a payload selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadMode {
    Image,
    Text,
}

/// OCR output used as supplementary prompt context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedText {
    pub text: String,
    /// Mean token confidence in `[0, 100]`.
    pub confidence: f32,
}

impl ExtractedText {
    pub const MIN_CHARS: usize = 50;
    pub const MIN_CONFIDENCE: f32 = 30.0;

    pub fn empty() -> Self {
        Self::default()
    }

    /// Only text that is both long enough and confident enough reaches the prompt.
    pub fn passes_quality_gate(&self) -> bool {
        self.text.trim().chars().count() > Self::MIN_CHARS && self.confidence > Self::MIN_CONFIDENCE
    }
}

/// The structured travel event produced by the pipeline.
///
/// Dates are naive ISO-8601 strings in the document's local time. The
/// pipeline never applies a timezone shift; the calendar adapter attaches a
/// zone when the event is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelRecord {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
    pub start_date: String,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub location: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
}

impl TravelRecord {
    /// Parsed start, ignoring any offset the model may have appended.
    pub fn start(&self) -> Option<NaiveDateTime> {
        parse_naive(&self.start_date)
    }

    /// Parsed end; `None` when absent, blank or unparseable.
    pub fn end(&self) -> Option<NaiveDateTime> {
        self.end_date.as_deref().and_then(parse_naive)
    }
}

/// A record together with how it was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedDocument {
    pub record: TravelRecord,
    pub mode: PayloadMode,
    /// Candidate model that answered.
    pub model: String,
    /// Set when the calendar adapter created an event.
    pub calendar_event_id: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse a naive ISO-8601 datetime as the model writes it.
///
/// Accepts `YYYY-MM-DDTHH:MM[:SS[.fff]]`, a space instead of `T`, and a bare
/// date (midnight). A trailing `Z` or `±HH:MM` is dropped, never applied.
pub fn parse_naive(value: &str) -> Option<NaiveDateTime> {
    let v = strip_offset(value.trim());
    if v.is_empty() {
        return None;
    }
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(v, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(v, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn strip_offset(v: &str) -> &str {
    if let Some(stripped) = v.strip_suffix('Z').or_else(|| v.strip_suffix('z')) {
        return stripped;
    }
    // ±HH:MM or ±HHMM after the time part
    if v.len() > 16 {
        let tail_start = v.len().saturating_sub(6);
        if let Some(pos) = v[tail_start..].rfind(['+', '-']) {
            let idx = tail_start + pos;
            if v[..idx].contains('T') || v[..idx].contains(' ') {
                return &v[..idx];
            }
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn essence_strips_params_and_case() {
        assert_eq!(essence("Image/PNG; name=\"a.png\""), "image/png");
        assert_eq!(essence("application/pdf"), "application/pdf");
        assert_eq!(essence(""), "");
    }

    #[test]
    fn quality_gate_needs_length_and_confidence() {
        let long = "x".repeat(51);
        assert!(ExtractedText {
            text: long.clone(),
            confidence: 31.0
        }
        .passes_quality_gate());
        assert!(!ExtractedText {
            text: long,
            confidence: 30.0
        }
        .passes_quality_gate());
        assert!(!ExtractedText {
            text: "x".repeat(50),
            confidence: 99.0
        }
        .passes_quality_gate());
        assert!(!ExtractedText::empty().passes_quality_gate());
    }

    #[test]
    fn parse_naive_variants() {
        let dt = parse_naive("2025-12-14T07:00:00").unwrap();
        assert_eq!(dt.to_string(), "2025-12-14 07:00:00");
        assert!(parse_naive("2025-12-14T07:00").is_some());
        assert!(parse_naive("2025-12-14 07:00:00").is_some());
        assert_eq!(
            parse_naive("2025-12-14").unwrap().to_string(),
            "2025-12-14 00:00:00"
        );
        assert!(parse_naive("").is_none());
        assert!(parse_naive("next tuesday").is_none());
    }

    #[test]
    fn parse_naive_drops_offsets_without_shifting() {
        assert_eq!(
            parse_naive("2025-12-14T07:00:00Z").unwrap().to_string(),
            "2025-12-14 07:00:00"
        );
        assert_eq!(
            parse_naive("2025-12-14T07:00:00+01:00").unwrap().to_string(),
            "2025-12-14 07:00:00"
        );
        assert_eq!(
            parse_naive("2025-12-14T07:00:00-05:00").unwrap().to_string(),
            "2025-12-14 07:00:00"
        );
    }

    #[test]
    fn record_null_fields_become_empty() {
        let rec: TravelRecord = serde_json::from_str(
            r#"{"title":null,"start_date":"2025-01-01T10:00:00","end_date":null,"location":null}"#,
        )
        .unwrap();
        assert_eq!(rec.title, "");
        assert_eq!(rec.location, "");
        assert_eq!(rec.description, "");
        assert!(rec.end_date.is_none());
        assert!(rec.end().is_none());
    }

    #[test]
    fn payload_debug_is_compact() {
        let p = NormalizedPayload::Image(RgbImage::new(4, 3));
        assert_eq!(format!("{p:?}"), "Image(4x3)");
        assert_eq!(p.mode(), PayloadMode::Image);
        let t = NormalizedPayload::Text("abc".into());
        assert_eq!(format!("{t:?}"), "Text(3 chars)");
        assert!(t.as_image().is_none());
    }
}
