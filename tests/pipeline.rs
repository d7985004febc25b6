//! Integration tests for the document → record pipeline.
//!
//! Every external collaborator is faked: a scripted model backend that records
//! what it was asked, a PDF engine that counts rasterisations, and an
//! in-memory calendar. No network, pdfium or tesseract is needed.

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use travelsync::calendar::CalendarEvent;
use travelsync::pipeline::pdf::FirstPage;
use travelsync::{
    CalendarError, CalendarService, ExtractError, ExtractionConfig, Extractor, ModelBackend,
    ModelRequest, PayloadMode, PdfEngine, RawDocument,
};

// ── Fakes ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Call {
    model: String,
    prompt: String,
    image_mime: Option<String>,
}

/// Answers per model from a queue; an exhausted queue repeats its last entry.
#[derive(Default)]
struct ScriptedBackend {
    script: Mutex<HashMap<String, Vec<Result<String, String>>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn answer(self: &Arc<Self>, model: &str, reply: Result<&str, &str>) -> Arc<Self> {
        let reply = match reply {
            Ok(text) => Ok(text.to_string()),
            Err(msg) => Err(msg.to_string()),
        };
        self.script
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push(reply);
        Arc::clone(self)
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn models_called(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.model).collect()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn generate(&self, model: &str, request: &ModelRequest) -> Result<String, ExtractError> {
        self.calls.lock().unwrap().push(Call {
            model: model.to_string(),
            prompt: request.prompt.clone(),
            image_mime: request.image_mime().map(str::to_string),
        });
        let mut script = self.script.lock().unwrap();
        let queue = script.entry(model.to_string()).or_default();
        let next = match queue.len() {
            0 => Err(format!("404 model {model} not found")),
            1 => queue[0].clone(),
            _ => queue.remove(0),
        };
        next.map_err(|detail| ExtractError::ModelCall {
            model: model.to_string(),
            detail,
        })
    }
}

struct FakePdf {
    text: String,
    renders: AtomicUsize,
}

impl FakePdf {
    fn with_text(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            renders: AtomicUsize::new(0),
        })
    }
}

impl PdfEngine for FakePdf {
    fn first_page(&self, _bytes: &[u8]) -> Result<FirstPage, ExtractError> {
        Ok(FirstPage {
            page_count: 2,
            text: self.text.clone(),
        })
    }

    fn render_first_page(&self, _bytes: &[u8], _scale: f32) -> Result<DynamicImage, ExtractError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 20, Rgb([250, 250, 250]))))
    }
}

#[derive(Default)]
struct MemoryCalendar {
    events: Mutex<Vec<CalendarEvent>>,
    fail: bool,
}

#[async_trait]
impl CalendarService for MemoryCalendar {
    async fn create_event(&self, event: &CalendarEvent) -> Result<String, CalendarError> {
        if self.fail {
            return Err(CalendarError::Api {
                status: 403,
                body: "forbidden".into(),
            });
        }
        let mut events = self.events.lock().unwrap();
        events.push(event.clone());
        Ok(format!("evt-{}", events.len()))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

const W6_4727: &str = r#"```json
{
  "title": "Flight W6 4727 Memmingen → Kraków",
  "start_date": "2025-12-14T07:00:00",
  "end_date": "2025-12-14T09:10:00",
  "location": "Memmingen Airport (FMM)",
  "description": "Wizz Air W6 4727, seat 12A, booking ABC123"
}
```"#;

fn png_bytes() -> Vec<u8> {
    let mut img = RgbaImage::from_pixel(32, 16, Rgba([255, 255, 255, 255]));
    img.put_pixel(3, 3, Rgba([0, 0, 0, 128]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn config(candidates: &[&str]) -> ExtractionConfig {
    ExtractionConfig::builder()
        .candidates(candidates.iter().copied())
        .candidate_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

fn extractor(pdf: Arc<FakePdf>, backend: Arc<ScriptedBackend>, candidates: &[&str]) -> Extractor {
    Extractor::new(pdf, backend, &config(candidates))
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn boarding_pass_image_to_calendar_event_without_time_shift() {
    let backend = ScriptedBackend::new().answer("flash", Ok(W6_4727));
    let calendar = Arc::new(MemoryCalendar::default());
    let ex = extractor(FakePdf::with_text(""), Arc::clone(&backend), &["flash"])
        .with_calendar(Arc::clone(&calendar) as Arc<dyn CalendarService>);

    let done = ex
        .process_upload(png_bytes(), "image/png", Some("boarding-pass.png"))
        .await
        .unwrap();

    assert_eq!(done.mode, PayloadMode::Image);
    assert_eq!(done.model, "flash");
    assert_eq!(done.record.start_date, "2025-12-14T07:00:00");
    assert_eq!(done.record.end_date.as_deref(), Some("2025-12-14T09:10:00"));
    assert_eq!(done.calendar_event_id.as_deref(), Some("evt-1"));

    let events = calendar.events.lock().unwrap();
    let ev = &events[0];
    assert_eq!(ev.start.format("%H:%M").to_string(), "07:00");
    assert_eq!(ev.end.format("%H:%M").to_string(), "09:10");
    assert_eq!(ev.timezone, "Europe/Berlin");

    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].image_mime.as_deref(), Some("image/png"));
}

#[tokio::test]
async fn pdf_with_text_layer_is_never_rasterised() {
    let text = "BOARDING PASS  W6 4727  FMM → KRK  14 DEC 2025  DEP 07:00  ARR 09:10  \
                SEAT 12A  GATE B4  BOOKING ABC123  PASSENGER JANE DOE  WIZZ AIR HUNGARY LTD  \
                Please be at the gate 30 minutes before departure.";
    assert!(text.len() > 150);
    let pdf = FakePdf::with_text(text);
    let backend = ScriptedBackend::new().answer("flash", Ok(W6_4727));
    let ex = extractor(Arc::clone(&pdf), Arc::clone(&backend), &["flash"]);

    let done = ex
        .extract(RawDocument::new(b"%PDF-1.7".to_vec(), "application/pdf"))
        .await
        .unwrap();

    assert_eq!(done.mode, PayloadMode::Text);
    assert_eq!(pdf.renders.load(Ordering::SeqCst), 0);
    let call = &backend.calls()[0];
    assert!(call.image_mime.is_none());
    assert!(call.prompt.contains("travel document text"));
    assert!(call.prompt.contains("GATE B4"));
}

#[tokio::test]
async fn scanned_pdf_is_rasterised_once() {
    let pdf = FakePdf::with_text("   \n  ");
    let backend = ScriptedBackend::new().answer("flash", Ok(W6_4727));
    let ex = extractor(Arc::clone(&pdf), Arc::clone(&backend), &["flash"]);

    let done = ex
        .extract(RawDocument::new(b"%PDF-1.4".to_vec(), "application/pdf"))
        .await
        .unwrap();

    assert_eq!(done.mode, PayloadMode::Image);
    assert_eq!(pdf.renders.load(Ordering::SeqCst), 1);
    assert_eq!(backend.calls()[0].image_mime.as_deref(), Some("image/png"));
}

#[tokio::test]
async fn discovered_model_is_reused_by_later_documents() {
    let backend = ScriptedBackend::new()
        .answer("a", Err("404 not found"))
        .answer("b", Err("503 overloaded"))
        .answer("c", Ok(W6_4727));
    let ex = extractor(FakePdf::with_text(""), Arc::clone(&backend), &["a", "b", "c"]);

    let first = ex
        .process_upload(png_bytes(), "image/png", None)
        .await
        .unwrap();
    assert_eq!(first.model, "c");
    assert_eq!(ex.orchestrator().cache().get().as_deref(), Some("c"));

    let second = ex
        .process_upload(png_bytes(), "image/png", None)
        .await
        .unwrap();
    assert_eq!(second.model, "c");
    assert_eq!(backend.models_called(), ["a", "b", "c", "c"]);
}

#[tokio::test]
async fn all_candidates_failing_reports_last_cause() {
    let backend = ScriptedBackend::new()
        .answer("a", Err("quota exceeded"))
        .answer("b", Err("model is overloaded"));
    let ex = extractor(FakePdf::with_text(""), Arc::clone(&backend), &["a", "b"]);

    let err = ex
        .process_upload(png_bytes(), "image/png", None)
        .await
        .unwrap_err();

    match err {
        ExtractError::ModelUnavailable { attempted, last } => {
            assert_eq!(attempted, 2);
            assert!(last.to_string().contains("overloaded"), "{last}");
        }
        other => panic!("unexpected {other}"),
    }
    assert!(ex.orchestrator().cache().get().is_none());
}

#[tokio::test]
async fn fenced_and_bare_replies_give_the_same_record() {
    let bare = W6_4727
        .trim_start_matches("```json")
        .trim_end_matches("```")
        .trim();
    let fenced_backend = ScriptedBackend::new().answer("m", Ok(W6_4727));
    let bare_backend = ScriptedBackend::new().answer("m", Ok(bare));

    let a = extractor(FakePdf::with_text(""), fenced_backend, &["m"])
        .process_upload(png_bytes(), "image/png", None)
        .await
        .unwrap();
    let b = extractor(FakePdf::with_text(""), bare_backend, &["m"])
        .process_upload(png_bytes(), "image/png", None)
        .await
        .unwrap();

    assert_eq!(a.record, b.record);
}

#[tokio::test]
async fn malformed_reply_is_not_retried_on_other_models() {
    let backend = ScriptedBackend::new()
        .answer("a", Ok("Sorry, I cannot read this ticket."))
        .answer("b", Ok(W6_4727));
    let ex = extractor(FakePdf::with_text(""), Arc::clone(&backend), &["a", "b"]);

    let err = ex
        .process_upload(png_bytes(), "image/png", None)
        .await
        .unwrap_err();

    assert!(matches!(err, ExtractError::MalformedResponse { .. }), "{err}");
    assert_eq!(backend.models_called(), ["a"]);
}

#[tokio::test]
async fn calendar_failure_keeps_the_record() {
    let backend = ScriptedBackend::new().answer("m", Ok(W6_4727));
    let calendar = Arc::new(MemoryCalendar {
        fail: true,
        ..Default::default()
    });
    let ex = extractor(FakePdf::with_text(""), backend, &["m"]).with_calendar(calendar);

    let done = ex
        .process_upload(png_bytes(), "image/png", None)
        .await
        .unwrap();

    assert!(done.calendar_event_id.is_none());
    assert_eq!(done.record.start_date, "2025-12-14T07:00:00");
}

#[tokio::test]
async fn local_file_input_is_sniffed_and_processed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scan");
    std::fs::write(&path, png_bytes()).unwrap();

    let backend = ScriptedBackend::new().answer("m", Ok(W6_4727));
    let ex = extractor(FakePdf::with_text(""), Arc::clone(&backend), &["m"]);

    let done = ex.process_input(path.to_str().unwrap()).await.unwrap();
    assert_eq!(done.mode, PayloadMode::Image);
    assert_eq!(backend.calls().len(), 1);
}
