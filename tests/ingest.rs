//! Integration tests for the email ingestion loop against an in-memory mailbox.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;
use travelsync::ingest::Destination;
use travelsync::mail::Uid;
use travelsync::pipeline::pdf::FirstPage;
use travelsync::{
    ExtractError, ExtractionConfig, Extractor, IngestLoop, IngestObserver, MailConfig, MailError,
    MailSession, MailTransport, ModelBackend, ModelRequest, PdfEngine,
};

// ── In-memory mailbox ────────────────────────────────────────────────────────

#[derive(Default)]
struct MailState {
    inbox: BTreeMap<Uid, Vec<u8>>,
    seen: Vec<Uid>,
    deleted: Vec<Uid>,
    folders: HashMap<String, Vec<Uid>>,
    /// Every session command in order, e.g. `fetch 3`, `copy 3 Processed`.
    log: Vec<String>,
    connects: usize,
    refuse_connect: bool,
    /// Number of upcoming searches that crash the session worker.
    crash_searches: usize,
}

#[derive(Clone, Default)]
struct MemoryMail {
    state: Arc<Mutex<MailState>>,
}

impl MemoryMail {
    fn with_messages(messages: Vec<(Uid, Vec<u8>)>) -> Self {
        let mail = Self::default();
        mail.state.lock().unwrap().inbox = messages.into_iter().collect();
        mail
    }

    fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    fn folder(&self, name: &str) -> Vec<Uid> {
        self.state
            .lock()
            .unwrap()
            .folders
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    fn in_inbox(&self, uid: Uid) -> bool {
        self.state.lock().unwrap().inbox.contains_key(&uid)
    }

    fn is_seen(&self, uid: Uid) -> bool {
        self.state.lock().unwrap().seen.contains(&uid)
    }

    fn position(&self, entry: &str) -> Option<usize> {
        self.log().iter().position(|l| l == entry)
    }
}

impl MailTransport for MemoryMail {
    fn connect(&self) -> Result<Box<dyn MailSession>, MailError> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        if state.refuse_connect {
            return Err(MailError::Connect {
                server: "imap.test".into(),
                port: 993,
                detail: "connection refused".into(),
            });
        }
        Ok(Box::new(MemorySession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemorySession {
    state: Arc<Mutex<MailState>>,
}

impl MemorySession {
    fn record(&self, entry: String) -> std::sync::MutexGuard<'_, MailState> {
        let mut state = self.state.lock().unwrap();
        state.log.push(entry);
        state
    }
}

impl MailSession for MemorySession {
    fn select(&mut self, folder: &str) -> Result<(), MailError> {
        self.record(format!("select {folder}"));
        Ok(())
    }

    fn search_unseen(&mut self) -> Result<Vec<Uid>, MailError> {
        let crash = {
            let mut state = self.record("search".into());
            let crash = state.crash_searches > 0;
            state.crash_searches = state.crash_searches.saturating_sub(1);
            crash
        };
        if crash {
            panic!("mailbox worker crashed during SEARCH");
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .inbox
            .keys()
            .rev()
            .copied()
            .filter(|uid| !state.seen.contains(uid))
            .collect())
    }

    fn fetch(&mut self, uid: Uid) -> Result<Vec<u8>, MailError> {
        let state = self.record(format!("fetch {uid}"));
        state.inbox.get(&uid).cloned().ok_or(MailError::Protocol {
            op: "UID FETCH",
            detail: format!("no message {uid}"),
        })
    }

    fn mark_seen(&mut self, uid: Uid) -> Result<(), MailError> {
        let mut state = self.record(format!("seen {uid}"));
        state.seen.push(uid);
        Ok(())
    }

    fn ensure_folder(&mut self, folder: &str) -> Result<(), MailError> {
        let mut state = self.record(format!("ensure {folder}"));
        state.folders.entry(folder.to_string()).or_default();
        Ok(())
    }

    fn copy(&mut self, uid: Uid, folder: &str) -> Result<(), MailError> {
        let mut state = self.record(format!("copy {uid} {folder}"));
        match state.folders.get_mut(folder) {
            Some(f) => {
                f.push(uid);
                Ok(())
            }
            None => Err(MailError::Protocol {
                op: "UID COPY",
                detail: format!("[TRYCREATE] {folder}"),
            }),
        }
    }

    fn mark_deleted(&mut self, uid: Uid) -> Result<(), MailError> {
        let mut state = self.record(format!("delete {uid}"));
        state.deleted.push(uid);
        Ok(())
    }

    fn expunge(&mut self) -> Result<(), MailError> {
        let mut state = self.record("expunge".into());
        let deleted = std::mem::take(&mut state.deleted);
        for uid in deleted {
            state.inbox.remove(&uid);
        }
        Ok(())
    }

    fn logout(&mut self) -> Result<(), MailError> {
        self.record("logout".into());
        Ok(())
    }
}

// ── Pipeline fakes ───────────────────────────────────────────────────────────

struct NoPdf;

impl PdfEngine for NoPdf {
    fn first_page(&self, _bytes: &[u8]) -> Result<FirstPage, ExtractError> {
        Ok(FirstPage {
            page_count: 1,
            text: "INVOICE  Hotel Sacher Wien  check-in 2025-12-20 15:00  check-out 2025-12-22 11:00"
                .into(),
        })
    }

    fn render_first_page(&self, _bytes: &[u8], _scale: f32) -> Result<DynamicImage, ExtractError> {
        unreachable!("text layer is long enough")
    }
}

struct Answer;

#[async_trait]
impl ModelBackend for Answer {
    async fn generate(&self, _model: &str, _request: &ModelRequest) -> Result<String, ExtractError> {
        Ok(r#"{"title":"Hotel Sacher","start_date":"2025-12-20T15:00:00","end_date":"2025-12-22T11:00:00","location":"Wien","description":null}"#.into())
    }
}

#[derive(Default)]
struct Counting {
    ok: AtomicUsize,
    failed: AtomicUsize,
    moved: AtomicUsize,
}

impl IngestObserver for Counting {
    fn on_attachment_complete(&self, _uid: u32, _filename: &str, _title: &str) {
        self.ok.fetch_add(1, Ordering::SeqCst);
    }

    fn on_attachment_error(&self, _uid: u32, _filename: &str, _error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_message_complete(&self, _uid: u32, _folder: &str, moved: bool) {
        if moved {
            self.moved.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn png() -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([255, 255, 255])))
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn message(subject: &str, attachments: &[(&str, &str, &[u8])]) -> Vec<u8> {
    let mut raw = format!(
        "From: bookings@example.com\r\nSubject: {subject}\r\nMIME-Version: 1.0\r\n\
         Content-Type: multipart/mixed; boundary=\"BOUND\"\r\n\r\n\
         --BOUND\r\nContent-Type: text/plain\r\n\r\nYour documents.\r\n"
    );
    for (name, content_type, bytes) in attachments {
        raw.push_str(&format!(
            "--BOUND\r\nContent-Type: {content_type}; name=\"{name}\"\r\n\
             Content-Disposition: attachment; filename=\"{name}\"\r\n\
             Content-Transfer-Encoding: base64\r\n\r\n{}\r\n",
            STANDARD.encode(bytes)
        ));
    }
    raw.push_str("--BOUND--\r\n");
    raw.into_bytes()
}

fn mail_config() -> MailConfig {
    let mut cfg = MailConfig::new("me@example.com", "app-password");
    cfg.check_interval = Duration::from_millis(10);
    cfg.error_backoff = Duration::from_millis(10);
    cfg
}

fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("travelsync=debug")
        .with_test_writer()
        .try_init();
}

fn ingest(mail: &MemoryMail, cfg: MailConfig) -> IngestLoop {
    init_logs();
    let config = ExtractionConfig::builder()
        .candidates(["m"])
        .build()
        .unwrap();
    let extractor = Extractor::new(Arc::new(NoPdf), Arc::new(Answer), &config);
    IngestLoop::new(Arc::new(extractor), Arc::new(mail.clone()), cfg).unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn successful_message_moves_to_processed_once() {
    let mail = MemoryMail::with_messages(vec![(
        5,
        message("Booking", &[("hotel.pdf", "application/pdf", b"%PDF-1.7"), ("qr.png", "image/png", &png())]),
    )]);
    let observer = Arc::new(Counting::default());
    let lp = ingest(&mail, mail_config()).with_observer(observer.clone());

    let report = assert_ok!(lp.run_cycle().await);

    assert_eq!(report.unseen, 1);
    assert_eq!(report.processed(), 1);
    let msg = &report.messages[0];
    assert_eq!(msg.destination, Destination::Processed);
    assert_eq!(msg.outcome.attachments_processed, 2);
    assert!(msg.outcome.errors.is_empty());
    assert!(msg.move_error.is_none());

    assert_eq!(mail.folder("Processed"), [5]);
    assert!(mail.folder("Failed").is_empty());
    assert!(!mail.in_inbox(5));
    assert!(mail.is_seen(5));
    assert_eq!(mail.log().iter().filter(|l| l.starts_with("copy")).count(), 1);
    assert_eq!(mail.log().last().map(String::as_str), Some("logout"));

    assert_eq!(observer.ok.load(Ordering::SeqCst), 2);
    assert_eq!(observer.moved.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn any_failed_attachment_sends_message_to_failed() {
    let mail = MemoryMail::with_messages(vec![(
        9,
        message(
            "Trip",
            &[("ok.pdf", "application/pdf", b"%PDF-1.7"), ("broken.jpg", "image/jpeg", b"not a jpeg")],
        ),
    )]);
    let observer = Arc::new(Counting::default());
    let lp = ingest(&mail, mail_config()).with_observer(observer.clone());

    let report = lp.run_cycle().await.unwrap();

    let msg = &report.messages[0];
    assert_eq!(msg.destination, Destination::Failed);
    assert_eq!(msg.outcome.attachments_processed, 1);
    assert_eq!(msg.outcome.errors.len(), 1);
    assert_eq!(msg.outcome.errors[0].filename, "broken.jpg");
    assert_eq!(mail.folder("Failed"), [9]);
    assert!(mail.folder("Processed").is_empty());
    assert_eq!(observer.failed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn message_without_travel_document_is_left_alone() {
    let mail = MemoryMail::with_messages(vec![
        (1, message("Newsletter", &[("terms.zip", "application/zip", b"PK")])),
        (2, message("Hello", &[])),
    ]);
    let lp = ingest(&mail, mail_config());

    let report = lp.run_cycle().await.unwrap();

    assert_eq!(report.unseen, 2);
    assert_eq!(report.skipped, 2);
    assert!(report.messages.is_empty());
    for uid in [1, 2] {
        assert!(mail.in_inbox(uid));
        assert!(!mail.is_seen(uid));
    }
    assert!(!mail.log().iter().any(|l| l.starts_with("copy") || l.starts_with("seen")));
}

#[tokio::test]
async fn messages_are_handled_in_uid_order() {
    let pdf: &[(&str, &str, &[u8])] = &[("a.pdf", "application/pdf", b"%PDF-1.7")];
    let mail = MemoryMail::with_messages(vec![(30, message("c", pdf)), (10, message("a", pdf)), (20, message("b", pdf))]);
    let lp = ingest(&mail, mail_config());

    let report = lp.run_cycle().await.unwrap();

    let uids: Vec<Uid> = report.messages.iter().map(|m| m.uid).collect();
    assert_eq!(uids, [10, 20, 30]);
    assert_eq!(mail.folder("Processed"), [10, 20, 30]);
}

#[tokio::test]
async fn read_flag_is_set_on_select_by_default() {
    let mail = MemoryMail::with_messages(vec![(4, message("x", &[("a.pdf", "application/pdf", b"%PDF-1.7")]))]);
    ingest(&mail, mail_config()).run_cycle().await.unwrap();

    let fetch = mail.position("fetch 4").unwrap();
    let seen = mail.position("seen 4").unwrap();
    assert_eq!(seen, fetch + 1);
}

#[tokio::test]
async fn deferred_read_flag_is_set_right_before_the_move() {
    let mail = MemoryMail::with_messages(vec![(4, message("x", &[("a.pdf", "application/pdf", b"%PDF-1.7")]))]);
    let mut cfg = mail_config();
    cfg.mark_read_on_select = false;
    ingest(&mail, cfg).run_cycle().await.unwrap();

    let seen = mail.position("seen 4").unwrap();
    let ensure = mail.position("ensure Processed").unwrap();
    assert_eq!(ensure, seen + 1);
    assert_eq!(mail.folder("Processed"), [4]);
}

#[tokio::test]
async fn missing_credentials_fail_at_construction() {
    let config = ExtractionConfig::builder().candidates(["m"]).build().unwrap();
    let extractor = Arc::new(Extractor::new(Arc::new(NoPdf), Arc::new(Answer), &config));
    let err = IngestLoop::new(extractor, Arc::new(MemoryMail::default()), MailConfig::new("", ""))
        .err()
        .unwrap();
    assert!(matches!(err, MailError::MissingCredentials(_)));
}

#[tokio::test]
async fn connect_failure_fails_the_cycle_but_not_the_loop() {
    let mail = MemoryMail::default();
    mail.state.lock().unwrap().refuse_connect = true;
    let lp = Arc::new(ingest(&mail, mail_config()));

    let err = assert_err!(lp.run_cycle().await);
    assert!(matches!(err, MailError::Connect { .. }), "{err}");

    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let lp = Arc::clone(&lp);
        let cancel = cancel.clone();
        async move { lp.run(cancel).await }
    });
    tokio::time::sleep(Duration::from_millis(150)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop stops after cancel")
        .unwrap();

    assert!(mail.state.lock().unwrap().connects >= 3);
}

#[tokio::test]
async fn cancelled_loop_never_connects() {
    let mail = MemoryMail::default();
    let lp = ingest(&mail, mail_config());
    let cancel = CancellationToken::new();
    cancel.cancel();

    lp.run(cancel).await;

    assert_eq!(mail.state.lock().unwrap().connects, 0);
}

#[tokio::test]
async fn second_cycle_sees_nothing_new() {
    let mail = MemoryMail::with_messages(vec![(1, message("x", &[("a.pdf", "application/pdf", b"%PDF-1.7")]))]);
    let lp = ingest(&mail, mail_config());

    assert_eq!(lp.run_cycle().await.unwrap().processed(), 1);
    let again = lp.run_cycle().await.unwrap();
    assert_eq!(again.unseen, 0);
    assert_eq!(mail.folder("Processed"), [1]);
}

#[tokio::test(start_paused = true)]
async fn worker_crash_backs_off_longer_then_recovers() {
    let mail = MemoryMail::with_messages(vec![(7, message("x", &[("a.pdf", "application/pdf", b"%PDF-1.7")]))]);
    mail.state.lock().unwrap().crash_searches = 1;
    let mut cfg = mail_config();
    cfg.check_interval = Duration::from_secs(1);
    cfg.error_backoff = Duration::from_secs(60);
    let lp = Arc::new(ingest(&mail, cfg));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let lp = Arc::clone(&lp);
        let cancel = cancel.clone();
        async move { lp.run(cancel).await }
    });

    // Well past check_interval, still inside error_backoff.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(mail.state.lock().unwrap().connects, 1);
    assert!(mail.in_inbox(7));

    // After the backoff the loop reconnects and handles the message.
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert!(mail.state.lock().unwrap().connects >= 2);
    assert_eq!(mail.folder("Processed"), [7]);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop stops after cancel")
        .unwrap();
}
