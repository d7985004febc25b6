//! Configuration types for travel-document extraction and mailbox ingestion.
//!
//! Extraction behaviour is controlled through [`ExtractionConfig`], built via
//! its [`ExtractionConfigBuilder`]. The ordered candidate list, the timeout and
//! the cache switch live together in [`ModelPolicy`] so the fallback policy is
//! visible in one place instead of being spread over branches.
//!
//! Mailbox and calendar settings are separate structs because they are only
//! needed by the ingestion loop and the calendar adapter respectively; a
//! one-off `extract` call never has to invent IMAP credentials.

use crate::error::{ExtractError, MailError};
use crate::pipeline::llm::ModelBackend;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for the per-candidate timeout, whatever the caller asks for.
pub const MAX_CANDIDATE_TIMEOUT: Duration = Duration::from_secs(120);

/// Uploads larger than this are rejected before decoding.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// Default ordered model candidates: fast and cheap first.
pub const DEFAULT_CANDIDATES: &[&str] = &[
    "gemini-1.5-flash",
    "gemini-1.5-flash-latest",
    "gemini-1.5-pro",
    "gemini-1.5-pro-latest",
    "gemini-2.0-flash-exp",
    "gemini-2.5-flash",
    "gemini-pro-vision",
    "gemini-pro",
];

// ── Model policy ─────────────────────────────────────────────────────────

/// Ordered-candidate fallback policy for the extraction orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPolicy {
    /// Model identifiers in strict preference order.
    pub candidates: Vec<String>,
    /// Budget for one model call. Clamped to [`MAX_CANDIDATE_TIMEOUT`].
    pub per_candidate_timeout: Duration,
    /// How many entries of `candidates` discovery may try.
    pub max_candidates: usize,
    /// Try the last successful candidate before running discovery.
    pub cache_first: bool,
}

impl Default for ModelPolicy {
    fn default() -> Self {
        Self {
            candidates: DEFAULT_CANDIDATES.iter().map(|s| s.to_string()).collect(),
            per_candidate_timeout: Duration::from_secs(45),
            max_candidates: DEFAULT_CANDIDATES.len(),
            cache_first: true,
        }
    }
}

impl ModelPolicy {
    pub fn new(candidates: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let candidates: Vec<String> = candidates.into_iter().map(Into::into).collect();
        Self {
            max_candidates: candidates.len(),
            candidates,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_candidate_timeout = timeout.min(MAX_CANDIDATE_TIMEOUT);
        self
    }

    pub fn with_max_candidates(mut self, n: usize) -> Self {
        self.max_candidates = n;
        self
    }

    pub fn with_cache_first(mut self, v: bool) -> Self {
        self.cache_first = v;
        self
    }

    /// The candidates discovery walks, in order.
    pub fn discovery_order(&self) -> impl Iterator<Item = &str> {
        self.candidates
            .iter()
            .take(self.max_candidates)
            .map(String::as_str)
    }

    /// Parse a comma-separated list such as `TRAVELSYNC_MODELS`.
    pub fn parse_candidates(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn validate(&self) -> Result<(), ExtractError> {
        if self.candidates.is_empty() {
            return Err(ExtractError::InvalidConfig(
                "at least one model candidate is required".into(),
            ));
        }
        if self.max_candidates == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_candidates must be ≥ 1".into(),
            ));
        }
        if self.per_candidate_timeout.is_zero() {
            return Err(ExtractError::InvalidConfig(
                "per-candidate timeout must be > 0".into(),
            ));
        }
        Ok(())
    }
}

// ── Extraction config ────────────────────────────────────────────────────

/// Configuration for document extraction.
///
/// # Example
/// ```rust
/// use travelsync::ExtractionConfig;
/// use std::time::Duration;
///
/// let config = ExtractionConfig::builder()
///     .candidates(["gemini-1.5-flash", "gemini-1.5-pro"])
///     .candidate_timeout(Duration::from_secs(30))
///     .ocr(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.policy.candidates.len(), 2);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Candidate list, timeout and cache switch.
    pub policy: ModelPolicy,

    /// edgequake-llm provider name used for every candidate. Default: "gemini".
    pub provider_name: String,

    /// Pre-constructed backend. Takes precedence over `provider_name`.
    pub backend: Option<Arc<dyn ModelBackend>>,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Extraction is transcription; anything warmer invents dates.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 2048.
    pub max_tokens: usize,

    /// Run the OCR preprocessor on image payloads. Default: false.
    ///
    /// Off on the latency-sensitive path: a tesseract pass costs seconds and
    /// only helps when the model misreads small print.
    pub ocr_enabled: bool,

    /// Tesseract language codes. Default: `["eng", "deu"]`.
    pub ocr_languages: Vec<String>,

    /// Timeout for one tesseract run in seconds. Default: 30.
    pub ocr_timeout_secs: u64,

    /// Upload size limit in bytes. Default: 5 MiB.
    pub max_upload_bytes: usize,

    /// Explicit pdfium library path; falls back to `PDFIUM_LIB_PATH`, then the system library.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Download timeout for URL inputs in seconds. Default: 60.
    pub download_timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            policy: ModelPolicy::default(),
            provider_name: "gemini".to_string(),
            backend: None,
            temperature: 0.1,
            max_tokens: 2048,
            ocr_enabled: false,
            ocr_languages: vec!["eng".to_string(), "deu".to_string()],
            ocr_timeout_secs: 30,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            pdfium_lib_path: None,
            download_timeout_secs: 60,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("policy", &self.policy)
            .field("provider_name", &self.provider_name)
            .field("backend", &self.backend.as_ref().map(|_| "<dyn ModelBackend>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("ocr_enabled", &self.ocr_enabled)
            .field("ocr_languages", &self.ocr_languages)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .finish()
    }
}

impl ExtractionConfig {
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn policy(mut self, policy: ModelPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    /// Replace the candidate list, keeping timeout and cache settings.
    pub fn candidates(mut self, candidates: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let candidates: Vec<String> = candidates.into_iter().map(Into::into).collect();
        self.config.policy.max_candidates = candidates.len();
        self.config.policy.candidates = candidates;
        self
    }

    pub fn candidate_timeout(mut self, timeout: Duration) -> Self {
        self.config.policy.per_candidate_timeout = timeout.min(MAX_CANDIDATE_TIMEOUT);
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = name.into();
        self
    }

    pub fn backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn ocr(mut self, enabled: bool) -> Self {
        self.config.ocr_enabled = enabled;
        self
    }

    pub fn ocr_languages(mut self, langs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.config.ocr_languages = langs.into_iter().map(Into::into).collect();
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs.max(1);
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        c.policy.validate()?;
        if c.ocr_enabled && c.ocr_languages.len() < 2 {
            return Err(ExtractError::InvalidConfig(format!(
                "OCR needs at least two languages, got {:?}",
                c.ocr_languages
            )));
        }
        if c.max_upload_bytes == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_upload_bytes must be > 0".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Mailbox config ───────────────────────────────────────────────────────

/// IMAP mailbox and polling settings.
#[derive(Clone)]
pub struct MailConfig {
    pub server: String,
    pub port: u16,
    pub address: String,
    pub password: String,
    /// Folder searched for unread messages. Default: "INBOX".
    pub inbox: String,
    /// Terminal folder for messages whose attachments all succeeded.
    pub processed_folder: String,
    /// Terminal folder for messages with at least one failed attachment.
    pub failed_folder: String,
    /// Sleep between polling cycles. Default: 300 s.
    pub check_interval: Duration,
    /// Sleep after a loop-level failure. Default: 60 s.
    pub error_backoff: Duration,
    /// Flag a message `\Seen` as soon as it is selected. Default: true.
    ///
    /// When false the flag is set only together with the terminal move, so a
    /// crash mid-cycle leaves the message unread and it is retried next cycle.
    pub mark_read_on_select: bool,
}

impl MailConfig {
    pub fn new(address: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            server: "imap.gmail.com".to_string(),
            port: 993,
            address: address.into(),
            password: password.into(),
            inbox: "INBOX".to_string(),
            processed_folder: "Processed".to_string(),
            failed_folder: "Failed".to_string(),
            check_interval: Duration::from_secs(300),
            error_backoff: Duration::from_secs(60),
            mark_read_on_select: true,
        }
    }

    /// Read `EMAIL_*` variables. Missing credentials are a configuration error.
    pub fn from_env() -> Result<Self, MailError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`MailConfig::from_env`] with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, MailError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let (address, password) = match (get("EMAIL_ADDRESS"), get("EMAIL_PASSWORD")) {
            (Some(a), Some(p)) => (a, p),
            _ => {
                return Err(MailError::MissingCredentials(
                    "EMAIL_ADDRESS and EMAIL_PASSWORD".to_string(),
                ))
            }
        };

        let mut cfg = Self::new(address, password);
        if let Some(server) = get("EMAIL_IMAP_SERVER") {
            cfg.server = server;
        }
        if let Some(port) = get("EMAIL_IMAP_PORT").and_then(|p| p.parse().ok()) {
            cfg.port = port;
        }
        if let Some(folder) = get("EMAIL_PROCESSED_FOLDER") {
            cfg.processed_folder = folder;
        }
        if let Some(folder) = get("EMAIL_FAILED_FOLDER") {
            cfg.failed_folder = folder;
        }
        if let Some(secs) = get("EMAIL_CHECK_INTERVAL").and_then(|s| s.parse::<u64>().ok()) {
            cfg.check_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(v) = get("EMAIL_MARK_READ_ON_SELECT") {
            cfg.mark_read_on_select = !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no");
        }
        Ok(cfg)
    }
}

impl fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("address", &self.address)
            .field("password", &"<redacted>")
            .field("inbox", &self.inbox)
            .field("processed_folder", &self.processed_folder)
            .field("failed_folder", &self.failed_folder)
            .field("check_interval", &self.check_interval)
            .field("mark_read_on_select", &self.mark_read_on_select)
            .finish()
    }
}

// ── Calendar config ──────────────────────────────────────────────────────

/// Google Calendar settings. Token acquisition happens elsewhere.
#[derive(Clone)]
pub struct CalendarConfig {
    /// Default: "primary".
    pub calendar_id: String,
    /// OAuth bearer token.
    pub access_token: Option<String>,
    /// Zone for locations missing from the built-in table. Default: "UTC".
    pub default_timezone: String,
    /// Default: `https://www.googleapis.com/calendar/v3`.
    pub api_base: String,
    pub request_timeout_secs: u64,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            calendar_id: "primary".to_string(),
            access_token: None,
            default_timezone: "UTC".to_string(),
            api_base: "https://www.googleapis.com/calendar/v3".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl CalendarConfig {
    /// Read `GOOGLE_CALENDAR_ID`, `GOOGLE_CALENDAR_ACCESS_TOKEN` and
    /// `GOOGLE_CALENDAR_TIMEZONE`.
    pub fn from_env() -> Self {
        let get = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();
        if let Some(id) = get("GOOGLE_CALENDAR_ID") {
            cfg.calendar_id = id;
        }
        cfg.access_token = get("GOOGLE_CALENDAR_ACCESS_TOKEN");
        if let Some(tz) = get("GOOGLE_CALENDAR_TIMEZONE") {
            cfg.default_timezone = tz;
        }
        cfg
    }
}

impl fmt::Debug for CalendarConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalendarConfig")
            .field("calendar_id", &self.calendar_id)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("default_timezone", &self.default_timezone)
            .field("api_base", &self.api_base)
            .finish()
    }
}
