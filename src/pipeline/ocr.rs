//! OCR preprocessing: a cleaned-up grayscale pass through tesseract.
//!
//! OCR output is never the primary extraction path. It is extra prompt
//! context for image payloads and it only reaches the prompt after passing
//! [`ExtractedText::passes_quality_gate`]. Every failure mode here (missing
//! binary, timeout, garbage output) therefore degrades to an empty
//! [`ExtractedText`] instead of an error.
//!
//! Preprocessing before recognition:
//!
//! 1. grayscale
//! 2. median denoise (3×3)  (`enhance` feature)
//! 3. histogram equalisation  (`enhance` feature)
//! 4. 3×3 sharpen
//!
//! Without the `enhance` feature steps 2–3 are replaced by a plain contrast
//! stretch and step 4 by an unsharp mask, both from `image` itself.

use crate::document::ExtractedText;
use crate::error::ExtractError;
use async_trait::async_trait;
use image::{GrayImage, RgbImage};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Tesseract page segmentation mode 6: assume a single uniform block of text.
const PSM_UNIFORM_BLOCK: &str = "6";

/// Recognises text in a preprocessed grayscale image.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &GrayImage) -> Result<ExtractedText, ExtractError>;

    fn name(&self) -> &str;
}

/// Preprocess and recognise; any failure yields empty text with zero confidence.
pub async fn extract_text(recognizer: &dyn TextRecognizer, image: &RgbImage) -> ExtractedText {
    let owned = image.clone();
    let prepared = match tokio::task::spawn_blocking(move || preprocess(&owned)).await {
        Ok(gray) => gray,
        Err(e) => {
            warn!("OCR preprocessing task failed: {}", e);
            return ExtractedText::empty();
        }
    };

    match recognizer.recognize(&prepared).await {
        Ok(text) => {
            debug!(
                "OCR ({}): {} chars, confidence {:.1}",
                recognizer.name(),
                text.text.chars().count(),
                text.confidence
            );
            text
        }
        Err(e) => {
            warn!("OCR ({}) failed, continuing without it: {}", recognizer.name(), e);
            ExtractedText::empty()
        }
    }
}

#[cfg(feature = "enhance")]
const SHARPEN: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];

/// Grayscale, denoise, equalise, sharpen.
#[cfg(feature = "enhance")]
pub fn preprocess(image: &RgbImage) -> GrayImage {
    let gray = image::imageops::grayscale(image);
    let denoised = imageproc::filter::median_filter(&gray, 1, 1);
    let equalised = imageproc::contrast::equalize_histogram(&denoised);
    image::imageops::filter3x3(&equalised, &SHARPEN)
}

/// Grayscale, contrast stretch, unsharp mask.
#[cfg(not(feature = "enhance"))]
pub fn preprocess(image: &RgbImage) -> GrayImage {
    let gray = image::imageops::grayscale(image);
    let contrasted = image::imageops::contrast(&gray, 30.0);
    image::imageops::unsharpen(&contrasted, 1.0, 2)
}

// ── Tesseract ────────────────────────────────────────────────────────────

/// [`TextRecognizer`] that shells out to the `tesseract` CLI.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    binary: PathBuf,
    languages: Vec<String>,
    timeout: Duration,
}

impl TesseractRecognizer {
    pub fn new(languages: Vec<String>, timeout: Duration) -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            languages,
            timeout,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// `eng+deu` style language argument.
    pub fn language_arg(&self) -> String {
        self.languages.join("+")
    }

    /// `true` when the binary answers `--version`.
    pub async fn is_available(&self) -> bool {
        match Command::new(&self.binary).arg("--version").output().await {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    async fn recognize(&self, image: &GrayImage) -> Result<ExtractedText, ExtractError> {
        let owned = image.clone();
        let scratch = tokio::task::spawn_blocking(move || -> Result<_, ExtractError> {
            let file = tempfile::Builder::new()
                .prefix("travelsync-ocr-")
                .suffix(".png")
                .tempfile()
                .map_err(|e| ExtractError::Internal(format!("OCR scratch file: {e}")))?;
            owned
                .save_with_format(file.path(), image::ImageFormat::Png)
                .map_err(|e| ExtractError::Internal(format!("OCR scratch write: {e}")))?;
            Ok(file)
        })
        .await
        .map_err(|e| ExtractError::Internal(format!("OCR scratch task failed: {e}")))??;

        let mut cmd = Command::new(&self.binary);
        cmd.arg(scratch.path())
            .arg("stdout")
            .arg("-l")
            .arg(self.language_arg())
            .arg("--psm")
            .arg(PSM_UNIFORM_BLOCK)
            .arg("tsv")
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                ExtractError::Internal(format!(
                    "tesseract timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| ExtractError::Internal(format!("Failed to execute tesseract: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::Internal(format!(
                "tesseract failed (exit {}): {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }

    fn name(&self) -> &str {
        "tesseract"
    }
}

/// Parse tesseract's TSV output.
///
/// Columns: `level page_num block_num par_num line_num word_num left top
/// width height conf text`. Rows with `conf <= 0` are layout rows or
/// rejected words and are skipped. Words are re-joined per line; the
/// confidence is the mean over the kept words.
pub fn parse_tsv(tsv: &str) -> ExtractedText {
    let mut lines: BTreeMap<(u32, u32, u32, u32), Vec<&str>> = BTreeMap::new();
    let mut conf_sum = 0.0f32;
    let mut conf_n = 0usize;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        let conf: f32 = match cols[10].trim().parse() {
            Ok(c) => c,
            Err(_) => continue,
        };
        let word = cols[11].trim();
        if conf <= 0.0 || word.is_empty() {
            continue;
        }
        let key = |i: usize| cols[i].trim().parse::<u32>().unwrap_or(0);
        lines
            .entry((key(1), key(2), key(3), key(4)))
            .or_default()
            .push(word);
        conf_sum += conf;
        conf_n += 1;
    }

    if conf_n == 0 {
        return ExtractedText::empty();
    }

    let text = lines
        .values()
        .map(|words| words.join(" "))
        .collect::<Vec<_>>()
        .join("\n");

    ExtractedText {
        text,
        confidence: conf_sum / conf_n as f32,
    }
}
