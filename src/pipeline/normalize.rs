//! Format normalisation: raw bytes + content-type → one canonical payload.
//!
//! Every downstream stage sees either an 8-bit RGB bitmap or a text string,
//! never a format-specific variant. That keeps the OCR preprocessor, the
//! encoder and the model call oblivious to whether the ticket arrived as a
//! transparent PNG screenshot, a paletted GIF or a scanned PDF.
//!
//! ## PDF short-circuit
//!
//! Booking confirmations are usually born-digital PDFs with a complete text
//! layer. Sending that text is cheaper and more accurate than rendering the
//! page and asking a vision model to read it back, so when page 1 has more
//! than [`PDF_TEXT_MIN_CHARS`] characters the page is never rasterised.

use crate::document::{essence, NormalizedPayload, RawDocument};
use crate::error::ExtractError;
use crate::pipeline::pdf::PdfEngine;
use image::{DynamicImage, RgbImage, RgbaImage};
use std::sync::Arc;
use tracing::{debug, info};

/// A text layer longer than this (trimmed, in characters) selects text mode.
pub const PDF_TEXT_MIN_CHARS: usize = 50;

/// Upscaling factor for rasterising scanned PDFs.
///
/// Small print on tickets (seat, gate, booking codes) needs roughly 200 DPI to
/// survive; 3× the 72-pt page size is 216 DPI.
pub const PDF_RENDER_SCALE: f32 = 3.0;

const PDF_MIME: &str = "application/pdf";

/// Turns a [`RawDocument`] into a [`NormalizedPayload`].
#[derive(Clone)]
pub struct Normalizer {
    pdf: Arc<dyn PdfEngine>,
}

impl Normalizer {
    pub fn new(pdf: Arc<dyn PdfEngine>) -> Self {
        Self { pdf }
    }

    /// Normalise on the blocking pool.
    ///
    /// Image decoding and pdfium are CPU/FFI bound; running them on an async
    /// worker would stall every other request on that thread.
    pub async fn normalize(&self, doc: RawDocument) -> Result<NormalizedPayload, ExtractError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.normalize_blocking(&doc))
            .await
            .map_err(|e| ExtractError::Internal(format!("Normalizer task panicked: {e}")))?
    }

    /// Blocking implementation of [`Normalizer::normalize`].
    pub fn normalize_blocking(&self, doc: &RawDocument) -> Result<NormalizedPayload, ExtractError> {
        let mime = doc.mime();
        if mime.starts_with("image/") {
            let rgb = decode_image(&doc.bytes, &doc.content_type)?;
            info!(
                "Normalised image {} ({}) → {}x{} RGB",
                doc.label(),
                mime,
                rgb.width(),
                rgb.height()
            );
            Ok(NormalizedPayload::Image(rgb))
        } else if mime == PDF_MIME {
            self.normalize_pdf(doc)
        } else {
            Err(ExtractError::UnsupportedFormat {
                content_type: doc.content_type.clone(),
                detail: "only image/* and application/pdf are accepted".into(),
            })
        }
    }

    fn normalize_pdf(&self, doc: &RawDocument) -> Result<NormalizedPayload, ExtractError> {
        let first = self.pdf.first_page(&doc.bytes)?;
        if first.page_count == 0 {
            return Err(ExtractError::InvalidDocument {
                detail: "PDF has no pages".into(),
            });
        }

        let text = first.text.trim();
        let chars = text.chars().count();
        if chars > PDF_TEXT_MIN_CHARS {
            info!(
                "PDF {}: {} chars of text on page 1, using text mode",
                doc.label(),
                chars
            );
            return Ok(NormalizedPayload::Text(text.to_string()));
        }

        debug!(
            "PDF {}: text layer has {} chars, rasterising page 1 of {}",
            doc.label(),
            chars,
            first.page_count
        );
        let rendered = self.pdf.render_first_page(&doc.bytes, PDF_RENDER_SCALE)?;
        let rgb = to_canonical_rgb(rendered);
        info!(
            "PDF {}: page 1 rasterised → {}x{} RGB",
            doc.label(),
            rgb.width(),
            rgb.height()
        );
        Ok(NormalizedPayload::Image(rgb))
    }
}

/// Decode image bytes into the canonical RGB bitmap.
pub fn decode_image(bytes: &[u8], content_type: &str) -> Result<RgbImage, ExtractError> {
    let img = image::load_from_memory(bytes).map_err(|e| ExtractError::UnsupportedFormat {
        content_type: essence(content_type),
        detail: format!("image could not be decoded: {e}"),
    })?;
    Ok(to_canonical_rgb(img))
}

/// Convert any decoded colour mode to 8-bit RGB.
///
/// * RGB passes through untouched.
/// * Grayscale is promoted by replicating the luma channel.
/// * Anything carrying alpha is composited onto opaque white, so transparent
///   screenshot margins do not turn black.
/// * Everything else (16-bit, float) is converted directly.
///
/// Paletted PNG/GIF input is expanded to RGB(A) by the decoder and lands in
/// one of the branches above.
pub fn to_canonical_rgb(img: DynamicImage) -> RgbImage {
    match img {
        DynamicImage::ImageRgb8(rgb) => rgb,
        DynamicImage::ImageLuma8(_) => img.to_rgb8(),
        DynamicImage::ImageRgba8(rgba) => flatten_on_white(&rgba),
        other if other.color().has_alpha() => flatten_on_white(&other.to_rgba8()),
        other => other.to_rgb8(),
    }
}

/// Alpha-composite onto an opaque white background.
pub fn flatten_on_white(rgba: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let a = a as u32;
        let blend = |c: u8| ((c as u32 * a + 255 * (255 - a) + 127) / 255) as u8;
        image::Rgb([blend(r), blend(g), blend(b)])
    })
}
