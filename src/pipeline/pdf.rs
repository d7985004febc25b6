//! First-page PDF access: text layer and rasterisation via pdfium.
//!
//! Only the first page matters for a ticket or booking confirmation; later
//! pages are terms and conditions. The engine is a trait so the normalizer
//! can be tested without a pdfium shared library and so tests can count
//! rasterisation calls.
//!
//! All methods are blocking. pdfium keeps thread-local state and must never
//! run on an async worker; callers go through `spawn_blocking`.

use crate::error::ExtractError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::debug;

/// What the normalizer needs to know about a PDF before deciding to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstPage {
    pub page_count: usize,
    /// Text layer of page 1; empty for scanned documents.
    pub text: String,
}

/// Blocking PDF backend.
pub trait PdfEngine: Send + Sync {
    /// Open the document and read page 1's text layer.
    fn first_page(&self, bytes: &[u8]) -> Result<FirstPage, ExtractError>;

    /// Rasterise page 1 at `scale` × its natural size onto an opaque background.
    fn render_first_page(&self, bytes: &[u8], scale: f32) -> Result<DynamicImage, ExtractError>;
}

/// [`PdfEngine`] backed by a pdfium shared library.
///
/// Library resolution, first match wins:
/// 1. `lib_path` passed to [`PdfiumEngine::new`]
/// 2. `PDFIUM_LIB_PATH` environment variable (file or directory)
/// 3. the system library search path
#[derive(Debug, Clone, Default)]
pub struct PdfiumEngine {
    lib_path: Option<PathBuf>,
}

impl PdfiumEngine {
    pub fn new(lib_path: Option<PathBuf>) -> Self {
        Self { lib_path }
    }

    fn bind(&self) -> Result<Pdfium, ExtractError> {
        let explicit = self
            .lib_path
            .clone()
            .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

        let bindings = match explicit {
            Some(path) => {
                let lib = if path.is_dir() {
                    Pdfium::pdfium_platform_library_name_at_path(&path)
                } else {
                    path
                };
                Pdfium::bind_to_library(&lib)
            }
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| ExtractError::PdfiumBindingFailed(format!("{e:?}")))?;

        Ok(Pdfium::new(bindings))
    }
}

fn invalid(e: PdfiumError) -> ExtractError {
    ExtractError::InvalidDocument {
        detail: format!("PDF could not be parsed: {e:?}"),
    }
}

impl PdfEngine for PdfiumEngine {
    fn first_page(&self, bytes: &[u8]) -> Result<FirstPage, ExtractError> {
        let pdfium = self.bind()?;
        let document = pdfium.load_pdf_from_byte_slice(bytes, None).map_err(invalid)?;

        let pages = document.pages();
        let page_count = pages.len() as usize;
        if page_count == 0 {
            return Ok(FirstPage {
                page_count,
                text: String::new(),
            });
        }

        let page = pages.get(0).map_err(invalid)?;
        // A page without a text object is a scan, not an error.
        let text = page.text().map(|t| t.all()).unwrap_or_default();
        debug!("PDF: {} pages, first page text layer {} chars", page_count, text.len());

        Ok(FirstPage { page_count, text })
    }

    fn render_first_page(&self, bytes: &[u8], scale: f32) -> Result<DynamicImage, ExtractError> {
        let pdfium = self.bind()?;
        let document = pdfium.load_pdf_from_byte_slice(bytes, None).map_err(invalid)?;
        let pages = document.pages();
        if pages.len() == 0 {
            return Err(ExtractError::InvalidDocument {
                detail: "PDF has no pages".into(),
            });
        }

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(scale)
            .set_clear_color(PdfColor::WHITE);

        let page = pages.get(0).map_err(invalid)?;
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| ExtractError::InvalidDocument {
                detail: format!("Rasterisation failed: {e:?}"),
            })?;

        let image = bitmap.as_image();
        debug!("Rendered page 1 → {}x{} px", image.width(), image.height());
        Ok(image)
    }
}
