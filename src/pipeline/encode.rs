//! Image encoding: canonical `RgbImage` → base64 wrapped in `ImageData`.
//!
//! Multimodal APIs accept images as base64 blobs embedded in the JSON request
//! body. PNG is the default because it is lossless and small print on a
//! boarding pass survives it intact. Some providers reject a PNG blob with a
//! format or mime complaint; the orchestrator then re-encodes the same bitmap
//! as [`ImageEncoding::Jpeg`] and retries once.

use crate::error::ExtractError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::RgbImage;
use tracing::debug;

/// High enough that 8 pt text stays legible after compression.
const JPEG_QUALITY: u8 = 92;

/// Wire encoding for an image payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    Png,
    Jpeg,
}

impl ImageEncoding {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageEncoding::Png => "image/png",
            ImageEncoding::Jpeg => "image/jpeg",
        }
    }

    /// The encoding to retry with after a provider rejected this one.
    pub fn alternate(self) -> Self {
        match self {
            ImageEncoding::Png => ImageEncoding::Jpeg,
            ImageEncoding::Jpeg => ImageEncoding::Png,
        }
    }
}

/// Encode the canonical bitmap for a model request.
///
/// `detail: "high"` asks tiling providers for their full image budget; without
/// it seat numbers and booking codes are lost to downscaling.
pub fn encode_image(img: &RgbImage, encoding: ImageEncoding) -> Result<ImageData, ExtractError> {
    let mut buf = Vec::new();
    let result = match encoding {
        ImageEncoding::Png => img.write_with_encoder(PngEncoder::new(&mut buf)),
        ImageEncoding::Jpeg => {
            img.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY))
        }
    };
    result.map_err(|e| ExtractError::Internal(format!("{encoding:?} encoding failed: {e}")))?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} image as {} → {} bytes base64",
        img.width(),
        img.height(),
        encoding.mime_type(),
        b64.len()
    );

    Ok(ImageData::new(b64, encoding.mime_type()).with_detail("high"))
}
