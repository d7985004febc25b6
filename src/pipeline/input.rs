//! Input resolution: a user-supplied path or URL → [`RawDocument`].
//!
//! The pipeline works on bytes plus a content-type, the same shape an upload
//! or an email attachment arrives in. For CLI inputs the content-type has to
//! be inferred: an HTTP `Content-Type` header wins when it names an image or
//! a PDF, then the file extension, then the magic bytes.

use crate::document::{essence, RawDocument};
use crate::error::ExtractError;
use std::path::Path;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Read a local file or download a URL.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<RawDocument, ExtractError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

async fn read_local(path_str: &str) -> Result<RawDocument, ExtractError> {
    let path = Path::new(path_str);
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ExtractError::InputUnreadable {
            path: path_str.to_string(),
            reason: e.to_string(),
        })?;

    let content_type = infer_content_type(path.extension().and_then(|e| e.to_str()), &bytes);
    debug!("Read {} ({} bytes, {})", path.display(), bytes.len(), content_type);

    let mut doc = RawDocument::new(bytes, content_type);
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        doc = doc.with_filename(name);
    }
    Ok(doc)
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<RawDocument, ExtractError> {
    info!("Downloading document from: {}", url);

    let failed = |reason: String| ExtractError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timed out after {timeout_secs}s"))
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let header_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let filename = filename_from_url(url);

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?.to_vec();

    let content_type = match header_type {
        Some(ct) if is_supported_type(&ct) => ct,
        _ => {
            let ext = filename
                .as_deref()
                .and_then(|f| Path::new(f).extension())
                .and_then(|e| e.to_str());
            infer_content_type(ext, &bytes)
        }
    };

    info!("Downloaded {} bytes ({})", bytes.len(), content_type);
    let mut doc = RawDocument::new(bytes, content_type);
    if let Some(name) = filename {
        doc = doc.with_filename(name);
    }
    Ok(doc)
}

fn is_supported_type(content_type: &str) -> bool {
    let mime = essence(content_type);
    mime.starts_with("image/") || mime == "application/pdf"
}

/// Content-type from the file extension, falling back to magic bytes.
///
/// Unknown input yields `application/octet-stream`, which the normalizer
/// rejects as unsupported.
pub fn infer_content_type(extension: Option<&str>, bytes: &[u8]) -> String {
    let by_ext = extension.and_then(|ext| match ext.to_ascii_lowercase().as_str() {
        "pdf" => Some("application/pdf"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        _ => None,
    });
    by_ext
        .or_else(|| sniff(bytes))
        .unwrap_or("application/octet-stream")
        .to_string()
}

/// Identify a document by its leading bytes.
pub fn sniff(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"%PDF") {
        Some("application/pdf")
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else if bytes.starts_with(b"BM") {
        Some("image/bmp")
    } else {
        None
    }
}

/// Last path segment of the URL, when it looks like a file name.
fn filename_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    (!last.is_empty() && last.contains('.')).then(|| last.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn extension_beats_magic() {
        assert_eq!(infer_content_type(Some("JPG"), b"%PDF-1.4"), "image/jpeg");
        assert_eq!(infer_content_type(Some("pdf"), b""), "application/pdf");
    }

    #[test]
    fn magic_bytes_fallback() {
        assert_eq!(infer_content_type(None, b"%PDF-1.7\n"), "application/pdf");
        assert_eq!(
            infer_content_type(Some("bin"), b"\x89PNG\r\n\x1a\n...."),
            "image/png"
        );
        assert_eq!(infer_content_type(None, b"RIFF\0\0\0\0WEBPVP8 "), "image/webp");
        assert_eq!(infer_content_type(None, b"hello"), "application/octet-stream");
    }

    #[test]
    fn url_filename() {
        assert_eq!(
            filename_from_url("https://x.test/tickets/w6-4727.pdf?dl=1").as_deref(),
            Some("w6-4727.pdf")
        );
        assert_eq!(filename_from_url("https://x.test/download"), None);
    }

    #[tokio::test]
    async fn local_file_is_read_with_inferred_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ticket");
        std::fs::write(&path, b"%PDF-1.7 fake").unwrap();
        let doc = resolve_input(path.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(doc.content_type, "application/pdf");
        assert_eq!(doc.filename.as_deref(), Some("ticket"));
        assert_eq!(doc.bytes.len(), 13);
    }

    #[tokio::test]
    async fn missing_file_is_unreadable() {
        let err = resolve_input("/definitely/not/here.pdf", 5).await.unwrap_err();
        assert!(matches!(err, ExtractError::InputUnreadable { .. }));
        assert!(err.is_client_error());
    }
}
