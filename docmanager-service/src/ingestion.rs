//! Turning uploaded bytes into text and storage keys.

pub mod filename;
pub mod hash;
pub mod pdf;

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{ServiceError, ServiceResult};

pub use filename::unique_object_key;
pub use hash::compute_content_hash;
pub use pdf::PdfiumTextExtractor;

/// Extracts plain text from a stored document
pub trait TextExtractor: Send + Sync {
    /// Blocking; callers on the runtime go through [`extract_text_blocking`].
    fn extract_text(&self, content_type: &str, data: &[u8]) -> ServiceResult<String>;
}

/// Only PDFs carry text the workers can read.
pub fn is_supported_content_type(content_type: &str) -> bool {
    content_type
        .parse::<mime::Mime>()
        .map(|m| m.essence_str() == mime::APPLICATION_PDF.essence_str())
        .unwrap_or(false)
}

/// Content type to record for an upload. A missing or generic declared
/// type falls back to the file extension.
pub fn resolve_content_type(declared: Option<&str>, filename: &str) -> String {
    let declared = declared
        .map(str::trim)
        .filter(|t| !t.is_empty() && *t != mime::APPLICATION_OCTET_STREAM.essence_str());
    if let Some(declared) = declared {
        return declared.to_string();
    }

    let is_pdf = filename
        .rsplit_once('.')
        .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case("pdf"));
    if is_pdf {
        mime::APPLICATION_PDF.to_string()
    } else {
        mime::APPLICATION_OCTET_STREAM.to_string()
    }
}

/// Run an extractor on the blocking pool
pub async fn extract_text_blocking(
    extractor: Arc<dyn TextExtractor>,
    content_type: String,
    data: Bytes,
) -> ServiceResult<String> {
    tokio::task::spawn_blocking(move || extractor.extract_text(&content_type, &data))
        .await
        .map_err(|e| ServiceError::Internal {
            message: format!("Text extraction task failed: {}", e),
        })?
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ProcessingError;

    /// Reads the bytes as UTF-8, standing in for a PDF parser. Bytes starting
    /// with `CORRUPT` fail the way a damaged file does.
    pub(crate) struct FakeExtractor;

    impl TextExtractor for FakeExtractor {
        fn extract_text(&self, content_type: &str, data: &[u8]) -> ServiceResult<String> {
            if !is_supported_content_type(content_type) {
                return Err(ServiceError::Processing(ProcessingError::UnsupportedFormat {
                    format: content_type.to_string(),
                }));
            }
            if data.starts_with(b"CORRUPT") {
                return Err(ServiceError::Processing(ProcessingError::TextExtraction {
                    page: 0,
                    source: Box::new(std::io::Error::other("bad xref table")),
                }));
            }
            Ok(String::from_utf8_lossy(data).into_owned())
        }
    }

    #[test]
    fn test_supported_content_types() {
        assert!(is_supported_content_type("application/pdf"));
        assert!(is_supported_content_type("application/pdf; charset=binary"));
        assert!(!is_supported_content_type("text/plain"));
        assert!(!is_supported_content_type("image/png"));
        assert!(!is_supported_content_type("not a mime"));
    }

    #[test]
    fn test_resolve_content_type() {
        assert_eq!(resolve_content_type(Some("text/plain"), "a.pdf"), "text/plain");
        assert_eq!(resolve_content_type(None, "Report.PDF"), "application/pdf");
        assert_eq!(
            resolve_content_type(Some("application/octet-stream"), "a.pdf"),
            "application/pdf"
        );
        assert_eq!(
            resolve_content_type(Some(""), "notes"),
            "application/octet-stream"
        );
    }

    #[tokio::test]
    async fn test_extract_text_blocking() {
        let text = extract_text_blocking(
            Arc::new(FakeExtractor),
            "application/pdf".to_string(),
            Bytes::from_static(b"quarterly finance"),
        )
        .await
        .unwrap();
        assert_eq!(text, "quarterly finance");
    }
}
