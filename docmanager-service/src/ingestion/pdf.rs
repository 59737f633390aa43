//! PDF text extraction.

use std::collections::{HashMap, HashSet};

use pdfium_render::prelude::*;
use tracing::{debug, warn};

use super::{TextExtractor, is_supported_content_type};
use crate::error::{ProcessingError, ServiceError, ServiceResult};

/// Create a new Pdfium instance (dynamically linked).
///
/// Searches for libpdfium in:
/// 1. Current directory (./libpdfium.so)
/// 2. vendor/pdfium/lib/
/// 3. System library paths
pub fn create_pdfium() -> Result<Pdfium, ProcessingError> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "./vendor/pdfium/lib/",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| ProcessingError::TextExtraction {
            page: 0,
            source: Box::new(std::io::Error::other(format!(
                "Failed to load PDFium library: {:?}",
                e
            ))),
        })?;

    Ok(Pdfium::new(bindings))
}

/// Extracts page text with pdfium
#[derive(Debug, Default)]
pub struct PdfiumTextExtractor;

impl TextExtractor for PdfiumTextExtractor {
    fn extract_text(&self, content_type: &str, data: &[u8]) -> ServiceResult<String> {
        if !is_supported_content_type(content_type) {
            return Err(ServiceError::Processing(ProcessingError::UnsupportedFormat {
                format: content_type.to_string(),
            }));
        }

        let pdfium = create_pdfium()?;
        let document = pdfium.load_pdf_from_byte_slice(data, None).map_err(|e| {
            ProcessingError::TextExtraction {
                page: 0,
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Failed to load PDF: {:?}", e),
                )),
            }
        })?;

        let mut pages: Vec<String> = Vec::new();
        for (page_index, page) in document.pages().iter().enumerate() {
            let page_num = page_index as u32 + 1;

            let text = page.text().map_err(|e| {
                warn!(page = page_num, error = ?e, "Failed to get text object for page");
                ProcessingError::TextExtraction {
                    page: page_num,
                    source: Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("Failed to extract text from page {}: {:?}", page_num, e),
                    )),
                }
            })?;

            let page_text = text.all().trim().to_string();
            if !page_text.is_empty() {
                pages.push(page_text);
            }
        }

        let text = join_pages(&pages);
        debug!(pages = pages.len(), chars = text.len(), "PDF text extracted");

        Ok(text)
    }
}

/// Join page texts, dropping lines repeated on more than half the pages
/// (running headers, footers, watermarks). They would otherwise dominate
/// keyword frequencies.
pub(crate) fn join_pages(pages: &[String]) -> String {
    let repeated = repeated_lines(pages);

    pages
        .iter()
        .map(|page| {
            page.lines()
                .filter(|line| !repeated.contains(line.trim()))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|page| !page.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn repeated_lines(pages: &[String]) -> HashSet<String> {
    if pages.len() < 2 {
        return HashSet::new();
    }

    let mut line_counts: HashMap<&str, usize> = HashMap::new();
    for page in pages {
        let unique: HashSet<&str> = page
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        for line in unique {
            *line_counts.entry(line).or_insert(0) += 1;
        }
    }

    let threshold = pages.len() / 2;
    line_counts
        .into_iter()
        .filter(|(_, count)| *count > threshold)
        .map(|(line, _)| line.to_string())
        .collect()
}
