//! PDF text layer via pdf-extract, and embedded JPEG images via lopdf.
//!
//! Both libraries are synchronous and can be slow on large files, so they run
//! on the blocking pool. A panic inside either is reported as a failed
//! extraction.

use super::{ExtractedText, Extractor};
use crate::config::ExtractorKind;
use crate::error::{Result, StudyError};
use crate::generation::ImageInput;
use crate::models::Document;
use crate::quota::UsageTally;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Images smaller than this on either side are skipped (icons, bullets).
const MIN_IMAGE_DIMENSION: i64 = 64;

#[derive(Debug, Default)]
pub struct PdfTextExtractor;

#[async_trait]
impl Extractor for PdfTextExtractor {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::PdfText
    }

    async fn extract(
        &self,
        document: &Document,
        bytes: &[u8],
        _tally: &UsageTally,
    ) -> Result<ExtractedText> {
        let text = extract_pdf_text(bytes.to_vec()).await.map_err(|e| {
            StudyError::Extraction(format!("{}: {}", document.filename, e))
        })?;
        Ok(ExtractedText::new(text, self.kind()))
    }
}

static HYPHENATED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w)-\n(\w)").expect("Invalid regex"));
static TRAILING_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+\n").expect("Invalid regex"));
static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("Invalid regex"));

/// Text layer of a PDF, pages separated by form feeds.
pub(crate) async fn extract_pdf_text(bytes: Vec<u8>) -> std::result::Result<String, String> {
    let raw = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .map_err(|e| format!("PDF text extraction aborted: {}", e))?
        .map_err(|e| format!("PDF text extraction failed: {}", e))?;
    Ok(tidy_text(&raw))
}

/// Rejoin words hyphenated across lines and squeeze layout whitespace.
/// Form feeds are kept so page numbers survive.
fn tidy_text(raw: &str) -> String {
    let text = HYPHENATED.replace_all(raw, "$1$2");
    let text = TRAILING_SPACE.replace_all(&text, "\n");
    BLANK_RUN.replace_all(&text, "\n\n").into_owned()
}

/// Up to `limit` JPEG images embedded in a PDF, in page order.
pub(crate) async fn extract_pdf_images(bytes: Vec<u8>, limit: usize) -> Vec<ImageInput> {
    match tokio::task::spawn_blocking(move || collect_jpeg_images(&bytes, limit)).await {
        Ok(images) => images,
        Err(e) => {
            warn!("PDF image extraction aborted: {}", e);
            Vec::new()
        }
    }
}

fn collect_jpeg_images(bytes: &[u8], limit: usize) -> Vec<ImageInput> {
    let doc = match lopdf::Document::load_mem(bytes) {
        Ok(d) => d,
        Err(e) => {
            warn!("Failed to load PDF for image extraction: {}", e);
            return Vec::new();
        }
    };

    let mut images = Vec::new();
    for (page_num, page_id) in doc.get_pages() {
        if images.len() >= limit {
            break;
        }
        let page_images = match doc.get_page_images(page_id) {
            Ok(found) => found,
            Err(e) => {
                debug!("Failed to get images from page {}: {}", page_num, e);
                continue;
            }
        };
        for image in page_images {
            if images.len() >= limit {
                break;
            }
            if image.width < MIN_IMAGE_DIMENSION || image.height < MIN_IMAGE_DIMENSION {
                continue;
            }
            let is_jpeg = image
                .filters
                .as_ref()
                .is_some_and(|f| f.iter().any(|name| name == "DCTDecode"));
            if is_jpeg {
                images.push(ImageInput {
                    mime: "image/jpeg".to_string(),
                    data: image.content.to_vec(),
                });
            }
        }
    }

    debug!("Collected {} images from PDF", images.len());
    images
}
