//! UTF-8 text and markdown.

use super::{ExtractedText, Extractor};
use crate::config::ExtractorKind;
use crate::error::{Result, StudyError};
use crate::models::Document;
use crate::quota::UsageTally;
use async_trait::async_trait;

#[derive(Debug, Default)]
pub struct PlainTextExtractor;

#[async_trait]
impl Extractor for PlainTextExtractor {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::PlainText
    }

    async fn extract(
        &self,
        document: &Document,
        bytes: &[u8],
        _tally: &UsageTally,
    ) -> Result<ExtractedText> {
        let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
        let text = std::str::from_utf8(bytes).map_err(|e| {
            StudyError::Extraction(format!("{} is not valid UTF-8: {}", document.filename, e))
        })?;
        Ok(ExtractedText::new(text.replace("\r\n", "\n"), self.kind()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn doc() -> Document {
        Document::new(Uuid::new_v4(), "notes.txt", "text/plain", 0, "k".into())
    }

    #[tokio::test]
    async fn test_strips_bom_and_normalizes_newlines() {
        let bytes = b"\xEF\xBB\xBFline one\r\nline two";
        let out = PlainTextExtractor
            .extract(&doc(), bytes, &UsageTally::new())
            .await
            .unwrap();
        assert_eq!(out.text, "line one\nline two");
        assert_eq!(out.extractor, ExtractorKind::PlainText);
    }

    #[tokio::test]
    async fn test_invalid_utf8_fails() {
        let err = PlainTextExtractor
            .extract(&doc(), &[0xff, 0xfe, 0x00], &UsageTally::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StudyError::Extraction(_)));
    }
}
