//! Text extraction from uploaded files.
//!
//! The extractor for a document is chosen from a (tier, MIME type) table.
//! When the primary extractor fails or produces no text, the configured
//! fallback runs exactly once before the document is given up on.

mod pdf;
mod plain;
mod table;
mod vision;

pub use pdf::PdfTextExtractor;
pub use plain::PlainTextExtractor;
pub use table::{ExtractionPlan, ExtractionTable};
pub use vision::VisionExtractor;

use crate::config::{ExtractionSettings, ExtractorKind, UsageWeights, VisionPrompts};
use crate::error::{Result, StudyError};
use crate::generation::CompletionClient;
use crate::models::{AccountTier, Document};
use crate::object_store::ObjectStore;
use crate::quota::UsageTally;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Plain text pulled out of a document.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    pub extractor: ExtractorKind,
    pub images_described: usize,
}

impl ExtractedText {
    pub fn new(text: String, extractor: ExtractorKind) -> Self {
        Self {
            text,
            extractor,
            images_described: 0,
        }
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    fn kind(&self) -> ExtractorKind;

    /// Pull text out of `bytes`. Billable work is added to `tally` as it
    /// completes.
    async fn extract(
        &self,
        document: &Document,
        bytes: &[u8],
        tally: &UsageTally,
    ) -> Result<ExtractedText>;

    /// Upper bound on the weighted tokens one extraction may spend.
    fn estimate_cost(&self, _document: &Document) -> u64 {
        0
    }
}

/// Picks and runs extractors for documents.
pub struct ExtractionSelector {
    table: ExtractionTable,
    extractors: HashMap<ExtractorKind, Arc<dyn Extractor>>,
    objects: Arc<dyn ObjectStore>,
}

impl ExtractionSelector {
    pub fn new(table: ExtractionTable, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            table,
            extractors: HashMap::new(),
            objects,
        }
    }

    /// Register an extractor, replacing any of the same kind.
    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractors.insert(extractor.kind(), extractor);
        self
    }

    /// Build the selector with the built-in extractors. The vision extractor
    /// is only registered when a vision client is available.
    pub fn from_settings(
        settings: &ExtractionSettings,
        objects: Arc<dyn ObjectStore>,
        vision_client: Option<Arc<dyn CompletionClient>>,
        prompts: VisionPrompts,
        weights: &UsageWeights,
    ) -> Self {
        let mut selector = Self::new(ExtractionTable::from_rules(&settings.rules), objects)
            .with_extractor(Arc::new(PlainTextExtractor))
            .with_extractor(Arc::new(PdfTextExtractor));

        if let Some(client) = vision_client {
            selector = selector.with_extractor(Arc::new(VisionExtractor::new(
                client,
                prompts,
                settings.max_images_per_document,
                settings.estimated_tokens_per_image,
                weights.vision,
            )));
        }

        let missing: Vec<_> = selector
            .table
            .kinds()
            .filter(|k| !selector.extractors.contains_key(k))
            .collect();
        if !missing.is_empty() {
            warn!("Extractor table references unavailable extractors: {:?}", missing);
        }

        selector
    }

    pub fn plan(&self, tier: AccountTier, mime: &str) -> Result<ExtractionPlan> {
        self.table.lookup(tier, mime).ok_or_else(|| {
            StudyError::Extraction(format!(
                "no extractor configured for {} on the {} tier",
                mime, tier
            ))
        })
    }

    /// Worst-case weighted cost of extracting `document`.
    pub fn estimate_cost(&self, tier: AccountTier, document: &Document) -> Result<u64> {
        let plan = self.plan(tier, &document.mime_type)?;
        Ok(std::iter::once(plan.primary)
            .chain(plan.fallback)
            .filter_map(|kind| self.extractors.get(&kind))
            .map(|e| e.estimate_cost(document))
            .max()
            .unwrap_or(0))
    }

    /// Fetch the stored bytes and extract text, falling back once.
    #[instrument(skip(self, document, tally), fields(document = %document.id))]
    pub async fn select_and_extract(
        &self,
        document: &Document,
        tier: AccountTier,
        tally: &UsageTally,
    ) -> Result<ExtractedText> {
        let plan = self.plan(tier, &document.mime_type)?;
        let bytes = self.objects.get(&document.storage_key).await?;

        let primary_err = match self.run(plan.primary, document, &bytes, tally).await {
            Ok(extracted) => return Ok(extracted),
            Err(e) => e,
        };

        let Some(fallback) = plan.fallback else {
            return Err(as_extraction_error(primary_err));
        };

        warn!(
            "{} extractor failed for {} ({}); trying {}",
            plan.primary, document.filename, primary_err, fallback
        );
        match self.run(fallback, document, &bytes, tally).await {
            Ok(extracted) => {
                info!("{} fallback succeeded for {}", fallback, document.filename);
                Ok(extracted)
            }
            Err(fallback_err) => Err(StudyError::Extraction(format!(
                "{} failed: {}; {} failed: {}",
                plan.primary, primary_err, fallback, fallback_err
            ))),
        }
    }

    async fn run(
        &self,
        kind: ExtractorKind,
        document: &Document,
        bytes: &[u8],
        tally: &UsageTally,
    ) -> Result<ExtractedText> {
        let extractor = self
            .extractors
            .get(&kind)
            .ok_or_else(|| StudyError::Extraction(format!("{} extractor is not available", kind)))?;

        let extracted = extractor.extract(document, bytes, tally).await?;
        if extracted.text.trim().is_empty() {
            return Err(StudyError::Extraction(format!(
                "{} extractor found no text in {}",
                kind, document.filename
            )));
        }
        Ok(extracted)
    }
}

fn as_extraction_error(err: StudyError) -> StudyError {
    match err {
        StudyError::Extraction(_) => err,
        other => StudyError::Extraction(other.to_string()),
    }
}

/// MIME type guessed from a filename extension.
pub fn mime_from_filename(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "txt" | "text" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Lowercased MIME type without parameters.
pub fn normalize_mime(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::MemoryObjectStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct Scripted {
        kind: ExtractorKind,
        output: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(kind: ExtractorKind, output: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                output,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Extractor for Scripted {
        fn kind(&self) -> ExtractorKind {
            self.kind
        }

        fn estimate_cost(&self, _document: &Document) -> u64 {
            match self.kind {
                ExtractorKind::Vision => 500,
                _ => 0,
            }
        }

        async fn extract(
            &self,
            _document: &Document,
            _bytes: &[u8],
            tally: &UsageTally,
        ) -> Result<ExtractedText> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tally.add(10);
            match self.output {
                Some(text) => Ok(ExtractedText::new(text.to_string(), self.kind)),
                None => Err(StudyError::Extraction(format!("{} broke", self.kind))),
            }
        }
    }

    async fn stored_pdf(objects: &MemoryObjectStore) -> Document {
        let classroom = Uuid::new_v4();
        let key = objects.put("room/a.pdf", b"%PDF-").await.unwrap();
        Document::new(classroom, "a.pdf", "application/pdf", 5, key)
    }

    fn selector(
        objects: Arc<MemoryObjectStore>,
        vision: Arc<Scripted>,
        pdf: Arc<Scripted>,
    ) -> ExtractionSelector {
        let settings = ExtractionSettings::default();
        ExtractionSelector::new(ExtractionTable::from_rules(&settings.rules), objects)
            .with_extractor(vision)
            .with_extractor(pdf)
    }

    #[tokio::test]
    async fn test_fallback_runs_once_after_primary_fails() {
        let objects = Arc::new(MemoryObjectStore::new());
        let doc = stored_pdf(&objects).await;
        let vision = Scripted::new(ExtractorKind::Vision, None);
        let pdf = Scripted::new(ExtractorKind::PdfText, Some("layer text"));
        let tally = UsageTally::new();

        let out = selector(objects, vision.clone(), pdf.clone())
            .select_and_extract(&doc, AccountTier::Premium, &tally)
            .await
            .unwrap();

        assert_eq!(out.extractor, ExtractorKind::PdfText);
        assert_eq!(vision.calls.load(Ordering::SeqCst), 1);
        assert_eq!(pdf.calls.load(Ordering::SeqCst), 1);
        assert_eq!(tally.total(), 20);
    }

    #[tokio::test]
    async fn test_empty_primary_output_triggers_fallback() {
        let objects = Arc::new(MemoryObjectStore::new());
        let doc = stored_pdf(&objects).await;
        let vision = Scripted::new(ExtractorKind::Vision, Some("  \n"));
        let pdf = Scripted::new(ExtractorKind::PdfText, Some("layer text"));

        let out = selector(objects, vision, pdf)
            .select_and_extract(&doc, AccountTier::Premium, &UsageTally::new())
            .await
            .unwrap();
        assert_eq!(out.text, "layer text");
    }

    #[tokio::test]
    async fn test_both_failing_reports_both() {
        let objects = Arc::new(MemoryObjectStore::new());
        let doc = stored_pdf(&objects).await;
        let vision = Scripted::new(ExtractorKind::Vision, None);
        let pdf = Scripted::new(ExtractorKind::PdfText, None);

        let err = selector(objects, vision, pdf.clone())
            .select_and_extract(&doc, AccountTier::Premium, &UsageTally::new())
            .await
            .unwrap_err();

        let StudyError::Extraction(message) = err else {
            panic!("expected extraction error");
        };
        assert!(message.contains("vision"));
        assert!(message.contains("pdf_text"));
        assert_eq!(pdf.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_free_tier_has_no_fallback() {
        let objects = Arc::new(MemoryObjectStore::new());
        let doc = stored_pdf(&objects).await;
        let vision = Scripted::new(ExtractorKind::Vision, Some("never used"));
        let pdf = Scripted::new(ExtractorKind::PdfText, None);

        let err = selector(objects, vision.clone(), pdf)
            .select_and_extract(&doc, AccountTier::Free, &UsageTally::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StudyError::Extraction(_)));
        assert_eq!(vision.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_estimate_and_unknown_type() {
        let objects = Arc::new(MemoryObjectStore::new());
        let doc = stored_pdf(&objects).await;
        let sel = selector(
            objects,
            Scripted::new(ExtractorKind::Vision, None),
            Scripted::new(ExtractorKind::PdfText, None),
        );

        assert_eq!(sel.estimate_cost(AccountTier::Premium, &doc).unwrap(), 500);
        assert_eq!(sel.estimate_cost(AccountTier::Free, &doc).unwrap(), 0);
        assert!(sel.plan(AccountTier::Free, "image/png").is_err());
    }

    #[test]
    fn test_mime_helpers() {
        assert_eq!(mime_from_filename("Lecture 1.PDF"), "application/pdf");
        assert_eq!(mime_from_filename("notes.md"), "text/markdown");
        assert_eq!(mime_from_filename("README"), "application/octet-stream");
        assert_eq!(normalize_mime("Text/Plain; charset=utf-8"), "text/plain");
    }
}
