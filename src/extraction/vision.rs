//! Vision extraction: text layer plus model-written descriptions of images.
//!
//! PDFs keep their text layer and gain one description per embedded JPEG;
//! image uploads are described directly. Every description is a billable
//! vision call and is charged to the tally as soon as it returns.

use super::pdf::{extract_pdf_images, extract_pdf_text};
use super::{ExtractedText, Extractor};
use crate::config::{ExtractorKind, Prompts, VisionPrompts};
use crate::error::{Result, StudyError};
use crate::generation::{CompletionClient, CompletionRequest, ImageInput};
use crate::models::Document;
use crate::quota::{weigh, UsageTally};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

const DESCRIPTION_MAX_TOKENS: u32 = 600;

pub struct VisionExtractor {
    client: Arc<dyn CompletionClient>,
    prompts: VisionPrompts,
    max_images: usize,
    tokens_per_image: u64,
    vision_weight: f64,
}

impl VisionExtractor {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        prompts: VisionPrompts,
        max_images: usize,
        tokens_per_image: u64,
        vision_weight: f64,
    ) -> Self {
        Self {
            client,
            prompts,
            max_images,
            tokens_per_image,
            vision_weight,
        }
    }

    async fn describe(
        &self,
        document: &Document,
        image: ImageInput,
        tally: &UsageTally,
    ) -> Result<String> {
        let mut vars = HashMap::new();
        vars.insert("filename".to_string(), document.filename.clone());

        let mut request = CompletionRequest::new(
            self.prompts.system.clone(),
            Prompts::render(&self.prompts.describe, &vars),
        );
        request.max_tokens = DESCRIPTION_MAX_TOKENS;
        request.temperature = 0.2;
        request.images.push(image);

        let completion = self.client.complete(&request).await?;
        tally.add(weigh(
            completion.prompt_tokens + completion.completion_tokens,
            self.vision_weight,
        ));
        Ok(completion.text.trim().to_string())
    }
}

#[async_trait]
impl Extractor for VisionExtractor {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Vision
    }

    fn estimate_cost(&self, document: &Document) -> u64 {
        let images = if document.mime_type.starts_with("image/") {
            1
        } else {
            self.max_images as u64
        };
        weigh(images * self.tokens_per_image, self.vision_weight)
    }

    #[instrument(skip(self, document, bytes, tally), fields(document = %document.id))]
    async fn extract(
        &self,
        document: &Document,
        bytes: &[u8],
        tally: &UsageTally,
    ) -> Result<ExtractedText> {
        let (text, images) = if document.mime_type.starts_with("image/") {
            let image = ImageInput {
                mime: document.mime_type.clone(),
                data: bytes.to_vec(),
            };
            (String::new(), vec![image])
        } else if document.mime_type == "application/pdf" {
            let text = extract_pdf_text(bytes.to_vec())
                .await
                .map_err(|e| StudyError::Extraction(format!("{}: {}", document.filename, e)))?;
            let images = extract_pdf_images(bytes.to_vec(), self.max_images).await;
            (text, images)
        } else {
            return Err(StudyError::Extraction(format!(
                "vision extraction does not support {}",
                document.mime_type
            )));
        };

        let total = images.len();
        let mut combined = text;
        for (i, image) in images.into_iter().enumerate() {
            let description = self.describe(document, image, tally).await.map_err(|e| {
                StudyError::Extraction(format!("describing image {} of {}: {}", i + 1, total, e))
            })?;
            if !combined.is_empty() {
                combined.push_str("\n\n");
            }
            combined.push_str(&format!("[Figure {}] {}", i + 1, description));
        }

        debug!("Vision extraction described {} images", total);
        Ok(ExtractedText {
            text: combined,
            extractor: self.kind(),
            images_described: total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::Completion;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct Describer {
        requests: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl CompletionClient for Describer {
        async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(Completion {
                text: "A labelled diagram of a plant cell.".to_string(),
                prompt_tokens: 90,
                completion_tokens: 10,
            })
        }
    }

    #[tokio::test]
    async fn test_image_upload_is_described_and_charged() {
        let client = Arc::new(Describer {
            requests: Mutex::new(Vec::new()),
        });
        let extractor = VisionExtractor::new(client.clone(), VisionPrompts::default(), 4, 1_000, 5.0);
        let doc = Document::new(Uuid::new_v4(), "cell.png", "image/png", 3, "k".into());
        let tally = UsageTally::new();

        let out = extractor.extract(&doc, &[1, 2, 3], &tally).await.unwrap();

        assert_eq!(out.images_described, 1);
        assert!(out.text.starts_with("[Figure 1] A labelled diagram"));
        assert_eq!(tally.total(), 500);

        let requests = client.requests.lock().unwrap();
        assert_eq!(requests[0].images[0].mime, "image/png");
        assert!(requests[0].user.contains("cell.png"));
        assert_eq!(extractor.estimate_cost(&doc), 5_000);
    }

    #[tokio::test]
    async fn test_unsupported_type_fails() {
        let client = Arc::new(Describer {
            requests: Mutex::new(Vec::new()),
        });
        let extractor = VisionExtractor::new(client, VisionPrompts::default(), 4, 1_000, 5.0);
        let doc = Document::new(Uuid::new_v4(), "a.txt", "text/plain", 1, "k".into());
        let err = extractor.extract(&doc, b"x", &UsageTally::new()).await.unwrap_err();
        assert!(matches!(err, StudyError::Extraction(_)));
    }
}
