//! Application wiring shared by the HTTP server and the CLI.

use crate::chunking::TextChunker;
use crate::config::{Prompts, Settings};
use crate::embedding::{create_embedder, Embedder};
use crate::error::{Result, StudyError};
use crate::extraction::ExtractionSelector;
use crate::generation::{CompletionClient, GenerationOrchestrator, OpenAICompletionClient};
use crate::ingest::IngestionOrchestrator;
use crate::models::{Classroom, Document, GeneratedArtifact, UsageCounter};
use crate::object_store::{FsObjectStore, ObjectStore};
use crate::quota::QuotaGuard;
use crate::retrieval::RetrievalAssembler;
use crate::retry::RetryPolicy;
use crate::store::{AccountDirectory, MetadataStore, SqliteMetadataStore};
use crate::vector_index::{create_vector_index, VectorIndex};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// External collaborators the pipelines are built on.
pub struct Components {
    pub store: Arc<dyn MetadataStore>,
    pub accounts: Arc<dyn AccountDirectory>,
    pub objects: Arc<dyn ObjectStore>,
    pub index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub completion: Arc<dyn CompletionClient>,
    /// Without a vision client, vision rows of the extractor table fall back.
    pub vision: Option<Arc<dyn CompletionClient>>,
}

pub struct App {
    settings: Settings,
    store: Arc<dyn MetadataStore>,
    accounts: Arc<dyn AccountDirectory>,
    quota: Arc<QuotaGuard>,
    ingestion: Arc<IngestionOrchestrator>,
    generation: Arc<GenerationOrchestrator>,
}

impl App {
    /// Build the application from settings with the production collaborators.
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;
        let retry = RetryPolicy::from_settings(&settings.retry);

        let store = Arc::new(SqliteMetadataStore::new(&settings.metadata_path())?);
        let objects = Arc::new(FsObjectStore::new(settings.objects_dir()));
        let index = create_vector_index(&settings)?;
        let embedder = create_embedder(&settings.embedding, retry.clone())?;
        let completion = Arc::new(OpenAICompletionClient::from_settings(
            &settings.completion,
            retry.clone(),
        )?);
        let vision = Arc::new(OpenAICompletionClient::vision(&settings.completion, retry)?);

        info!(
            "Using {} for completions and {} for vision",
            completion.model(),
            vision.model()
        );

        let components = Components {
            store: store.clone(),
            accounts: store,
            objects,
            index,
            embedder,
            completion,
            vision: Some(vision),
        };
        Ok(Self::with_components(settings, prompts, components))
    }

    /// Build the application around the given collaborators.
    pub fn with_components(settings: Settings, prompts: Prompts, components: Components) -> Self {
        let retry = RetryPolicy::from_settings(&settings.retry);
        let prefix = settings.vector_index.namespace_prefix.clone();

        let quota = Arc::new(QuotaGuard::new(
            components.store.clone(),
            components.accounts.clone(),
            settings.tiers.clone(),
            settings.weights.clone(),
        ));

        let extraction = Arc::new(ExtractionSelector::from_settings(
            &settings.extraction,
            components.objects.clone(),
            components.vision,
            prompts.vision.clone(),
            &settings.weights,
        ));

        let retrieval = Arc::new(RetrievalAssembler::new(
            components.store.clone(),
            components.index.clone(),
            components.embedder.clone(),
            settings.rag.clone(),
            prefix.clone(),
            settings.weights.embedding,
            retry.clone(),
        ));

        let ingestion = Arc::new(IngestionOrchestrator::new(
            components.store.clone(),
            components.objects,
            extraction,
            TextChunker::from_settings(&settings.chunking),
            components.embedder,
            components.index,
            quota.clone(),
            prefix,
            &settings.embedding,
            retry,
        ));

        let generation = Arc::new(
            GenerationOrchestrator::new(
                components.store.clone(),
                retrieval,
                components.completion,
                quota.clone(),
                &settings.completion,
            )
            .with_prompts(prompts),
        );

        Self {
            settings,
            store: components.store,
            accounts: components.accounts,
            quota,
            ingestion,
            generation,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }

    pub fn accounts(&self) -> Arc<dyn AccountDirectory> {
        self.accounts.clone()
    }

    pub fn quota(&self) -> Arc<QuotaGuard> {
        self.quota.clone()
    }

    pub fn ingestion(&self) -> Arc<IngestionOrchestrator> {
        self.ingestion.clone()
    }

    pub fn generation(&self) -> Arc<GenerationOrchestrator> {
        self.generation.clone()
    }

    pub async fn create_classroom(&self, account_id: &str, name: &str) -> Result<Classroom> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StudyError::Validation("classroom name is required".to_string()));
        }
        self.quota.check_classroom_slot(account_id).await?;

        let classroom = Classroom::new(account_id, name);
        self.store.create_classroom(&classroom).await?;
        info!("Created classroom {} ({})", classroom.name, classroom.id);
        Ok(classroom)
    }

    pub async fn list_classrooms(&self, account_id: &str) -> Result<Vec<Classroom>> {
        self.store.list_classrooms(account_id).await
    }

    /// The classroom, if the account owns it.
    pub async fn classroom(&self, account_id: &str, classroom_id: Uuid) -> Result<Classroom> {
        self.store
            .get_classroom(classroom_id)
            .await?
            .filter(|c| c.account_id == account_id)
            .ok_or_else(|| StudyError::NotFound(format!("classroom {}", classroom_id)))
    }

    pub async fn list_documents(&self, account_id: &str, classroom_id: Uuid) -> Result<Vec<Document>> {
        let classroom = self.classroom(account_id, classroom_id).await?;
        self.store.list_documents(classroom.id).await
    }

    pub async fn document(&self, account_id: &str, document_id: Uuid) -> Result<Document> {
        self.ingestion.owned_document(account_id, document_id).await
    }

    pub async fn list_artifacts(
        &self,
        account_id: &str,
        classroom_id: Uuid,
    ) -> Result<Vec<GeneratedArtifact>> {
        let classroom = self.classroom(account_id, classroom_id).await?;
        self.store.list_artifacts(classroom.id).await
    }

    pub async fn artifact(&self, account_id: &str, artifact_id: Uuid) -> Result<GeneratedArtifact> {
        let artifact = self
            .store
            .get_artifact(artifact_id)
            .await?
            .ok_or_else(|| StudyError::NotFound(format!("artifact {}", artifact_id)))?;
        self.classroom(account_id, artifact.classroom_id)
            .await
            .map_err(|_| StudyError::NotFound(format!("artifact {}", artifact_id)))?;
        Ok(artifact)
    }

    pub async fn delete_artifact(&self, account_id: &str, artifact_id: Uuid) -> Result<()> {
        let artifact = self.artifact(account_id, artifact_id).await?;
        self.store.delete_artifact(artifact.id).await?;
        info!("Deleted artifact {}", artifact.id);
        Ok(())
    }

    pub async fn usage(&self, account_id: &str) -> Result<UsageCounter> {
        self.quota.usage(account_id).await
    }
}
