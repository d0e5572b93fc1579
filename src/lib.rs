//! Studydesk - document ingestion and grounded study generation
//!
//! Students upload course documents into classrooms. Each document is
//! extracted, chunked, embedded and indexed in the background; questions,
//! flashcards, quizzes and summaries are then generated from the passages
//! most relevant to a request, with a per-account daily budget on model usage.
//!
//! # Architecture
//!
//! - `config` - Settings and prompt templates
//! - `extraction` - Tier-aware text extraction (plain text, PDF, vision)
//! - `chunking` - Passage chunking
//! - `embedding` - Embedding generation
//! - `vector_index` - Per-classroom vector namespaces
//! - `store` / `object_store` - Metadata records and uploaded file bytes
//! - `ingest` - Document state machine from PENDING to READY or FAILED
//! - `retrieval` - Query scoping, similarity search and relevance gating
//! - `generation` - Chat answers, flashcards, quizzes and summaries
//! - `quota` - Weighted token budgets and tier limits
//! - `app` / `server` / `cli` - Wiring and the HTTP and command-line surfaces
//!
//! # Example
//!
//! ```rust,no_run
//! use studydesk::app::App;
//! use studydesk::config::Settings;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let app = App::new(Settings::load_from(None)?)?;
//!     let classroom = app.create_classroom("acct-1", "Biology 101").await?;
//!
//!     let bytes = std::fs::read("notes.pdf")?;
//!     let ingestion = app.ingestion();
//!     let doc = ingestion
//!         .upload("acct-1", classroom.id, "notes.pdf", None, &bytes)
//!         .await?;
//!     let doc = ingestion.ingest("acct-1", doc.id).await?;
//!     println!("{} is {}", doc.filename, doc.status);
//!
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extraction;
pub mod generation;
pub mod ingest;
pub mod models;
pub mod object_store;
pub mod openai;
pub mod quota;
pub mod retrieval;
pub mod retry;
pub mod server;
pub mod store;
pub mod vector_index;

pub use error::{Result, StudyError};
