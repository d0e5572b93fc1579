//! CLI command implementations.

mod artifacts;
mod ask;
mod classroom;
mod config;
mod doctor;
mod documents;
mod serve;
mod study;
mod usage;

pub use artifacts::run_artifacts;
pub use ask::run_ask;
pub use classroom::run_classroom;
pub use config::run_config;
pub use doctor::run_doctor;
pub use documents::{run_delete, run_documents, run_reindex, run_upload};
pub use serve::run_serve;
pub use study::run_study;
pub use usage::{run_tier, run_usage};
