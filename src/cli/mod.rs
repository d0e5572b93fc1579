//! CLI module for Studydesk.

pub mod commands;
mod output;
pub mod preflight;

pub use output::{format_size, Output};

use crate::models::{AccountTier, SummaryLength};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// Studydesk - classroom documents in, study material out
///
/// Upload course documents into classrooms, then ask questions and generate
/// flashcards, quizzes and summaries grounded in them.
#[derive(Parser, Debug)]
#[command(name = "studydesk")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Account to act as
    #[arg(long, env = "STUDYDESK_ACCOUNT", default_value = "local", global = true)]
    pub account: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage classrooms
    Classroom {
        #[command(subcommand)]
        action: ClassroomAction,
    },

    /// Upload a document into a classroom and index it
    Upload {
        /// Classroom id
        classroom: Uuid,

        /// File to upload
        path: PathBuf,

        /// MIME type (guessed from the file name if omitted)
        #[arg(long)]
        mime: Option<String>,
    },

    /// List the documents of a classroom
    Documents {
        /// Classroom id
        classroom: Uuid,
    },

    /// Re-extract, re-chunk and re-embed a READY document
    Reindex {
        /// Document id
        document: Uuid,
    },

    /// Delete a document with its chunks, vectors and stored file
    Delete {
        /// Document id
        document: Uuid,
    },

    /// Ask a question about a classroom's documents
    Ask {
        /// Classroom id
        classroom: Uuid,

        /// The question to ask
        question: String,

        /// Restrict to these documents (default: the whole classroom)
        #[arg(short, long = "document")]
        documents: Vec<Uuid>,
    },

    /// Generate a flashcard set
    Flashcards {
        #[command(flatten)]
        study: StudyArgs,

        /// Number of cards
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Generate a multiple-choice quiz
    Quiz {
        #[command(flatten)]
        study: StudyArgs,

        /// Number of questions
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Generate a summary
    Summarize {
        #[command(flatten)]
        study: StudyArgs,

        /// Summary length (short, medium, long)
        #[arg(short, long)]
        length: Option<SummaryLength>,
    },

    /// Manage generated artifacts
    Artifacts {
        #[command(subcommand)]
        action: ArtifactAction,
    },

    /// Show today's usage against the account's limits
    Usage,

    /// Show or set the account tier in the local account directory
    Tier {
        /// New tier (free, premium)
        tier: Option<AccountTier>,
    },

    /// Check configuration and external services
    Doctor,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Options shared by flashcards, quiz and summary generation.
#[derive(Args, Debug)]
pub struct StudyArgs {
    /// Classroom id
    pub classroom: Uuid,

    /// Title of the generated artifact
    #[arg(short, long)]
    pub title: String,

    /// Topic to focus on
    #[arg(long)]
    pub topic: Option<String>,

    /// Ground in these documents
    #[arg(short, long = "document")]
    pub documents: Vec<Uuid>,

    /// Ground in every READY document of the classroom
    #[arg(long, conflicts_with = "documents")]
    pub all: bool,
}

#[derive(Subcommand, Debug)]
pub enum ClassroomAction {
    /// Create a classroom
    Create {
        /// Classroom name
        name: String,
    },

    /// List classrooms
    List,
}

#[derive(Subcommand, Debug)]
pub enum ArtifactAction {
    /// List a classroom's artifacts
    List {
        /// Classroom id
        classroom: Uuid,
    },

    /// Print an artifact
    Show {
        /// Artifact id
        id: Uuid,

        /// Print the raw JSON record
        #[arg(long)]
        json: bool,
    },

    /// Delete an artifact
    Delete {
        /// Artifact id
        id: Uuid,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write the current configuration to the config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}
