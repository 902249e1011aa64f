//! memanchor - Transcript-Grounded Memory Anchors
//!
//! Command-line front end for extracting, querying and validating memory
//! anchors from a conversation transcript.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use memanchor::{
    config::MemoryConfig,
    memory::{AnchorIndex, Extractor, LineTranscriptParser, MemoryOrchestrator, TranscriptParser},
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "memanchor")]
#[command(version)]
#[command(about = "Transcript-grounded memory anchors")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MEMANCHOR_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract anchors from a transcript
    Extract {
        /// Transcript file
        transcript: PathBuf,

        /// Subject the transcript belongs to
        #[arg(short, long, default_value = "default")]
        subject: String,
    },

    /// Build the memory prompt for a user message
    Query {
        /// Transcript file
        transcript: PathBuf,

        /// User message
        #[arg(short, long)]
        message: String,

        /// Subject the transcript belongs to
        #[arg(short, long, default_value = "default")]
        subject: String,
    },

    /// Validate a candidate answer to a canonical question
    Validate {
        /// Transcript file
        transcript: PathBuf,

        /// Canonical question (exact bank text)
        #[arg(short, long)]
        question: String,

        /// Candidate response
        #[arg(short, long)]
        response: String,
    },

    /// Run the validation bank against canned responses
    Acceptance {
        /// Transcript file
        transcript: PathBuf,

        /// JSON file mapping question to response
        #[arg(short, long)]
        responses: PathBuf,
    },

    /// Write the indexed corpus as a JSON snapshot
    Export {
        /// Transcript file
        transcript: PathBuf,

        /// Output path
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Show statistics for a JSON snapshot
    Stats {
        /// Snapshot written by `export`
        snapshot: PathBuf,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("memanchor={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        MemoryConfig::from_file(config_path)?
    } else {
        MemoryConfig::default()
    };

    match cli.command {
        Commands::Extract { transcript, subject } => {
            run_extract(&config, &transcript, &subject).await?;
        }
        Commands::Query {
            transcript,
            message,
            subject,
        } => {
            let mut orchestrator = load(config, &transcript, &subject).await?;
            let injection = orchestrator.generate_memory_prompt(&message, None);
            print_json(&injection)?;
        }
        Commands::Validate {
            transcript,
            question,
            response,
        } => {
            let mut orchestrator = load(config, &transcript, "default").await?;
            let outcome = orchestrator.validate_response(&question, &response);
            print_json(&outcome)?;
        }
        Commands::Acceptance {
            transcript,
            responses,
        } => {
            run_acceptance(config, &transcript, &responses).await?;
        }
        Commands::Export { transcript, out } => {
            let orchestrator = load(config, &transcript, "default").await?;
            orchestrator.index().save_json(&out)?;
            tracing::info!(
                path = %out.display(),
                anchors = orchestrator.index().len(),
                "Snapshot written"
            );
        }
        Commands::Stats { snapshot } => {
            let index = AnchorIndex::load_json(&snapshot)
                .with_context(|| format!("failed to load snapshot {}", snapshot.display()))?;
            print_json(&index.stats())?;
        }
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

async fn read_transcript(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read transcript {}", path.display()))
}

async fn load(
    config: MemoryConfig,
    transcript: &Path,
    subject: &str,
) -> Result<MemoryOrchestrator> {
    let text = read_transcript(transcript).await?;
    let mut orchestrator = MemoryOrchestrator::with_line_parser(config)?;
    orchestrator.initialize(&text, subject).await?;
    Ok(orchestrator)
}

async fn run_extract(config: &MemoryConfig, transcript: &Path, subject: &str) -> Result<()> {
    let text = read_transcript(transcript).await?;
    let parser = LineTranscriptParser::new()?;
    let pairs = parser.parse(&text, subject).await?;
    let extractor = Extractor::with_default_rules(config.context_window_size)?;
    let anchors = extractor.extract(&pairs);
    tracing::info!(pairs = pairs.len(), anchors = anchors.len(), "Extraction complete");
    print_json(&anchors)
}

async fn run_acceptance(config: MemoryConfig, transcript: &Path, responses: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(responses)
        .await
        .with_context(|| format!("failed to read responses {}", responses.display()))?;
    let responses: HashMap<String, String> = serde_json::from_str(&content)?;

    let mut orchestrator = load(config, transcript, "default").await?;
    let report = orchestrator.run_acceptance(|question| {
        responses.get(question).cloned().unwrap_or_default()
    });
    print_json(&report)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn show_config(config: Option<&MemoryConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
