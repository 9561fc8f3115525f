//! # Sous CLI (`sous`)
//!
//! The `sous` binary builds and queries project knowledge: the embedding
//! index, the project intelligence document, and chat over both.
//!
//! ## Usage
//!
//! ```bash
//! sous --config ./config/sous.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sous analyze <project>` | Regenerate project intelligence |
//! | `sous vectorize <project>` | Rebuild the embedding index |
//! | `sous reload <project>` | Analyze then vectorize |
//! | `sous chat <project> "<question>"` | Answer a question about a project |
//! | `sous check <project>` | Report which artifacts exist |
//! | `sous search <project> "<query>"` | Vector search over the chunk corpus |
//! | `sous chunks <project> <file>` | Print the indexed chunks of one file |
//! | `sous stats <project>` | Artifact statistics |
//! | `sous serve` | Start the HTTP JSON API |
//!
//! Results are printed to stdout as JSON; logs go to stderr. Failed jobs
//! exit with status 1 after printing their report.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sous_knowledge::config::{self, Config};
use sous_knowledge::models::{ChatRequest, Credentials};
use sous_knowledge::router::SearchFilter;
use sous_knowledge::server::{self, AppState};
use sous_knowledge::stats;
use sous_knowledge::KnowledgeService;

const DEFAULT_CONFIG: &str = "./config/sous.toml";

/// Sous: project knowledge for coding assistants.
///
/// Every command accepts `--config`. When the default config file does not
/// exist, built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "sous",
    about = "Sous: project knowledge for coding assistants",
    version,
    long_about = "Sous chunks and embeds a source tree into a vector index, asks an LLM for a \
    structured summary of the project, and answers questions by routing them to the summary, \
    the index, or both."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, env = "SOUS_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding one folder of artifacts per project.
    ///
    /// Overrides `[content] root`.
    #[arg(long, global = true)]
    content_root: Option<PathBuf>,

    /// OpenAI API key used for embeddings.
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_key: Option<String>,

    /// Anthropic API key used for analysis and chat.
    #[arg(long, global = true, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Regenerate the project intelligence document.
    ///
    /// Builds a heuristic file inventory, samples important files and asks
    /// the analysis model for a structured summary. The previous document
    /// is kept if the call fails.
    Analyze {
        /// Project source directory.
        project: PathBuf,
    },

    /// Rebuild the embedding index.
    ///
    /// Scans the project, chunks every supported text file into
    /// overlapping token windows and embeds them. The chunk corpus and the
    /// vector index are published together.
    Vectorize {
        /// Project source directory.
        project: PathBuf,
    },

    /// Analyze then vectorize, reporting each stage separately.
    Reload {
        /// Project source directory.
        project: PathBuf,
    },

    /// Ask a question about a project.
    Chat {
        /// Project source directory.
        project: PathBuf,

        /// The question.
        text: String,

        /// Attach an image (file path, data URL or bare base64). Repeatable.
        #[arg(long = "image")]
        images: Vec<String>,
    },

    /// Report which artifacts exist for a project.
    Check {
        /// Project source directory.
        project: PathBuf,
    },

    /// Search the chunk corpus by vector similarity.
    Search {
        /// Project source directory.
        project: PathBuf,

        /// Search query text.
        query: String,

        /// Number of results.
        #[arg(short = 'k', long)]
        k: Option<usize>,

        /// Only return chunks from files with this extension (e.g. `.rs`). Repeatable.
        #[arg(long = "ext")]
        extensions: Vec<String>,

        /// Drop results whose cosine similarity is below this value.
        #[arg(long)]
        min_similarity: Option<f32>,
    },

    /// Print every indexed chunk of one file, in order.
    Chunks {
        /// Project source directory.
        project: PathBuf,

        /// File path relative to the project root.
        file: String,
    },

    /// Show artifact statistics for a project.
    Stats {
        /// Project source directory.
        project: PathBuf,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP JSON API.
    ///
    /// Binds to `[server] bind`. Keys given on the command line are used
    /// for requests that carry none.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = resolve_config(cli.config.as_deref())?;
    let content_root = cli
        .content_root
        .clone()
        .unwrap_or_else(|| cfg.content.root.clone());
    let credentials = Credentials::new(cli.openai_key.clone(), cli.anthropic_key.clone());
    let service = KnowledgeService::new(cfg)?;

    match cli.command {
        Commands::Analyze { project } => {
            let report = service.analyze(project, content_root, credentials).await;
            print_json(&report)?;
            exit_unless(report.success);
        }
        Commands::Vectorize { project } => {
            let report = service
                .vectorize(project, content_root, credentials)
                .await?;
            print_json(&report)?;
        }
        Commands::Reload { project } => {
            let report = service.reload(project, content_root, credentials).await;
            print_json(&report)?;
            exit_unless(report.fully_succeeded());
        }
        Commands::Chat {
            project,
            text,
            images,
        } => {
            let images = images
                .into_iter()
                .map(|image| read_image_arg(&image))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let request = ChatRequest {
                user_text: text,
                images,
                project_path: project.display().to_string(),
            };
            let response = service.chat(request, content_root, credentials).await;
            print_json(&response)?;
            exit_unless(response.success);
        }
        Commands::Check { project } => {
            let status = service.check_artifacts(&content_root, &project)?;
            print_json(&status)?;
        }
        Commands::Search {
            project,
            query,
            k,
            extensions,
            min_similarity,
        } => {
            let filter = SearchFilter {
                extensions,
                min_similarity,
            };
            let results = service
                .search(&content_root, &project, &query, k, &filter, &credentials)
                .await?;
            print_json(&results)?;
        }
        Commands::Chunks { project, file } => {
            let chunks = service.file_chunks(&content_root, &project, &file).await?;
            print_json(&chunks)?;
        }
        Commands::Stats { project, json } => {
            let project_stats = service.stats(&content_root, &project)?;
            if json {
                print_json(&project_stats)?;
            } else {
                print!("{}", stats::render_stats(&project_stats));
            }
        }
        Commands::Serve => {
            info!(content_root = %content_root.display(), "starting server");
            server::run_server(AppState::new(service, content_root, credentials)).await?;
        }
    }

    Ok(())
}

/// An explicit `--config` must exist; the default path is optional.
fn resolve_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Ok(config::load_config(path)?),
        None => {
            let default = Path::new(DEFAULT_CONFIG);
            if default.exists() {
                Ok(config::load_config(default)?)
            } else {
                Ok(Config::default())
            }
        }
    }
}

/// Image arguments naming an existing file are read and sent as a data URL.
fn read_image_arg(arg: &str) -> anyhow::Result<String> {
    use base64::Engine;

    let path = Path::new(arg);
    if arg.starts_with("data:") || !path.is_file() {
        return Ok(arg.to_string());
    }
    let bytes = std::fs::read(path)?;
    let media_type = match path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    };
    Ok(format!(
        "data:{};base64,{}",
        media_type,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    ))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_unless(success: bool) {
    if !success {
        std::process::exit(1);
    }
}
