//! Main module for the Membrane CLI.
//!
//! Parses the command line, loads the configuration, builds the long-lived
//! services once (embedder, database, completion provider) and dispatches to
//! the requested subcommand.
//!
//! # Examples
//!
//! ```sh
//! membrane init
//! membrane remember novel "The heroine is afraid of water."
//! membrane remember novel --file notes.md
//! membrane recall novel "What scares her?" -k 5
//! membrane chat novel "Does chapter two contradict her fear?" --document ch2.md --partner critical
//! membrane ghost "The rain had not stopped for three days when"
//! membrane history novel
//! ```

use clap::Parser;
use crossterm::{
    ExecutableCommand,
    style::{Attribute, Color, Print, SetAttribute, SetForegroundColor},
};
use futures::StreamExt;
use once_cell::sync::OnceCell;
use std::{
    error::Error,
    fs,
    io::{Write, stdout},
    path::Path,
    sync::Arc,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use membrane::{
    api::{CompletionProvider, OpenAiProvider},
    chat::{ChatOrchestrator, ChatRequest, GhostRequest, GhostWriter, StreamEvent},
    commands::{Cli, Commands},
    config::{self, MembraneConfig},
    database::Database,
    embedding::SentenceEmbeddingsModel,
    template::{PartnerMode, Purpose},
    transcript::{SqliteTranscript, TranscriptSink},
    vector_store::{CollectionKey, MemoryStore, Metadata, split_into_chunks},
};

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_writer(std::io::stderr)
            .init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => membrane::default_config_path()?,
    };

    execute(cli.command, &config_path).await
}

/// Load the configuration and open its database.
fn open(config_path: &Path) -> Result<(MembraneConfig, Arc<Database>), Box<dyn Error>> {
    debug!("Loading config from: {}", config_path.display());
    let config = config::load_config(config_path)?.with_env_overrides();
    let database = Arc::new(Database::open(&config.database_url)?);
    Ok((config, database))
}

async fn execute(command: Commands, config_path: &Path) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Init => init(config_path)?,
        Commands::Remember {
            project,
            text,
            file,
            chunk_chars,
        } => {
            let (config, database) = open(config_path)?;
            let store = memory_store(&config, database)?;
            let key = CollectionKey::new(&config.owner_id, project);
            let items = remember_items(text, file.as_deref(), chunk_chars)?;
            let ids = store.append_batch(&key, items).await?;
            println!("Stored {} memories in {}", ids.len(), key);
        }
        Commands::Recall {
            project,
            query,
            top_k,
        } => {
            let (config, database) = open(config_path)?;
            let store = memory_store(&config, database)?;
            let key = CollectionKey::new(&config.owner_id, project);
            let hits = store.try_search(&key, &query, top_k).await?;
            if hits.is_empty() {
                println!("No memories in {}", key);
            }
            for (rank, hit) in hits.iter().enumerate() {
                println!("{}. [{:.4}] {}", rank + 1, hit.distance, hit.text);
            }
        }
        Commands::Forget { project } => {
            let (config, database) = open(config_path)?;
            let store = memory_store(&config, database)?;
            let key = CollectionKey::new(&config.owner_id, project);
            store.delete_collection(&key).await?;
            println!("Forgot {}", key);
        }
        Commands::Chat {
            project,
            message,
            document,
            selected,
            purpose,
            partner,
            model,
        } => {
            let (config, database) = open(config_path)?;
            let store = Arc::new(memory_store(&config, database.clone())?);
            let provider: Arc<dyn CompletionProvider> = Arc::new(OpenAiProvider::new(&config));
            let transcript = Arc::new(SqliteTranscript::new(database));
            let orchestrator = ChatOrchestrator::new(store, provider, transcript, &config);

            let document_content = match document {
                Some(path) => fs::read_to_string(path)?,
                None => String::new(),
            };
            let request = ChatRequest {
                document_content,
                selected_text: selected,
                purpose: Purpose::parse_lenient(&purpose),
                partner: PartnerMode::parse_lenient(&partner),
                model,
                ..ChatRequest::new(&config.owner_id, project, message)
            };

            let (outcome, printed) = orchestrator
                .run_message(&request, |events| print_stream(events))
                .await;
            printed?;
            outcome?;
        }
        Commands::Ghost {
            text,
            purpose,
            cursor,
        } => {
            let (config, _) = open(config_path)?;
            let provider: Arc<dyn CompletionProvider> = Arc::new(OpenAiProvider::new(&config));
            let writer = GhostWriter::new(provider, &config);
            let suggestion = writer
                .suggest(&GhostRequest {
                    text,
                    cursor,
                    purpose: Purpose::parse_lenient(&purpose),
                    model: None,
                })
                .await?;
            println!("{suggestion}");
        }
        Commands::History { project } => {
            let (_, database) = open(config_path)?;
            let transcript = SqliteTranscript::new(database);
            for turn in transcript.history(&project).await? {
                println!(
                    "[{}] {} ({}): {}",
                    turn.created_at.format("%Y-%m-%d %H:%M:%S"),
                    turn.role,
                    turn.model,
                    turn.content
                );
            }
        }
    }

    Ok(())
}

fn memory_store(
    config: &MembraneConfig,
    database: Arc<Database>,
) -> Result<MemoryStore, Box<dyn Error>> {
    let embedder = Arc::new(SentenceEmbeddingsModel::load()?);
    Ok(MemoryStore::new(embedder, config.index, database))
}

/// Texts to append for `remember`: the literal text, or the chunks of `file`
/// tagged with their source.
fn remember_items(
    text: Option<String>,
    file: Option<&Path>,
    chunk_chars: usize,
) -> Result<Vec<(String, Metadata)>, Box<dyn Error>> {
    match (text, file) {
        (_, Some(path)) => {
            let content = fs::read_to_string(path)?;
            let source = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());

            let mut metadata = Metadata::new();
            metadata.insert("source".to_string(), source.into());

            let chunks = split_into_chunks(&content, chunk_chars);
            info!("Split {} into {} chunks", path.display(), chunks.len());
            Ok(chunks
                .into_iter()
                .map(|chunk| (chunk, metadata.clone()))
                .collect())
        }
        (Some(text), None) => Ok(vec![(text, Metadata::new())]),
        (None, None) => Err("nothing to remember: pass TEXT or --file".into()),
    }
}

/// Print reply chunks in bold blue as they arrive; errors in red.
async fn print_stream(
    mut events: impl futures::Stream<Item = StreamEvent> + Unpin,
) -> Result<(), Box<dyn Error>> {
    let mut stdout = stdout();
    stdout.execute(SetForegroundColor(Color::Blue))?;
    stdout.execute(SetAttribute(Attribute::Bold))?;

    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Chunk(content) => {
                write!(stdout, "{content}")?;
                stdout.flush()?;
            }
            StreamEvent::Done => break,
            StreamEvent::Error(message) => {
                stdout.execute(SetForegroundColor(Color::Red))?;
                stdout.execute(Print(format!("\nerror: {message}")))?;
                break;
            }
        }
    }

    stdout.execute(SetAttribute(Attribute::Reset))?;
    stdout.execute(SetForegroundColor(Color::Reset))?;
    writeln!(stdout)?;
    Ok(())
}

/// Write the default configuration to `path` unless a file is already there.
fn init(path: &Path) -> Result<(), Box<dyn Error>> {
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }

    info!("Creating config file: {}", path.display());
    config::write_config(path, &MembraneConfig::default())?;
    println!("Wrote {}; set api_key or MEMBRANE_API_KEY", path.display());
    Ok(())
}
