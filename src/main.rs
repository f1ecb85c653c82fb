//! Bulk Ingestion CLI
//!
//! Runs product batches through the ingestion pipeline against an in-memory
//! store and prints the batch summary as JSON.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bulk_ingest::io::read_batch_file;
use bulk_ingest::{build_runtime, run_ingest, Config};

#[derive(Parser)]
#[command(name = "bulk-ingest")]
#[command(about = "Validate, deduplicate and insert product batches", long_about = None)]
struct Cli {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override chunk concurrency
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a batch file
    Run {
        /// Batch file (JSON array or YAML list of items)
        #[arg(short, long)]
        input: PathBuf,

        /// Items already present in the store before the batch runs
        #[arg(long)]
        seed: Option<PathBuf>,

        /// Batch identifier (random UUID when omitted)
        #[arg(long)]
        batch_id: Option<String>,

        /// Write the summary here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            seed,
            batch_id,
            output,
        } => {
            let config = load_config(cli.config.as_deref(), cli.concurrency)?;
            run_command(config, &input, seed.as_deref(), batch_id, output.as_deref())?;
        }

        Commands::Validate => {
            validate_command(cli.config.as_deref(), cli.concurrency)?;
        }

        Commands::GenerateConfig { output } => {
            generate_config_command(&output)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>, concurrency: Option<usize>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(&path.to_path_buf())?,
        None => Config::default(),
    };

    // Apply overrides
    if let Some(c) = concurrency {
        config.pipeline.max_concurrent_chunks = Some(c);
    }

    config.validate()?;
    Ok(config)
}

fn run_command(
    config: Config,
    input: &Path,
    seed: Option<&Path>,
    batch_id: Option<String>,
    output: Option<&Path>,
) -> Result<()> {
    let items = read_batch_file(input)?;
    let seed = match seed {
        Some(path) => read_batch_file(path)?,
        None => Vec::new(),
    };
    let batch_id = batch_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let runtime = build_runtime(config.pipeline.worker_threads)?;
    let summary = runtime.block_on(run_ingest(config, &batch_id, items, &seed))?;

    let json = serde_json::to_string_pretty(&summary)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            tracing::info!("Summary written to {}", path.display());
        }
        None => println!("{}", json),
    }

    if !summary.is_success() {
        anyhow::bail!("Batch {} failed", summary.batch_id);
    }
    Ok(())
}

fn validate_command(path: Option<&Path>, concurrency: Option<usize>) -> Result<()> {
    load_config(path, concurrency)?;
    println!("Configuration is valid");
    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# Bulk Ingestion Configuration

# === PIPELINE: Chunking, concurrency and batch bounds ===
pipeline:
  # Items per validation chunk
  chunk_size: 100

  # Chunks validated concurrently (null = num CPUs)
  # max_concurrent_chunks: 8

  # Deadline for a whole batch, in seconds
  batch_timeout_secs: 300

  # Accepted batch sizes (inclusive)
  min_batch_size: 30
  max_batch_size: 10000

  # Tokio async worker threads (null = num CPUs)
  # worker_threads: 8

  # Retry configuration for the existence lookup
  retry:
    max_retries: 3
    initial_backoff_ms: 100
    max_backoff_ms: 10000

# === VALIDATION: Per-record rules ===
validation:
  max_sku_length: 50
  min_name_length: 1
  max_name_length: 255
  max_description_length: 2000
  max_brand_length: 100
  max_category_length: 100
  max_price: 999999.99
  max_image_urls: 10
  max_image_url_length: 500
  max_attributes: 50

# === CLASSIFIER: Best-effort labelling of inserted items ===
classifier:
  enabled: true

  # Concurrent classifier calls
  concurrency: 8
"#;

fn generate_config_command(output: &Path) -> Result<()> {
    std::fs::write(output, SAMPLE_CONFIG)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
