//! sensemake CLI - topic categorization with an LLM backend.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sensemake::client::{HealthStatus, check_health};
use sensemake::{CategorizationPipeline, Config, build_model};
use std::path::{Path, PathBuf};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "sensemake")]
#[command(version)]
#[command(about = "Categorize records into topics with an LLM and index them by subtopic")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "sensemake.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Categorize records and write the topic index
    Categorize {
        /// Path to input records JSONL file
        #[arg(short, long)]
        input: PathBuf,

        /// Path to output JSON file
        #[arg(short, long)]
        output: PathBuf,

        /// JSON array of topic names the model must choose from
        #[arg(short, long)]
        topics: Option<PathBuf>,
    },

    /// Check that the configured model answers as instructed
    Health,

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn print_example_config() {
    let example = r#"# sensemake configuration file

[model]
backend = "ollama"                 # or "openai" for OpenAI-compatible APIs
base_url = "http://localhost:11434"
model_id = "llama3.1"
num_ctx = 8192
timeout_secs = 180
temperature = 0.0
# api_key_env = "OPENROUTER_API_KEY"
# headers = { "X-Title" = "sensemake" }

[retry]
max_attempts = 3
delay_secs = 10

[categorization]
batch_size = 100
max_concurrent_batches = 10
# instructions = "You are categorizing comments from a town hall..."
"#;
    println!("{example}");
}

fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        info!(path = ?path, "Config file not found, using defaults");
        return Ok(Config::default());
    }
    Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Example => {
            print_example_config();
        }

        Commands::Validate => {
            let config = Config::from_file(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
            config.validate().context("Invalid configuration")?;
            config
                .model
                .resolve_api_key()
                .context("Failed to resolve API key")?;

            info!("Configuration is valid");
            info!(
                "  Model: {} via {} at {}",
                config.model.model_id, config.model.backend, config.model.base_url
            );
            info!(
                "  Retry: {} attempts, {}s apart",
                config.retry.max_attempts, config.retry.delay_secs
            );
            info!("  Batch size: {}", config.effective_batch_size());
            info!(
                "  Concurrency: {} batches",
                config.categorization.max_concurrent_batches
            );
        }

        Commands::Health => {
            let config = load_config(&cli.config)?;
            let model = build_model(&config)?;
            let result = check_health(model.as_ref(), &config.retry.policy()).await;

            println!("Endpoint: {}", result.endpoint);
            println!("Status:   {}", result.status);
            if let Some(latency) = result.latency_ms {
                println!("Latency:  {latency}ms");
            }
            if let Some(error) = &result.error {
                println!("Error:    {error}");
            }
            if result.status != HealthStatus::Healthy {
                anyhow::bail!("endpoint {} is {}", result.endpoint, result.status);
            }
        }

        Commands::Categorize {
            input,
            output,
            topics,
        } => {
            let config = load_config(&cli.config)?;
            let model = build_model(&config)?;

            let records = CategorizationPipeline::load_records(&input)
                .with_context(|| format!("Failed to load records from {input:?}"))?;
            let topics = match topics {
                Some(path) => CategorizationPipeline::load_topics(&path)
                    .with_context(|| format!("Failed to load topics from {path:?}"))?,
                None => Vec::new(),
            };

            let pipeline = CategorizationPipeline::new(&config, model).with_progress(true);
            let run = pipeline.run(&records, &topics).await?;

            CategorizationPipeline::write_index(&output, &run.grouping.index)
                .with_context(|| format!("Failed to write index to {output:?}"))?;

            let stats = &run.stats;
            println!("\n=== Categorization Complete ===");
            println!("Records:       {}", stats.total_records);
            println!("Duplicates:    {}", stats.duplicate_ids.len());
            println!("Batches:       {}", stats.total_batches);
            println!("Categorized:   {}", stats.categorized);
            println!("Uncategorized: {}", stats.uncategorized);
            println!("Failed:        {} batches", stats.failed_batches);
            println!("Orphans:       {}", stats.orphans);
            println!("Unannotated:   {}", run.grouping.unannotated_ids.len());
            println!("Topics:        {}", run.grouping.index.len());
            println!("Coverage:      {:.1}%", stats.coverage * 100.0);
            println!("Runtime:       {:.1}s", stats.runtime_secs);
            println!("Output:        {output:?}");
        }
    }

    Ok(())
}
