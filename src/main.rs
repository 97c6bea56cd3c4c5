//! @ai:module:intent CLI for the model benchmark engine
//! @ai:module:layer presentation

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use modelbench::{
    benchmark::{
        attachment::mime_type, BenchmarkRequest, ConfigurationInput, ModelResponse,
        ResponseStatus, Run, UsageSource,
    },
    config::AppConfig,
    coordinator::{BenchEvent, Coordinator, EventSink, ExecutionMode, NullSink},
    provider::OpenRouterClient,
    server,
    store::{SqliteStore, Store},
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "modelbench")]
#[command(about = "Run one prompt against many LLMs and compare cost, speed and output")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a benchmark from the terminal
    Run {
        /// JSON file with the benchmark configuration
        #[arg(long)]
        config_file: PathBuf,

        /// Model ids to benchmark (repeatable)
        #[arg(short, long = "model", required = true)]
        models: Vec<String>,

        /// File holding an image data URL for vision runs
        #[arg(long)]
        image: Option<PathBuf>,

        /// Stream tokens as they arrive
        #[arg(long)]
        stream: bool,
    },

    /// Show a stored run and its responses
    Show {
        /// Run id
        run_id: String,
    },

    /// Start the HTTP server
    Serve {
        /// Bind address, overrides the configuration
        #[arg(long)]
        bind: Option<String>,
    },

    /// Copy the provider's model catalog into the local pricing cache
    SyncPricing,

    /// Initialize default configuration
    Init {
        /// Output path for config file
        #[arg(short, long, default_value = "modelbench.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("modelbench=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config_file,
            models,
            image,
            stream,
        } => {
            let config = load_or_default_config(cli.config)?;
            run_benchmark(config, config_file, models, image, stream).await
        }
        Commands::Show { run_id } => {
            let config = load_or_default_config(cli.config)?;
            show_run(&config, &run_id)
        }
        Commands::Serve { bind } => {
            let config = load_or_default_config(cli.config)?;
            serve(config, bind).await
        }
        Commands::SyncPricing => {
            let config = load_or_default_config(cli.config)?;
            sync_pricing(&config).await
        }
        Commands::Init { output } => init_config(output),
    }
}

/// Prints streamed tokens as they arrive
struct ConsoleSink;

impl EventSink for ConsoleSink {
    async fn emit(&self, event: BenchEvent) {
        let mut out = std::io::stdout().lock();
        let _ = match event {
            BenchEvent::ModelStarted { model_id, .. } => writeln!(out, "\n=== {} ===", model_id),
            BenchEvent::Token { content, .. } => write!(out, "{}", content),
            BenchEvent::ModelError { error, .. } => writeln!(out, "\n[error] {}", error),
            BenchEvent::ModelCompleted {
                latency_ms, cost, ..
            } => writeln!(out, "\n[done] {}ms, ${:.6}", latency_ms, cost),
            _ => Ok(()),
        };
        let _ = out.flush();
    }
}

/// @ai:intent Build the coordinator from configuration and environment
/// @ai:effects fs:write, env:read
fn build_coordinator(config: AppConfig) -> Result<Coordinator<OpenRouterClient, SqliteStore>> {
    let store = Arc::new(
        SqliteStore::open(&config.database.path)
            .with_context(|| format!("opening database {}", config.database.path.display()))?,
    );

    let client = OpenRouterClient::from_env(config.provider.clone())?
        .with_pricing_cache(store.clone());

    Ok(Coordinator::new(Arc::new(client), store, Arc::new(config)))
}

/// @ai:intent Run one benchmark in the foreground and print a summary
/// @ai:effects network, fs:read, fs:write
async fn run_benchmark(
    config: AppConfig,
    config_file: PathBuf,
    models: Vec<String>,
    image: Option<PathBuf>,
    stream: bool,
) -> Result<()> {
    let content = std::fs::read_to_string(&config_file)
        .with_context(|| format!("reading {}", config_file.display()))?;
    let input: ConfigurationInput = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", config_file.display()))?;

    let image_data = match image {
        Some(path) => Some(
            std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?
                .trim()
                .to_string(),
        ),
        None => None,
    };
    if let Some(data) = image_data.as_deref().filter(|d| d.starts_with("data:")) {
        let mime = mime_type(data);
        if !mime.starts_with("image/") {
            anyhow::bail!("--image must hold an image data URL, got {}", mime);
        }
    }

    let request = BenchmarkRequest {
        config: input,
        model_ids: models,
        image_data,
        document_data: None,
    };

    let coordinator = build_coordinator(config)?;
    let prepared = coordinator.prepare(request)?;
    let run_id = prepared.run.id.clone();
    tracing::info!("Running benchmark {} ({})", prepared.run.name, run_id);

    if stream {
        coordinator
            .execute(prepared, &ConsoleSink, ExecutionMode::Streaming)
            .await;
    } else {
        coordinator
            .execute(prepared, &NullSink, ExecutionMode::Whole)
            .await;
    }

    let (run, responses) = coordinator.load_run(&run_id)?;
    print_summary(&run, &responses);
    Ok(())
}

/// @ai:effects fs:read
fn show_run(config: &AppConfig, run_id: &str) -> Result<()> {
    let store = SqliteStore::open(&config.database.path)?;
    let run = store.get_run(run_id)?;
    let responses = store.list_responses(run_id)?;

    print_summary(&run, &responses);
    for response in &responses {
        println!();
        println!("--- {} ---", response.model_id);
        match response.status {
            ResponseStatus::Error => {
                println!("{}", response.error_message.as_deref().unwrap_or(""))
            }
            _ => println!("{}", response.response_text.as_deref().unwrap_or("")),
        }
    }
    Ok(())
}

/// @ai:effects network
async fn serve(config: AppConfig, bind: Option<String>) -> Result<()> {
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let coordinator = build_coordinator(config)?;
    server::serve(coordinator, &bind).await?;
    Ok(())
}

/// @ai:intent Seed the pricing cache used by estimated costs
/// @ai:effects network, fs:write
async fn sync_pricing(config: &AppConfig) -> Result<()> {
    let store = SqliteStore::open(&config.database.path)?;
    let client = OpenRouterClient::from_env(config.provider.clone())?;

    let catalog = client.fetch_catalog().await?;
    let mut priced = 0;
    for model in &catalog {
        store.upsert_model(model)?;
        if model.pricing.is_some() {
            priced += 1;
        }
    }

    println!(
        "Cached {} models ({} with pricing) in {}",
        catalog.len(),
        priced,
        config.database.path.display()
    );
    Ok(())
}

fn init_config(output: PathBuf) -> Result<()> {
    let config = AppConfig::default();
    config.save(&output)?;
    println!("Configuration saved to {}", output.display());
    Ok(())
}

/// @ai:intent Load configuration or use defaults
/// @ai:effects fs:read
fn load_or_default_config(path: Option<PathBuf>) -> Result<AppConfig> {
    match path {
        Some(p) => AppConfig::load(&p),
        None => {
            let default_path = PathBuf::from("modelbench.toml");

            if default_path.exists() {
                AppConfig::load(&default_path)
            } else {
                Ok(AppConfig::default())
            }
        }
    }
}

fn print_summary(run: &Run, responses: &[ModelResponse]) {
    println!();
    println!("{} ({})", run.name, run.id);
    println!("{}", "=".repeat(run.name.len() + run.id.len() + 3));
    println!(
        "Type: {}  Status: {}  Models: {}/{}  Total cost: ${:.6}",
        run.benchmark_type,
        run.status.as_str(),
        run.completed_models,
        run.total_models,
        run.total_cost
    );
    println!();

    println!(
        "{:<40} {:>10} {:>10} {:>10} {:>8} {:>12}",
        "Model", "Status", "Latency", "Tokens", "Tok/s", "Cost"
    );
    println!("{}", "-".repeat(95));

    for response in responses {
        let cost = match (response.cost, response.usage_source) {
            (Some(cost), Some(source)) => format!("${:.6}{}", cost, source_marker(source)),
            _ => "-".to_string(),
        };
        println!(
            "{:<40} {:>10} {:>10} {:>10} {:>8} {:>12}",
            response.model_id,
            response.status.as_str(),
            response
                .latency_ms
                .map(|ms| format!("{}ms", ms))
                .unwrap_or_else(|| "-".to_string()),
            response
                .total_tokens
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string()),
            response
                .tokens_per_second
                .map(|t| format!("{:.1}", t))
                .unwrap_or_else(|| "-".to_string()),
            cost
        );
    }
}

fn source_marker(source: UsageSource) -> &'static str {
    match source {
        UsageSource::Estimated => "~",
        _ => "",
    }
}
