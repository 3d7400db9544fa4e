//! bedeval CLI - Multiple-choice benchmark evaluation over region-failover endpoints.

use anyhow::{Context, Result, bail};
use bedeval::client::{BedrockClient, EndpointRouter, ModelRegistry};
use bedeval::dataset::{KMMLU_CATEGORIES, source_from_config};
use bedeval::models::{Config, InvocationRequest, OutputMode};
use bedeval::pipeline::EvalPipeline;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "bedeval")]
#[command(version)]
#[command(about = "Multiple-choice benchmark evaluation over region-failover LLM endpoints")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Graded,
    FreeText,
}

impl From<ModeArg> for OutputMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Graded => OutputMode::Graded,
            ModeArg::FreeText => OutputMode::FreeText,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate dataset categories and write one CSV per category
    Run {
        /// Category to evaluate (repeatable; `all` for every KMMLU category)
        #[arg(short = 'C', long = "category")]
        categories: Vec<String>,

        /// Registry model name
        #[arg(short, long)]
        model: Option<String>,

        /// Concurrent invocations
        #[arg(long)]
        concurrency: Option<usize>,

        /// Attempts per unit of work
        #[arg(long)]
        retry_budget: Option<u32>,

        /// Only evaluate the first N items per category
        #[arg(long)]
        limit: Option<usize>,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output mode
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
    },

    /// Send a single prompt through the router
    Invoke {
        /// Prompt text
        prompt: String,

        /// Registry model name
        #[arg(short, long)]
        model: Option<String>,

        /// Output mode
        #[arg(long, value_enum, default_value = "free-text")]
        mode: ModeArg,
    },

    /// List registered models and their regions
    Models,

    /// List dataset categories
    Categories,

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("warning: a global tracing subscriber is already installed");
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {path:?}"))?,
        None => Config::default(),
    };
    Ok(config)
}

fn build_router(config: &Config) -> Result<Arc<EndpointRouter>> {
    let api_key = config
        .resolve_api_key()
        .context("Failed to resolve API key")?;
    let client = BedrockClient::from_config(&config.bedrock, api_key)?;

    let router = EndpointRouter::new(ModelRegistry::builtin().into_shared(), Arc::new(client))
        .with_failover_backoff(config.bedrock.failover_backoff())
        .with_max_tokens(config.bedrock.max_tokens);
    Ok(Arc::new(router))
}

fn print_example_config() {
    let example = r#"# bedeval configuration file

[bedrock]
# API key (can also use AWS_BEARER_TOKEN_BEDROCK env var)
# api_key = "..."
endpoint_template = "https://bedrock-runtime.{region}.amazonaws.com"
timeout_secs = 120
max_tokens = 1000
failover_backoff_ms = 1000

[evaluation]
dataset_id = "HAERAE-HUB/KMMLU"
split = "test"
categories = ["Accounting"]
model = "Nova Pro"
mode = "graded"          # or "free_text"
concurrency = 5
retry_budget = 3
retry_delay_secs = 30
max_resubmissions = 5
# limit = 10

[dataset]
hub_endpoint = "https://huggingface.co"
# local_dir = "data/kmmlu"

[output]
dir = "results"
"#;
    println!("{example}");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => print_example_config(),

        Commands::Categories => {
            for category in KMMLU_CATEGORIES {
                println!("{category}");
            }
        }

        Commands::Models => {
            for model in ModelRegistry::builtin().iter() {
                println!("{}  ({})", model.name, model.base_id);
                for endpoint in &model.regions {
                    println!(
                        "    {:<16} {}",
                        endpoint.region,
                        model.qualified_id(endpoint)
                    );
                }
            }
        }

        Commands::Validate => {
            let config = load_config(cli.config.as_deref())?;
            config.validate().context("Invalid configuration")?;
            config
                .resolve_api_key()
                .context("Failed to resolve API key")?;

            let registry = ModelRegistry::builtin();
            if !registry.contains(&config.evaluation.model) {
                bail!(
                    "Unknown model '{}'; known models: {}",
                    config.evaluation.model,
                    registry.names().join(", ")
                );
            }

            info!("Configuration is valid");
            info!("  Model: {}", config.evaluation.model);
            info!("  Categories: {}", config.evaluation.categories.join(", "));
            info!(
                "  Concurrency: {}, retry budget: {}",
                config.evaluation.concurrency, config.evaluation.retry_budget
            );
        }

        Commands::Invoke {
            prompt,
            model,
            mode,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let router = build_router(&config)?;
            let model = model.unwrap_or(config.evaluation.model);

            let request = InvocationRequest::new(model, prompt, mode.into());
            let output = router.invoke(&request).await?;

            println!("Region:  {}", output.region);
            println!("Model:   {}", output.model_id);
            println!("Tokens:  {} in / {} out", output.input_tokens, output.output_tokens);
            if let Some(stop) = &output.stop_reason {
                println!("Stop:    {stop}");
            }
            if let Some(answer) = &output.parsed {
                println!("Answer:  {} ({})", answer.answer, answer.reason);
            }
            if let Some(reason) = &output.parsing_error {
                println!("Parsing: {reason}");
            }
            println!("\n{}", output.raw);
        }

        Commands::Run {
            categories,
            model,
            concurrency,
            retry_budget,
            limit,
            output,
            mode,
        } => {
            let mut config = load_config(cli.config.as_deref())?;

            // CLI overrides
            if categories.iter().any(|c| c == "all") {
                config.evaluation.categories =
                    KMMLU_CATEGORIES.iter().map(|c| c.to_string()).collect();
            } else if !categories.is_empty() {
                config.evaluation.categories = categories;
            }
            if let Some(model) = model {
                config.evaluation.model = model;
            }
            if let Some(concurrency) = concurrency {
                config.evaluation.concurrency = concurrency;
            }
            if let Some(budget) = retry_budget {
                config.evaluation.retry_budget = budget;
            }
            if let Some(limit) = limit {
                config.evaluation.limit = Some(limit);
            }
            if let Some(dir) = output {
                config.output.dir = dir;
            }
            if let Some(mode) = mode {
                config.evaluation.mode = mode.into();
            }
            config.validate().context("Invalid configuration")?;

            let router = build_router(&config)?;
            let source = source_from_config(&config.dataset)?;
            let pipeline =
                EvalPipeline::new(config, Arc::clone(&router), source).with_progress(true);

            let reports = pipeline.run().await;

            println!("\n=== Evaluation Complete ===");
            let mut aborted = 0;
            for (category, result) in &reports {
                match result {
                    Ok(report) => println!(
                        "{:<45} acc {:>5.1}%  ok {:>5}  failed {:>3}  resubmitted {:>3}  {:.1}s  -> {}",
                        category,
                        report.accuracy * 100.0,
                        report.stats.succeeded,
                        report.stats.failed,
                        report.stats.resubmissions,
                        report.stats.runtime_secs,
                        report.path.display()
                    ),
                    Err(e) => {
                        aborted += 1;
                        println!("{category:<45} aborted: {e}");
                    }
                }
            }

            println!("\nRegion usage (run total):");
            for (region, stats) in router.region_stats() {
                println!(
                    "  {:<16} attempts {:>6}  ok {:>6}  throttled {:>5}  failed {:>4}",
                    region, stats.attempts, stats.succeeded, stats.throttled, stats.failed
                );
            }

            if aborted > 0 {
                bail!("{aborted} categor(ies) aborted");
            }
        }
    }

    Ok(())
}
