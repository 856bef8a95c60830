use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sct_core::{ItemSchema, Validator, ValidatorConfig};
use sct_runtime::providers::{gemini_schema, strict_schema};
use sct_runtime::{
    load_artifact, ConfigOverrides, FsOutcomeStore, GenerationOrchestrator, GeneratorConfig,
    ProviderRegistry, RunSummary,
};

#[derive(Parser)]
#[command(name = "sctgen")]
#[command(about = "Generate and validate Script Concordance Test items", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a batch of items
    Generate(GenerateArgs),
    /// Re-validate persisted artifacts
    Validate {
        /// Artifact files or directories of artifacts
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// YAML configuration supplying validator thresholds
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the item JSON schema
    Schema {
        /// Print the schema as sent to this provider
        #[arg(long, value_enum)]
        provider: Option<SchemaDialect>,
    },
}

#[derive(clap::Args, Debug, Default)]
struct GenerateArgs {
    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// LLM provider (openai or gemini)
    #[arg(long)]
    provider: Option<String>,
    /// Model identifier
    #[arg(long)]
    model: Option<String>,
    /// Number of items to generate
    #[arg(long)]
    count: Option<usize>,
    /// Comma-separated domains, each optionally weighted (HCC:2,Cirrhosis_Complications)
    #[arg(long)]
    domains: Option<String>,
    /// Comma-separated guidelines cycled per item (american,british,european)
    #[arg(long)]
    guidelines: Option<String>,
    /// Root directory for generated/validated/validation_failed
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Retries per item after the first attempt
    #[arg(long)]
    max_retries: Option<u32>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

impl GenerateArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            provider: self.provider.clone(),
            model: self.model.clone(),
            count: self.count,
            domains: self.domains.clone(),
            guidelines: self.guidelines.clone(),
            output_dir: self.output_dir.clone(),
            max_retries: self.max_retries,
            log_level: self.log_level.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SchemaDialect {
    Openai,
    Gemini,
}

/// Exit code for a run stopped by Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate(args) => generate(args).await,
        Commands::Validate { paths, config } => {
            init_tracing("warn")?;
            validate(&paths, config.as_deref())
        }
        Commands::Schema { provider } => {
            let schema = ItemSchema::load()?.document();
            let rendered = match provider {
                None => schema.clone(),
                Some(SchemaDialect::Openai) => strict_schema(schema),
                Some(SchemaDialect::Gemini) => gemini_schema(schema),
            };
            println!("{}", serde_json::to_string_pretty(&rendered)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{},reqwest=warn,hyper=warn", level)))
        .with_context(|| format!("Invalid log level '{}'", level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("Failed to install tracing subscriber")
}

fn load_config(path: Option<&Path>) -> Result<GeneratorConfig> {
    match path {
        Some(path) => GeneratorConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(GeneratorConfig::default()),
    }
}

async fn generate(args: GenerateArgs) -> Result<ExitCode> {
    let config = load_config(args.config.as_deref())?
        .apply_env(|key| std::env::var(key).ok())?
        .apply_overrides(&args.overrides())?;

    init_tracing(&config.log_level)?;

    let run = config
        .resolve(&ProviderRegistry::with_defaults(), |key| std::env::var(key).ok())
        .context("Invalid run configuration")?;
    tracing::debug!(config = ?run, "Resolved configuration");
    tracing::info!(
        provider = run.provider.name(),
        credential = %run.credential_source,
        "API key resolved"
    );

    let store = Arc::new(FsOutcomeStore::new(&run.output_dir));
    let orchestrator = GenerationOrchestrator::from_config(run, store)?;

    let summary = orchestrator
        .run_until(async {
            if tokio::signal::ctrl_c().await.is_err() {
                // No signal handler available; run to completion
                std::future::pending::<()>().await;
            }
        })
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(if summary.interrupted {
        ExitCode::from(EXIT_INTERRUPTED)
    } else {
        ExitCode::SUCCESS
    })
}

fn print_summary(summary: &RunSummary) {
    println!("Requested:          {}", summary.requested);
    println!("Generated:          {}", summary.generated);
    println!("Validated:          {}", summary.validated);
    println!("Validation failed:  {}", summary.validation_failed);
    println!("Skipped:            {}", summary.skipped);
    println!("Failed attempts:    {}", summary.failed_attempts);
    println!(
        "LLM calls:          {} ({} prompt + {} completion tokens)",
        summary.usage.llm_calls, summary.usage.prompt_tokens, summary.usage.completion_tokens
    );
    if summary.interrupted {
        println!("Run interrupted before all items were generated.");
    }
}

/// Expand directories into their `*.json` files, sorted.
fn collect_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("Failed to read {}", path.display()))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

fn validate(paths: &[PathBuf], config: Option<&Path>) -> Result<ExitCode> {
    let thresholds: ValidatorConfig = load_config(config)?.validator;
    let validator = Validator::new(thresholds);

    let files = collect_paths(paths)?;
    if files.is_empty() {
        bail!("No artifacts found");
    }

    let mut failures = 0usize;
    for path in &files {
        let artifact = match load_artifact(path) {
            Ok(artifact) => artifact,
            Err(e) => {
                failures += 1;
                println!("UNREADABLE {}: {}", path.display(), e);
                continue;
            }
        };

        let result = validator.validate(&artifact.item);
        let label = if result.is_valid { "VALID" } else { "INVALID" };
        println!("{} {}", label, path.display());
        for error in &result.errors {
            println!("  error: {}", error);
        }
        for warning in &result.warnings {
            println!("  warning: {}", warning);
        }
        if let Some(stored) = &artifact.validation {
            if !stored.same_findings(&result) {
                println!("  note: stored _validation differs from current rules");
            }
        }
        if !result.is_valid {
            failures += 1;
        }
    }

    println!(
        "{} artifact(s) checked, {} invalid or unreadable",
        files.len(),
        failures
    );
    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
