//! Command-line front end for Steady.
//!
//! All scoring lives in `steady-core` and all calls in `steady-runtime`;
//! this binary only wires flags, logging and output together.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use steady_core::{ConsistencyReport, ScenarioCatalog};
use steady_runtime::{
    AnthropicService, ConsistencyValidator, GenerationService, RunConfig, ScriptedService,
};

/// Recorded responses for `run --demo`, keyed by scenario.
const DEMO_RESPONSES: &str = include_str!("../demos/responses.yaml");

#[derive(Parser, Debug)]
#[command(name = "steady", version)]
#[command(about = "Measure how consistent repeated AI business-case analyses are")]
struct Cli {
    /// More log output (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the scenarios in a catalog
    List {
        /// Catalog file (YAML or JSON); the built-in catalog when omitted
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Run a scenario several times and report its consistency
    Run(RunArgs),

    /// Check a catalog file against the scenario schema
    ValidateCatalog {
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Scenario key or name
    #[arg(short, long)]
    scenario: String,

    /// Number of runs; defaults to the configured default
    #[arg(short = 'n', long)]
    runs: Option<usize>,

    /// Sampling temperature
    #[arg(short, long, default_value_t = 1.0)]
    temperature: f64,

    /// Catalog file (YAML or JSON); the built-in catalog when omitted
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Run configuration file (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Replay recorded responses instead of calling the API
    #[arg(long)]
    demo: bool,

    /// Model override
    #[arg(long)]
    model: Option<String>,

    /// Per-call timeout, e.g. "90s" or "2m"
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Wall-clock budget for the whole batch, e.g. "5m"
    #[arg(long, value_parser = humantime::parse_duration)]
    budget: Option<Duration>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_catalog(path: Option<&PathBuf>) -> Result<ScenarioCatalog> {
    match path {
        Some(path) => ScenarioCatalog::from_file(path)
            .with_context(|| format!("loading catalog {}", path.display())),
        None => ScenarioCatalog::builtin().context("loading built-in catalog"),
    }
}

fn load_config(args: &RunArgs) -> Result<RunConfig> {
    let mut config = match &args.config {
        Some(path) => RunConfig::from_yaml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RunConfig::default(),
    };

    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(timeout) = args.timeout {
        config.call_timeout = timeout;
    }
    if args.budget.is_some() {
        config.overall_budget = args.budget;
    }
    config.validate()?;
    Ok(config)
}

fn demo_service(scenario_key: &str) -> Result<ScriptedService> {
    let mut responses: BTreeMap<String, Vec<String>> =
        serde_yaml::from_str(DEMO_RESPONSES).context("parsing demo responses")?;

    match responses.remove(scenario_key) {
        Some(texts) if !texts.is_empty() => Ok(ScriptedService::from_texts("demo", texts)),
        _ => bail!("no demo responses recorded for scenario '{}'", scenario_key),
    }
}

fn print_report(
    report: &ConsistencyReport,
    catalog: &ScenarioCatalog,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => {
            if let Some(scenario) = catalog.get(&report.scenario_key) {
                println!("{}", report.comparison_table(scenario));
            }
            print!("{}", report);
        }
    }
    Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
    let catalog = load_catalog(args.catalog.as_ref())?;
    let scenario = catalog.require(&args.scenario)?;
    let config = load_config(&args)?;
    let run_count = args.runs.unwrap_or(config.default_runs);

    let service: Arc<dyn GenerationService> = if args.demo {
        Arc::new(demo_service(scenario.key())?)
    } else {
        Arc::new(
            AnthropicService::from_env(&config.model, config.max_tokens)
                .context("live runs need an API key; use --demo to replay recorded responses")?,
        )
    };

    tracing::info!(
        service = service.name(),
        scenario = scenario.key(),
        run_count,
        "Running scenario"
    );

    let validator = ConsistencyValidator::new(service, config)?;
    let report = validator.validate(scenario, args.temperature, run_count).await?;

    print_report(&report, &catalog, args.format)
}

fn list(catalog: Option<PathBuf>) -> Result<()> {
    let catalog = load_catalog(catalog.as_ref())?;
    for scenario in catalog.iter() {
        println!(
            "{:<24} {} ({} metrics)",
            scenario.key(),
            scenario.name(),
            scenario.metrics().len()
        );
    }
    Ok(())
}

fn validate_catalog(file: PathBuf) -> Result<()> {
    let catalog = ScenarioCatalog::from_file(&file)
        .with_context(|| format!("{} is not a valid catalog", file.display()))?;
    println!("{}: {} scenarios OK", file.display(), catalog.len());
    for key in catalog.keys() {
        println!("  {}", key);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::List { catalog } => list(catalog),
        Command::Run(args) => run(args).await,
        Command::ValidateCatalog { file } => validate_catalog(file),
    }
}
