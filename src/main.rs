//! burl CLI: mine rules, apply them, evaluate the predictions.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use burl::apply::RuleEngine;
use burl::config::Config;
use burl::eval::{PredictionFile, evaluate};
use burl::graph::IdRegistry;
use burl::graph::loader::{load_optional, load_triples};
use burl::learn::Learner;
use burl::rule::io::{RuleFilter, read_rules};

#[derive(Parser)]
#[command(name = "burl", version, about = "Anytime bottom-up rule learning for knowledge graphs")]
struct Cli {
    /// TOML configuration file. Built-in defaults are used when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override `worker_threads`.
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Override `seed`.
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mine rules from the training triples, writing timed snapshots.
    Learn {
        /// Snapshot prefix; overrides `paths.output`.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Predict heads and tails of every test triple with a rule file.
    Apply {
        /// Rule file; overrides `paths.rules`.
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Prediction file; overrides `paths.predictions`.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Score-tree dump; overrides `paths.explanation`.
        #[arg(long)]
        explain: Option<PathBuf>,
    },

    /// Filtered hits@k and MRR of a prediction file against the test triples.
    Eval {
        /// Prediction file; overrides `paths.predictions`.
        #[arg(long)]
        predictions: Option<PathBuf>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Write a configuration file with every default spelled out.
    InitConfig {
        /// Target file.
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(threads) = cli.threads {
        config.worker_threads = threads;
    }
    if let Some(seed) = cli.seed {
        config.seed = Some(seed);
    }
    config.validate()?;

    match cli.command {
        Commands::Learn { output } => {
            if let Some(output) = output {
                config.paths.output = output;
            }
            learn(config)
        }

        Commands::Apply { rules, output, explain } => {
            if let Some(rules) = rules {
                config.paths.rules = rules;
            }
            if let Some(output) = output {
                config.paths.predictions = output;
            }
            if explain.is_some() {
                config.paths.explanation = explain;
            }
            apply(config)
        }

        Commands::Eval { predictions, json } => {
            if let Some(predictions) = predictions {
                config.paths.predictions = predictions;
            }
            eval(&config, json)
        }

        Commands::InitConfig { file } => {
            config.save(&file)?;
            println!("Wrote configuration to {}", file.display());
            Ok(())
        }
    }
}

fn learn(config: Config) -> Result<()> {
    let registry = Arc::new(IdRegistry::new());
    let training = load_triples(&config.paths.training, &registry)?;
    let summary = Learner::new(config, registry, training)?.run()?;
    println!("Mined {} rules in {} batches", summary.rules, summary.batches);
    for path in &summary.snapshots {
        println!("  {}", path.display());
    }
    Ok(())
}

fn apply(config: Config) -> Result<()> {
    let registry = Arc::new(IdRegistry::new());
    let paths = config.paths.clone();
    let training = load_triples(&paths.training, &registry)?;
    let validation = load_optional(&paths.valid, &registry)?;
    let test = load_triples(&paths.test, &registry)?;
    let rules = read_rules(&paths.rules, &registry, &RuleFilter::from_config(&config.apply))?;

    let engine = RuleEngine::new(Arc::new(config), registry, training, validation, test, rules);
    let summary = engine.run(&paths.predictions, paths.explanation.as_deref())?;
    println!(
        "Predicted {} queries with {} rules into {}",
        summary.queries,
        summary.rules,
        paths.predictions.display()
    );
    Ok(())
}

fn eval(config: &Config, json: bool) -> Result<()> {
    let registry = IdRegistry::new();
    let paths = &config.paths;
    let training = load_triples(&paths.training, &registry)?;
    let validation = load_optional(&paths.valid, &registry)?;
    let test = load_triples(&paths.test, &registry)?;
    let predictions = PredictionFile::read(&paths.predictions)?;

    let report = evaluate(&predictions, &test, vec![&training, &validation, &test], &registry);
    if json {
        println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
    } else {
        println!("{report}");
    }
    Ok(())
}
