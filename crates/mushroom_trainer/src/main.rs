//! Mushroom pipeline CLI
//!
//! Runs the whole pipeline, a single stage, or classifies one record.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mushroom_core::{predict, ConfigurationManager, Prediction, PredictionResponse, StageName};
use mushroom_trainer::PipelineRunner;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "mushroom-pipeline")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Train and serve the mushroom edibility classifier", long_about = None)]
struct Args {
    /// Structural configuration (paths, data source, tracking)
    #[arg(long, global = true, default_value = ConfigurationManager::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Model hyperparameters
    #[arg(long, global = true, default_value = ConfigurationManager::DEFAULT_PARAMS_PATH)]
    params: PathBuf,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run all four stages in order
    Run,
    /// Run one stage (ingest, transform, train, evaluate)
    Stage { name: StageName },
    /// Classify a single record given as a JSON object
    Predict {
        #[arg(long)]
        record: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_ascii_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Mushroom pipeline v{}", env!("CARGO_PKG_VERSION"));

    let manager = ConfigurationManager::load(&args.config, &args.params)
        .context("Failed to load configuration")?;
    for warning in manager.validate() {
        warn!("{}", warning);
    }

    match args.command {
        Command::Run => {
            let report = PipelineRunner::from_config(&manager)
                .run()
                .context("Pipeline failed")?;
            info!("Completed stages: {:?}", report.completed);
        }
        Command::Stage { name } => {
            PipelineRunner::from_config(&manager)
                .run_stage(name)
                .with_context(|| format!("Stage {name} failed"))?;
        }
        Command::Predict { record } => {
            let prediction = Prediction::new(manager.prediction_config())
                .context("Failed to set up prediction")?;
            let response = match prediction.validator().parse_json(&record) {
                Ok(record) => predict(&prediction, &record),
                Err(e) => PredictionResponse::from(e),
            };

            println!(
                "{}",
                serde_json::to_string(&response).context("Failed to serialize response")?
            );
            if response.status() != 200 {
                bail!("prediction failed with status {}", response.status());
            }
        }
    }

    Ok(())
}
