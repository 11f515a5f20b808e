//! Run one prompt optimization from the command line
//!
//! Prints every progress event as a JSON line on stdout. Exits non-zero when
//! the run ends in error.
//!
//! Usage:
//!   cargo run --bin tuner-optimize -- --batch-size 3 --num-rollouts 5

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use std::path::PathBuf;
use tuner_core::gepa::{EventSink, Metric};
use tuner_core::{build_optimizer, init_tracing, Config, OptimizeRequest, ProgressEvent};

#[derive(Parser, Debug)]
#[command(name = "tuner-optimize", about = "Optimize a system prompt against labeled samples")]
struct Cli {
    /// Model that generates trajectories (default: configured model)
    #[arg(long, default_value = "")]
    optimization_model: String,

    /// Model that judges and rewrites (default: configured model)
    #[arg(long, default_value = "")]
    reflection_model: String,

    #[arg(long, default_value_t = 3)]
    batch_size: usize,

    #[arg(long, default_value_t = 5)]
    num_rollouts: usize,

    /// Comma-separated metric names
    #[arg(long, value_delimiter = ',', default_values_t = Metric::default_names())]
    metrics: Vec<String>,

    /// Constrain outputs with schema.json from the data directory
    #[arg(long)]
    structured: bool,

    #[arg(long)]
    sample_group: Option<String>,

    /// Overrides TUNER_DATA_DIR
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Seed for batch sampling
    #[arg(long)]
    seed: Option<u64>,
}

/// Writes each event to stdout as one JSON line
struct JsonLinesSink;

#[async_trait]
impl EventSink for JsonLinesSink {
    async fn emit(&self, event: ProgressEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!("Could not serialize event: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(std::io::stderr);
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    let request = OptimizeRequest {
        optimization_model: cli.optimization_model,
        reflection_model: cli.reflection_model,
        batch_size: cli.batch_size,
        num_rollouts: cli.num_rollouts,
        selected_metrics: cli.metrics,
        use_structured_output: cli.structured,
        sample_group_id: cli.sample_group,
        seed: cli.seed,
    };

    let (optimizer, _store) = build_optimizer(&config)?;
    let run_id = uuid::Uuid::new_v4().to_string();
    let run = optimizer
        .run_streaming(&run_id, request, &JsonLinesSink)
        .await?;

    tracing::info!(
        "Run {} completed: best score {:.2}, {} prompts tried",
        run.id,
        run.best_score,
        run.prompts.len()
    );
    Ok(())
}
