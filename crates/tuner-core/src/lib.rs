//! Tuner Core Library
//!
//! Reflective prompt optimization over labeled conversation samples.

pub mod completion;
pub mod config;
pub mod gepa;
pub mod server;
pub mod storage;
pub mod trajectory;

use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Re-export key types for convenience
pub use completion::{CompletionModel, OpenAiCompatibleClient};
pub use config::{Config, UserConfig, UserConfigHandle};
pub use gepa::{OptimizeRequest, Optimizer, ProgressEvent};
pub use storage::{JsonFileStore, OptimizationRun, RunStore};
pub use trajectory::{Sample, Trajectory};

/// Install the fmt subscriber, filtered by `RUST_LOG`
pub fn init_tracing<W>(writer: W)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tuner=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(writer))
        .init();
}

/// Wire the completion client, file store and user config from `config`
pub fn build_optimizer(config: &Config) -> Result<(Optimizer, Arc<JsonFileStore>)> {
    let model = Arc::new(OpenAiCompatibleClient::from_config(config)?);
    let store = Arc::new(JsonFileStore::new(&config.data_dir));
    let user_config = Arc::new(UserConfigHandle::load(&config.user_config_path));
    let optimizer = Optimizer::new(model, store.clone(), store.clone(), user_config)
        .with_default_model(&config.default_model);
    Ok((optimizer, store))
}
