use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};
use tuner_tools::ToolSpec;

pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct Config {
    /// OpenAI-compatible API base URL
    pub api_url: String,
    pub api_key: Option<String>,
    pub default_model: String,

    /// Directory holding runs.json, samples.json, prompt.md, schema.json, metrics-prompt.json
    pub data_dir: PathBuf,
    /// User config file (tools, default model)
    pub user_config_path: PathBuf,

    pub http_port: u16,

    /// Ceiling for a single completion call
    pub call_timeout: Duration,
    /// Ceiling for a whole optimization run
    pub run_timeout: Duration,
    /// Model round-trips allowed per generated trajectory
    pub max_tool_steps: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_url: std::env::var("TUNER_API_URL")
                .unwrap_or_else(|_| "http://localhost:8080/v1".to_string()),
            api_key: std::env::var("TUNER_API_KEY").ok(),
            default_model: std::env::var("TUNER_DEFAULT_MODEL")
                .unwrap_or_else(|_| DEFAULT_MODEL.to_string()),

            data_dir: std::env::var("TUNER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| resolve_data_dir(Path::new("."))),
            user_config_path: std::env::var("TUNER_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("tuner.config.json")),

            http_port: std::env::var("HTTP_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("HTTP_PORT must be a valid port number")?,

            call_timeout: Duration::from_secs(env_u64("TUNER_CALL_TIMEOUT_SECS", 120)?),
            run_timeout: Duration::from_secs(env_u64("TUNER_RUN_TIMEOUT_SECS", 300)?),
            max_tool_steps: env_u64("TUNER_MAX_TOOL_STEPS", 5)? as usize,
        })
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("{} must be a non-negative integer", key)),
        Err(_) => Ok(default),
    }
}

/// Pick the data directory under `root`: `.tuner/data` when present, then a
/// development `data/`, otherwise `.tuner/data`.
pub fn resolve_data_dir(root: &Path) -> PathBuf {
    let user_dir = root.join(".tuner").join("data");
    let dev_dir = root.join("data");
    if user_dir.is_dir() {
        user_dir
    } else if dev_dir.is_dir() {
        info!("Using data/ directory for development");
        dev_dir
    } else {
        user_dir
    }
}

/// Settings from the user's config file
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
    /// Overrides `TUNER_DEFAULT_MODEL` when set
    #[serde(default)]
    pub default_model: Option<String>,
    /// Tools offered to the model during free-form generation
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

impl UserConfig {
    /// Load from a JSON file. A missing or malformed file yields defaults.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => {
                warn!("Config file {} not found, using defaults", path.display());
                return Self::default();
            }
        };
        match serde_json::from_str::<UserConfig>(&content) {
            Ok(config) => {
                info!(
                    "Loaded user config from {} ({} tools)",
                    path.display(),
                    config.tools.len()
                );
                config
            }
            Err(e) => {
                warn!("Could not parse {}, using defaults: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Shared, explicitly reloadable user config
#[derive(Debug)]
pub struct UserConfigHandle {
    path: Option<PathBuf>,
    current: RwLock<Arc<UserConfig>>,
}

impl UserConfigHandle {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = UserConfig::load(&path);
        Self {
            path: Some(path),
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// A handle not backed by a file
    pub fn fixed(config: UserConfig) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn current(&self) -> Arc<UserConfig> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Re-read the backing file; a fixed handle keeps its config
    pub fn reload(&self) -> Arc<UserConfig> {
        if let Some(path) = &self.path {
            self.replace(UserConfig::load(path));
        }
        self.current()
    }

    pub fn replace(&self, config: UserConfig) {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(config);
    }
}
