//! JSON-file persistence for runs, samples, the seed prompt and judge config
//!
//! Files live in one data directory:
//! - `runs.json`: every optimization run, upserted by id
//! - `samples.json`: labeled samples, grouped or in the legacy flat shape
//! - `prompt.md`: the seed prompt
//! - `schema.json`: output schema for structured mode
//! - `metrics-prompt.json`: judge rubric configuration
//!
//! Reads are lenient: a missing or malformed file yields an empty/default
//! value. Saving a run never overwrites a `runs.json` that failed to parse.

use crate::gepa::judge::MetricsPrompt;
use crate::gepa::MetricScores;
use crate::trajectory::Sample;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const DEFAULT_PROMPT: &str = "You are a helpful assistant.";
pub const DEFAULT_GROUP: &str = "default";

const RUNS_FILE: &str = "runs.json";
const SAMPLES_FILE: &str = "samples.json";
const PROMPT_FILE: &str = "prompt.md";
const SCHEMA_FILE: &str = "schema.json";
const METRICS_PROMPT_FILE: &str = "metrics-prompt.json";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub optimization_model: String,
    pub reflection_model: String,
    pub batch_size: usize,
    pub num_rollouts: usize,
    pub selected_metrics: Vec<String>,
    #[serde(default)]
    pub use_structured_output: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_group_id: Option<String>,
}

/// One prompt tried during a run; iteration 0 is the seed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPrompt {
    pub iteration: usize,
    pub prompt: String,
    pub accepted: bool,
    pub score: f64,
    #[serde(default)]
    pub metrics: MetricScores,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationRun {
    pub id: String,
    pub timestamp: String,
    pub config: RunConfig,
    #[serde(default)]
    pub prompts: Vec<RunPrompt>,
    pub final_prompt: String,
    #[serde(default)]
    pub best_score: f64,
    #[serde(default)]
    pub samples_used: Vec<String>,
    #[serde(default)]
    pub collection_size: usize,
    pub status: RunStatus,
}

impl OptimizationRun {
    /// A fresh run record with status `running`
    pub fn start(id: impl Into<String>, config: RunConfig, seed_prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            config,
            prompts: Vec::new(),
            final_prompt: seed_prompt.into(),
            best_score: 0.0,
            samples_used: Vec::new(),
            collection_size: 1,
            status: RunStatus::Running,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    pub runs: Vec<OptimizationRun>,
}

impl RunLog {
    /// Replace the run with the same id, or append
    pub fn upsert(&mut self, run: OptimizationRun) {
        match self.runs.iter_mut().find(|r| r.id == run.id) {
            Some(existing) => *existing = run,
            None => self.runs.push(run),
        }
    }

    pub fn get(&self, id: &str) -> Option<&OptimizationRun> {
        self.runs.iter().find(|r| r.id == id)
    }
}

/// `runs.json` is `{runs: [...]}`; a bare array is accepted too
#[derive(Deserialize)]
#[serde(untagged)]
enum RunsFile {
    Wrapped(RunLog),
    Bare(Vec<OptimizationRun>),
}

impl From<RunsFile> for RunLog {
    fn from(file: RunsFile) -> Self {
        match file {
            RunsFile::Wrapped(log) => log,
            RunsFile::Bare(runs) => RunLog { runs },
        }
    }
}

#[derive(Deserialize)]
struct SampleGroup {
    id: String,
    #[serde(default)]
    samples: Vec<Sample>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SamplesFile {
    Grouped {
        groups: Vec<SampleGroup>,
        #[serde(default, rename = "currentGroupId")]
        current_group_id: Option<String>,
    },
    Legacy {
        #[serde(default)]
        samples: Vec<Sample>,
    },
}

impl SamplesFile {
    fn into_samples(self, group: Option<&str>) -> Vec<Sample> {
        match self {
            SamplesFile::Grouped {
                groups,
                current_group_id,
            } => {
                let target = group
                    .map(str::to_string)
                    .or(current_group_id)
                    .unwrap_or_else(|| DEFAULT_GROUP.to_string());
                groups
                    .into_iter()
                    .find(|g| g.id == target)
                    .map(|g| g.samples)
                    .unwrap_or_default()
            }
            SamplesFile::Legacy { samples } => samples,
        }
    }
}

/// Durable record of optimization runs
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn load(&self) -> RunLog;

    /// Upsert by id
    async fn save(&self, run: &OptimizationRun) -> Result<()>;

    /// Returns whether a run was removed
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Set status to error if the run is still running. Returns whether it changed.
    async fn mark_error(&self, id: &str) -> Result<bool>;

    /// All runs, newest first
    async fn list(&self) -> Vec<OptimizationRun> {
        let mut runs = self.load().await.runs;
        runs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        runs
    }
}

/// Read-only inputs of an optimization run
#[async_trait]
pub trait DatasetStore: Send + Sync {
    /// Samples of `group`, else of the current group, else of `default`
    async fn load_samples(&self, group: Option<&str>) -> Vec<Sample>;
    async fn load_prompt(&self) -> String;
    async fn load_schema(&self) -> Option<Value>;
    async fn load_metrics_prompt(&self) -> MetricsPrompt;
}

/// Both stores backed by JSON files in one directory
pub struct JsonFileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    /// `Ok(None)` when the file does not exist
    async fn read_optional(&self, file: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path(file)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", file)),
        }
    }

    /// Parse a JSON file, falling back to the default on any problem
    async fn read_json_or_default<T>(&self, file: &str) -> T
    where
        T: serde::de::DeserializeOwned + Default,
    {
        match self.read_optional(file).await {
            Ok(Some(content)) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Malformed {}: {}", file, e);
                T::default()
            }),
            Ok(None) => T::default(),
            Err(e) => {
                warn!("{:#}", e);
                T::default()
            }
        }
    }

    async fn read_runs_strict(&self) -> Result<RunLog> {
        match self.read_optional(RUNS_FILE).await? {
            Some(content) => {
                let file: RunsFile = serde_json::from_str(&content)
                    .with_context(|| format!("Refusing to overwrite malformed {}", RUNS_FILE))?;
                Ok(file.into())
            }
            None => Ok(RunLog::default()),
        }
    }

    async fn write_runs(&self, log: &RunLog) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let json = serde_json::to_string_pretty(log)?;
        let tmp = self.path("runs.json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, self.path(RUNS_FILE)).await?;
        Ok(())
    }
}

#[async_trait]
impl RunStore for JsonFileStore {
    async fn load(&self) -> RunLog {
        match self.read_runs_strict().await {
            Ok(log) => log,
            Err(e) => {
                warn!("{:#}", e);
                RunLog::default()
            }
        }
    }

    async fn save(&self, run: &OptimizationRun) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut log = self.read_runs_strict().await?;
        log.upsert(run.clone());
        self.write_runs(&log).await?;
        debug!("Saved run {}", run.id);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut log = self.read_runs_strict().await?;
        let before = log.runs.len();
        log.runs.retain(|r| r.id != id);
        if log.runs.len() == before {
            return Ok(false);
        }
        self.write_runs(&log).await?;
        Ok(true)
    }

    async fn mark_error(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut log = self.read_runs_strict().await?;
        let Some(run) = log
            .runs
            .iter_mut()
            .find(|r| r.id == id && r.status == RunStatus::Running)
        else {
            return Ok(false);
        };
        run.status = RunStatus::Error;
        self.write_runs(&log).await?;
        Ok(true)
    }
}

#[async_trait]
impl DatasetStore for JsonFileStore {
    async fn load_samples(&self, group: Option<&str>) -> Vec<Sample> {
        match self.read_optional(SAMPLES_FILE).await {
            Ok(Some(content)) => match serde_json::from_str::<SamplesFile>(&content) {
                Ok(file) => file.into_samples(group),
                Err(e) => {
                    warn!("Malformed {}: {}", SAMPLES_FILE, e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("{:#}", e);
                Vec::new()
            }
        }
    }

    async fn load_prompt(&self) -> String {
        match self.read_optional(PROMPT_FILE).await {
            Ok(Some(content)) => content.trim().to_string(),
            _ => DEFAULT_PROMPT.to_string(),
        }
    }

    async fn load_schema(&self) -> Option<Value> {
        self.read_json_or_default::<Option<Value>>(SCHEMA_FILE)
            .await
            .filter(|v| !v.is_null())
    }

    async fn load_metrics_prompt(&self) -> MetricsPrompt {
        self.read_json_or_default(METRICS_PROMPT_FILE).await
    }
}
