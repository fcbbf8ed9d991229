//! Runtime configuration
//!
//! Each component receives one of these structs at construction; nothing
//! reads the environment after startup.

use std::path::{Path, PathBuf};

use crate::error::{MlopsError, Result};
use crate::registry::Stage;

/// Default registered model name
pub const DEFAULT_MODEL_NAME: &str = "Bike_Demand_Predictor";

/// UCI bike sharing archive
pub const DEFAULT_SOURCE_URL: &str =
    "https://archive.ics.uci.edu/static/public/275/bike+sharing+dataset.zip";

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Location of the tracking database and the artifact tree
#[derive(Debug, Clone)]
pub struct TrackingConfig {
    /// `sqlite:///<path>` or a bare path to the database file
    pub tracking_uri: String,
    /// Root directory for run artifacts
    pub artifact_root: PathBuf,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            tracking_uri: env_or("TRACKING_URI", "sqlite:///./mlflow.db"),
            artifact_root: PathBuf::from(env_or("ARTIFACT_ROOT", "./mlruns")),
        }
    }
}

impl TrackingConfig {
    /// Config rooted in a single directory, used by tests and local runs
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            tracking_uri: format!("sqlite:///{}", dir.join("mlflow.db").display()),
            artifact_root: dir.join("mlruns"),
        }
    }

    /// Resolve the database file behind `tracking_uri`
    pub fn database_path(&self) -> Result<PathBuf> {
        let uri = self.tracking_uri.trim();
        if uri.is_empty() {
            return Err(MlopsError::ConfigError("tracking URI is empty".to_string()));
        }

        if let Some(rest) = uri.strip_prefix("sqlite:///") {
            return Ok(PathBuf::from(rest));
        }

        if uri.contains("://") {
            return Err(MlopsError::ConfigError(format!(
                "unsupported tracking URI scheme: {}",
                uri
            )));
        }

        Ok(PathBuf::from(uri))
    }
}

/// Parameters of one training pipeline run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub source_url: String,
    pub data_dir: PathBuf,
    /// File name of the persisted raw table inside `data_dir`
    pub dataset_file: String,
    /// Member of the downloaded archive that holds the hourly table
    pub archive_member: String,
    pub dataset_source: String,
    pub experiment_name: String,
    pub model_name: String,
    pub label_column: String,
    /// Rows with `label_column > label_threshold` are labelled 1
    pub label_threshold: f64,
    pub test_ratio: f64,
    pub seed: u64,
    pub n_estimators: usize,
    pub max_depth: usize,
    /// Column whose values define the accuracy subgroups
    pub bias_column: String,
    pub min_rows: usize,
    /// Local copy of the drift report files
    pub reports_dir: PathBuf,
    /// Working tree used to read the code version
    pub repo_root: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_url: env_or("DATASET_URL", DEFAULT_SOURCE_URL),
            data_dir: PathBuf::from(env_or("DATA_DIR", "./data")),
            dataset_file: "bike_hour.csv".to_string(),
            archive_member: "hour.csv".to_string(),
            dataset_source: "UCI Bike Sharing".to_string(),
            experiment_name: "Bike_Sharing_Industrial_MLOps_v2".to_string(),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            label_column: "cnt".to_string(),
            label_threshold: 200.0,
            test_ratio: 0.2,
            seed: 42,
            n_estimators: 80,
            max_depth: 10,
            bias_column: "holiday".to_string(),
            min_rows: 100,
            reports_dir: PathBuf::from("./reports"),
            repo_root: PathBuf::from("."),
        }
    }
}

impl PipelineConfig {
    pub fn dataset_path(&self) -> PathBuf {
        self.data_dir.join(&self.dataset_file)
    }
}

/// Inference service settings
#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub host: String,
    pub port: u16,
    pub model_name: String,
    pub model_stage: Stage,
    pub audit_log_path: PathBuf,
}

impl ServeConfig {
    /// Build from `HOST`, `PORT`, `MODEL_NAME`, `MODEL_STAGE` and `AUDIT_LOG`
    pub fn from_env() -> Result<Self> {
        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| MlopsError::ConfigError(format!("invalid PORT: {}", raw)))?,
            Err(_) => 8000,
        };

        Ok(Self {
            host: env_or("HOST", "0.0.0.0"),
            port,
            model_name: env_or("MODEL_NAME", DEFAULT_MODEL_NAME),
            model_stage: env_or("MODEL_STAGE", "None").parse()?,
            audit_log_path: PathBuf::from(env_or("AUDIT_LOG", "./logs/audit.log")),
        })
    }
}
