//! Bike demand MLOps
//!
//! Trains a high-demand classifier on the UCI bike sharing hourly table,
//! records every run in a local experiment tracker, versions models in a
//! registry with stage promotion, and serves the promoted model over HTTP.
//!
//! # Modules
//!
//! ## Data
//! - [`dataset`] - download, hashing, validation and the feature contract
//!
//! ## Modelling
//! - [`training`] - random forest classifier, split and evaluation
//! - [`drift`] - per-feature drift statistics and report
//!
//! ## Lifecycle
//! - [`tracking`] - runs, params, metrics, tags and artifacts in SQLite
//! - [`registry`] - model versions, stages and promotion
//! - [`pipeline`] - the end-to-end training pass
//!
//! ## Services
//! - [`server`] - inference HTTP service with audit log
//! - [`cli`] - command-line interface

pub mod config;
pub mod error;

pub mod dataset;
pub mod drift;
pub mod training;

pub mod pipeline;
pub mod registry;
pub mod tracking;

pub mod cli;
pub mod server;

pub use error::{MlopsError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{MlopsError, Result};

    pub use crate::config::{PipelineConfig, ServeConfig, TrackingConfig};

    pub use crate::dataset::{FeatureBuilder, FeatureSet, ValidationReport, Validator};

    pub use crate::training::{Evaluation, RandomForest, Trainer, TrainerConfig};

    pub use crate::drift::{DriftDetector, DriftReport, DriftReporter, DriftResult};

    pub use crate::tracking::{ActiveRun, RunRecord, RunStatus, TrackingStore};

    pub use crate::registry::{ModelRegistry, ModelVersion, Promotion, ServedModel, Stage};

    pub use crate::pipeline::{Pipeline, PipelineOutcome};

    pub use crate::server::{create_router, run_server, AppState, AuditLog};
}
