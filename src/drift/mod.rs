//! Drift detection
//!
//! Two-sample statistics comparing a reference (training) distribution with a
//! current (held-out) one, and the per-feature report built from them. Drift
//! is diagnostic only; nothing here can fail a training run on its own.

mod data_drift;
mod report;

pub use data_drift::{KolmogorovSmirnovTest, PopulationStabilityIndex};
pub use report::{DriftReport, DriftReporter, FeatureDriftResult, FeatureStats};

use crate::error::Result;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// Outcome of one detector on one feature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftResult {
    pub drift_detected: bool,
    pub score: f64,
    /// Score above which drift is flagged
    pub threshold: f64,
    pub message: String,
}

impl DriftResult {
    pub fn no_drift(score: f64, threshold: f64) -> Self {
        Self {
            drift_detected: false,
            score,
            threshold,
            message: "No drift detected".to_string(),
        }
    }

    pub fn drift(score: f64, threshold: f64, message: String) -> Self {
        Self {
            drift_detected: true,
            score,
            threshold,
            message,
        }
    }
}

/// Batch drift detector over one feature column
pub trait DriftDetector: Send + Sync {
    /// Compare `current` against `reference`
    fn detect(&self, reference: ArrayView1<f64>, current: ArrayView1<f64>) -> Result<DriftResult>;

    fn name(&self) -> &'static str;
}
