//! Shared service state
//!
//! Built once at startup. The served model is an immutable handle; it is
//! never swapped while the process runs, so requests read it without locking.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use super::audit::AuditLog;
use crate::config::{ServeConfig, TrackingConfig};
use crate::error::Result;
use crate::registry::{ModelRegistry, Prediction, ServedModel, Stage};
use crate::tracking::TrackingStore;

/// Why a prediction produced no label
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("Model not loaded: no version of '{model}' at stage {stage}")]
    ModelUnavailable { model: String, stage: Stage },

    #[error("Inference failed: {0}")]
    InferenceFailed(String),
}

impl PredictError {
    /// Stable identifier for clients
    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::ModelUnavailable { .. } => "model_unavailable",
            PredictError::InferenceFailed(_) => "inference_failed",
        }
    }
}

pub struct AppState {
    pub served: Option<Arc<ServedModel>>,
    pub model_name: String,
    pub stage: Stage,
    pub audit: Arc<AuditLog>,
}

impl AppState {
    pub fn new(served: Option<ServedModel>, model_name: impl Into<String>, stage: Stage, audit: AuditLog) -> Self {
        Self {
            served: served.map(Arc::new),
            model_name: model_name.into(),
            stage,
            audit: Arc::new(audit),
        }
    }

    /// Open the audit log and try to load the configured model.
    /// A model that cannot be loaded leaves the service running without one.
    pub fn load(config: &ServeConfig, tracking: &TrackingConfig) -> Result<Self> {
        let audit = AuditLog::open(&config.audit_log_path)?;

        let served = match Self::load_model(config, tracking) {
            Ok(model) => Some(model),
            Err(e) => {
                warn!(
                    model = %config.model_name,
                    stage = %config.model_stage,
                    error = %e,
                    "Could not load model, serving without one"
                );
                None
            }
        };

        if let Some(model) = &served {
            info!(
                model = %config.model_name,
                version = model.version().version,
                stage = %model.stage(),
                "Model ready"
            );
        }

        Ok(Self::new(served, config.model_name.clone(), config.model_stage, audit))
    }

    fn load_model(config: &ServeConfig, tracking: &TrackingConfig) -> Result<ServedModel> {
        let store = TrackingStore::open(tracking)?;
        ModelRegistry::new(&store).load_served_model(&config.model_name, config.model_stage)
    }

    pub fn model_loaded(&self) -> bool {
        self.served.is_some()
    }

    /// Run inference on a parsed request body
    pub fn predict(&self, body: &Value) -> std::result::Result<Prediction, PredictError> {
        let model = self.served.as_ref().ok_or_else(|| PredictError::ModelUnavailable {
            model: self.model_name.clone(),
            stage: self.stage,
        })?;

        let features = body.as_object().ok_or_else(|| {
            PredictError::InferenceFailed("request body must be a JSON object of feature values".to_string())
        })?;

        model
            .predict(features)
            .map_err(|e| PredictError::InferenceFailed(e.to_string()))
    }
}
