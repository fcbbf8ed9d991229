//! Model artifact format and the served model handle

use std::fs;
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ModelVersion, Stage};
use crate::error::{MlopsError, Result};
use crate::training::RandomForest;

/// Artifact directory of the model inside a run
pub const MODEL_DIR: &str = "model";
/// File name of the serialized model inside [`MODEL_DIR`]
pub const MODEL_FILE: &str = "model.bin";
/// Artifact path of the serialized model within a run
pub const MODEL_ARTIFACT_PATH: &str = "model/model.bin";

/// Trained forest together with the feature contract it was fit on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub feature_names: Vec<String>,
    pub model: RandomForest,
    pub created_at: String,
}

impl ModelArtifact {
    pub fn new(feature_names: Vec<String>, model: RandomForest) -> Self {
        Self {
            feature_names,
            model,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let artifact: Self = bincode::deserialize(bytes)?;
        if artifact.model.n_features() != artifact.feature_names.len() {
            return Err(MlopsError::SerializationError(format!(
                "model expects {} features but artifact lists {}",
                artifact.model.n_features(),
                artifact.feature_names.len()
            )));
        }
        Ok(artifact)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| {
            MlopsError::DataError(format!("failed to read model {}: {}", path.display(), e))
        })?;
        Self::from_bytes(&bytes)
    }
}

/// One prediction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// 1 for high demand, 0 otherwise
    pub label: i64,
    /// Probability of label 1
    pub probability: f64,
}

/// Immutable model handle shared by all requests
#[derive(Debug, Clone)]
pub struct ServedModel {
    version: ModelVersion,
    artifact: ModelArtifact,
}

impl ServedModel {
    pub fn new(version: ModelVersion, artifact: ModelArtifact) -> Self {
        Self { version, artifact }
    }

    pub fn version(&self) -> &ModelVersion {
        &self.version
    }

    pub fn stage(&self) -> Stage {
        self.version.stage
    }

    pub fn feature_names(&self) -> &[String] {
        &self.artifact.feature_names
    }

    /// Build the feature row in contract order. Every feature must be present
    /// as a finite number or a boolean; unknown keys are ignored.
    pub fn encode(&self, features: &Map<String, Value>) -> Result<Vec<f64>> {
        self.artifact
            .feature_names
            .iter()
            .map(|name| {
                let value = features.get(name).ok_or_else(|| {
                    MlopsError::InferenceError(format!("missing feature '{}'", name))
                })?;
                let number = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                    _ => None,
                };
                number.filter(|v| v.is_finite()).ok_or_else(|| {
                    MlopsError::InferenceError(format!("feature '{}' is not numeric: {}", name, value))
                })
            })
            .collect()
    }

    pub fn predict(&self, features: &Map<String, Value>) -> Result<Prediction> {
        let row = self.encode(features)?;
        let x = Array2::from_shape_vec((1, row.len()), row)?;

        let label = self
            .artifact
            .model
            .predict(&x)?
            .get(0)
            .copied()
            .ok_or_else(|| MlopsError::InferenceError("model returned no prediction".to_string()))?;
        let probability = self
            .artifact
            .model
            .predict_proba_of(&x, 1.0)?
            .get(0)
            .copied()
            .unwrap_or(0.0);

        Ok(Prediction {
            label: label.round() as i64,
            probability,
        })
    }
}
