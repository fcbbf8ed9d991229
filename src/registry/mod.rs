//! Model registry and promotion
//!
//! Registered models and their versions live in the tracking database.
//! Versions are numbered per model name from 1 and never reused; a version's
//! stage changes only through [`ModelRegistry::promote`].

mod artifact;
mod model_registry;

pub use artifact::{ModelArtifact, Prediction, ServedModel, MODEL_ARTIFACT_PATH, MODEL_DIR};
pub use model_registry::ModelRegistry;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MlopsError;

/// Lifecycle stage of a model version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    None,
    Staging,
    Production,
    Archived,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::None => "None",
            Stage::Staging => "Staging",
            Stage::Production => "Production",
            Stage::Archived => "Archived",
        }
    }

    /// Stages that at most one version of a model may hold at a time
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Stage::Staging | Stage::Production)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = MlopsError;

    /// Case-insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Stage::None),
            "staging" => Ok(Stage::Staging),
            "production" => Ok(Stage::Production),
            "archived" => Ok(Stage::Archived),
            _ => Err(MlopsError::InvalidStage(s.to_string())),
        }
    }
}

/// A registered version of a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    pub version: u32,
    pub run_id: Option<String>,
    /// Directory holding the model artifact
    pub source: String,
    pub stage: Stage,
    /// Milliseconds since the Unix epoch
    pub created_at: i64,
}

/// Outcome of a promotion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Promotion {
    pub name: String,
    pub version: u32,
    pub from_stage: Stage,
    pub to_stage: Stage,
    /// Versions moved to `Archived` because they held the target stage
    pub archived: Vec<u32>,
}

impl Promotion {
    /// Re-promotion of a version already at the target stage
    pub fn is_noop(&self) -> bool {
        self.from_stage == self.to_stage && self.archived.is_empty()
    }
}

/// One recorded stage change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTransition {
    pub name: String,
    pub version: u32,
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_parse_case_insensitive() {
        assert_eq!("staging".parse::<Stage>().unwrap(), Stage::Staging);
        assert_eq!("Production".parse::<Stage>().unwrap(), Stage::Production);
        assert_eq!(" None ".parse::<Stage>().unwrap(), Stage::None);
        assert!(matches!("live".parse::<Stage>(), Err(MlopsError::InvalidStage(_))));
    }

    #[test]
    fn test_stage_display_round_trips() {
        for stage in [Stage::None, Stage::Staging, Stage::Production, Stage::Archived] {
            assert_eq!(stage.to_string().parse::<Stage>().unwrap(), stage);
        }
    }

    #[test]
    fn test_exclusive_stages() {
        assert!(Stage::Staging.is_exclusive());
        assert!(Stage::Production.is_exclusive());
        assert!(!Stage::None.is_exclusive());
        assert!(!Stage::Archived.is_exclusive());
    }
}
