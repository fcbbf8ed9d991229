//! Training pipeline
//!
//! Single pass, strictly sequential:
//! acquire -> hash -> validate -> build features -> (run scope: tag, train,
//! evaluate, drift report, log artifacts, register) -> close run.
//!
//! Validation failures abort before a run is opened. Any failure inside the
//! run scope closes the run as failed and is returned to the caller.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{PipelineConfig, TrackingConfig};
use crate::dataset::acquire::{self, code_version, data_version, DatasetSnapshot};
use crate::dataset::{FeatureBuilder, FeatureSet, ValidationConfig, ValidationReport, Validator};
use crate::drift::DriftReporter;
use crate::error::Result;
use crate::registry::{ModelArtifact, ModelRegistry, ModelVersion, MODEL_ARTIFACT_PATH, MODEL_DIR};
use crate::tracking::{default_run_name, ActiveRun, TrackingStore};
use crate::training::{Evaluation, Trainer, TrainerConfig};

/// Summary of a completed pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub run_id: String,
    pub data_version: String,
    pub code_version: String,
    pub validation: ValidationReport,
    pub evaluation: Evaluation,
    pub n_drifted_features: usize,
    pub drift_share: f64,
    pub dataset_drift: bool,
    pub model_version: ModelVersion,
}

/// What the run scope produces before the run is closed
struct RecordedRun {
    evaluation: Evaluation,
    n_drifted_features: usize,
    drift_share: f64,
    dataset_drift: bool,
    model_version: ModelVersion,
}

pub struct Pipeline {
    config: PipelineConfig,
    tracking: TrackingConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, tracking: TrackingConfig) -> Self {
        Self { config, tracking }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Download the dataset and run the pipeline on it
    pub async fn run(&self) -> Result<PipelineOutcome> {
        let snapshot = acquire::acquire(&self.config).await?;
        self.run_snapshot(snapshot)
    }

    /// Run on a table already on disk
    pub fn run_local(&self, path: &Path) -> Result<PipelineOutcome> {
        let snapshot = DatasetSnapshot {
            path: path.to_path_buf(),
            data_version: data_version(path),
            source_url: format!("file://{}", path.display()),
        };
        self.run_snapshot(snapshot)
    }

    fn run_snapshot(&self, snapshot: DatasetSnapshot) -> Result<PipelineOutcome> {
        let code_version = code_version(&self.config.repo_root);
        info!(
            data_version = %snapshot.data_version,
            code_version = %code_version,
            "Starting training pipeline"
        );

        let validator = Validator::new(ValidationConfig {
            min_rows: self.config.min_rows,
            ..ValidationConfig::default()
        });
        let table = validator.validate_path(&snapshot.path)?;

        let features = FeatureBuilder::new(&self.config.label_column, self.config.label_threshold)
            .build(&table.frame)?;

        let store = TrackingStore::open(&self.tracking)?;
        let run_name = default_run_name();
        let mut run = store.start_run(&self.config.experiment_name, Some(&run_name))?;

        let recorded = match self.record(&store, &mut run, &snapshot, &code_version, &table.report, &features) {
            Ok(recorded) => recorded,
            Err(e) => {
                warn!(run_id = %run.run_id(), error = %e, "Pipeline failed inside run");
                if let Err(close_err) = run.fail() {
                    warn!(error = %close_err, "Could not close failed run");
                }
                return Err(e);
            }
        };

        let run_id = run.finish()?;
        info!(
            run_id = %run_id,
            model_version = recorded.model_version.version,
            "Pipeline finished"
        );

        Ok(PipelineOutcome {
            run_id,
            data_version: snapshot.data_version,
            code_version,
            validation: table.report,
            evaluation: recorded.evaluation,
            n_drifted_features: recorded.n_drifted_features,
            drift_share: recorded.drift_share,
            dataset_drift: recorded.dataset_drift,
            model_version: recorded.model_version,
        })
    }

    fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            test_ratio: self.config.test_ratio,
            seed: self.config.seed,
            n_estimators: self.config.n_estimators,
            max_depth: self.config.max_depth,
            bias_column: self.config.bias_column.clone(),
            ..TrainerConfig::default()
        }
    }

    fn record(
        &self,
        store: &TrackingStore,
        run: &mut ActiveRun<'_>,
        snapshot: &DatasetSnapshot,
        code_version: &str,
        validation: &ValidationReport,
        features: &FeatureSet,
    ) -> Result<RecordedRun> {
        run.set_tag("data_version", &snapshot.data_version)?;
        run.set_tag("git_commit", code_version)?;
        run.set_tag("dataset_source", &self.config.dataset_source)?;

        let trainer = Trainer::new(self.trainer_config());
        run.log_param("n_estimators", self.config.n_estimators)?;
        run.log_param("max_depth", self.config.max_depth)?;
        run.log_param("random_state", self.config.seed)?;
        run.log_param("test_size", self.config.test_ratio)?;
        run.log_json("validation_report.json", validation)?;

        let outcome = trainer.train(features)?;
        for (name, value) in outcome.evaluation.metrics() {
            run.log_metric(&name, value)?;
        }
        run.log_json("confusion_matrix.json", &outcome.evaluation.confusion_matrix.as_rows())?;

        let drift = DriftReporter::default().report(&features.names, &outcome.train.x, &outcome.test.x)?;
        run.log_metric("drift_share", drift.share_drifted)?;
        run.log_metric("n_drifted_features", drift.n_drifted as f64)?;
        let report_dir = self.config.reports_dir.join(run.run_id());
        let (json_report, html_report) = drift.write_to(&report_dir)?;
        run.log_artifact(&json_report, None)?;
        run.log_artifact(&html_report, None)?;
        if drift.dataset_drift {
            warn!(share = drift.share_drifted, "Dataset drift detected between train and test splits");
        }

        let artifact = ModelArtifact::new(features.names.clone(), outcome.model);
        run.log_artifact_bytes(MODEL_ARTIFACT_PATH, &artifact.to_bytes()?)?;

        let source = run.artifact_dir().join(MODEL_DIR);
        let model_version = ModelRegistry::new(store).register_model(
            &self.config.model_name,
            Some(run.run_id()),
            &source.display().to_string(),
        )?;

        Ok(RecordedRun {
            evaluation: outcome.evaluation,
            n_drifted_features: drift.n_drifted,
            drift_share: drift.share_drifted,
            dataset_drift: drift.dataset_drift,
            model_version,
        })
    }
}
