//! Train/evaluate step of the pipeline
//!
//! One seeded random split, one forest fit, then evaluation on the held-out
//! rows: overall accuracy, per-subgroup accuracy on the bias column and a
//! binary confusion matrix.

use std::time::Instant;

use ndarray::{Array1, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::random_forest::RandomForest;
use crate::dataset::FeatureSet;
use crate::error::{MlopsError, Result};

/// Trainer hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub test_ratio: f64,
    pub seed: u64,
    pub n_estimators: usize,
    pub max_depth: usize,
    /// Feature column that defines the subgroups
    pub bias_column: String,
    /// (value, label) pairs; accuracy is reported as `bias_acc_<label>`
    pub subgroups: Vec<(f64, String)>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            test_ratio: 0.2,
            seed: 42,
            n_estimators: 80,
            max_depth: 10,
            bias_column: "holiday".to_string(),
            subgroups: vec![
                (0.0, "Regular_Day".to_string()),
                (1.0, "Holiday".to_string()),
            ],
        }
    }
}

/// Accuracy restricted to one value of the bias column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubgroupAccuracy {
    pub label: String,
    pub value: f64,
    pub n_samples: usize,
    pub accuracy: f64,
}

impl SubgroupAccuracy {
    pub fn metric_name(&self) -> String {
        format!("bias_acc_{}", self.label)
    }
}

/// Binary confusion matrix with label 1 as the positive class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_negative: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub true_positive: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Self {
        let mut cm = Self::default();
        for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
            match (t >= 0.5, p >= 0.5) {
                (false, false) => cm.true_negative += 1,
                (false, true) => cm.false_positive += 1,
                (true, false) => cm.false_negative += 1,
                (true, true) => cm.true_positive += 1,
            }
        }
        cm
    }

    /// Rows are actual labels `[0, 1]`, columns predicted labels `[0, 1]`
    pub fn as_rows(&self) -> [[usize; 2]; 2] {
        [
            [self.true_negative, self.false_positive],
            [self.false_negative, self.true_positive],
        ]
    }

    pub fn total(&self) -> usize {
        self.true_negative + self.false_positive + self.false_negative + self.true_positive
    }
}

/// Held-out evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub overall_accuracy: f64,
    pub subgroups: Vec<SubgroupAccuracy>,
    pub confusion_matrix: ConfusionMatrix,
}

impl Evaluation {
    /// Metrics as (name, value) in logging order
    pub fn metrics(&self) -> Vec<(String, f64)> {
        let mut metrics = vec![("overall_accuracy".to_string(), self.overall_accuracy)];
        metrics.extend(self.subgroups.iter().map(|s| (s.metric_name(), s.accuracy)));
        metrics
    }
}

/// Everything the training step produces
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub model: RandomForest,
    pub train: FeatureSet,
    pub test: FeatureSet,
    pub predictions: Array1<f64>,
    pub evaluation: Evaluation,
    pub training_time_secs: f64,
}

/// Shuffle row indices with a fixed seed and cut off the test share.
/// The test share is rounded up; both sides must be non-empty.
pub fn train_test_split(n_rows: usize, test_ratio: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(0.0..1.0).contains(&test_ratio) || test_ratio == 0.0 {
        return Err(MlopsError::TrainingError(format!(
            "test ratio must be in (0, 1), got {}",
            test_ratio
        )));
    }

    let n_test = (n_rows as f64 * test_ratio).ceil() as usize;
    if n_test == 0 || n_test >= n_rows {
        return Err(MlopsError::TrainingError(format!(
            "cannot split {} rows with test ratio {}",
            n_rows, test_ratio
        )));
    }

    let mut indices: Vec<usize> = (0..n_rows).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let train = indices.split_off(n_test);
    Ok((train, indices))
}

/// Fraction of equal labels; `None` for empty input
pub fn accuracy(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Option<f64> {
    if y_true.is_empty() {
        return None;
    }
    let correct = y_true
        .iter()
        .zip(y_pred.iter())
        .filter(|(t, p)| (*t - *p).abs() < 0.5)
        .count();
    Some(correct as f64 / y_true.len() as f64)
}

fn subset(features: &FeatureSet, rows: &[usize]) -> FeatureSet {
    FeatureSet {
        names: features.names.clone(),
        x: features.x.select(Axis(0), rows),
        y: features.y.select(Axis(0), rows),
    }
}

/// Single deterministic fit per call
#[derive(Debug, Clone, Default)]
pub struct Trainer {
    config: TrainerConfig,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Split, fit and evaluate
    pub fn train(&self, features: &FeatureSet) -> Result<TrainOutcome> {
        let (train_rows, test_rows) =
            train_test_split(features.n_rows(), self.config.test_ratio, self.config.seed)?;
        let train = subset(features, &train_rows);
        let test = subset(features, &test_rows);

        info!(
            train_rows = train.n_rows(),
            test_rows = test.n_rows(),
            n_estimators = self.config.n_estimators,
            max_depth = self.config.max_depth,
            "Training random forest"
        );

        let start = Instant::now();
        let mut model = RandomForest::new(self.config.n_estimators)
            .with_max_depth(self.config.max_depth)
            .with_random_state(self.config.seed);
        model.fit(&train.x, &train.y)?;
        let training_time_secs = start.elapsed().as_secs_f64();

        let predictions = model.predict(&test.x)?;
        let evaluation = self.evaluate(&test, &predictions)?;

        info!(
            overall_accuracy = evaluation.overall_accuracy,
            secs = training_time_secs,
            "Training finished"
        );

        Ok(TrainOutcome {
            model,
            train,
            test,
            predictions,
            evaluation,
            training_time_secs,
        })
    }

    /// Evaluate predictions against a labelled feature set
    pub fn evaluate(&self, test: &FeatureSet, predictions: &Array1<f64>) -> Result<Evaluation> {
        let overall_accuracy = accuracy(&test.y, predictions).ok_or_else(|| {
            MlopsError::TrainingError("cannot evaluate on an empty test set".to_string())
        })?;

        let bias_idx = test
            .column_index(&self.config.bias_column)
            .ok_or_else(|| MlopsError::MissingColumn(self.config.bias_column.clone()))?;
        let bias_values = test.x.column(bias_idx);

        let mut subgroups = Vec::new();
        for (value, label) in &self.config.subgroups {
            let rows: Vec<usize> = bias_values
                .iter()
                .enumerate()
                .filter(|&(_, &v)| v == *value)
                .map(|(i, _)| i)
                .collect();

            if rows.is_empty() {
                debug!(subgroup = %label, "Subgroup empty in test split, skipping");
                continue;
            }

            let y_true = test.y.select(Axis(0), &rows);
            let y_pred = predictions.select(Axis(0), &rows);
            if let Some(acc) = accuracy(&y_true, &y_pred) {
                subgroups.push(SubgroupAccuracy {
                    label: label.clone(),
                    value: *value,
                    n_samples: rows.len(),
                    accuracy: acc,
                });
            }
        }

        Ok(Evaluation {
            overall_accuracy,
            subgroups,
            confusion_matrix: ConfusionMatrix::from_predictions(&test.y, predictions),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn feature_set(holiday: &[f64], y: &[f64]) -> FeatureSet {
        let n = y.len();
        let mut x = Array2::zeros((n, 2));
        for i in 0..n {
            x[[i, 0]] = holiday[i];
            x[[i, 1]] = y[i] * 10.0 + (i % 3) as f64;
        }
        FeatureSet {
            names: vec!["holiday".to_string(), "signal".to_string()],
            x,
            y: Array1::from_vec(y.to_vec()),
        }
    }

    #[test]
    fn test_split_is_seeded_and_disjoint() {
        let (train_a, test_a) = train_test_split(100, 0.2, 42).unwrap();
        let (train_b, test_b) = train_test_split(100, 0.2, 42).unwrap();
        assert_eq!(train_a, train_b);
        assert_eq!(test_a, test_b);
        assert_eq!(test_a.len(), 20);
        assert_eq!(train_a.len(), 80);

        let mut all: Vec<usize> = train_a.iter().chain(&test_a).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());

        let (_, test_c) = train_test_split(100, 0.2, 7).unwrap();
        assert_ne!(test_a, test_c);
    }

    #[test]
    fn test_split_rejects_degenerate() {
        assert!(train_test_split(1, 0.2, 1).is_err());
        assert!(train_test_split(10, 0.0, 1).is_err());
        assert!(train_test_split(10, 1.0, 1).is_err());
    }

    #[test]
    fn test_confusion_matrix() {
        let cm = ConfusionMatrix::from_predictions(&array![0.0, 0.0, 1.0, 1.0, 1.0], &array![0.0, 1.0, 1.0, 0.0, 1.0]);
        assert_eq!(cm.as_rows(), [[1, 1], [1, 2]]);
        assert_eq!(cm.total(), 5);
    }

    #[test]
    fn test_subgroup_accuracy_skips_empty() {
        let test = feature_set(&[0.0, 0.0, 0.0, 0.0], &[0.0, 1.0, 1.0, 0.0]);
        let predictions = array![0.0, 1.0, 0.0, 0.0];

        let evaluation = Trainer::default().evaluate(&test, &predictions).unwrap();
        assert_eq!(evaluation.overall_accuracy, 0.75);
        assert_eq!(evaluation.subgroups.len(), 1);
        assert_eq!(evaluation.subgroups[0].metric_name(), "bias_acc_Regular_Day");

        let names: Vec<String> = evaluation.metrics().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["overall_accuracy", "bias_acc_Regular_Day"]);
    }

    #[test]
    fn test_subgroup_accuracy_per_value() {
        let test = feature_set(&[0.0, 1.0, 0.0, 1.0], &[1.0, 1.0, 0.0, 0.0]);
        let predictions = array![1.0, 0.0, 0.0, 0.0];

        let evaluation = Trainer::default().evaluate(&test, &predictions).unwrap();
        let holiday = evaluation.subgroups.iter().find(|s| s.label == "Holiday").unwrap();
        let regular = evaluation.subgroups.iter().find(|s| s.label == "Regular_Day").unwrap();
        assert_eq!(holiday.accuracy, 0.5);
        assert_eq!(regular.accuracy, 1.0);
        assert_eq!(holiday.n_samples, 2);
    }

    #[test]
    fn test_train_learns_separable_signal() {
        let y: Vec<f64> = (0..60).map(|i| (i % 2) as f64).collect();
        let holiday: Vec<f64> = (0..60).map(|i| if i % 10 == 0 { 1.0 } else { 0.0 }).collect();
        let features = feature_set(&holiday, &y);

        let trainer = Trainer::new(TrainerConfig {
            n_estimators: 10,
            max_depth: 4,
            ..TrainerConfig::default()
        });
        let outcome = trainer.train(&features).unwrap();

        assert_eq!(outcome.train.n_rows(), 48);
        assert_eq!(outcome.test.n_rows(), 12);
        assert_eq!(outcome.predictions.len(), 12);
        assert!(outcome.evaluation.overall_accuracy > 0.9);
        assert_eq!(outcome.evaluation.confusion_matrix.total(), 12);
    }
}
