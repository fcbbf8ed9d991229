//! Feature contract
//!
//! The column set and ordering depend only on the validated schema, never on
//! which categories happen to appear in a given table. The served model relies
//! on this to interpret prediction requests.

use ndarray::{Array1, Array2};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::validation::column_f64;
use crate::error::{MlopsError, Result};

/// Numeric columns copied through unchanged, in output order
pub const PASSTHROUGH_COLUMNS: [&str; 7] = [
    "holiday",
    "weekday",
    "workingday",
    "temp",
    "atemp",
    "hum",
    "windspeed",
];

/// A categorical column with its full category domain.
/// The first category is the reference level and gets no indicator column.
#[derive(Debug, Clone, Copy)]
pub struct Categorical {
    pub column: &'static str,
    pub first: i64,
    pub last: i64,
}

/// One-hot encoded columns, in output order
pub const CATEGORICAL_COLUMNS: [Categorical; 4] = [
    Categorical { column: "season", first: 1, last: 4 },
    Categorical { column: "weathersit", first: 1, last: 4 },
    Categorical { column: "mnth", first: 1, last: 12 },
    Categorical { column: "hr", first: 0, last: 23 },
];

/// Encoded design matrix with its labels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSet {
    pub names: Vec<String>,
    pub x: Array2<f64>,
    pub y: Array1<f64>,
}

impl FeatureSet {
    pub fn n_rows(&self) -> usize {
        self.x.nrows()
    }

    /// Index of a named feature column
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// Builds labels and the one-hot feature matrix from raw columns
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    label_column: String,
    threshold: f64,
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self::new("cnt", 200.0)
    }
}

impl FeatureBuilder {
    pub fn new(label_column: impl Into<String>, threshold: f64) -> Self {
        Self {
            label_column: label_column.into(),
            threshold,
        }
    }

    /// Ordered feature names of the contract
    pub fn feature_names() -> Vec<String> {
        let mut names: Vec<String> = PASSTHROUGH_COLUMNS.iter().map(|c| c.to_string()).collect();
        for cat in CATEGORICAL_COLUMNS.iter() {
            for value in (cat.first + 1)..=cat.last {
                names.push(format!("{}_{}", cat.column, value));
            }
        }
        names
    }

    /// Binary label: 1 when the label column is strictly above the threshold
    pub fn labels(&self, values: &[f64]) -> Array1<f64> {
        values
            .iter()
            .map(|&v| if v > self.threshold { 1.0 } else { 0.0 })
            .collect()
    }

    /// Encode one row given raw column values. Used by tests and tooling
    /// that work with raw records instead of data frames.
    pub fn encode_row(lookup: impl Fn(&str) -> Option<f64>) -> Result<Vec<f64>> {
        let mut row = Vec::with_capacity(Self::feature_names().len());
        for column in PASSTHROUGH_COLUMNS.iter() {
            row.push(lookup(column).ok_or_else(|| MlopsError::MissingColumn(column.to_string()))?);
        }
        for cat in CATEGORICAL_COLUMNS.iter() {
            let value = lookup(cat.column)
                .ok_or_else(|| MlopsError::MissingColumn(cat.column.to_string()))?;
            push_one_hot(&mut row, cat, value);
        }
        Ok(row)
    }

    /// Build the feature set from a validated table
    pub fn build(&self, frame: &DataFrame) -> Result<FeatureSet> {
        let n_rows = frame.height();
        let names = Self::feature_names();
        let n_cols = names.len();

        let label_values = column_f64(frame, &self.label_column)?;
        let y = self.labels(&label_values);

        let passthrough: Vec<Vec<f64>> = PASSTHROUGH_COLUMNS
            .iter()
            .map(|c| column_f64(frame, c))
            .collect::<Result<_>>()?;
        let categorical: Vec<Vec<f64>> = CATEGORICAL_COLUMNS
            .iter()
            .map(|c| column_f64(frame, c.column))
            .collect::<Result<_>>()?;

        let mut flat = Vec::with_capacity(n_rows * n_cols);
        for i in 0..n_rows {
            for col in &passthrough {
                flat.push(col[i]);
            }
            for (cat, col) in CATEGORICAL_COLUMNS.iter().zip(&categorical) {
                push_one_hot(&mut flat, cat, col[i]);
            }
        }

        let x = Array2::from_shape_vec((n_rows, n_cols), flat)?;
        debug!(rows = n_rows, features = n_cols, "Built feature matrix");

        Ok(FeatureSet { names, x, y })
    }
}

fn push_one_hot(out: &mut Vec<f64>, cat: &Categorical, value: f64) {
    for level in (cat.first + 1)..=cat.last {
        out.push(if value == level as f64 { 1.0 } else { 0.0 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    #[test]
    fn test_labels_threshold() {
        let builder = FeatureBuilder::new("cnt", 200.0);
        let y = builder.labels(&[50.0, 250.0, 300.0]);
        assert_eq!(y.to_vec(), vec![0.0, 1.0, 1.0]);

        // strictly greater than
        assert_eq!(builder.labels(&[200.0]).to_vec(), vec![0.0]);
    }

    #[test]
    fn test_feature_names_contract() {
        let names = FeatureBuilder::feature_names();
        // 7 passthrough + 3 season + 3 weathersit + 11 month + 23 hour
        assert_eq!(names.len(), 47);
        assert_eq!(names[0], "holiday");
        assert_eq!(names[7], "season_2");
        assert_eq!(names[10], "weathersit_2");
        assert_eq!(names[13], "mnth_2");
        assert_eq!(names[24], "hr_1");
        assert_eq!(names.last().map(String::as_str), Some("hr_23"));
        assert!(!names.iter().any(|n| n == "season_1" || n == "hr_0"));
    }

    #[test]
    fn test_build_is_independent_of_observed_categories() {
        let frame = df!(
            "instant" => [1i64, 2],
            "season" => [1i64, 3],
            "mnth" => [1i64, 7],
            "hr" => [0i64, 17],
            "holiday" => [0i64, 1],
            "weekday" => [6i64, 2],
            "workingday" => [0i64, 1],
            "weathersit" => [1i64, 2],
            "temp" => [0.24, 0.8],
            "atemp" => [0.28, 0.75],
            "hum" => [0.81, 0.4],
            "windspeed" => [0.0, 0.3],
            "casual" => [3i64, 40],
            "registered" => [13i64, 400],
            "cnt" => [16i64, 440]
        )
        .unwrap();

        let features = FeatureBuilder::default().build(&frame).unwrap();
        assert_eq!(features.names, FeatureBuilder::feature_names());
        assert_eq!(features.x.dim(), (2, 47));
        assert_eq!(features.y.to_vec(), vec![0.0, 1.0]);

        // first row is all reference levels
        assert!(features.x.row(0).iter().skip(7).all(|&v| v == 0.0));

        let row = features.x.row(1);
        let idx = |name: &str| features.column_index(name).unwrap();
        assert_eq!(row[idx("season_3")], 1.0);
        assert_eq!(row[idx("mnth_7")], 1.0);
        assert_eq!(row[idx("hr_17")], 1.0);
        assert_eq!(row[idx("weathersit_2")], 1.0);
        assert_eq!(row[idx("temp")], 0.8);
        assert_eq!(row.iter().skip(7).filter(|&&v| v == 1.0).count(), 4);
    }

    #[test]
    fn test_encode_row_matches_build() {
        let row = FeatureBuilder::encode_row(|c| match c {
            "season" => Some(2.0),
            "weathersit" => Some(1.0),
            "mnth" => Some(12.0),
            "hr" => Some(8.0),
            _ => Some(0.5),
        })
        .unwrap();
        let names = FeatureBuilder::feature_names();
        assert_eq!(row.len(), names.len());
        let on: Vec<&str> = names
            .iter()
            .zip(&row)
            .skip(7)
            .filter(|&(_, &v)| v == 1.0)
            .map(|(n, _)| n.as_str())
            .collect();
        assert_eq!(on, vec!["season_2", "mnth_12", "hr_8"]);
    }

    #[test]
    fn test_encode_row_missing_column() {
        let err = FeatureBuilder::encode_row(|c| if c == "hum" { None } else { Some(1.0) })
            .unwrap_err();
        assert!(matches!(err, MlopsError::MissingColumn(ref c) if c == "hum"));
    }
}
