//! Pre-training data validation
//!
//! Checks run in a fixed order: required columns (fail fast), null cells
//! (rows dropped), value ranges (warn only), minimum row count (fail).

use std::path::Path;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MlopsError, Result};

/// Columns every hourly table must carry, in check order
pub const REQUIRED_COLUMNS: [&str; 12] = [
    "season",
    "mnth",
    "hr",
    "holiday",
    "weekday",
    "workingday",
    "weathersit",
    "temp",
    "atemp",
    "hum",
    "windspeed",
    "cnt",
];

/// Validation thresholds
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub required_columns: Vec<String>,
    pub min_rows: usize,
    /// (column, lower, upper); values outside only produce a warning
    pub range_checks: Vec<(String, f64, f64)>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            required_columns: REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            min_rows: 100,
            range_checks: vec![("temp".to_string(), 0.0, 1.0)],
        }
    }
}

/// Non-fatal findings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValidationWarning {
    /// Rows with null cells were dropped
    NullsDropped { null_cells: usize, rows: usize },
    /// Values outside the expected range were kept
    OutOfRange { column: String, lower: f64, upper: f64, count: usize },
}

/// What validation saw and repaired
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub rows_in: usize,
    pub rows_out: usize,
    pub null_cells: usize,
    pub dropped_rows: usize,
    pub warnings: Vec<ValidationWarning>,
}

/// A table that passed validation
#[derive(Debug, Clone)]
pub struct ValidatedTable {
    pub frame: DataFrame,
    pub report: ValidationReport,
}

/// Data validator
#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Read a CSV table and validate it
    pub fn validate_path(&self, path: &Path) -> Result<ValidatedTable> {
        info!(path = %path.display(), "Starting data validation");

        if !path.exists() {
            return Err(MlopsError::DataError(format!(
                "data file {} not found",
                path.display()
            )));
        }

        let frame = load_csv(path)?;
        self.validate_frame(frame)
    }

    /// Validate an in-memory table
    pub fn validate_frame(&self, frame: DataFrame) -> Result<ValidatedTable> {
        for column in &self.config.required_columns {
            if frame.get_column_index(column).is_none() {
                return Err(MlopsError::MissingColumn(column.clone()));
            }
        }

        let rows_in = frame.height();
        let null_cells: usize = frame.get_columns().iter().map(|c| c.null_count()).sum();
        let mut warnings = Vec::new();

        let frame = if null_cells > 0 {
            let cleaned = frame.drop_nulls::<String>(None)?;
            let dropped = rows_in - cleaned.height();
            warn!(null_cells, dropped_rows = dropped, "Data contains null values, dropping affected rows");
            warnings.push(ValidationWarning::NullsDropped { null_cells, rows: dropped });
            cleaned
        } else {
            frame
        };

        for (column, lower, upper) in &self.config.range_checks {
            let count = count_out_of_range(&frame, column, *lower, *upper)?;
            if count > 0 {
                warn!(column = %column, lower, upper, count, "Values outside expected range");
                warnings.push(ValidationWarning::OutOfRange {
                    column: column.clone(),
                    lower: *lower,
                    upper: *upper,
                    count,
                });
            }
        }

        let rows_out = frame.height();
        if rows_out < self.config.min_rows {
            return Err(MlopsError::DatasetTooSmall {
                rows: rows_out,
                min: self.config.min_rows,
            });
        }

        info!(rows_in, rows_out, "Data validation passed");

        Ok(ValidatedTable {
            frame,
            report: ValidationReport {
                rows_in,
                rows_out,
                null_cells,
                dropped_rows: rows_in - rows_out,
                warnings,
            },
        })
    }
}

/// Load a headered CSV file
pub fn load_csv(path: &Path) -> Result<DataFrame> {
    let frame = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(1000))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(frame)
}

/// Numeric view of a column; nulls become NaN
pub fn column_f64(frame: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let column = frame
        .column(name)
        .map_err(|_| MlopsError::MissingColumn(name.to_string()))?;
    let series = column.as_materialized_series().cast(&DataType::Float64)?;
    let values = series.f64()?.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
    Ok(values)
}

fn count_out_of_range(frame: &DataFrame, column: &str, lower: f64, upper: f64) -> Result<usize> {
    if frame.get_column_index(column).is_none() {
        return Ok(0);
    }
    let values = column_f64(frame, column)?;
    Ok(values
        .iter()
        .filter(|v| !v.is_nan() && (**v < lower || **v > upper))
        .count())
}
