//! Per-feature drift report between the training and held-out splits

use std::fs;
use std::path::{Path, PathBuf};

use crate::drift::data_drift::{KolmogorovSmirnovTest, PopulationStabilityIndex};
use crate::drift::DriftDetector;
use crate::error::{MlopsError, Result};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::info;

/// JSON report file name
pub const JSON_REPORT: &str = "drift_report.json";
/// HTML report file name
pub const HTML_REPORT: &str = "bike_drift_report.html";

/// Summary statistics of one feature column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl FeatureStats {
    pub fn from_data(data: ArrayView1<f64>) -> Self {
        let n = data.len().max(1) as f64;
        let mean = data.sum() / n;
        let variance = data.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / n;

        Self {
            mean,
            std: variance.sqrt(),
            min: data.iter().copied().fold(f64::INFINITY, f64::min),
            max: data.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Drift verdict for a single feature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureDriftResult {
    pub feature_name: String,
    pub ks_statistic: f64,
    pub ks_threshold: f64,
    pub psi: f64,
    /// Set only when both statistics flag the feature
    pub drift_detected: bool,
    pub reference: FeatureStats,
    pub current: FeatureStats,
}

/// Drift report over all features
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub features: Vec<FeatureDriftResult>,
    pub n_drifted: usize,
    pub share_drifted: f64,
    /// More than half of the features drifted
    pub dataset_drift: bool,
    pub timestamp: String,
    pub reference_size: usize,
    pub current_size: usize,
}

impl DriftReport {
    pub fn drifted_features(&self) -> Vec<&str> {
        self.features
            .iter()
            .filter(|f| f.drift_detected)
            .map(|f| f.feature_name.as_str())
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Self-contained HTML page with the summary and a per-feature table
    pub fn to_html(&self) -> String {
        let mut rows = String::new();
        for f in &self.features {
            rows.push_str(&format!(
                "<tr class=\"{}\"><td>{}</td><td>{:.4}</td><td>{:.4}</td><td>{:.4}</td><td>{:.4}</td><td>{:.4}</td><td>{}</td></tr>\n",
                if f.drift_detected { "drift" } else { "ok" },
                escape_html(&f.feature_name),
                f.reference.mean,
                f.current.mean,
                f.ks_statistic,
                f.ks_threshold,
                f.psi,
                if f.drift_detected { "Drift" } else { "-" },
            ));
        }

        format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Data Drift Report</title>
<style>
body {{ font-family: sans-serif; margin: 2em; }}
table {{ border-collapse: collapse; }}
td, th {{ border: 1px solid #ccc; padding: 4px 8px; text-align: right; }}
td:first-child {{ text-align: left; }}
tr.drift {{ background: #fde2e2; }}
</style>
</head>
<body>
<h1>Data Drift Report</h1>
<p>Generated {timestamp}</p>
<ul>
<li>Reference rows: {reference}</li>
<li>Current rows: {current}</li>
<li>Drifted features: {n_drifted} of {n_features} ({share:.1}%)</li>
<li>Dataset drift: {dataset_drift}</li>
</ul>
<table>
<tr><th>Feature</th><th>Reference mean</th><th>Current mean</th><th>KS</th><th>KS critical</th><th>PSI</th><th>Status</th></tr>
{rows}</table>
</body>
</html>
"#,
            timestamp = escape_html(&self.timestamp),
            reference = self.reference_size,
            current = self.current_size,
            n_drifted = self.n_drifted,
            n_features = self.features.len(),
            share = self.share_drifted * 100.0,
            dataset_drift = self.dataset_drift,
            rows = rows,
        )
    }

    /// Write both report files into `dir`, returning (json, html) paths
    pub fn write_to(&self, dir: &Path) -> Result<(PathBuf, PathBuf)> {
        fs::create_dir_all(dir)?;
        let json_path = dir.join(JSON_REPORT);
        let html_path = dir.join(HTML_REPORT);
        fs::write(&json_path, self.to_json()?)?;
        fs::write(&html_path, self.to_html())?;
        Ok((json_path, html_path))
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Compares reference and current feature matrices column by column
#[derive(Debug, Clone, Default)]
pub struct DriftReporter {
    ks: KolmogorovSmirnovTest,
    psi: PopulationStabilityIndex,
}

impl DriftReporter {
    pub fn new(ks: KolmogorovSmirnovTest, psi: PopulationStabilityIndex) -> Self {
        Self { ks, psi }
    }

    pub fn report(
        &self,
        feature_names: &[String],
        reference: &Array2<f64>,
        current: &Array2<f64>,
    ) -> Result<DriftReport> {
        if reference.ncols() != feature_names.len() || current.ncols() != feature_names.len() {
            return Err(MlopsError::ShapeError {
                expected: format!("{} features", feature_names.len()),
                actual: format!("reference {} / current {}", reference.ncols(), current.ncols()),
            });
        }

        let mut features = Vec::with_capacity(feature_names.len());
        for (idx, name) in feature_names.iter().enumerate() {
            let ref_col = reference.column(idx);
            let cur_col = current.column(idx);

            let ks = self.ks.detect(ref_col, cur_col)?;
            let psi = self.psi.detect(ref_col, cur_col)?;

            features.push(FeatureDriftResult {
                feature_name: name.clone(),
                ks_statistic: ks.score,
                ks_threshold: ks.threshold,
                psi: psi.score,
                drift_detected: ks.drift_detected && psi.drift_detected,
                reference: FeatureStats::from_data(ref_col),
                current: FeatureStats::from_data(cur_col),
            });
        }

        let n_drifted = features.iter().filter(|f| f.drift_detected).count();
        let share_drifted = if features.is_empty() {
            0.0
        } else {
            n_drifted as f64 / features.len() as f64
        };

        info!(
            n_features = features.len(),
            n_drifted,
            share_drifted,
            "Drift report computed"
        );

        Ok(DriftReport {
            features,
            n_drifted,
            share_drifted,
            dataset_drift: share_drifted > 0.5,
            timestamp: chrono::Utc::now().to_rfc3339(),
            reference_size: reference.nrows(),
            current_size: current.nrows(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(n: usize, shift_second: f64) -> Array2<f64> {
        Array2::from_shape_fn((n, 2), |(i, j)| {
            let base = i as f64 / n as f64;
            if j == 1 { base + shift_second } else { base }
        })
    }

    fn names() -> Vec<String> {
        vec!["temp".to_string(), "hum".to_string()]
    }

    #[test]
    fn test_one_of_two_features_drifts() {
        let report = DriftReporter::default()
            .report(&names(), &matrix(300, 0.0), &matrix(200, 0.7))
            .unwrap();

        assert_eq!(report.drifted_features(), vec!["hum"]);
        assert_eq!(report.n_drifted, 1);
        assert_eq!(report.share_drifted, 0.5);
        // exactly half is not dataset drift
        assert!(!report.dataset_drift);
    }

    #[test]
    fn test_shape_mismatch() {
        let err = DriftReporter::default()
            .report(&names()[..1], &matrix(10, 0.0), &matrix(10, 0.0))
            .unwrap_err();
        assert!(matches!(err, MlopsError::ShapeError { .. }));
    }

    #[test]
    fn test_write_report_files() {
        let dir = tempfile::tempdir().unwrap();
        let report = DriftReporter::default()
            .report(&names(), &matrix(50, 0.0), &matrix(50, 0.0))
            .unwrap();

        let (json, html) = report.write_to(dir.path()).unwrap();
        assert!(json.ends_with(JSON_REPORT));
        let parsed: DriftReport = serde_json::from_str(&fs::read_to_string(json).unwrap()).unwrap();
        assert_eq!(parsed.features.len(), 2);

        let page = fs::read_to_string(html).unwrap();
        assert!(page.contains("<td>temp</td>"));
        assert!(page.contains("Dataset drift: false"));
    }
}
