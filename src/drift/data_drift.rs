//! Distribution comparison statistics

use crate::drift::{DriftDetector, DriftResult};
use crate::error::{MlopsError, Result};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

fn sorted_finite(data: ArrayView1<f64>) -> Vec<f64> {
    let mut values: Vec<f64> = data.iter().copied().filter(|v| v.is_finite()).collect();
    values.sort_by(|a, b| a.total_cmp(b));
    values
}

fn non_empty(reference: &[f64], current: &[f64]) -> Result<()> {
    if reference.is_empty() || current.is_empty() {
        return Err(MlopsError::DataError(
            "drift detection needs non-empty samples".to_string(),
        ));
    }
    Ok(())
}

/// Two-sample Kolmogorov-Smirnov test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KolmogorovSmirnovTest {
    alpha: f64,
}

impl KolmogorovSmirnovTest {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.001, 0.5),
        }
    }

    /// Asymptotic critical value of the two-sample statistic
    fn critical_value(&self, n1: usize, n2: usize) -> f64 {
        let c_alpha = match self.alpha {
            a if a <= 0.01 => 1.63,
            a if a <= 0.05 => 1.36,
            a if a <= 0.10 => 1.22,
            _ => 1.07,
        };

        c_alpha * ((n1 + n2) as f64 / (n1 * n2) as f64).sqrt()
    }

    /// Largest gap between the two empirical CDFs, merged walk over sorted samples
    pub fn statistic(reference: &[f64], current: &[f64]) -> f64 {
        let (n1, n2) = (reference.len() as f64, current.len() as f64);
        let (mut i, mut j) = (0, 0);
        let mut d: f64 = 0.0;

        while i < reference.len() && j < current.len() {
            let x = reference[i].min(current[j]);
            while i < reference.len() && reference[i] <= x {
                i += 1;
            }
            while j < current.len() && current[j] <= x {
                j += 1;
            }
            d = d.max((i as f64 / n1 - j as f64 / n2).abs());
        }

        d
    }
}

impl Default for KolmogorovSmirnovTest {
    fn default() -> Self {
        Self::new(0.05)
    }
}

impl DriftDetector for KolmogorovSmirnovTest {
    fn detect(&self, reference: ArrayView1<f64>, current: ArrayView1<f64>) -> Result<DriftResult> {
        let reference = sorted_finite(reference);
        let current = sorted_finite(current);
        non_empty(&reference, &current)?;

        let ks = Self::statistic(&reference, &current);
        let threshold = self.critical_value(reference.len(), current.len());

        if ks > threshold {
            Ok(DriftResult::drift(
                ks,
                threshold,
                format!("KS statistic ({:.4}) exceeds critical value ({:.4})", ks, threshold),
            ))
        } else {
            Ok(DriftResult::no_drift(ks, threshold))
        }
    }

    fn name(&self) -> &'static str {
        "ks"
    }
}

/// Population Stability Index over reference quantile bins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationStabilityIndex {
    n_bins: usize,
    threshold: f64,
}

impl PopulationStabilityIndex {
    pub fn new(n_bins: usize) -> Self {
        Self {
            n_bins: n_bins.max(2),
            threshold: 0.1,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.max(0.0);
        self
    }

    /// Inner bin edges at reference quantiles, deduplicated so that
    /// low-cardinality features (one-hot indicators) get one bin per level
    fn bin_edges(&self, sorted_reference: &[f64]) -> Vec<f64> {
        let n = sorted_reference.len();
        let mut edges: Vec<f64> = (1..self.n_bins)
            .map(|i| sorted_reference[(i * n / self.n_bins).min(n - 1)])
            .collect();
        edges.dedup();
        edges
    }

    fn proportions(sorted: &[f64], edges: &[f64]) -> Vec<f64> {
        let mut counts = vec![0usize; edges.len() + 1];
        for &v in sorted {
            let bin = edges.partition_point(|&e| e < v);
            counts[bin] += 1;
        }
        let n = sorted.len() as f64;
        counts.iter().map(|&c| (c as f64 / n).max(1e-4)).collect()
    }

    pub fn statistic(&self, sorted_reference: &[f64], sorted_current: &[f64]) -> f64 {
        let edges = self.bin_edges(sorted_reference);
        let p_ref = Self::proportions(sorted_reference, &edges);
        let p_cur = Self::proportions(sorted_current, &edges);

        p_ref
            .iter()
            .zip(&p_cur)
            .map(|(&r, &c)| (c - r) * (c / r).ln())
            .sum()
    }
}

impl Default for PopulationStabilityIndex {
    fn default() -> Self {
        Self::new(10)
    }
}

impl DriftDetector for PopulationStabilityIndex {
    fn detect(&self, reference: ArrayView1<f64>, current: ArrayView1<f64>) -> Result<DriftResult> {
        let reference = sorted_finite(reference);
        let current = sorted_finite(current);
        non_empty(&reference, &current)?;

        let psi = self.statistic(&reference, &current);

        if psi > self.threshold {
            Ok(DriftResult::drift(
                psi,
                self.threshold,
                format!("PSI ({:.4}) exceeds threshold ({:.4})", psi, self.threshold),
            ))
        } else {
            Ok(DriftResult::no_drift(psi, self.threshold))
        }
    }

    fn name(&self) -> &'static str {
        "psi"
    }
}
