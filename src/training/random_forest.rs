//! Random forest classifier

use crate::error::{MlopsError, Result};
use super::decision_tree::{argmax, DecisionTree};
use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Bagged ensemble of classification trees with soft voting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered at each split
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    /// Base seed; tree `i` draws from `seed + i`
    pub random_state: u64,
    /// Sorted distinct labels seen during fit
    classes: Vec<f64>,
    n_features: usize,
    feature_importances: Option<Array1<f64>>,
}

/// Strategy for max features
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum MaxFeatures {
    Sqrt,
    Log2,
    Fraction(f64),
    Fixed(usize),
    All,
}

impl MaxFeatures {
    fn resolve(self, n_features: usize) -> usize {
        let n = match self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt().ceil() as usize,
            MaxFeatures::Log2 => (n_features as f64).log2().ceil() as usize,
            MaxFeatures::Fraction(f) => (n_features as f64 * f).ceil() as usize,
            MaxFeatures::Fixed(n) => n,
            MaxFeatures::All => n_features,
        };
        n.clamp(1, n_features.max(1))
    }
}

impl Default for RandomForest {
    fn default() -> Self {
        Self::new(100)
    }
}

impl RandomForest {
    pub fn new(n_estimators: usize) -> Self {
        Self {
            trees: Vec::new(),
            n_estimators,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            random_state: 42,
            classes: Vec::new(),
            n_features: 0,
            feature_importances: None,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples.max(1);
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: bool) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Fit the forest. Labels may be any finite values; they are treated as classes.
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        let n_samples = x.nrows();

        if n_samples != y.len() {
            return Err(MlopsError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n_samples == 0 {
            return Err(MlopsError::TrainingError("no training samples".to_string()));
        }
        if self.n_estimators == 0 {
            return Err(MlopsError::TrainingError("n_estimators must be positive".to_string()));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(MlopsError::TrainingError("labels must be finite".to_string()));
        }

        self.n_features = x.ncols();
        self.classes = distinct_sorted(y);
        let n_classes = self.classes.len();
        let y_idx: Vec<usize> = y.iter().map(|&v| self.class_index(v)).collect();
        let max_features = self.max_features.resolve(self.n_features);

        let trees: Vec<DecisionTree> = (0..self.n_estimators)
            .into_par_iter()
            .map(|i| -> Result<DecisionTree> {
                let mut rng = ChaCha8Rng::seed_from_u64(self.random_state.wrapping_add(i as u64));

                let (x_fit, y_fit) = if self.bootstrap {
                    let rows: Vec<usize> = (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect();
                    let y_boot: Vec<usize> = rows.iter().map(|&r| y_idx[r]).collect();
                    (x.select(Axis(0), &rows), y_boot)
                } else {
                    (x.clone(), y_idx.clone())
                };

                let mut tree = DecisionTree::new()
                    .with_min_samples_split(self.min_samples_split)
                    .with_min_samples_leaf(self.min_samples_leaf)
                    .with_max_features(max_features);
                if let Some(depth) = self.max_depth {
                    tree = tree.with_max_depth(depth);
                }

                tree.fit(&x_fit, &y_fit, n_classes, &mut rng)?;
                Ok(tree)
            })
            .collect::<Result<_>>()?;

        self.trees = trees;
        self.compute_feature_importances();

        Ok(self)
    }

    fn class_index(&self, value: f64) -> usize {
        self.classes
            .iter()
            .position(|&c| c == value)
            .unwrap_or(0)
    }

    fn compute_feature_importances(&mut self) {
        let mut importances: Array1<f64> = Array1::zeros(self.n_features);
        for imp in self.trees.iter().filter_map(|t| t.feature_importances()) {
            importances = importances + imp;
        }

        let total = importances.sum();
        if total > 0.0 {
            importances /= total;
        }
        self.feature_importances = Some(importances);
    }

    /// Mean class distribution over trees, one column per entry of [`classes`](Self::classes)
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.trees.is_empty() {
            return Err(MlopsError::ModelNotFitted);
        }

        let per_tree: Vec<Array2<f64>> = self
            .trees
            .par_iter()
            .map(|tree| tree.predict_proba(x))
            .collect::<Result<_>>()?;

        let mut sum: Array2<f64> = Array2::zeros((x.nrows(), self.classes.len()));
        for proba in per_tree {
            sum = sum + proba;
        }
        Ok(sum / self.trees.len() as f64)
    }

    /// Predicted label per row
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let proba = self.predict_proba(x)?;
        Ok(proba
            .rows()
            .into_iter()
            .map(|row| self.classes[argmax(row.iter().copied())])
            .collect())
    }

    /// Probability of `label` per row; zero when the label was never seen in training
    pub fn predict_proba_of(&self, x: &Array2<f64>, label: f64) -> Result<Array1<f64>> {
        let proba = self.predict_proba(x)?;
        match self.classes.iter().position(|&c| c == label) {
            Some(j) => Ok(proba.column(j).to_owned()),
            None => Ok(Array1::zeros(x.nrows())),
        }
    }

    pub fn classes(&self) -> &[f64] {
        &self.classes
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }
}

fn distinct_sorted(y: &Array1<f64>) -> Vec<f64> {
    let mut classes: Vec<f64> = y.to_vec();
    classes.sort_by(|a, b| a.total_cmp(b));
    classes.dedup();
    classes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs(n: usize) -> (Array2<f64>, Array1<f64>) {
        let mut x = Array2::zeros((n, 3));
        let mut y = Array1::zeros(n);
        for i in 0..n {
            let positive = i % 2 == 1;
            let offset = if positive { 5.0 } else { 0.0 };
            x[[i, 0]] = offset + (i % 7) as f64 * 0.1;
            x[[i, 1]] = (i % 5) as f64;
            x[[i, 2]] = offset + (i % 3) as f64 * 0.2;
            y[i] = if positive { 1.0 } else { 0.0 };
        }
        (x, y)
    }

    #[test]
    fn test_fit_predict() {
        let (x, y) = two_blobs(60);
        let mut rf = RandomForest::new(15).with_max_depth(4);
        rf.fit(&x, &y).unwrap();

        assert_eq!(rf.n_trees(), 15);
        assert_eq!(rf.classes(), &[0.0, 1.0]);
        let predictions = rf.predict(&x).unwrap();
        assert_eq!(predictions, y);
    }

    #[test]
    fn test_same_seed_same_model() {
        let (x, y) = two_blobs(40);
        let mut a = RandomForest::new(8).with_random_state(3);
        let mut b = RandomForest::new(8).with_random_state(3);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();

        assert_eq!(a.predict_proba(&x).unwrap(), b.predict_proba(&x).unwrap());
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let (x, y) = two_blobs(30);
        let mut rf = RandomForest::new(5);
        rf.fit(&x, &y).unwrap();

        let proba = rf.predict_proba(&x).unwrap();
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        let positive = rf.predict_proba_of(&x, 1.0).unwrap();
        assert_eq!(positive, proba.column(1).to_owned());
        assert!(rf.predict_proba_of(&x, 7.0).unwrap().iter().all(|&p| p == 0.0));
    }

    #[test]
    fn test_single_class() {
        let x = Array2::from_shape_vec((4, 1), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let y = Array1::from_vec(vec![1.0; 4]);
        let mut rf = RandomForest::new(3);
        rf.fit(&x, &y).unwrap();

        assert_eq!(rf.predict(&x).unwrap().to_vec(), vec![1.0; 4]);
        assert_eq!(rf.predict_proba_of(&x, 0.0).unwrap().to_vec(), vec![0.0; 4]);
    }

    #[test]
    fn test_not_fitted() {
        let rf = RandomForest::new(3);
        assert!(matches!(
            rf.predict(&Array2::zeros((1, 2))),
            Err(MlopsError::ModelNotFitted)
        ));
    }

    #[test]
    fn test_feature_importances_normalised() {
        let (x, y) = two_blobs(50);
        let mut rf = RandomForest::new(10).with_max_features(MaxFeatures::All);
        rf.fit(&x, &y).unwrap();

        let importances = rf.feature_importances().unwrap();
        assert!((importances.sum() - 1.0).abs() < 1e-9);
        assert!(importances[1] < importances[0].max(importances[2]));
    }
}
