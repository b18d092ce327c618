//! Random forest regressor (bootstrap rows, random feature subsets per split)

use super::tree::{RegressionTree, TreeParams};
use super::Regressor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 12,
            min_samples_leaf: 2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &ForestParams) -> Self {
        let n = y.len();
        let n_features = x.first().map(|r| r.len()).unwrap_or(0);
        let mut rng = StdRng::seed_from_u64(params.seed);

        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_leaf: params.min_samples_leaf,
            max_features: Some((n_features / 3).max(1)),
        };

        let mut trees = Vec::with_capacity(params.n_trees);
        if n > 0 {
            for _ in 0..params.n_trees {
                let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                trees.push(RegressionTree::fit(x, y, &rows, &tree_params, &mut rng));
            }
        }

        debug!(trees = trees.len(), "Random forest fitted");
        Self { trees }
    }
}

impl Regressor for RandomForest {
    fn predict_row(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict(row)).sum::<f64>() / self.trees.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forest_tracks_step_signal() {
        let x: Vec<Vec<f64>> = (0..60).map(|i| vec![i as f64, (i % 5) as f64, 1.0]).collect();
        let y: Vec<f64> = (0..60).map(|i| if i < 30 { 100.0 } else { 300.0 }).collect();
        let model = RandomForest::fit(&x, &y, &ForestParams::default());

        assert!(model.predict_row(&[5.0, 0.0, 1.0]) < 150.0);
        assert!(model.predict_row(&[55.0, 0.0, 1.0]) > 250.0);
    }

    #[test]
    fn test_empty_training_set_predicts_zero() {
        let model = RandomForest::fit(&[], &[], &ForestParams::default());
        assert_eq!(model.predict_row(&[1.0]), 0.0);
    }
}
