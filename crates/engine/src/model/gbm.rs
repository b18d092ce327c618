//! Gradient-boosted regression trees (squared loss, stochastic row subsampling)

use super::tree::{RegressionTree, TreeParams};
use super::Regressor;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GbmParams {
    pub n_trees: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Fraction of rows sampled (without replacement) per tree
    pub subsample: f64,
    pub seed: u64,
}

impl Default for GbmParams {
    fn default() -> Self {
        Self {
            n_trees: 200,
            learning_rate: 0.05,
            max_depth: 4,
            min_samples_leaf: 5,
            subsample: 0.8,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoosting {
    init: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoosting {
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &GbmParams) -> Self {
        let n = y.len();
        let init = if n == 0 { 0.0 } else { y.iter().sum::<f64>() / n as f64 };
        let mut predictions = vec![init; n];
        let mut trees = Vec::with_capacity(params.n_trees);
        let mut rng = StdRng::seed_from_u64(params.seed);

        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_leaf: params.min_samples_leaf,
            max_features: None,
        };
        let sample_size = ((n as f64 * params.subsample).round() as usize).clamp(1.min(n), n);

        for _ in 0..params.n_trees {
            if n == 0 {
                break;
            }
            let residuals: Vec<f64> = y.iter().zip(&predictions).map(|(t, p)| t - p).collect();
            let rows: Vec<usize> = if sample_size < n {
                sample(&mut rng, n, sample_size).into_vec()
            } else {
                (0..n).collect()
            };

            let tree = RegressionTree::fit(x, &residuals, &rows, &tree_params, &mut rng);
            for (i, row) in x.iter().enumerate() {
                predictions[i] += params.learning_rate * tree.predict(row);
            }
            trees.push(tree);
        }

        debug!(trees = trees.len(), init, "Gradient boosting fitted");
        Self {
            init,
            learning_rate: params.learning_rate,
            trees,
        }
    }
}

impl Regressor for GradientBoosting {
    fn predict_row(&self, row: &[f64]) -> f64 {
        self.init
            + self.learning_rate * self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits_linear_signal_better_than_mean() {
        let x: Vec<Vec<f64>> = (0..100).map(|i| vec![i as f64, (i % 7) as f64]).collect();
        let y: Vec<f64> = (0..100).map(|i| 1000.0 + 10.0 * i as f64).collect();
        let model = GradientBoosting::fit(&x, &y, &GbmParams::default());

        let mean = y.iter().sum::<f64>() / y.len() as f64;
        let mae_model: f64 = x.iter().zip(&y).map(|(r, t)| (model.predict_row(r) - t).abs()).sum::<f64>() / 100.0;
        let mae_mean: f64 = y.iter().map(|t| (mean - t).abs()).sum::<f64>() / 100.0;
        assert!(mae_model < mae_mean / 5.0, "mae {mae_model} vs baseline {mae_mean}");
    }

    #[test]
    fn test_same_seed_same_model() {
        let x: Vec<Vec<f64>> = (0..50).map(|i| vec![(i * 37 % 11) as f64, i as f64]).collect();
        let y: Vec<f64> = (0..50).map(|i| (i * 13 % 17) as f64).collect();
        let a = GradientBoosting::fit(&x, &y, &GbmParams::default());
        let b = GradientBoosting::fit(&x, &y, &GbmParams::default());
        for row in &x {
            assert_eq!(a.predict_row(row), b.predict_row(row));
        }
    }
}
