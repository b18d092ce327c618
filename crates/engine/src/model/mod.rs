//! Tree-ensemble regressors used to forecast daily sales

pub mod forest;
pub mod gbm;
pub mod tree;

pub use forest::{ForestParams, RandomForest};
pub use gbm::{GbmParams, GradientBoosting};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Anything that maps a dense feature row to a prediction
pub trait Regressor {
    fn predict_row(&self, row: &[f64]) -> f64;

    fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|r| self.predict_row(r)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    GradientBoosting,
    RandomForest,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::GradientBoosting => f.pad("gradient_boosting"),
            ModelKind::RandomForest => f.pad("random_forest"),
        }
    }
}

/// Persistable champion model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SalesModel {
    GradientBoosting(GradientBoosting),
    RandomForest(RandomForest),
}

impl SalesModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            SalesModel::GradientBoosting(_) => ModelKind::GradientBoosting,
            SalesModel::RandomForest(_) => ModelKind::RandomForest,
        }
    }
}

impl Regressor for SalesModel {
    fn predict_row(&self, row: &[f64]) -> f64 {
        match self {
            SalesModel::GradientBoosting(m) => m.predict_row(row),
            SalesModel::RandomForest(m) => m.predict_row(row),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_json_carries_kind_tag() {
        let x = vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0]];
        let y = vec![1.0, 1.0, 3.0, 3.0];
        let model = SalesModel::RandomForest(RandomForest::fit(
            &x,
            &y,
            &ForestParams {
                n_trees: 3,
                ..Default::default()
            },
        ));

        let json = serde_json::to_string(&model).unwrap();
        assert!(json.contains(r#""kind":"random_forest""#));

        let back: SalesModel = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), ModelKind::RandomForest);
        for (a, b) in back.predict(&x).iter().zip(model.predict(&x)) {
            assert!((a - b).abs() < 1e-9);
        }
    }
}
