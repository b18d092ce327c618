//! CART regression tree (variance reduction splits)

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; `None` means all
    pub max_features: Option<usize>,
}

/// Flattened binary tree; node 0 is the root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl RegressionTree {
    /// Fit on the given row indices of `x` (indices may repeat for bootstrap samples)
    pub fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        rows: &[usize],
        params: &TreeParams,
        rng: &mut StdRng,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        let n_features = x.first().map(|r| r.len()).unwrap_or(0);
        let mut rows = rows.to_vec();
        tree.build(x, y, &mut rows, 0, n_features, params, rng);
        tree
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &mut self,
        x: &[Vec<f64>],
        y: &[f64],
        rows: &mut [usize],
        depth: usize,
        n_features: usize,
        params: &TreeParams,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        let mean = if rows.is_empty() {
            0.0
        } else {
            rows.iter().map(|&i| y[i]).sum::<f64>() / rows.len() as f64
        };
        self.nodes.push(Node::Leaf { value: mean });

        if depth >= params.max_depth || rows.len() < 2 * params.min_samples_leaf.max(1) {
            return id;
        }

        let Some(split) = best_split(x, y, rows, n_features, params, rng) else {
            return id;
        };

        // Partition in place: rows going left first
        let mut boundary = 0;
        for i in 0..rows.len() {
            if x[rows[i]][split.feature] <= split.threshold {
                rows.swap(i, boundary);
                boundary += 1;
            }
        }
        let (left_rows, right_rows) = rows.split_at_mut(boundary);

        let left = self.build(x, y, left_rows, depth + 1, n_features, params, rng);
        let right = self.build(x, y, right_rows, depth + 1, n_features, params, rng);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }
}

fn best_split(
    x: &[Vec<f64>],
    y: &[f64],
    rows: &[usize],
    n_features: usize,
    params: &TreeParams,
    rng: &mut StdRng,
) -> Option<SplitCandidate> {
    let mut features: Vec<usize> = (0..n_features).collect();
    let wanted = match params.max_features {
        Some(k) => {
            features.shuffle(rng);
            k.clamp(1, n_features.max(1))
        }
        None => n_features,
    };

    let n = rows.len();
    let total_sum: f64 = rows.iter().map(|&i| y[i]).sum();
    let min_leaf = params.min_samples_leaf.max(1);
    let mut best: Option<SplitCandidate> = None;
    let mut order: Vec<usize> = rows.to_vec();

    for (visited, &f) in features.iter().enumerate() {
        // Keep drawing features past the quota until some split is valid
        if visited >= wanted && best.is_some() {
            break;
        }
        order.sort_by(|&a, &b| x[a][f].total_cmp(&x[b][f]));

        let mut left_sum = 0.0;
        for pos in 0..n - 1 {
            left_sum += y[order[pos]];
            let left_n = pos + 1;
            let right_n = n - left_n;
            if left_n < min_leaf || right_n < min_leaf {
                continue;
            }
            let here = x[order[pos]][f];
            let next = x[order[pos + 1]][f];
            if here >= next {
                continue;
            }

            // SSE reduction up to a constant: sum_l^2/n_l + sum_r^2/n_r - total^2/n
            let right_sum = total_sum - left_sum;
            let gain = left_sum * left_sum / left_n as f64 + right_sum * right_sum / right_n as f64
                - total_sum * total_sum / n as f64;

            if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(SplitCandidate {
                    feature: f,
                    threshold: here + (next - here) / 2.0,
                    gain,
                });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn params(depth: usize) -> TreeParams {
        TreeParams {
            max_depth: depth,
            min_samples_leaf: 1,
            max_features: None,
        }
    }

    #[test]
    fn test_step_function_is_learned() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, 0.0]).collect();
        let y: Vec<f64> = (0..20).map(|i| if i < 10 { 5.0 } else { 15.0 }).collect();
        let rows: Vec<usize> = (0..20).collect();
        let mut rng = StdRng::seed_from_u64(1);

        let tree = RegressionTree::fit(&x, &y, &rows, &params(3), &mut rng);
        assert_eq!(tree.predict(&[3.0, 0.0]), 5.0);
        assert_eq!(tree.predict(&[17.0, 0.0]), 15.0);
        // Constant feature never chosen: a single split suffices
        assert_eq!(tree.node_count(), 3);
    }

    #[test]
    fn test_constant_target_is_single_leaf() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let y = vec![7.0; 10];
        let rows: Vec<usize> = (0..10).collect();
        let mut rng = StdRng::seed_from_u64(1);

        let tree = RegressionTree::fit(&x, &y, &rows, &params(5), &mut rng);
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.predict(&[100.0]), 7.0);
    }

    #[test]
    fn test_min_samples_leaf_limits_growth() {
        let x: Vec<Vec<f64>> = (0..6).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..6).map(|i| i as f64).collect();
        let rows: Vec<usize> = (0..6).collect();
        let mut rng = StdRng::seed_from_u64(1);

        let p = TreeParams {
            max_depth: 10,
            min_samples_leaf: 3,
            max_features: None,
        };
        let tree = RegressionTree::fit(&x, &y, &rows, &p, &mut rng);
        assert_eq!(tree.node_count(), 3);
        assert_eq!(tree.predict(&[0.0]), 1.0);
        assert_eq!(tree.predict(&[5.0]), 4.0);
    }
}
