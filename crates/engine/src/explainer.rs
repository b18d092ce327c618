//! Factor explainer: sampled Shapley attributions for a single prediction,
//! grouped into categories, plus critical-day detection.

use crate::artifact::ModelArtifact;
use crate::model::Regressor;
use crate::types::DailyRecord;
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Days at or below this share of the period median are critical (≥30% drop)
pub const CRITICAL_RATIO: f64 = 0.7;
pub const MAX_CRITICAL_DAYS: usize = 5;
pub const TOP_FACTORS: usize = 5;

#[derive(Error, Debug, PartialEq)]
pub enum ExplainError {
    #[error("feature order mismatch: model expects {expected:?}, request supplies {actual:?}")]
    FeatureMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("feature '{0}' cannot be derived from the daily record")]
    UnderivableFeature(String),

    #[error("artifact has an empty background sample")]
    EmptyBackground,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorCategory {
    Operations,
    Marketing,
    External,
    Quality,
    Other,
}

impl FactorCategory {
    pub const ALL: [FactorCategory; 5] = [
        FactorCategory::Operations,
        FactorCategory::Marketing,
        FactorCategory::External,
        FactorCategory::Quality,
        FactorCategory::Other,
    ];

    /// Static feature → category table. Lag and rolling columns take the
    /// category of the series they are derived from.
    pub fn of(feature: &str) -> Self {
        let series = feature
            .split_once("_lag_")
            .or_else(|| feature.split_once("_rolling_"))
            .map_or(feature, |(base, _)| base);
        match series {
            "preparation_time" | "delivery_time" | "accepting_time" | "offline_minutes"
            | "cancelled_orders" => FactorCategory::Operations,

            "grab_ads_spend" | "gojek_ads_spend" | "ads_spend_total" | "ads_sales_total"
            | "impressions" | "menu_visits" | "add_to_cart" | "ads_orders" | "new_customers"
            | "repeat_customers" | "reactivated_customers" => FactorCategory::Marketing,

            "temp" | "rain" | "wind" | "humidity" | "is_holiday" | "tourist_flow"
            | "day_of_week" | "is_weekend" => FactorCategory::External,

            "rating" | "rating_five" | "rating_four" | "rating_three" | "rating_two"
            | "rating_one" => FactorCategory::Quality,

            _ => FactorCategory::Other,
        }
    }

    pub fn label_ru(&self) -> &'static str {
        match self {
            FactorCategory::Operations => "Операции",
            FactorCategory::Marketing => "Маркетинг",
            FactorCategory::External => "Внешние факторы",
            FactorCategory::Quality => "Качество",
            FactorCategory::Other => "Прочее",
        }
    }
}

impl fmt::Display for FactorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FactorCategory::Operations => "operations",
            FactorCategory::Marketing => "marketing",
            FactorCategory::External => "external",
            FactorCategory::Quality => "quality",
            FactorCategory::Other => "other",
        };
        f.write_str(s)
    }
}

/// Sign of a contribution relative to the baseline prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn of(contribution: f64) -> Self {
        if contribution >= 0.0 {
            Direction::Up
        } else {
            Direction::Down
        }
    }

    pub fn arrow(&self) -> &'static str {
        match self {
            Direction::Up => "↑",
            Direction::Down => "↓",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorContribution {
    pub feature: String,
    pub category: FactorCategory,
    pub direction: Direction,
    /// Contribution in IDR (model output units)
    pub contribution_idr: f64,
    /// Share of the total absolute attribution, 0..=100
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryTotal {
    pub category: FactorCategory,
    pub percent: f64,
    pub contribution_idr: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowExplanation {
    pub prediction: f64,
    pub baseline: f64,
    /// Every explained feature, ranked by absolute contribution
    pub factors: Vec<FactorContribution>,
    /// Summed contribution of fitted features withheld from the factor list
    #[serde(default)]
    pub excluded_idr: f64,
}

impl RowExplanation {
    pub fn top(&self, n: usize) -> &[FactorContribution] {
        &self.factors[..n.min(self.factors.len())]
    }

    /// Category aggregates in fixed category order; empty categories omitted
    pub fn category_totals(&self) -> Vec<CategoryTotal> {
        FactorCategory::ALL
            .iter()
            .filter_map(|&category| {
                let members: Vec<&FactorContribution> =
                    self.factors.iter().filter(|f| f.category == category).collect();
                if members.is_empty() {
                    return None;
                }
                Some(CategoryTotal {
                    category,
                    percent: members.iter().map(|f| f.percent).sum(),
                    contribution_idr: members.iter().map(|f| f.contribution_idr).sum(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ExplainerConfig {
    /// Random permutations per background row
    pub permutations: usize,
    /// Background rows used (prefix of the stored sample)
    pub max_background: usize,
    pub seed: u64,
}

impl Default for ExplainerConfig {
    fn default() -> Self {
        Self {
            permutations: 2,
            max_background: 50,
            seed: 7,
        }
    }
}

pub struct Explainer {
    artifact: Arc<ModelArtifact>,
    config: ExplainerConfig,
    /// Indices of features listed as factors; the rest still take part in
    /// every permutation
    active: Vec<usize>,
}

impl Explainer {
    pub fn new(artifact: Arc<ModelArtifact>, config: ExplainerConfig) -> Result<Self, ExplainError> {
        if artifact.background.is_empty() {
            return Err(ExplainError::EmptyBackground);
        }
        let active = artifact
            .features
            .iter()
            .enumerate()
            .filter(|(_, f)| !artifact.explain_excluded.contains(f))
            .map(|(i, _)| i)
            .collect();
        Ok(Self {
            artifact,
            config,
            active,
        })
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    pub fn explain_record(&self, record: &DailyRecord) -> Result<RowExplanation, ExplainError> {
        let row = self.artifact.feature_row(record)?;
        let (prediction, baseline, phi) = self.shapley(&row);
        Ok(self.build(prediction, baseline, &phi))
    }

    /// Attribution of the mean prediction over several days: per-day Shapley
    /// values averaged, which keeps the efficiency property.
    pub fn explain_mean(&self, records: &[&DailyRecord]) -> Result<Option<RowExplanation>, ExplainError> {
        if records.is_empty() {
            return Ok(None);
        }
        let n = self.artifact.features.len();
        let mut phi_sum = vec![0.0; n];
        let mut prediction_sum = 0.0;
        let mut baseline_sum = 0.0;
        for record in records {
            let row = self.artifact.feature_row(record)?;
            let (prediction, b, phi) = self.shapley(&row);
            prediction_sum += prediction;
            baseline_sum += b;
            for (acc, v) in phi_sum.iter_mut().zip(phi) {
                *acc += v;
            }
        }
        let days = records.len() as f64;
        for v in phi_sum.iter_mut() {
            *v /= days;
        }
        Ok(Some(self.build(prediction_sum / days, baseline_sum / days, &phi_sum)))
    }

    /// Explain a dense row whose columns are named by `names`.
    /// The names must match the artifact's fit-time order exactly.
    pub fn explain_row(&self, names: &[String], values: &[f64]) -> Result<RowExplanation, ExplainError> {
        if names != self.artifact.features.as_slice() || values.len() != names.len() {
            return Err(ExplainError::FeatureMismatch {
                expected: self.artifact.features.clone(),
                actual: names.to_vec(),
            });
        }
        let (prediction, baseline, phi) = self.shapley(values);
        Ok(self.build(prediction, baseline, &phi))
    }

    /// Permutation-sampled Shapley values over every fitted feature. Each
    /// (background row, permutation) pass telescopes from f(z) to f(x), so the
    /// contributions sum exactly to prediction − E[f(background)].
    fn shapley(&self, x: &[f64]) -> (f64, f64, Vec<f64>) {
        let model = &self.artifact.model;
        let n = x.len();
        let mut phi = vec![0.0; n];
        let mut baseline = 0.0;
        let mut passes = 0usize;

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut order: Vec<usize> = (0..n).collect();

        for z in self.background() {
            let start_pred = model.predict_row(z);
            for _ in 0..self.config.permutations.max(1) {
                order.shuffle(&mut rng);
                let mut current = z.clone();
                let mut prev = start_pred;
                for &j in &order {
                    current[j] = x[j];
                    let next = model.predict_row(&current);
                    phi[j] += next - prev;
                    prev = next;
                }
                baseline += start_pred;
                passes += 1;
            }
        }

        let passes = passes.max(1) as f64;
        baseline /= passes;
        for v in phi.iter_mut() {
            *v /= passes;
        }
        (model.predict_row(x), baseline, phi)
    }

    /// Background rows in use: a prefix of the stored sample
    pub fn background(&self) -> &[Vec<f64>] {
        let bg = &self.artifact.background;
        &bg[..self.config.max_background.min(bg.len())]
    }

    fn build(&self, prediction: f64, baseline: f64, phi: &[f64]) -> RowExplanation {
        let excluded_idr: f64 = (0..phi.len())
            .filter(|j| !self.active.contains(j))
            .map(|j| phi[j])
            .sum();
        let total_abs: f64 = self.active.iter().map(|&j| phi[j].abs()).sum();
        let mut factors: Vec<FactorContribution> = self
            .active
            .iter()
            .map(|&j| {
                let name = &self.artifact.features[j];
                FactorContribution {
                    feature: name.clone(),
                    category: FactorCategory::of(name),
                    direction: Direction::of(phi[j]),
                    contribution_idr: phi[j],
                    percent: if total_abs > 0.0 {
                        phi[j].abs() / total_abs * 100.0
                    } else {
                        0.0
                    },
                }
            })
            .collect();
        factors.sort_by(|a, b| {
            b.contribution_idr
                .abs()
                .total_cmp(&a.contribution_idr.abs())
                .then_with(|| a.feature.cmp(&b.feature))
        });

        debug!(prediction, baseline, excluded_idr, features = factors.len(), "Row explained");
        RowExplanation {
            prediction,
            baseline,
            factors,
            excluded_idr,
        }
    }
}

/// A day whose sales fell at least 30% below the period median
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalDay {
    pub date: NaiveDate,
    pub sales: f64,
    pub median: f64,
    /// Negative percentage versus the median
    pub change_pct: f64,
}

pub fn median_sales(records: &[&DailyRecord]) -> f64 {
    let mut values: Vec<f64> = records.iter().map(|r| r.total_sales).collect();
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Critical days of one restaurant's period: the deepest drops first selected,
/// then returned chronologically.
pub fn critical_days(records: &[&DailyRecord]) -> Vec<CriticalDay> {
    let median = median_sales(records);
    if median <= 0.0 {
        return Vec::new();
    }
    let threshold = CRITICAL_RATIO * median;

    let mut days: Vec<CriticalDay> = records
        .iter()
        .filter(|r| r.total_sales <= threshold)
        .map(|r| CriticalDay {
            date: r.date,
            sales: r.total_sales,
            median,
            change_pct: (r.total_sales - median) / median * 100.0,
        })
        .collect();

    days.sort_by(|a, b| a.sales.total_cmp(&b.sales).then(a.date.cmp(&b.date)));
    days.truncate(MAX_CRITICAL_DAYS);
    days.sort_by_key(|d| d.date);
    days
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::TrainingMetrics;
    use crate::model::{GbmParams, GradientBoosting, ModelKind, SalesModel};
    use crate::trainer::tests::{fast_config, scratch_dir, synthetic_dataset};
    use crate::trainer::train;
    use crate::types::parse_date;
    use chrono::Utc;

    fn small_artifact(excluded: &[&str]) -> Arc<ModelArtifact> {
        // y = 100·a − 50·b + 10·c
        let x: Vec<Vec<f64>> = (0..64)
            .map(|i| vec![(i % 4) as f64, ((i / 4) % 4) as f64, ((i / 16) % 4) as f64])
            .collect();
        let y: Vec<f64> = x.iter().map(|r| 100.0 * r[0] - 50.0 * r[1] + 10.0 * r[2]).collect();
        let model = GradientBoosting::fit(
            &x,
            &y,
            &GbmParams {
                n_trees: 60,
                learning_rate: 0.3,
                min_samples_leaf: 1,
                ..Default::default()
            },
        );
        let now = Utc::now();
        Arc::new(ModelArtifact {
            model: SalesModel::GradientBoosting(model),
            features: vec!["ads_spend_total".into(), "rain".into(), "rating".into()],
            medians: vec![1.5, 1.5, 1.5],
            explain_excluded: excluded.iter().map(|s| s.to_string()).collect(),
            background: x.iter().step_by(3).cloned().collect(),
            metrics: TrainingMetrics {
                run_id: "test".into(),
                champion: ModelKind::GradientBoosting,
                candidates: vec![],
                dataset_sha256: String::new(),
                rows: 64,
                date_start: parse_date("2025-01-01").unwrap(),
                date_end: parse_date("2025-03-05").unwrap(),
                trained_at: now,
            },
        })
    }

    fn names(artifact: &ModelArtifact) -> Vec<String> {
        artifact.features.clone()
    }

    #[test]
    fn test_contributions_sum_to_prediction_minus_baseline() {
        let artifact = small_artifact(&[]);
        let explainer = Explainer::new(artifact.clone(), ExplainerConfig::default()).unwrap();
        let e = explainer.explain_row(&names(&artifact), &[3.0, 0.0, 1.0]).unwrap();

        let total: f64 = e.factors.iter().map(|f| f.contribution_idr).sum();
        assert!((total - (e.prediction - e.baseline)).abs() < 1e-6);
    }

    #[test]
    fn test_percentages_sum_to_100() {
        let artifact = small_artifact(&[]);
        let explainer = Explainer::new(artifact.clone(), ExplainerConfig::default()).unwrap();
        let e = explainer.explain_row(&names(&artifact), &[0.0, 3.0, 2.0]).unwrap();

        let pct: f64 = e.factors.iter().map(|f| f.percent).sum();
        assert!((pct - 100.0).abs() < 1e-9);
        let cat_pct: f64 = e.category_totals().iter().map(|c| c.percent).sum();
        assert!((cat_pct - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_dominant_feature_ranks_first_with_direction() {
        let artifact = small_artifact(&[]);
        let explainer = Explainer::new(artifact.clone(), ExplainerConfig::default()).unwrap();
        // Low ads (a = 0) pulls the forecast well below baseline
        let e = explainer.explain_row(&names(&artifact), &[0.0, 1.5, 1.5]).unwrap();
        let top = &e.top(1)[0];
        assert_eq!(top.feature, "ads_spend_total");
        assert_eq!(top.category, FactorCategory::Marketing);
        assert_eq!(top.direction, Direction::Down);
        assert!(top.contribution_idr < 0.0);
    }

    #[test]
    fn test_reordered_features_are_rejected() {
        let artifact = small_artifact(&[]);
        let explainer = Explainer::new(artifact.clone(), ExplainerConfig::default()).unwrap();
        let mut reordered = names(&artifact);
        reordered.swap(0, 2);

        let err = explainer.explain_row(&reordered, &[1.0, 1.0, 1.0]).unwrap_err();
        assert!(matches!(err, ExplainError::FeatureMismatch { .. }));
    }

    #[test]
    fn test_excluded_features_get_no_attribution() {
        let artifact = small_artifact(&["rating"]);
        let explainer = Explainer::new(artifact.clone(), ExplainerConfig::default()).unwrap();
        let e = explainer.explain_row(&names(&artifact), &[2.0, 2.0, 3.0]).unwrap();

        assert_eq!(e.factors.len(), 2);
        assert!(e.factors.iter().all(|f| f.feature != "rating"));
        // rating still moves the prediction; its share is reported apart
        assert!(e.excluded_idr > 0.0);
        let total: f64 = e.factors.iter().map(|f| f.contribution_idr).sum();
        assert!((e.baseline + total + e.excluded_idr - e.prediction).abs() < 1e-6);
        let pct: f64 = e.factors.iter().map(|f| f.percent).sum();
        assert!((pct - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_baseline_is_mean_background_prediction() {
        let artifact = small_artifact(&["rating"]);
        let explainer = Explainer::new(artifact.clone(), ExplainerConfig::default()).unwrap();
        let e = explainer.explain_row(&names(&artifact), &[0.0, 3.0, 0.0]).unwrap();

        let bg = explainer.background();
        let expected = bg.iter().map(|z| artifact.model.predict_row(z)).sum::<f64>() / bg.len() as f64;
        assert!((e.baseline - expected).abs() < 1e-6);
    }

    #[test]
    fn test_trained_explanation_is_anchored_to_background() {
        let dir = scratch_dir("explain-anchor");
        let records = synthetic_dataset(60);
        let artifact = Arc::new(train(&records, "h", &dir, &fast_config()).unwrap());
        for col in ["total_orders", "grab_orders", "grab_orders_raw"] {
            assert!(!artifact.features.iter().any(|f| f == col), "{col} fitted");
        }
        let explainer = Explainer::new(artifact.clone(), ExplainerConfig::default()).unwrap();

        // Day 49 is an offline dip
        let e = explainer.explain_record(&records[49]).unwrap();
        let bg = explainer.background();
        let expected = bg.iter().map(|z| artifact.model.predict_row(z)).sum::<f64>() / bg.len() as f64;
        assert!((e.baseline - expected).abs() < 1e-3);

        let total: f64 = e.factors.iter().map(|f| f.contribution_idr).sum();
        assert!((e.baseline + total + e.excluded_idr - e.prediction).abs() < 1e-3);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_merge_train_explain_share_feature_order() {
        let dir = scratch_dir("explain-roundtrip");
        let records = synthetic_dataset(45);
        let artifact = Arc::new(train(&records, "h", &dir, &fast_config()).unwrap());
        let explainer = Explainer::new(artifact.clone(), ExplainerConfig::default()).unwrap();

        let day = &records[40];
        let by_record = explainer.explain_record(day).unwrap();
        let row = artifact.feature_row(day).unwrap();
        let by_row = explainer.explain_row(&artifact.features, &row).unwrap();
        assert_eq!(by_record.factors, by_row.factors);

        let mut shuffled = artifact.features.clone();
        shuffled.reverse();
        assert!(explainer.explain_row(&shuffled, &row).is_err());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_period_mean_keeps_efficiency() {
        let dir = scratch_dir("explain-mean");
        let records = synthetic_dataset(45);
        let artifact = Arc::new(train(&records, "h", &dir, &fast_config()).unwrap());
        let explainer = Explainer::new(artifact, ExplainerConfig::default()).unwrap();

        let window: Vec<&DailyRecord> = records[35..42].iter().collect();
        let e = explainer.explain_mean(&window).unwrap().unwrap();
        let total: f64 = e.factors.iter().map(|f| f.contribution_idr).sum();
        assert!((total - (e.prediction - e.baseline)).abs() < 1e-6);
        assert!(explainer.explain_mean(&[]).unwrap().is_none());

        std::fs::remove_dir_all(&dir).ok();
    }

    fn day_with_sales(date: &str, sales: f64) -> DailyRecord {
        let mut r = DailyRecord::empty(1, parse_date(date).unwrap());
        r.total_sales = sales;
        r
    }

    #[test]
    fn test_critical_day_threshold_is_thirty_percent_below_median() {
        let records: Vec<DailyRecord> = [100.0, 100.0, 65.0, 100.0, 75.0, 100.0, 100.0]
            .iter()
            .enumerate()
            .map(|(i, s)| day_with_sales(&format!("2025-01-{:02}", i + 1), *s))
            .collect();
        let refs: Vec<&DailyRecord> = records.iter().collect();

        let days = critical_days(&refs);
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].date, parse_date("2025-01-03").unwrap());
        assert_eq!(days[0].median, 100.0);
        assert!((days[0].change_pct + 35.0).abs() < 1e-9);
    }

    #[test]
    fn test_at_most_five_deepest_days_in_date_order() {
        let sales = [1000.0, 10.0, 1000.0, 60.0, 50.0, 1000.0, 40.0, 30.0, 1000.0, 20.0, 1000.0, 1000.0, 1000.0];
        let records: Vec<DailyRecord> = sales
            .iter()
            .enumerate()
            .map(|(i, s)| day_with_sales(&format!("2025-01-{:02}", i + 1), *s))
            .collect();
        let refs: Vec<&DailyRecord> = records.iter().collect();

        let days = critical_days(&refs);
        let picked: Vec<f64> = days.iter().map(|d| d.sales).collect();
        // 60 is the shallowest of six drops and is left out
        assert_eq!(picked, vec![10.0, 50.0, 40.0, 30.0, 20.0]);
        assert!(days.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn test_zero_median_has_no_critical_days() {
        let records = vec![day_with_sales("2025-01-01", 0.0), day_with_sales("2025-01-02", 0.0)];
        let refs: Vec<&DailyRecord> = records.iter().collect();
        assert!(critical_days(&refs).is_empty());
    }

    #[test]
    fn test_category_table() {
        assert_eq!(FactorCategory::of("rain"), FactorCategory::External);
        assert_eq!(FactorCategory::of("offline_minutes"), FactorCategory::Operations);
        assert_eq!(FactorCategory::of("rating_one"), FactorCategory::Quality);
        assert_eq!(FactorCategory::of("sales_rolling_7"), FactorCategory::Other);
        assert_eq!(FactorCategory::of("rain_lag_3"), FactorCategory::External);
        assert_eq!(FactorCategory::of("tourist_flow_rolling_7"), FactorCategory::External);
        assert_eq!(FactorCategory::of("offline_minutes"), FactorCategory::Operations);
    }
}
