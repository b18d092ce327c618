//! Model trainer: fits gradient boosting and random forest on a time-ordered
//! split of the merged dataset and persists the champion.

use crate::artifact::{run_id_for, CandidateMetrics, ModelArtifact, TrainingMetrics};
use crate::merger::ROLLING_WINDOWS;
use crate::model::{
    ForestParams, GbmParams, GradientBoosting, ModelKind, RandomForest, Regressor, SalesModel,
};
use crate::types::{DailyRecord, NUMERIC_COLUMNS, TARGET_COLUMN};
use chrono::{DateTime, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Columns derived from the target day's own sales or order volume: never
/// used as features. The inclusive rolling means contain the day itself; the
/// `_prev` variants are the usable ones.
pub const LEAKAGE_COLUMNS: &[&str] = &[
    "grab_sales",
    "gojek_sales",
    "total_sales_raw",
    "payouts",
    "grab_orders_raw",
    "gojek_orders_raw",
    "grab_orders",
    "gojek_orders",
    "total_orders",
    "sales_rolling_7",
    "sales_rolling_30",
    "orders_rolling_7",
    "orders_rolling_30",
];

const LOCK_FILE: &str = ".train.lock";
/// A lock older than this is left over from a crashed run
const STALE_LOCK_SECS: i64 = 6 * 3600;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("dataset is empty")]
    EmptyDataset,

    #[error(
        "insufficient history: longest restaurant series has {longest} days, \
         {required} are needed to form the {required}-day rolling mean"
    )]
    InsufficientHistory { longest: usize, required: usize },

    #[error("dataset spans a single date; a held-out split needs at least two")]
    SingleDate,

    #[error("no usable feature columns")]
    NoFeatures,

    #[error("another training run is in progress ({0})")]
    Locked(PathBuf),

    #[error(transparent)]
    Artifact(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub gbm: GbmParams,
    pub forest: ForestParams,
    /// Fraction of the latest distinct dates held out for evaluation
    pub holdout_fraction: f64,
    pub background_size: usize,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            gbm: GbmParams::default(),
            forest: ForestParams::default(),
            holdout_fraction: 0.1,
            background_size: 100,
            seed: 42,
        }
    }
}

/// Feature columns chosen for a dataset
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSelection {
    pub features: Vec<String>,
    pub explain_excluded: Vec<String>,
}

/// Removes the lock file when the run ends, whatever the outcome.
/// The file holds the owner's pid and start time.
struct TrainLock {
    path: PathBuf,
    file: File,
}

impl TrainLock {
    fn acquire(artifact_dir: &Path) -> Result<Self, TrainError> {
        fs::create_dir_all(artifact_dir).map_err(anyhow::Error::from)?;
        let path = artifact_dir.join(LOCK_FILE);
        match Self::create(&path) {
            Ok(lock) => return Ok(lock),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(TrainError::Artifact(e.into())),
        }

        if !lock_is_stale(&path) {
            return Err(TrainError::Locked(path));
        }
        warn!(path = %path.display(), "Removing stale training lock");
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(TrainError::Artifact(e.into())),
        }
        match Self::create(&path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(TrainError::Locked(path)),
            Err(e) => Err(TrainError::Artifact(e.into())),
        }
    }

    fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let mut lock = Self {
            path: path.to_path_buf(),
            file,
        };
        writeln!(lock.file, "{}\n{}", std::process::id(), Utc::now().to_rfc3339())?;
        Ok(lock)
    }
}

impl Drop for TrainLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove training lock");
        }
    }
}

/// A lock is stale when it is too old or its owner process is gone.
/// Without a readable owner line the file's modification time decides.
fn lock_is_stale(path: &Path) -> bool {
    let content = fs::read_to_string(path).unwrap_or_default();
    let mut lines = content.lines();
    let pid = lines.next().and_then(|l| l.trim().parse::<u32>().ok());
    let started = lines
        .next()
        .and_then(|l| DateTime::parse_from_rfc3339(l.trim()).ok())
        .map(|t| t.with_timezone(&Utc));

    match (pid, started) {
        (Some(pid), Some(started)) => {
            let age = Utc::now().signed_duration_since(started).num_seconds();
            age > STALE_LOCK_SECS || !process_alive(pid)
        }
        _ => fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok())
            .is_some_and(|age| age.as_secs() > STALE_LOCK_SECS as u64),
    }
}

/// Liveness via procfs; assumed alive where procfs is absent
fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    let proc = Path::new("/proc");
    !proc.is_dir() || proc.join(pid.to_string()).exists()
}

/// Pick feature columns: everything numeric except the target, leakage columns,
/// columns identical to the target, and columns with no values at all.
/// Constant columns are fitted but not offered as explanations.
pub fn select_features(records: &[DailyRecord]) -> FeatureSelection {
    let mut features = Vec::new();
    let mut explain_excluded = Vec::new();

    for &column in NUMERIC_COLUMNS {
        if column == TARGET_COLUMN || LEAKAGE_COLUMNS.contains(&column) {
            continue;
        }

        let values: Vec<Option<f64>> = records
            .iter()
            .map(|r| r.value(column).flatten())
            .collect();

        if values.iter().all(Option::is_none) {
            continue;
        }
        let mirrors_target = records
            .iter()
            .zip(&values)
            .all(|(r, v)| *v == Some(r.total_sales));
        if mirrors_target {
            warn!(column, "Column equals the target on every row, excluded");
            continue;
        }

        let distinct: BTreeSet<u64> = values.iter().flatten().map(|v| v.to_bits()).collect();
        if distinct.len() <= 1 {
            explain_excluded.push(column.to_string());
        }
        features.push(column.to_string());
    }

    FeatureSelection {
        features,
        explain_excluded,
    }
}

/// Lowest MAE wins; a relative tie goes to the lower absolute-error variance,
/// then to gradient boosting.
pub fn select_champion(candidates: &[CandidateMetrics]) -> Option<ModelKind> {
    let rank = |k: ModelKind| match k {
        ModelKind::GradientBoosting => 0,
        ModelKind::RandomForest => 1,
    };
    candidates
        .iter()
        .min_by(|a, b| {
            let scale = a.mae.abs().max(b.mae.abs()).max(f64::MIN_POSITIVE);
            if (a.mae - b.mae).abs() / scale > 1e-9 {
                a.mae.total_cmp(&b.mae)
            } else {
                a.abs_error_var
                    .total_cmp(&b.abs_error_var)
                    .then(rank(a.kind).cmp(&rank(b.kind)))
            }
        })
        .map(|c| c.kind)
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

fn evaluate(kind: ModelKind, model: &dyn Regressor, x: &[Vec<f64>], y: &[f64], n_train: usize) -> CandidateMetrics {
    let preds = model.predict(x);
    let errors: Vec<f64> = preds.iter().zip(y).map(|(p, t)| (p - t).abs()).collect();
    let n = errors.len().max(1) as f64;
    let mae = errors.iter().sum::<f64>() / n;
    let abs_error_var = errors.iter().map(|e| (e - mae).powi(2)).sum::<f64>() / n;

    let y_mean = y.iter().sum::<f64>() / n;
    let ss_tot: f64 = y.iter().map(|t| (t - y_mean).powi(2)).sum();
    let ss_res: f64 = preds.iter().zip(y).map(|(p, t)| (t - p).powi(2)).sum();
    let r2 = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

    CandidateMetrics {
        kind,
        mae,
        r2,
        abs_error_var,
        n_train,
        n_valid: y.len(),
    }
}

/// Train on the merged dataset and persist the champion under `artifact_dir`.
pub fn train(
    records: &[DailyRecord],
    dataset_sha256: &str,
    artifact_dir: &Path,
    config: &TrainConfig,
) -> Result<ModelArtifact, TrainError> {
    if records.is_empty() {
        return Err(TrainError::EmptyDataset);
    }

    let required = ROLLING_WINDOWS[ROLLING_WINDOWS.len() - 1];
    let mut per_restaurant: HashMap<i64, usize> = HashMap::new();
    for r in records {
        *per_restaurant.entry(r.restaurant_id).or_default() += 1;
    }
    let longest = per_restaurant.values().copied().max().unwrap_or(0);
    if longest < required {
        return Err(TrainError::InsufficientHistory { longest, required });
    }

    let _lock = TrainLock::acquire(artifact_dir)?;

    let mut rows: Vec<&DailyRecord> = records.iter().collect();
    rows.sort_by_key(|r| (r.date, r.restaurant_id));

    let dates: Vec<NaiveDate> = rows
        .iter()
        .map(|r| r.date)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if dates.len() < 2 {
        return Err(TrainError::SingleDate);
    }
    let holdout = ((dates.len() as f64 * config.holdout_fraction - 1e-9).ceil() as usize)
        .clamp(1, dates.len() - 1);
    let cutoff = dates[dates.len() - holdout];
    let (train_rows, valid_rows): (Vec<&DailyRecord>, Vec<&DailyRecord>) =
        rows.iter().copied().partition(|r| r.date < cutoff);

    let selection = select_features(records);
    if selection.features.is_empty() {
        return Err(TrainError::NoFeatures);
    }

    let medians: Vec<f64> = selection
        .features
        .iter()
        .map(|f| {
            let mut vals: Vec<f64> = train_rows
                .iter()
                .filter_map(|r| r.value(f).flatten())
                .filter(|v| v.is_finite())
                .collect();
            median(&mut vals).unwrap_or(0.0)
        })
        .collect();

    let matrix = |subset: &[&DailyRecord]| -> Vec<Vec<f64>> {
        subset
            .iter()
            .map(|r| {
                selection
                    .features
                    .iter()
                    .zip(&medians)
                    .map(|(f, m)| r.value(f).flatten().filter(|v| v.is_finite()).unwrap_or(*m))
                    .collect()
            })
            .collect()
    };
    let x_train = matrix(&train_rows);
    let y_train: Vec<f64> = train_rows.iter().map(|r| r.total_sales).collect();
    let x_valid = matrix(&valid_rows);
    let y_valid: Vec<f64> = valid_rows.iter().map(|r| r.total_sales).collect();

    info!(
        features = selection.features.len(),
        explain_excluded = selection.explain_excluded.len(),
        train_rows = x_train.len(),
        valid_rows = x_valid.len(),
        cutoff = %cutoff,
        "Training candidates"
    );

    let gbm = GradientBoosting::fit(&x_train, &y_train, &config.gbm);
    let forest = RandomForest::fit(&x_train, &y_train, &config.forest);

    let candidates = vec![
        evaluate(ModelKind::GradientBoosting, &gbm, &x_valid, &y_valid, x_train.len()),
        evaluate(ModelKind::RandomForest, &forest, &x_valid, &y_valid, x_train.len()),
    ];
    for c in &candidates {
        info!(model = %c.kind, mae = c.mae, r2 = c.r2, "Candidate evaluated");
    }

    let champion = select_champion(&candidates).unwrap_or(ModelKind::GradientBoosting);
    let model = match champion {
        ModelKind::GradientBoosting => SalesModel::GradientBoosting(gbm),
        ModelKind::RandomForest => SalesModel::RandomForest(forest),
    };

    let mut rng = StdRng::seed_from_u64(config.seed);
    let take = config.background_size.min(x_train.len());
    let mut picks = sample(&mut rng, x_train.len(), take).into_vec();
    picks.sort_unstable();
    let background: Vec<Vec<f64>> = picks.into_iter().map(|i| x_train[i].clone()).collect();

    let trained_at = Utc::now();
    let artifact = ModelArtifact {
        model,
        features: selection.features,
        medians,
        explain_excluded: selection.explain_excluded,
        background,
        metrics: TrainingMetrics {
            run_id: run_id_for(trained_at),
            champion,
            candidates,
            dataset_sha256: dataset_sha256.to_string(),
            rows: records.len(),
            date_start: dates[0],
            date_end: dates[dates.len() - 1],
            trained_at,
        },
    };

    artifact.save(artifact_dir)?;
    info!(champion = %champion, run_id = %artifact.run_id(), "Training complete");
    Ok(artifact)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::merger::{DatasetMerger, MergeRequest, MergeSources};
    use crate::types::{parse_date, Platform, PlatformDay};
    use rust_decimal::Decimal;

    pub(crate) fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sales-insight-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    /// Merged dataset where sales depend on weekend, rain and ads spend
    pub(crate) fn synthetic_dataset(days: i64) -> Vec<DailyRecord> {
        let start = parse_date("2025-01-01").unwrap();
        let mut platform_days = Vec::new();
        for i in 0..days {
            let date = start + chrono::Duration::days(i);
            let mut pd = PlatformDay::empty(1, date, Platform::Grab);
            let weekend = chrono::Datelike::weekday(&date).number_from_monday() >= 6;
            let ads = (i % 4) as i64 * 50_000;
            let base = 2_000_000 + if weekend { 800_000 } else { 0 } + ads * 3;
            let dip = if i % 11 == 5 { 1_200_000 } else { 0 };
            pd.sales = Decimal::from(base - dip);
            pd.orders = (base - dip) / 50_000;
            pd.ads_spend = Decimal::from(ads);
            pd.offline_minutes = if i % 11 == 5 { 240.0 } else { 0.0 };
            platform_days.push(pd);
        }
        DatasetMerger::merge(
            &MergeRequest {
                start,
                end: start + chrono::Duration::days(days - 1),
                restaurant_ids: vec![1],
            },
            &MergeSources {
                platform_days,
                holidays: Some(vec![]),
                ..Default::default()
            },
        )
        .unwrap()
    }

    pub(crate) fn fast_config() -> TrainConfig {
        TrainConfig {
            gbm: GbmParams {
                n_trees: 40,
                learning_rate: 0.2,
                ..Default::default()
            },
            forest: ForestParams {
                n_trees: 15,
                ..Default::default()
            },
            background_size: 20,
            ..Default::default()
        }
    }

    fn candidate(kind: ModelKind, mae: f64, var: f64) -> CandidateMetrics {
        CandidateMetrics {
            kind,
            mae,
            r2: 0.0,
            abs_error_var: var,
            n_train: 10,
            n_valid: 2,
        }
    }

    #[test]
    fn test_champion_is_lowest_mae() {
        let c = [
            candidate(ModelKind::GradientBoosting, 120.0, 1.0),
            candidate(ModelKind::RandomForest, 100.0, 50.0),
        ];
        assert_eq!(select_champion(&c), Some(ModelKind::RandomForest));
    }

    #[test]
    fn test_champion_tie_prefers_lower_variance_then_boosting() {
        let c = [
            candidate(ModelKind::GradientBoosting, 100.0, 9.0),
            candidate(ModelKind::RandomForest, 100.0, 4.0),
        ];
        assert_eq!(select_champion(&c), Some(ModelKind::RandomForest));

        let c = [
            candidate(ModelKind::RandomForest, 100.0, 4.0),
            candidate(ModelKind::GradientBoosting, 100.0, 4.0),
        ];
        assert_eq!(select_champion(&c), Some(ModelKind::GradientBoosting));
    }

    #[test]
    fn test_feature_selection_guards_leakage() {
        let records = synthetic_dataset(35);
        let sel = select_features(&records);

        assert!(!sel.features.contains(&"total_sales".to_string()));
        for leak in LEAKAGE_COLUMNS {
            assert!(!sel.features.contains(&leak.to_string()), "{leak} leaked");
        }
        // No weather source: all-missing columns are dropped
        assert!(!sel.features.contains(&"rain".to_string()));
        // Holidays present but never set: fitted, not explained
        assert!(sel.features.contains(&"is_holiday".to_string()));
        assert!(sel.explain_excluded.contains(&"is_holiday".to_string()));
        assert!(!sel.explain_excluded.contains(&"is_weekend".to_string()));
        // Order volume and same-day windows restate the target
        for col in ["total_orders", "grab_orders", "sales_rolling_7", "orders_rolling_30"] {
            assert!(!sel.features.contains(&col.to_string()), "{col} fitted");
        }
        assert!(sel.features.contains(&"sales_rolling_7_prev".to_string()));
        assert!(sel.features.contains(&"sales_lag_3".to_string()));
    }

    #[test]
    fn test_insufficient_history_is_descriptive() {
        let dir = scratch_dir("train-short");
        let err = train(&synthetic_dataset(20), "x", &dir, &fast_config()).unwrap_err();
        assert!(matches!(
            err,
            TrainError::InsufficientHistory { longest: 20, required: 30 }
        ));
        assert!(err.to_string().contains("30-day rolling mean"));
    }

    #[test]
    fn test_train_persists_champion_artifact() {
        let dir = scratch_dir("train-full");
        let records = synthetic_dataset(60);
        let artifact = train(&records, "deadbeef", &dir, &fast_config()).unwrap();

        assert_eq!(artifact.metrics.candidates.len(), 2);
        assert_eq!(artifact.metrics.dataset_sha256, "deadbeef");
        assert_eq!(artifact.background.len(), 20);
        assert!(artifact.background.iter().all(|r| r.len() == artifact.features.len()));
        // 60 dates, 10% held out
        let champ = artifact.metrics.champion_metrics().unwrap();
        assert_eq!(champ.n_valid, 6);
        assert_eq!(champ.n_train, 54);

        let loaded = ModelArtifact::load_latest(&dir).unwrap().unwrap();
        assert_eq!(loaded.features, artifact.features);
        assert_eq!(loaded.metrics.champion, artifact.metrics.champion);
        // Lock released
        assert!(!dir.join(LOCK_FILE).exists());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_concurrent_run_is_refused() {
        let dir = scratch_dir("train-locked");
        fs::create_dir_all(&dir).unwrap();
        let owner = format!("{}\n{}\n", std::process::id(), Utc::now().to_rfc3339());
        fs::write(dir.join(LOCK_FILE), owner).unwrap();

        let err = train(&synthetic_dataset(40), "x", &dir, &fast_config()).unwrap_err();
        assert!(matches!(err, TrainError::Locked(_)));
        assert!(dir.join(LOCK_FILE).exists());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let dir = scratch_dir("train-stale");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(LOCK_FILE), "99999999\n2020-01-01T00:00:00+00:00\n").unwrap();

        let artifact = train(&synthetic_dataset(40), "x", &dir, &fast_config()).unwrap();
        assert_eq!(artifact.metrics.dataset_sha256, "x");
        assert!(!dir.join(LOCK_FILE).exists());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_lock_of_exited_process_is_stale() {
        let dir = scratch_dir("lock-dead-owner");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(LOCK_FILE);

        fs::write(&path, format!("{}\n{}\n", std::process::id(), Utc::now().to_rfc3339())).unwrap();
        assert!(!lock_is_stale(&path));

        if Path::new("/proc").is_dir() {
            // Beyond any pid_max, so never a live process
            fs::write(&path, format!("99999999\n{}\n", Utc::now().to_rfc3339())).unwrap();
            assert!(lock_is_stale(&path));
        }

        // Freshly written lock without an owner line
        fs::write(&path, "").unwrap();
        assert!(!lock_is_stale(&path));
        fs::remove_dir_all(&dir).ok();
    }
}
