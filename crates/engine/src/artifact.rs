//! Trained model artifact: one immutable directory per training run
//!
//! ```text
//! <artifact_dir>/<run_id>/model.json       champion model + imputation medians
//! <artifact_dir>/<run_id>/features.json    ordered feature names
//! <artifact_dir>/<run_id>/background.csv   background sample (header = features)
//! <artifact_dir>/<run_id>/metrics.json     candidate metrics, dataset hash, timestamp
//! ```
//!
//! Run ids sort chronologically; readers take the greatest one.

use crate::explainer::ExplainError;
use crate::model::{ModelKind, Regressor, SalesModel};
use crate::types::DailyRecord;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const MODEL_FILE: &str = "model.json";
pub const FEATURES_FILE: &str = "features.json";
pub const BACKGROUND_FILE: &str = "background.csv";
pub const METRICS_FILE: &str = "metrics.json";

/// Held-out evaluation of one candidate model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMetrics {
    pub kind: ModelKind,
    pub mae: f64,
    pub r2: f64,
    /// Variance of absolute held-out errors (tie-break)
    pub abs_error_var: f64,
    pub n_train: usize,
    pub n_valid: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub run_id: String,
    pub champion: ModelKind,
    pub candidates: Vec<CandidateMetrics>,
    pub dataset_sha256: String,
    pub rows: usize,
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    pub trained_at: DateTime<Utc>,
}

impl TrainingMetrics {
    pub fn champion_metrics(&self) -> Option<&CandidateMetrics> {
        self.candidates.iter().find(|c| c.kind == self.champion)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelFile {
    model: SalesModel,
    medians: Vec<f64>,
    explain_excluded: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub model: SalesModel,
    /// Fit-time feature order
    pub features: Vec<String>,
    /// Training medians used to impute missing values, aligned with `features`
    pub medians: Vec<f64>,
    /// Features fitted but never reported as explanations
    pub explain_excluded: Vec<String>,
    pub background: Vec<Vec<f64>>,
    pub metrics: TrainingMetrics,
}

impl ModelArtifact {
    pub fn run_id(&self) -> &str {
        &self.metrics.run_id
    }

    /// Dense model input for a record, imputing missing values.
    /// Every artifact feature must be a column the record can supply.
    pub fn feature_row(&self, record: &DailyRecord) -> Result<Vec<f64>, ExplainError> {
        self.features
            .iter()
            .zip(&self.medians)
            .map(|(name, median)| match record.value(name) {
                None => Err(ExplainError::UnderivableFeature(name.clone())),
                Some(v) => Ok(v.filter(|v| v.is_finite()).unwrap_or(*median)),
            })
            .collect()
    }

    pub fn predict_record(&self, record: &DailyRecord) -> Result<f64, ExplainError> {
        Ok(self.model.predict_row(&self.feature_row(record)?))
    }

    /// Write into `<artifact_dir>/<run_id>/`. The directory is staged under a
    /// hidden name and renamed, so readers never see a partial run.
    pub fn save(&self, artifact_dir: &Path) -> Result<PathBuf> {
        let final_dir = artifact_dir.join(self.run_id());
        if final_dir.exists() {
            bail!("artifact run {} already exists", final_dir.display());
        }
        let staging = artifact_dir.join(format!(".staging-{}", self.run_id()));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)
            .with_context(|| format!("creating {}", staging.display()))?;

        let model_file = ModelFile {
            model: self.model.clone(),
            medians: self.medians.clone(),
            explain_excluded: self.explain_excluded.clone(),
        };
        fs::write(staging.join(MODEL_FILE), serde_json::to_vec(&model_file)?)?;
        fs::write(
            staging.join(FEATURES_FILE),
            serde_json::to_vec_pretty(&self.features)?,
        )?;
        fs::write(
            staging.join(METRICS_FILE),
            serde_json::to_vec_pretty(&self.metrics)?,
        )?;

        let mut writer = csv::Writer::from_path(staging.join(BACKGROUND_FILE))?;
        writer.write_record(&self.features)?;
        for row in &self.background {
            writer.write_record(row.iter().map(|v| v.to_string()))?;
        }
        writer.flush()?;
        drop(writer);

        fs::rename(&staging, &final_dir)
            .with_context(|| format!("publishing {}", final_dir.display()))?;
        info!(run_id = %self.run_id(), path = %final_dir.display(), "Model artifact saved");
        Ok(final_dir)
    }

    pub fn load(run_dir: &Path) -> Result<Self> {
        let read = |name: &str| -> Result<Vec<u8>> {
            let path = run_dir.join(name);
            fs::read(&path).with_context(|| format!("reading {}", path.display()))
        };

        let model_file: ModelFile = serde_json::from_slice(&read(MODEL_FILE)?)?;
        let features: Vec<String> = serde_json::from_slice(&read(FEATURES_FILE)?)?;
        let metrics: TrainingMetrics = serde_json::from_slice(&read(METRICS_FILE)?)?;

        if model_file.medians.len() != features.len() {
            bail!(
                "artifact {} has {} medians for {} features",
                run_dir.display(),
                model_file.medians.len(),
                features.len()
            );
        }

        let mut reader = csv::Reader::from_path(run_dir.join(BACKGROUND_FILE))?;
        let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if header != features {
            bail!(
                "background sample columns do not match feature list in {}",
                run_dir.display()
            );
        }
        let mut background = Vec::new();
        for row in reader.records() {
            let row = row?;
            let values = row
                .iter()
                .map(|v| v.parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .context("parsing background sample")?;
            background.push(values);
        }

        debug!(run_id = %metrics.run_id, features = features.len(), background = background.len(), "Artifact loaded");
        Ok(Self {
            model: model_file.model,
            features,
            medians: model_file.medians,
            explain_excluded: model_file.explain_excluded,
            background,
            metrics,
        })
    }

    /// Load the latest complete run, if any
    pub fn load_latest(artifact_dir: &Path) -> Result<Option<Self>> {
        match latest_run_dir(artifact_dir)? {
            Some(dir) => Ok(Some(Self::load(&dir)?)),
            None => Ok(None),
        }
    }
}

/// Greatest run directory name that holds a metrics file
pub fn latest_run_dir(artifact_dir: &Path) -> Result<Option<PathBuf>> {
    if !artifact_dir.exists() {
        return Ok(None);
    }
    let mut runs: Vec<PathBuf> = fs::read_dir(artifact_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with('.'))
        })
        .filter(|p| p.join(METRICS_FILE).exists())
        .collect();
    runs.sort();
    Ok(runs.pop())
}

/// Sortable run id from the training timestamp
pub fn run_id_for(trained_at: DateTime<Utc>) -> String {
    trained_at.format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ForestParams, RandomForest};
    use crate::types::parse_date;
    use chrono::TimeZone;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sales-insight-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn artifact(trained_at: DateTime<Utc>) -> ModelArtifact {
        let x = vec![vec![0.0, 1.0], vec![1.0, 1.0], vec![2.0, 0.0]];
        let y = vec![10.0, 20.0, 30.0];
        let model = SalesModel::RandomForest(RandomForest::fit(
            &x,
            &y,
            &ForestParams {
                n_trees: 2,
                ..Default::default()
            },
        ));
        ModelArtifact {
            model,
            features: vec!["rain".into(), "is_weekend".into()],
            medians: vec![0.5, 0.0],
            explain_excluded: vec![],
            background: x,
            metrics: TrainingMetrics {
                run_id: run_id_for(trained_at),
                champion: ModelKind::RandomForest,
                candidates: vec![],
                dataset_sha256: "ab".repeat(32),
                rows: 3,
                date_start: parse_date("2025-01-01").unwrap(),
                date_end: parse_date("2025-01-03").unwrap(),
                trained_at,
            },
        }
    }

    #[test]
    fn test_save_then_load_latest() {
        let dir = scratch_dir("artifact-latest");
        let older = artifact(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let newer = artifact(Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap());
        newer.save(&dir).unwrap();
        older.save(&dir).unwrap();

        let loaded = ModelArtifact::load_latest(&dir).unwrap().unwrap();
        assert_eq!(loaded.run_id(), newer.run_id());
        assert_eq!(loaded.features, newer.features);
        assert_eq!(loaded.background.len(), 3);

        // Runs are immutable
        assert!(newer.save(&dir).is_err());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_dir_has_no_artifact() {
        let dir = scratch_dir("artifact-none");
        assert!(ModelArtifact::load_latest(&dir).unwrap().is_none());
    }

    #[test]
    fn test_feature_row_imputes_missing_values() {
        let a = artifact(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let record = DailyRecord::empty(1, parse_date("2025-01-04").unwrap()); // Saturday, rain missing
        assert_eq!(a.feature_row(&record).unwrap(), vec![0.5, 1.0]);
    }

    #[test]
    fn test_feature_row_rejects_unknown_feature() {
        let mut a = artifact(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        a.features[1] = "footfall".into();
        let record = DailyRecord::empty(1, parse_date("2025-01-04").unwrap());
        assert!(matches!(
            a.feature_row(&record),
            Err(ExplainError::UnderivableFeature(f)) if f == "footfall"
        ));
    }

    #[test]
    fn test_run_ids_sort_chronologically() {
        let a = run_id_for(Utc.with_ymd_and_hms(2025, 1, 9, 23, 0, 0).unwrap());
        let b = run_id_for(Utc.with_ymd_and_hms(2025, 1, 10, 1, 0, 0).unwrap());
        assert!(a < b);
    }
}
