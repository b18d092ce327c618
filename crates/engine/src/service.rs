//! Read-side service behind the HTTP endpoints and the `report` command.
//! The dataset and the latest model artifact are loaded once per process.

use crate::artifact::ModelArtifact;
use crate::dataset::read_dataset;
use crate::diagnosis::diagnose;
use crate::explainer::{
    critical_days, median_sales, CategoryTotal, ExplainError, Explainer, ExplainerConfig,
    FactorContribution, RowExplanation, TOP_FACTORS,
};
use crate::model::ModelKind;
use crate::report::{compose, CriticalDayInsight, MlInsights, MlSection, Report};
use crate::stats::PeriodStats;
use crate::types::{DailyRecord, DATE_FORMAT};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error, PartialEq)]
pub enum PeriodError {
    #[error("period must look like YYYY-MM-DD_YYYY-MM-DD, got '{0}'")]
    Malformed(String),
    #[error("period start {start} is after end {end}")]
    Reversed { start: NaiveDate, end: NaiveDate },
}

/// Inclusive reporting period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl FromStr for Period {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || PeriodError::Malformed(s.to_string());
        let (a, b) = s.trim().split_once('_').ok_or_else(malformed)?;
        let start = NaiveDate::parse_from_str(a, DATE_FORMAT).map_err(|_| malformed())?;
        let end = NaiveDate::parse_from_str(b, DATE_FORMAT).map_err(|_| malformed())?;
        if start > end {
            return Err(PeriodError::Reversed { start, end });
        }
        Ok(Self { start, end })
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.start, self.end)
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Period(#[from] PeriodError),
    #[error("unknown restaurant {0}")]
    UnknownRestaurant(i64),
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub run_id: String,
    pub champion: ModelKind,
    pub trained_at: DateTime<Utc>,
    pub dataset_sha256: String,
    pub mae: Option<f64>,
}

/// `/report` payload
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub restaurant_id: i64,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub has_data: bool,
    pub actual_sales: f64,
    pub forecast_sales: Option<f64>,
    pub orders: f64,
    pub avg_order_value: Option<f64>,
    pub top_factors: Vec<FactorContribution>,
    pub categories: Vec<CategoryTotal>,
    pub model: Option<ModelInfo>,
    pub ml_unavailable: Option<String>,
}

/// `/factors` payload
#[derive(Debug, Clone, Serialize)]
pub struct FactorsReport {
    pub restaurant_id: i64,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub has_data: bool,
    pub ml: MlSection,
}

pub struct ReportService {
    by_restaurant: HashMap<i64, Vec<DailyRecord>>,
    names: BTreeMap<i64, String>,
    explainer: std::result::Result<Explainer, String>,
}

impl ReportService {
    /// `explainer` carries the reason section 8 is unavailable when it is `Err`
    pub fn new(
        records: Vec<DailyRecord>,
        names: BTreeMap<i64, String>,
        explainer: std::result::Result<Explainer, String>,
    ) -> Self {
        let mut by_restaurant: HashMap<i64, Vec<DailyRecord>> = HashMap::new();
        for record in records {
            by_restaurant.entry(record.restaurant_id).or_default().push(record);
        }
        for rows in by_restaurant.values_mut() {
            rows.sort_by_key(|r| r.date);
        }
        Self {
            by_restaurant,
            names,
            explainer,
        }
    }

    /// Load the dataset CSV and the latest artifact. A missing dataset yields an
    /// empty service; a missing or unreadable artifact disables section 8.
    pub fn load(
        dataset_path: &Path,
        artifact_dir: &Path,
        names: BTreeMap<i64, String>,
    ) -> Result<Self> {
        let records = if dataset_path.exists() {
            read_dataset(dataset_path)?
        } else {
            warn!(path = %dataset_path.display(), "Dataset not built yet; serving empty data");
            Vec::new()
        };

        let explainer = match ModelArtifact::load_latest(artifact_dir) {
            Ok(Some(artifact)) => {
                info!(run_id = %artifact.run_id(), champion = %artifact.metrics.champion, "Model artifact loaded");
                Explainer::new(Arc::new(artifact), ExplainerConfig::default())
                    .map_err(|e| format!("артефакт модели повреждён: {e}"))
            }
            Ok(None) => Err("модель ещё не обучена".to_string()),
            Err(e) => {
                warn!(error = %e, "Failed to load model artifact");
                Err(format!("артефакт модели не читается: {e}"))
            }
        };

        info!(rows = records.len(), restaurants = names.len(), "Report service ready");
        Ok(Self::new(records, names, explainer))
    }

    pub fn restaurant_name(&self, restaurant_id: i64) -> Option<&str> {
        self.names.get(&restaurant_id).map(String::as_str)
    }

    pub fn model_available(&self) -> bool {
        self.explainer.is_ok()
    }

    fn period_records(
        &self,
        restaurant_id: i64,
        period: &Period,
    ) -> Result<Vec<&DailyRecord>, ServiceError> {
        let known = self.names.contains_key(&restaurant_id)
            || self.by_restaurant.contains_key(&restaurant_id);
        if !known {
            return Err(ServiceError::UnknownRestaurant(restaurant_id));
        }
        Ok(self
            .by_restaurant
            .get(&restaurant_id)
            .map(|rows| rows.iter().filter(|r| period.contains(r.date)).collect())
            .unwrap_or_default())
    }

    fn model_info(&self) -> Option<ModelInfo> {
        let artifact = self.explainer.as_ref().ok()?.artifact();
        let metrics = &artifact.metrics;
        Some(ModelInfo {
            run_id: metrics.run_id.clone(),
            champion: metrics.champion,
            trained_at: metrics.trained_at,
            dataset_sha256: metrics.dataset_sha256.clone(),
            mae: metrics.champion_metrics().map(|c| c.mae),
        })
    }

    pub fn stats(&self, restaurant_id: i64, period: &Period) -> Result<PeriodStats, ServiceError> {
        let records = self.period_records(restaurant_id, period)?;
        Ok(PeriodStats::compute(restaurant_id, period.start, period.end, &records))
    }

    pub fn summary(&self, restaurant_id: i64, period: &Period) -> Result<ReportSummary, ServiceError> {
        let records = self.period_records(restaurant_id, period)?;
        let stats = PeriodStats::compute(restaurant_id, period.start, period.end, &records);

        let mut summary = ReportSummary {
            restaurant_id,
            start: period.start,
            end: period.end,
            has_data: stats.has_data(),
            actual_sales: stats.sales.total_sales,
            forecast_sales: None,
            orders: stats.sales.total_orders,
            avg_order_value: stats.sales.avg_order_value,
            top_factors: Vec::new(),
            categories: Vec::new(),
            model: self.model_info(),
            ml_unavailable: None,
        };
        if !summary.has_data {
            return Ok(summary);
        }

        match &self.explainer {
            Err(reason) => summary.ml_unavailable = Some(reason.clone()),
            Ok(explainer) => match period_attribution(explainer, &records) {
                Ok((forecast, explanation)) => {
                    summary.forecast_sales = Some(forecast);
                    if let Some(e) = explanation {
                        summary.top_factors = e.top(TOP_FACTORS).to_vec();
                        summary.categories = e.category_totals();
                    }
                }
                Err(e) => {
                    warn!(restaurant_id, error = %e, "Period attribution unavailable");
                    summary.ml_unavailable = Some(e.to_string());
                }
            },
        }
        Ok(summary)
    }

    pub fn factors(&self, restaurant_id: i64, period: &Period) -> Result<FactorsReport, ServiceError> {
        let records = self.period_records(restaurant_id, period)?;
        let has_data = records.iter().any(|r| r.has_activity());
        Ok(FactorsReport {
            restaurant_id,
            start: period.start,
            end: period.end,
            has_data,
            ml: self.ml_section(restaurant_id, &records),
        })
    }

    pub fn report(&self, restaurant_id: i64, period: &Period) -> Result<Report, ServiceError> {
        let records = self.period_records(restaurant_id, period)?;
        let stats = PeriodStats::compute(restaurant_id, period.start, period.end, &records);
        let ml = if stats.has_data() {
            self.ml_section(restaurant_id, &records)
        } else {
            MlSection::Unavailable {
                reason: "нет данных за период".to_string(),
            }
        };
        Ok(compose(&stats, &ml, self.restaurant_name(restaurant_id)))
    }

    pub fn report_text(&self, restaurant_id: i64, period: &Period) -> Result<String, ServiceError> {
        Ok(self.report(restaurant_id, period)?.render())
    }

    fn ml_section(&self, restaurant_id: i64, records: &[&DailyRecord]) -> MlSection {
        let explainer = match &self.explainer {
            Ok(explainer) => explainer,
            Err(reason) => {
                return MlSection::Unavailable {
                    reason: reason.clone(),
                }
            }
        };

        match critical_insights(explainer, records) {
            Ok(days) => {
                let metrics = &explainer.artifact().metrics;
                debug!(restaurant_id, critical = days.len(), "Critical days explained");
                MlSection::Ready(MlInsights {
                    median_sales: median_sales(records),
                    days,
                    champion: metrics.champion,
                    mae: metrics.champion_metrics().map(|c| c.mae),
                    trained_at: metrics.trained_at,
                    dataset_sha256: metrics.dataset_sha256.clone(),
                    dataset_end: metrics.date_end,
                })
            }
            Err(e) => {
                warn!(restaurant_id, error = %e, "Critical-day explanation failed");
                MlSection::Unavailable {
                    reason: format!("признаки модели не совпадают с данными: {e}"),
                }
            }
        }
    }
}

fn critical_insights(
    explainer: &Explainer,
    records: &[&DailyRecord],
) -> Result<Vec<CriticalDayInsight>, ExplainError> {
    critical_days(records)
        .into_iter()
        .filter_map(|day| records.iter().find(|r| r.date == day.date).map(|r| (day, *r)))
        .map(|(day, record)| -> Result<CriticalDayInsight, ExplainError> {
            let explanation = explainer.explain_record(record)?;
            Ok(CriticalDayInsight {
                orders: record.total_orders,
                forecast: explanation.prediction,
                offline_minutes: record.offline_minutes,
                is_holiday: record.is_holiday.map(|h| h > 0.0),
                rain: record.rain,
                temp: record.temp,
                factors: explanation.top(TOP_FACTORS).to_vec(),
                categories: explanation.category_totals(),
                diagnosis: diagnose(record, records, day.median),
                day,
            })
        })
        .collect()
}

/// Forecast total and averaged attribution over the period's days
fn period_attribution(
    explainer: &Explainer,
    records: &[&DailyRecord],
) -> Result<(f64, Option<RowExplanation>), ExplainError> {
    let artifact = explainer.artifact();
    let mut forecast = 0.0;
    for record in records {
        forecast += artifact.predict_record(record)?;
    }
    Ok((forecast, explainer.explain_mean(records)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trainer::tests::{fast_config, scratch_dir, synthetic_dataset};
    use crate::trainer::train;
    use crate::types::parse_date;

    fn names() -> BTreeMap<i64, String> {
        BTreeMap::from([(1, "Warung Satu".to_string()), (2, "Empty Kitchen".to_string())])
    }

    fn service_without_model(records: Vec<DailyRecord>) -> ReportService {
        ReportService::new(records, names(), Err("модель ещё не обучена".into()))
    }

    fn period(s: &str) -> Period {
        s.parse().unwrap()
    }

    #[test]
    fn test_period_parsing() {
        let p = period("2025-01-01_2025-01-31");
        assert_eq!(p.start, parse_date("2025-01-01").unwrap());
        assert_eq!(p.end, parse_date("2025-01-31").unwrap());
        assert_eq!(p.to_string(), "2025-01-01_2025-01-31");

        assert!(matches!("2025-01-01".parse::<Period>(), Err(PeriodError::Malformed(_))));
        assert!(matches!("2025-13-01_2025-01-31".parse::<Period>(), Err(PeriodError::Malformed(_))));
        assert!(matches!(
            "2025-02-01_2025-01-01".parse::<Period>(),
            Err(PeriodError::Reversed { .. })
        ));
    }

    #[test]
    fn test_unknown_restaurant() {
        let service = service_without_model(synthetic_dataset(40));
        let err = service.summary(99, &period("2025-01-01_2025-01-31")).unwrap_err();
        assert!(matches!(err, ServiceError::UnknownRestaurant(99)));
    }

    #[test]
    fn test_known_restaurant_without_rows_reports_no_data() {
        let service = service_without_model(synthetic_dataset(40));
        let p = period("2025-01-01_2025-01-31");

        let summary = service.summary(2, &p).unwrap();
        assert!(!summary.has_data);
        assert_eq!(summary.actual_sales, 0.0);
        assert!(summary.forecast_sales.is_none());

        let report = service.report(2, &p).unwrap();
        assert_eq!(report.sections.len(), 1);
        assert!(report.render().contains("Нет данных"));
    }

    #[test]
    fn test_missing_model_marks_section_eight_unavailable() {
        let records = synthetic_dataset(40);
        let start = records[0].date;
        let end = records[records.len() - 1].date;
        let service = service_without_model(records);
        let p = Period { start, end };

        let summary = service.summary(1, &p).unwrap();
        assert!(summary.has_data);
        assert!(summary.forecast_sales.is_none());
        assert_eq!(summary.ml_unavailable.as_deref(), Some("модель ещё не обучена"));

        let factors = service.factors(1, &p).unwrap();
        assert!(matches!(factors.ml, MlSection::Unavailable { .. }));

        let text = service.report_text(1, &p).unwrap();
        assert!(text.contains("ML-анализ недоступен: модель ещё не обучена"));
        assert!(text.contains("7. ⭐ КАЧЕСТВО ОБСЛУЖИВАНИЯ"));
    }

    #[test]
    fn test_trained_model_fills_forecast_and_factors() {
        let dir = scratch_dir("service-ml");
        let records = synthetic_dataset(45);
        let artifact = train(&records, "cafebabe", &dir, &fast_config()).unwrap();
        let explainer = Explainer::new(Arc::new(artifact), ExplainerConfig::default()).unwrap();
        let p = Period {
            start: records[30].date,
            end: records[44].date,
        };
        let service = ReportService::new(records, names(), Ok(explainer));

        let summary = service.summary(1, &p).unwrap();
        assert!(summary.forecast_sales.is_some());
        assert!(!summary.top_factors.is_empty());
        assert!(summary.top_factors.len() <= TOP_FACTORS);
        assert_eq!(summary.model.as_ref().map(|m| m.dataset_sha256.as_str()), Some("cafebabe"));

        let factors = service.factors(1, &p).unwrap();
        match factors.ml {
            MlSection::Ready(insights) => {
                assert!(insights.median_sales > 0.0);
                for day in &insights.days {
                    assert!(day.day.sales <= 0.7 * insights.median_sales);
                    assert!(day.factors.len() <= TOP_FACTORS);
                    // Synthetic dips come with four hours offline
                    assert!(day
                        .diagnosis
                        .causes
                        .iter()
                        .any(|c| matches!(c, crate::diagnosis::RootCause::LongOffline { .. })));
                    assert!(day.diagnosis.figures.loss_idr > 0.0);
                }
            }
            MlSection::Unavailable { reason } => panic!("unexpected: {reason}"),
        }

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_dataset_loads_empty_service() {
        let dir = scratch_dir("service-empty");
        let service =
            ReportService::load(&dir.join("missing.csv"), &dir.join("artifacts"), names()).unwrap();
        assert!(!service.model_available());
        let summary = service.summary(1, &period("2025-01-01_2025-01-02")).unwrap();
        assert!(!summary.has_data);
    }
}
