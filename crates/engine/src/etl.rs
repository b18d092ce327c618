//! Source readers and dataset build orchestration.
//!
//! Network sources fall back to the SQLite caches; a source with neither is
//! passed to the merger as absent so its columns stay missing.

use crate::api::{applicable_holidays, merge_holidays, static_holidays, NagerClient, OpenMeteoClient};
use crate::dataset::write_dataset;
use crate::jobs::{Job, JobHandler};
use crate::merger::{DatasetMerger, MergeRequest, MergeSources};
use crate::types::{
    parse_date, FakeOrderRecord, Holiday, PlatformDay, TourismObservation, WeatherObservation,
    DATE_FORMAT,
};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use persistence::repository::{
    CacheRepository, HolidayCacheRecord, PlatformStatsRecord, RestaurantRecord, StatsRepository,
    WeatherCacheRecord, REFRESH_DATASET_JOB,
};
use persistence::SqlitePool;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Optional file exports and API endpoints feeding the merge
#[derive(Debug, Clone, Default)]
pub struct SourceConfig {
    pub fake_orders_path: Option<PathBuf>,
    pub tourism_path: Option<PathBuf>,
    pub weather_url: Option<String>,
    pub holiday_url: Option<String>,
    /// ISO 3166-2 regions whose regional holidays count; national ones always do
    pub holiday_regions: Vec<String>,
    /// Use caches only, never the network
    pub offline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub path: PathBuf,
    pub rows: usize,
    pub restaurants: usize,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub sha256: String,
}

// ---------- CSV readers ----------

pub fn read_tourism_csv(path: &Path) -> Result<Vec<TourismObservation>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;
    let mut rows = Vec::new();
    for row in reader.deserialize::<TourismObservation>() {
        rows.push(row.with_context(|| format!("parsing {}", path.display()))?);
    }
    debug!(path = %path.display(), rows = rows.len(), "Tourism export read");
    Ok(rows)
}

#[derive(Debug, Deserialize)]
struct FakeOrderRow {
    restaurant_id: i64,
    date: String,
    platform: String,
    count: i64,
    #[serde(default)]
    amount: Option<String>,
}

pub fn read_fake_orders_csv(path: &Path) -> Result<Vec<FakeOrderRecord>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;
    let mut rows = Vec::new();
    for row in reader.deserialize::<FakeOrderRow>() {
        let row = row.with_context(|| format!("parsing {}", path.display()))?;
        let amount = match row.amount.as_deref().map(str::trim) {
            Some(a) if !a.is_empty() => Some(
                Decimal::from_str(a).with_context(|| format!("invalid fake-order amount '{a}'"))?,
            ),
            _ => None,
        };
        rows.push(FakeOrderRecord {
            restaurant_id: row.restaurant_id,
            date: parse_date(&row.date)?,
            platform: row.platform.parse()?,
            count: row.count.max(0),
            amount,
        });
    }
    debug!(path = %path.display(), rows = rows.len(), "Fake orders read");
    Ok(rows)
}

/// Platform export row; blank cells mean zero (counts, money) or missing (timings, rating)
#[derive(Debug, Deserialize)]
struct PlatformStatsRow {
    restaurant_id: i64,
    date: String,
    platform: String,
    #[serde(default)]
    sales: Option<String>,
    #[serde(default)]
    orders: Option<i64>,
    #[serde(default)]
    ads_spend: Option<String>,
    #[serde(default)]
    ads_sales: Option<String>,
    #[serde(default)]
    impressions: Option<i64>,
    #[serde(default)]
    menu_visits: Option<i64>,
    #[serde(default)]
    add_to_cart: Option<i64>,
    #[serde(default)]
    ads_orders: Option<i64>,
    #[serde(default)]
    cancelled_orders: Option<i64>,
    #[serde(default)]
    preparation_time: Option<f64>,
    #[serde(default)]
    delivery_time: Option<f64>,
    #[serde(default)]
    accepting_time: Option<f64>,
    #[serde(default)]
    offline_minutes: Option<f64>,
    #[serde(default)]
    rating: Option<f64>,
    #[serde(default)]
    new_customers: Option<i64>,
    #[serde(default)]
    repeat_customers: Option<i64>,
    #[serde(default)]
    reactivated_customers: Option<i64>,
    #[serde(default)]
    payouts: Option<String>,
    #[serde(default)]
    rating_five: Option<i64>,
    #[serde(default)]
    rating_four: Option<i64>,
    #[serde(default)]
    rating_three: Option<i64>,
    #[serde(default)]
    rating_two: Option<i64>,
    #[serde(default)]
    rating_one: Option<i64>,
}

fn money(field: &str, value: Option<&str>) -> Result<Decimal> {
    match value.map(str::trim) {
        None | Some("") => Ok(Decimal::ZERO),
        Some(v) => Decimal::from_str(v).with_context(|| format!("invalid {field} '{v}'")),
    }
}

impl PlatformStatsRow {
    fn into_day(self) -> Result<PlatformDay> {
        Ok(PlatformDay {
            restaurant_id: self.restaurant_id,
            date: parse_date(&self.date)?,
            platform: self.platform.parse()?,
            sales: money("sales", self.sales.as_deref())?,
            orders: self.orders.unwrap_or(0),
            ads_spend: money("ads_spend", self.ads_spend.as_deref())?,
            ads_sales: money("ads_sales", self.ads_sales.as_deref())?,
            impressions: self.impressions.unwrap_or(0),
            menu_visits: self.menu_visits.unwrap_or(0),
            add_to_cart: self.add_to_cart.unwrap_or(0),
            ads_orders: self.ads_orders.unwrap_or(0),
            cancelled_orders: self.cancelled_orders.unwrap_or(0),
            preparation_time: self.preparation_time,
            delivery_time: self.delivery_time,
            accepting_time: self.accepting_time,
            offline_minutes: self.offline_minutes.unwrap_or(0.0),
            rating: self.rating,
            new_customers: self.new_customers.unwrap_or(0),
            repeat_customers: self.repeat_customers.unwrap_or(0),
            reactivated_customers: self.reactivated_customers.unwrap_or(0),
            payouts: money("payouts", self.payouts.as_deref())?,
            rating_five: self.rating_five.unwrap_or(0),
            rating_four: self.rating_four.unwrap_or(0),
            rating_three: self.rating_three.unwrap_or(0),
            rating_two: self.rating_two.unwrap_or(0),
            rating_one: self.rating_one.unwrap_or(0),
        })
    }
}

pub fn read_platform_stats_csv(path: &Path) -> Result<Vec<PlatformDay>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;
    let mut days = Vec::new();
    for (i, row) in reader.deserialize::<PlatformStatsRow>().enumerate() {
        let day = row
            .map_err(anyhow::Error::from)
            .and_then(PlatformStatsRow::into_day)
            .with_context(|| format!("{} row {}", path.display(), i + 2))?;
        days.push(day);
    }
    Ok(days)
}

#[derive(Debug, Deserialize)]
struct RestaurantRow {
    id: i64,
    name: String,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
}

pub fn read_restaurants_csv(path: &Path) -> Result<Vec<RestaurantRecord>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;
    let mut rows = Vec::new();
    for row in reader.deserialize::<RestaurantRow>() {
        let row = row.with_context(|| format!("parsing {}", path.display()))?;
        rows.push(RestaurantRecord {
            id: row.id,
            name: row.name,
            latitude: row.latitude,
            longitude: row.longitude,
            is_active: 1,
        });
    }
    Ok(rows)
}

// ---------- Imports ----------

pub async fn import_restaurants(pool: &SqlitePool, path: &Path) -> Result<usize> {
    let rows = read_restaurants_csv(path)?;
    let repo = StatsRepository::new(pool);
    for r in &rows {
        repo.upsert_restaurant(r).await?;
    }
    info!(count = rows.len(), "Restaurants imported");
    Ok(rows.len())
}

/// Upsert a platform export; the store enqueues a dataset refresh alongside
pub async fn import_platform_stats(pool: &SqlitePool, path: &Path) -> Result<usize> {
    let days = read_platform_stats_csv(path)?;
    let records: Vec<PlatformStatsRecord> = days.iter().map(PlatformDay::to_record).collect();
    let written = StatsRepository::new(pool).upsert_stats(&records).await?;
    info!(rows = written, path = %path.display(), "Platform stats imported");
    Ok(written)
}

// ---------- Dataset build ----------

/// Rebuilds the merged dataset from the store; also the refresh job handler
pub struct DatasetBuilder {
    pool: SqlitePool,
    sources: SourceConfig,
    dataset_path: PathBuf,
}

impl DatasetBuilder {
    pub fn new(pool: SqlitePool, sources: SourceConfig, dataset_path: PathBuf) -> Self {
        Self {
            pool,
            sources,
            dataset_path,
        }
    }

    /// Full rebuild over `range`, or over every stored date when `None`
    pub async fn build(&self, range: Option<(NaiveDate, NaiveDate)>) -> Result<BuildSummary> {
        let stats = StatsRepository::new(&self.pool);
        let (start, end) = match range {
            Some(r) => r,
            None => match stats.get_date_span().await? {
                Some((min, max)) => (parse_date(&min)?, parse_date(&max)?),
                None => bail!("no platform stats imported yet"),
            },
        };
        if start > end {
            bail!("start {start} is after end {end}");
        }
        let (start_s, end_s) = (
            start.format(DATE_FORMAT).to_string(),
            end.format(DATE_FORMAT).to_string(),
        );

        let restaurants = stats.get_restaurants().await?;
        let platform_days = stats
            .get_stats_in_range(&start_s, &end_s, None)
            .await?
            .iter()
            .map(PlatformDay::try_from)
            .collect::<Result<Vec<_>>>()?;

        let ids: BTreeSet<i64> = restaurants
            .iter()
            .map(|r| r.id)
            .chain(platform_days.iter().map(|d| d.restaurant_id))
            .collect();

        let fake_orders = match &self.sources.fake_orders_path {
            Some(path) => read_fake_orders_csv(path)?,
            None => Vec::new(),
        };
        let tourism = match &self.sources.tourism_path {
            Some(path) => Some(read_tourism_csv(path)?),
            None => None,
        };
        let weather = self.load_weather(&restaurants, start, end).await?;
        let holidays = self.load_holidays(start, end).await?;

        let request = MergeRequest {
            start,
            end,
            restaurant_ids: ids.iter().copied().collect(),
        };
        let sources = MergeSources {
            platform_days,
            fake_orders,
            weather,
            holidays: Some(holidays),
            tourism,
        };
        let records = DatasetMerger::merge(&request, &sources)?;
        let sha256 = write_dataset(&self.dataset_path, &records)?;

        info!(
            rows = records.len(),
            restaurants = ids.len(),
            %start,
            %end,
            sha = %&sha256[..12.min(sha256.len())],
            "Dataset rebuilt"
        );
        Ok(BuildSummary {
            path: self.dataset_path.clone(),
            rows: records.len(),
            restaurants: ids.len(),
            start,
            end,
            sha256,
        })
    }

    /// API first, cache on failure; `None` when neither yields anything
    async fn load_weather(
        &self,
        restaurants: &[RestaurantRecord],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<Vec<WeatherObservation>>> {
        let cache = CacheRepository::new(&self.pool);
        let client = if self.sources.offline {
            None
        } else {
            Some(OpenMeteoClient::new(self.sources.weather_url.as_deref())?)
        };
        let (start_s, end_s) = (
            start.format(DATE_FORMAT).to_string(),
            end.format(DATE_FORMAT).to_string(),
        );

        let mut available = false;
        let mut observations = Vec::new();
        for r in restaurants {
            let (Some(lat), Some(lon)) = (r.latitude, r.longitude) else {
                debug!(restaurant_id = r.id, "No coordinates; weather skipped");
                continue;
            };

            let fetched = match &client {
                Some(c) => match c.get_daily(r.id, lat, lon, start, end).await {
                    Ok(obs) => Some(obs),
                    Err(e) => {
                        warn!(restaurant_id = r.id, error = %e, "Weather API unavailable; using cache");
                        None
                    }
                },
                None => None,
            };

            match fetched {
                Some(obs) => {
                    let rows: Vec<WeatherCacheRecord> = obs
                        .iter()
                        .map(|o| WeatherCacheRecord {
                            restaurant_id: o.restaurant_id,
                            obs_date: o.date.format(DATE_FORMAT).to_string(),
                            temp: o.temp,
                            rain: o.rain,
                            wind: o.wind,
                            humidity: o.humidity,
                        })
                        .collect();
                    cache.upsert_weather(&rows).await?;
                    available = true;
                    observations.extend(obs);
                }
                None => {
                    let cached = cache.get_weather(r.id, &start_s, &end_s).await?;
                    if !cached.is_empty() {
                        available = true;
                    }
                    for c in cached {
                        observations.push(WeatherObservation {
                            restaurant_id: c.restaurant_id,
                            date: parse_date(&c.obs_date)?,
                            temp: c.temp,
                            rain: c.rain,
                            wind: c.wind,
                            humidity: c.humidity,
                        });
                    }
                }
            }
        }

        if !available {
            warn!("No weather source or cache available; weather columns left missing");
        }
        Ok(available.then_some(observations))
    }

    /// Static calendar plus API (or cache when the API fails), limited to
    /// national holidays and the configured regions
    async fn load_holidays(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Holiday>> {
        let cache = CacheRepository::new(&self.pool);
        let fixed = static_holidays(start, end);

        let fetched = if self.sources.offline {
            None
        } else {
            let client = NagerClient::new(self.sources.holiday_url.as_deref())?;
            match client.get_range(start, end).await {
                Ok(h) => Some(h),
                Err(e) => {
                    warn!(error = %e, "Holiday API unavailable; using cache");
                    None
                }
            }
        };

        // The cache keeps every region so a config change needs no refetch
        let calendar = match fetched {
            Some(api) => {
                let rows: Vec<HolidayCacheRecord> = api
                    .iter()
                    .map(|h| HolidayCacheRecord {
                        holiday_date: h.date.format(DATE_FORMAT).to_string(),
                        name: h.name.clone(),
                        region: h.region.clone(),
                    })
                    .collect();
                cache.upsert_holidays(&rows).await?;
                api
            }
            None => cache
                .get_holidays(
                    &start.format(DATE_FORMAT).to_string(),
                    &end.format(DATE_FORMAT).to_string(),
                )
                .await?
                .into_iter()
                .map(|c| -> Result<Holiday> {
                    Ok(Holiday {
                        date: parse_date(&c.holiday_date)?,
                        name: c.name,
                        region: c.region,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        };

        let holidays = merge_holidays([
            applicable_holidays(calendar, &self.sources.holiday_regions),
            fixed,
        ]);
        debug!(count = holidays.len(), "Holidays loaded");
        Ok(holidays)
    }
}

#[async_trait]
impl JobHandler for DatasetBuilder {
    async fn handle(&self, job: &Job) -> Result<()> {
        match job.job_type.as_str() {
            REFRESH_DATASET_JOB => self.build(None).await.map(|_| ()),
            other => bail!("unknown job type '{other}'"),
        }
    }
}
