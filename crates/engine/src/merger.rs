//! Dataset merger: joins every per-day signal into one gap-free row per
//! (restaurant, date) and derives lag and rolling-window features.

use crate::fraud::FakeOrderAdjuster;
use crate::types::{
    money_to_f64, DailyRecord, FakeOrderRecord, Holiday, Platform, PlatformDay,
    TourismObservation, WeatherObservation, EXTERNAL_SERIES,
};
use anyhow::{bail, Result};
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

/// Lags (days prior) computed for sales and orders
pub const LAGS: [usize; 3] = [1, 3, 7];
/// Trailing windows for sales and orders, in days
pub const ROLLING_WINDOWS: [usize; 2] = [7, 30];
/// Weather and tourism get every lag up to this many days
pub const EXTERNAL_MAX_LAG: usize = 7;
pub const EXTERNAL_ROLLING_WINDOW: usize = 7;

/// Date range and restaurants to merge
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub restaurant_ids: Vec<i64>,
}

/// Everything the merger joins.
///
/// `None` marks a source that was unavailable with no cache: its columns stay
/// missing for every day. `Some(vec![])` is an available source with no rows.
#[derive(Debug, Clone, Default)]
pub struct MergeSources {
    pub platform_days: Vec<PlatformDay>,
    pub fake_orders: Vec<FakeOrderRecord>,
    pub weather: Option<Vec<WeatherObservation>>,
    pub holidays: Option<Vec<Holiday>>,
    pub tourism: Option<Vec<TourismObservation>>,
}

/// Running sums for one restaurant-day
#[derive(Debug, Default)]
struct DayAccumulator {
    rows: u32,
    sales: HashMap<Platform, f64>,
    sales_raw: f64,
    orders: HashMap<Platform, f64>,
    orders_raw: HashMap<Platform, f64>,
    ads_spend: HashMap<Platform, f64>,
    ads_sales: f64,
    impressions: f64,
    menu_visits: f64,
    add_to_cart: f64,
    ads_orders: f64,
    cancelled_orders: f64,
    preparation: Mean,
    delivery: Mean,
    accepting: Mean,
    offline_minutes: f64,
    rating: Mean,
    new_customers: f64,
    repeat_customers: f64,
    reactivated_customers: f64,
    payouts: f64,
    ratings: [f64; 5],
}

#[derive(Debug, Default, Clone, Copy)]
struct Mean {
    sum: f64,
    n: u32,
}

impl Mean {
    fn push(&mut self, v: Option<f64>) {
        if let Some(v) = v.filter(|v| v.is_finite()) {
            self.sum += v;
            self.n += 1;
        }
    }

    fn get(&self) -> Option<f64> {
        (self.n > 0).then(|| self.sum / self.n as f64)
    }
}

pub struct DatasetMerger;

impl DatasetMerger {
    /// Merge sources into exactly one record per (restaurant, date) in range,
    /// sorted by restaurant then date.
    pub fn merge(request: &MergeRequest, sources: &MergeSources) -> Result<Vec<DailyRecord>> {
        if request.start > request.end {
            bail!(
                "merge range start {} is after end {}",
                request.start,
                request.end
            );
        }

        let restaurants: BTreeSet<i64> = request.restaurant_ids.iter().copied().collect();
        let adjuster = FakeOrderAdjuster::new(&sources.fake_orders);

        let mut days: HashMap<(i64, NaiveDate), DayAccumulator> = HashMap::new();
        let mut skipped = 0usize;
        for pd in &sources.platform_days {
            if !restaurants.contains(&pd.restaurant_id)
                || pd.date < request.start
                || pd.date > request.end
            {
                skipped += 1;
                continue;
            }
            let adj = adjuster.adjust(pd);
            let acc = days.entry((pd.restaurant_id, pd.date)).or_default();

            acc.rows += 1;
            *acc.sales.entry(pd.platform).or_default() += money_to_f64(adj.sales);
            acc.sales_raw += money_to_f64(adj.sales_raw);
            *acc.orders.entry(pd.platform).or_default() += adj.orders as f64;
            *acc.orders_raw.entry(pd.platform).or_default() += adj.orders_raw as f64;
            *acc.ads_spend.entry(pd.platform).or_default() += money_to_f64(pd.ads_spend);
            acc.ads_sales += money_to_f64(pd.ads_sales);
            acc.impressions += pd.impressions as f64;
            acc.menu_visits += pd.menu_visits as f64;
            acc.add_to_cart += pd.add_to_cart as f64;
            acc.ads_orders += pd.ads_orders as f64;
            acc.cancelled_orders += pd.cancelled_orders as f64;
            acc.preparation.push(pd.preparation_time);
            acc.delivery.push(pd.delivery_time);
            acc.accepting.push(pd.accepting_time);
            acc.offline_minutes += pd.offline_minutes;
            acc.rating.push(pd.rating);
            acc.new_customers += pd.new_customers as f64;
            acc.repeat_customers += pd.repeat_customers as f64;
            acc.reactivated_customers += pd.reactivated_customers as f64;
            acc.payouts += money_to_f64(pd.payouts);
            acc.ratings[0] += pd.rating_one as f64;
            acc.ratings[1] += pd.rating_two as f64;
            acc.ratings[2] += pd.rating_three as f64;
            acc.ratings[3] += pd.rating_four as f64;
            acc.ratings[4] += pd.rating_five as f64;
        }

        let weather: Option<HashMap<(i64, NaiveDate), &WeatherObservation>> = sources
            .weather
            .as_ref()
            .map(|obs| obs.iter().map(|w| ((w.restaurant_id, w.date), w)).collect());
        let holidays: Option<HashSet<NaiveDate>> = sources
            .holidays
            .as_ref()
            .map(|hs| hs.iter().map(|h| h.date).collect());
        let tourism = sources.tourism.as_deref().and_then(TourismSeries::new);

        let mut out = Vec::with_capacity(
            restaurants.len() * ((request.end - request.start).num_days() as usize + 1),
        );

        for &restaurant_id in &restaurants {
            let mut series: Vec<DailyRecord> = Vec::new();
            for date in request.start.iter_days().take_while(|d| *d <= request.end) {
                let mut rec = DailyRecord::empty(restaurant_id, date);

                if let Some(acc) = days.get(&(restaurant_id, date)) {
                    fill_platform_metrics(&mut rec, acc);
                }

                if let Some(weather) = &weather {
                    if let Some(w) = weather.get(&(restaurant_id, date)) {
                        rec.temp = w.temp;
                        rec.rain = w.rain;
                        rec.wind = w.wind;
                        rec.humidity = w.humidity;
                    }
                }
                if let Some(holidays) = &holidays {
                    rec.is_holiday = Some(if holidays.contains(&date) { 1.0 } else { 0.0 });
                }
                if let Some(tourism) = &tourism {
                    rec.tourist_flow = Some(tourism.at(date));
                }

                series.push(rec);
            }

            add_temporal_features(&mut series);
            out.extend(series);
        }

        info!(
            restaurants = restaurants.len(),
            rows = out.len(),
            active_days = days.len(),
            skipped_rows = skipped,
            "Dataset merged"
        );
        Ok(out)
    }
}

fn fill_platform_metrics(rec: &mut DailyRecord, acc: &DayAccumulator) {
    let get = |m: &HashMap<Platform, f64>, p: Platform| m.get(&p).copied().unwrap_or(0.0);

    rec.platform_rows = acc.rows;
    rec.grab_sales = get(&acc.sales, Platform::Grab);
    rec.gojek_sales = get(&acc.sales, Platform::Gojek);
    rec.total_sales = rec.grab_sales + rec.gojek_sales;
    rec.total_sales_raw = acc.sales_raw;
    rec.grab_orders_raw = get(&acc.orders_raw, Platform::Grab);
    rec.gojek_orders_raw = get(&acc.orders_raw, Platform::Gojek);
    rec.grab_orders = get(&acc.orders, Platform::Grab);
    rec.gojek_orders = get(&acc.orders, Platform::Gojek);
    rec.total_orders = rec.grab_orders + rec.gojek_orders;
    rec.grab_ads_spend = get(&acc.ads_spend, Platform::Grab);
    rec.gojek_ads_spend = get(&acc.ads_spend, Platform::Gojek);
    rec.ads_spend_total = rec.grab_ads_spend + rec.gojek_ads_spend;
    rec.ads_sales_total = acc.ads_sales;
    rec.impressions = acc.impressions;
    rec.menu_visits = acc.menu_visits;
    rec.add_to_cart = acc.add_to_cart;
    rec.ads_orders = acc.ads_orders;
    rec.cancelled_orders = acc.cancelled_orders;
    rec.preparation_time = acc.preparation.get();
    rec.delivery_time = acc.delivery.get();
    rec.accepting_time = acc.accepting.get();
    rec.offline_minutes = acc.offline_minutes;
    rec.rating = acc.rating.get();
    rec.new_customers = acc.new_customers;
    rec.repeat_customers = acc.repeat_customers;
    rec.reactivated_customers = acc.reactivated_customers;
    rec.payouts = acc.payouts;
    rec.rating_one = acc.ratings[0];
    rec.rating_two = acc.ratings[1];
    rec.rating_three = acc.ratings[2];
    rec.rating_four = acc.ratings[3];
    rec.rating_five = acc.ratings[4];
}

/// Lags and trailing means over one restaurant's contiguous daily series.
/// Positions before a full window are left missing. `*_rolling_N` windows end
/// on the day itself, `*_rolling_N_prev` windows end the day before.
fn add_temporal_features(series: &mut [DailyRecord]) {
    let sales: Vec<f64> = series.iter().map(|r| r.total_sales).collect();
    let orders: Vec<f64> = series.iter().map(|r| r.total_orders).collect();

    let lag = |values: &[f64], i: usize, n: usize| -> Option<f64> { (i >= n).then(|| values[i - n]) };
    let rolling = |values: &[f64], i: usize, w: usize| -> Option<f64> {
        (i + 1 >= w).then(|| values[i + 1 - w..=i].iter().sum::<f64>() / w as f64)
    };
    let rolling_prev = |values: &[f64], i: usize, w: usize| -> Option<f64> {
        (i >= w).then(|| values[i - w..i].iter().sum::<f64>() / w as f64)
    };

    let [short, long] = ROLLING_WINDOWS;
    for (i, rec) in series.iter_mut().enumerate() {
        rec.sales_lag_1 = lag(&sales, i, LAGS[0]);
        rec.sales_lag_3 = lag(&sales, i, LAGS[1]);
        rec.sales_lag_7 = lag(&sales, i, LAGS[2]);
        rec.orders_lag_1 = lag(&orders, i, LAGS[0]);
        rec.orders_lag_3 = lag(&orders, i, LAGS[1]);
        rec.orders_lag_7 = lag(&orders, i, LAGS[2]);
        rec.sales_rolling_7 = rolling(&sales, i, short);
        rec.sales_rolling_30 = rolling(&sales, i, long);
        rec.orders_rolling_7 = rolling(&orders, i, short);
        rec.orders_rolling_30 = rolling(&orders, i, long);
        rec.sales_rolling_7_prev = rolling_prev(&sales, i, short);
        rec.sales_rolling_30_prev = rolling_prev(&sales, i, long);
        rec.orders_rolling_7_prev = rolling_prev(&orders, i, short);
        rec.orders_rolling_30_prev = rolling_prev(&orders, i, long);
    }

    let window = EXTERNAL_ROLLING_WINDOW;
    for name in EXTERNAL_SERIES {
        let values: Vec<Option<f64>> = series.iter().map(|r| r.value(name).flatten()).collect();
        for (i, rec) in series.iter_mut().enumerate() {
            let Some((lags, rolling_slot)) = rec.external_history_mut(name) else {
                continue;
            };
            for (k, slot) in lags.into_iter().enumerate().take(EXTERNAL_MAX_LAG) {
                let n = k + 1;
                *slot = if i >= n { values[i - n] } else { None };
            }
            // A gap anywhere in the window leaves the mean missing
            *rolling_slot = if i + 1 >= window {
                values[i + 1 - window..=i]
                    .iter()
                    .copied()
                    .sum::<Option<f64>>()
                    .map(|total| total / window as f64)
            } else {
                None
            };
        }
    }
    debug!(days = series.len(), "Temporal features computed");
}

/// Tourism observations resampled to daily: forward fill, back fill before the first
struct TourismSeries {
    points: Vec<(NaiveDate, f64)>,
}

impl TourismSeries {
    fn new(obs: &[TourismObservation]) -> Option<Self> {
        let mut points: Vec<(NaiveDate, f64)> = obs
            .iter()
            .filter(|o| o.arrivals.is_finite())
            .map(|o| (o.date, o.arrivals))
            .collect();
        if points.is_empty() {
            return None;
        }
        points.sort_by_key(|(d, _)| *d);
        Some(Self { points })
    }

    fn at(&self, date: NaiveDate) -> f64 {
        let idx = self.points.partition_point(|(d, _)| *d <= date);
        if idx == 0 {
            self.points[0].1
        } else {
            self.points[idx - 1].1
        }
    }
}
