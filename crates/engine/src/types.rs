//! Core domain types: platform observations, source records and the merged daily record

use anyhow::{anyhow, Context, Result};
use chrono::{Datelike, NaiveDate, Weekday};
use persistence::repository::PlatformStatsRecord;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// ISO date format used across storage, CSV and HTTP
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Column the model forecasts
pub const TARGET_COLUMN: &str = "total_sales";

/// Delivery platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Grab,
    Gojek,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Grab, Platform::Gojek];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Grab => "grab",
            Platform::Gojek => "gojek",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grab" => Ok(Platform::Grab),
            "gojek" | "go-jek" | "gofood" => Ok(Platform::Gojek),
            other => Err(anyhow!("unknown platform '{other}'")),
        }
    }
}

/// One platform's observations for one restaurant-day, with money as Decimal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformDay {
    pub restaurant_id: i64,
    pub date: NaiveDate,
    pub platform: Platform,
    pub sales: Decimal,
    pub orders: i64,
    pub ads_spend: Decimal,
    pub ads_sales: Decimal,
    pub impressions: i64,
    pub menu_visits: i64,
    pub add_to_cart: i64,
    pub ads_orders: i64,
    pub cancelled_orders: i64,
    pub preparation_time: Option<f64>,
    pub delivery_time: Option<f64>,
    pub accepting_time: Option<f64>,
    pub offline_minutes: f64,
    pub rating: Option<f64>,
    pub new_customers: i64,
    pub repeat_customers: i64,
    pub reactivated_customers: i64,
    pub payouts: Decimal,
    pub rating_five: i64,
    pub rating_four: i64,
    pub rating_three: i64,
    pub rating_two: i64,
    pub rating_one: i64,
}

impl PlatformDay {
    /// An observation with every metric at zero
    pub fn empty(restaurant_id: i64, date: NaiveDate, platform: Platform) -> Self {
        Self {
            restaurant_id,
            date,
            platform,
            sales: Decimal::ZERO,
            orders: 0,
            ads_spend: Decimal::ZERO,
            ads_sales: Decimal::ZERO,
            impressions: 0,
            menu_visits: 0,
            add_to_cart: 0,
            ads_orders: 0,
            cancelled_orders: 0,
            preparation_time: None,
            delivery_time: None,
            accepting_time: None,
            offline_minutes: 0.0,
            rating: None,
            new_customers: 0,
            repeat_customers: 0,
            reactivated_customers: 0,
            payouts: Decimal::ZERO,
            rating_five: 0,
            rating_four: 0,
            rating_three: 0,
            rating_two: 0,
            rating_one: 0,
        }
    }

    /// Storage representation (money as TEXT)
    pub fn to_record(&self) -> PlatformStatsRecord {
        PlatformStatsRecord {
            id: None,
            restaurant_id: self.restaurant_id,
            stat_date: self.date.format(DATE_FORMAT).to_string(),
            platform: self.platform.as_str().to_string(),
            sales: self.sales.to_string(),
            orders: self.orders,
            ads_spend: self.ads_spend.to_string(),
            ads_sales: self.ads_sales.to_string(),
            impressions: self.impressions,
            menu_visits: self.menu_visits,
            add_to_cart: self.add_to_cart,
            ads_orders: self.ads_orders,
            cancelled_orders: self.cancelled_orders,
            preparation_time: self.preparation_time,
            delivery_time: self.delivery_time,
            accepting_time: self.accepting_time,
            offline_minutes: self.offline_minutes,
            rating: self.rating,
            new_customers: self.new_customers,
            repeat_customers: self.repeat_customers,
            reactivated_customers: self.reactivated_customers,
            payouts: self.payouts.to_string(),
            rating_five: self.rating_five,
            rating_four: self.rating_four,
            rating_three: self.rating_three,
            rating_two: self.rating_two,
            rating_one: self.rating_one,
            updated_at: None,
        }
    }
}

impl TryFrom<&PlatformStatsRecord> for PlatformDay {
    type Error = anyhow::Error;

    fn try_from(r: &PlatformStatsRecord) -> Result<Self> {
        let money = |field: &str, value: &str| -> Result<Decimal> {
            Decimal::from_str(value.trim())
                .with_context(|| format!("invalid {field} '{value}' for restaurant {}", r.restaurant_id))
        };

        Ok(Self {
            restaurant_id: r.restaurant_id,
            date: NaiveDate::parse_from_str(&r.stat_date, DATE_FORMAT)
                .with_context(|| format!("invalid stat_date '{}'", r.stat_date))?,
            platform: r.platform.parse()?,
            sales: money("sales", &r.sales)?,
            orders: r.orders,
            ads_spend: money("ads_spend", &r.ads_spend)?,
            ads_sales: money("ads_sales", &r.ads_sales)?,
            impressions: r.impressions,
            menu_visits: r.menu_visits,
            add_to_cart: r.add_to_cart,
            ads_orders: r.ads_orders,
            cancelled_orders: r.cancelled_orders,
            preparation_time: r.preparation_time,
            delivery_time: r.delivery_time,
            accepting_time: r.accepting_time,
            offline_minutes: r.offline_minutes,
            rating: r.rating,
            new_customers: r.new_customers,
            repeat_customers: r.repeat_customers,
            reactivated_customers: r.reactivated_customers,
            payouts: money("payouts", &r.payouts)?,
            rating_five: r.rating_five,
            rating_four: r.rating_four,
            rating_three: r.rating_three,
            rating_two: r.rating_two,
            rating_one: r.rating_one,
        })
    }
}

/// Orders flagged as fake/test on the external reference sheet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FakeOrderRecord {
    pub restaurant_id: i64,
    pub date: NaiveDate,
    pub platform: Platform,
    pub count: i64,
    /// Flagged revenue, when the sheet records it
    #[serde(default)]
    pub amount: Option<Decimal>,
}

/// Daily weather at a restaurant's location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub restaurant_id: i64,
    pub date: NaiveDate,
    pub temp: Option<f64>,
    pub rain: Option<f64>,
    pub wind: Option<f64>,
    pub humidity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holiday {
    pub date: NaiveDate,
    pub name: String,
    pub region: String,
}

/// Tourist arrivals observation (usually monthly)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TourismObservation {
    pub date: NaiveDate,
    pub arrivals: f64,
}

/// One merged row per (restaurant, calendar date).
///
/// Optional columns are `None` when undefined; they are never zero-filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub restaurant_id: i64,
    pub date: NaiveDate,

    pub grab_sales: f64,
    pub gojek_sales: f64,
    pub total_sales: f64,
    pub total_sales_raw: f64,

    pub grab_orders_raw: f64,
    pub gojek_orders_raw: f64,
    pub grab_orders: f64,
    pub gojek_orders: f64,
    pub total_orders: f64,

    pub grab_ads_spend: f64,
    pub gojek_ads_spend: f64,
    pub ads_spend_total: f64,
    pub ads_sales_total: f64,
    pub impressions: f64,
    pub menu_visits: f64,
    pub add_to_cart: f64,
    pub ads_orders: f64,
    pub cancelled_orders: f64,

    pub preparation_time: Option<f64>,
    pub delivery_time: Option<f64>,
    pub accepting_time: Option<f64>,
    pub offline_minutes: f64,
    pub rating: Option<f64>,

    pub new_customers: f64,
    pub repeat_customers: f64,
    pub reactivated_customers: f64,
    pub payouts: f64,
    pub rating_five: f64,
    pub rating_four: f64,
    pub rating_three: f64,
    pub rating_two: f64,
    pub rating_one: f64,

    pub temp: Option<f64>,
    pub rain: Option<f64>,
    pub wind: Option<f64>,
    pub humidity: Option<f64>,
    pub is_holiday: Option<f64>,
    pub tourist_flow: Option<f64>,

    /// Monday = 0
    pub day_of_week: f64,
    pub is_weekend: f64,

    pub sales_lag_1: Option<f64>,
    pub sales_lag_3: Option<f64>,
    pub sales_lag_7: Option<f64>,
    pub orders_lag_1: Option<f64>,
    pub orders_lag_3: Option<f64>,
    pub orders_lag_7: Option<f64>,
    /// Rolling means over windows ending on this day (include its own sales)
    pub sales_rolling_7: Option<f64>,
    pub sales_rolling_30: Option<f64>,
    pub orders_rolling_7: Option<f64>,
    pub orders_rolling_30: Option<f64>,
    /// Rolling means over windows ending the day before
    pub sales_rolling_7_prev: Option<f64>,
    pub sales_rolling_30_prev: Option<f64>,
    pub orders_rolling_7_prev: Option<f64>,
    pub orders_rolling_30_prev: Option<f64>,

    pub temp_lag_1: Option<f64>,
    pub temp_lag_2: Option<f64>,
    pub temp_lag_3: Option<f64>,
    pub temp_lag_4: Option<f64>,
    pub temp_lag_5: Option<f64>,
    pub temp_lag_6: Option<f64>,
    pub temp_lag_7: Option<f64>,
    pub temp_rolling_7: Option<f64>,
    pub rain_lag_1: Option<f64>,
    pub rain_lag_2: Option<f64>,
    pub rain_lag_3: Option<f64>,
    pub rain_lag_4: Option<f64>,
    pub rain_lag_5: Option<f64>,
    pub rain_lag_6: Option<f64>,
    pub rain_lag_7: Option<f64>,
    pub rain_rolling_7: Option<f64>,
    pub wind_lag_1: Option<f64>,
    pub wind_lag_2: Option<f64>,
    pub wind_lag_3: Option<f64>,
    pub wind_lag_4: Option<f64>,
    pub wind_lag_5: Option<f64>,
    pub wind_lag_6: Option<f64>,
    pub wind_lag_7: Option<f64>,
    pub wind_rolling_7: Option<f64>,
    pub humidity_lag_1: Option<f64>,
    pub humidity_lag_2: Option<f64>,
    pub humidity_lag_3: Option<f64>,
    pub humidity_lag_4: Option<f64>,
    pub humidity_lag_5: Option<f64>,
    pub humidity_lag_6: Option<f64>,
    pub humidity_lag_7: Option<f64>,
    pub humidity_rolling_7: Option<f64>,
    pub tourist_flow_lag_1: Option<f64>,
    pub tourist_flow_lag_2: Option<f64>,
    pub tourist_flow_lag_3: Option<f64>,
    pub tourist_flow_lag_4: Option<f64>,
    pub tourist_flow_lag_5: Option<f64>,
    pub tourist_flow_lag_6: Option<f64>,
    pub tourist_flow_lag_7: Option<f64>,
    pub tourist_flow_rolling_7: Option<f64>,

    /// Platform rows merged into this day; 0 means no activity
    pub platform_rows: u32,
}

/// Weather and tourism columns that carry their own lag and rolling history
pub const EXTERNAL_SERIES: [&str; 5] = ["temp", "rain", "wind", "humidity", "tourist_flow"];

/// Numeric columns of [`DailyRecord`] addressable by name, in dataset order
pub const NUMERIC_COLUMNS: &[&str] = &[
    "grab_sales",
    "gojek_sales",
    "total_sales",
    "total_sales_raw",
    "grab_orders_raw",
    "gojek_orders_raw",
    "grab_orders",
    "gojek_orders",
    "total_orders",
    "grab_ads_spend",
    "gojek_ads_spend",
    "ads_spend_total",
    "ads_sales_total",
    "impressions",
    "menu_visits",
    "add_to_cart",
    "ads_orders",
    "cancelled_orders",
    "preparation_time",
    "delivery_time",
    "accepting_time",
    "offline_minutes",
    "rating",
    "new_customers",
    "repeat_customers",
    "reactivated_customers",
    "payouts",
    "rating_five",
    "rating_four",
    "rating_three",
    "rating_two",
    "rating_one",
    "temp",
    "rain",
    "wind",
    "humidity",
    "is_holiday",
    "tourist_flow",
    "day_of_week",
    "is_weekend",
    "sales_lag_1",
    "sales_lag_3",
    "sales_lag_7",
    "orders_lag_1",
    "orders_lag_3",
    "orders_lag_7",
    "sales_rolling_7",
    "sales_rolling_30",
    "orders_rolling_7",
    "orders_rolling_30",
    "sales_rolling_7_prev",
    "sales_rolling_30_prev",
    "orders_rolling_7_prev",
    "orders_rolling_30_prev",
    "temp_lag_1",
    "temp_lag_2",
    "temp_lag_3",
    "temp_lag_4",
    "temp_lag_5",
    "temp_lag_6",
    "temp_lag_7",
    "temp_rolling_7",
    "rain_lag_1",
    "rain_lag_2",
    "rain_lag_3",
    "rain_lag_4",
    "rain_lag_5",
    "rain_lag_6",
    "rain_lag_7",
    "rain_rolling_7",
    "wind_lag_1",
    "wind_lag_2",
    "wind_lag_3",
    "wind_lag_4",
    "wind_lag_5",
    "wind_lag_6",
    "wind_lag_7",
    "wind_rolling_7",
    "humidity_lag_1",
    "humidity_lag_2",
    "humidity_lag_3",
    "humidity_lag_4",
    "humidity_lag_5",
    "humidity_lag_6",
    "humidity_lag_7",
    "humidity_rolling_7",
    "tourist_flow_lag_1",
    "tourist_flow_lag_2",
    "tourist_flow_lag_3",
    "tourist_flow_lag_4",
    "tourist_flow_lag_5",
    "tourist_flow_lag_6",
    "tourist_flow_lag_7",
    "tourist_flow_rolling_7",
];

impl DailyRecord {
    /// A zero-filled row for a day without any platform activity
    pub fn empty(restaurant_id: i64, date: NaiveDate) -> Self {
        let weekday = date.weekday();
        Self {
            restaurant_id,
            date,
            grab_sales: 0.0,
            gojek_sales: 0.0,
            total_sales: 0.0,
            total_sales_raw: 0.0,
            grab_orders_raw: 0.0,
            gojek_orders_raw: 0.0,
            grab_orders: 0.0,
            gojek_orders: 0.0,
            total_orders: 0.0,
            grab_ads_spend: 0.0,
            gojek_ads_spend: 0.0,
            ads_spend_total: 0.0,
            ads_sales_total: 0.0,
            impressions: 0.0,
            menu_visits: 0.0,
            add_to_cart: 0.0,
            ads_orders: 0.0,
            cancelled_orders: 0.0,
            preparation_time: None,
            delivery_time: None,
            accepting_time: None,
            offline_minutes: 0.0,
            rating: None,
            new_customers: 0.0,
            repeat_customers: 0.0,
            reactivated_customers: 0.0,
            payouts: 0.0,
            rating_five: 0.0,
            rating_four: 0.0,
            rating_three: 0.0,
            rating_two: 0.0,
            rating_one: 0.0,
            temp: None,
            rain: None,
            wind: None,
            humidity: None,
            is_holiday: None,
            tourist_flow: None,
            day_of_week: weekday.num_days_from_monday() as f64,
            is_weekend: if matches!(weekday, Weekday::Sat | Weekday::Sun) { 1.0 } else { 0.0 },
            sales_lag_1: None,
            sales_lag_3: None,
            sales_lag_7: None,
            orders_lag_1: None,
            orders_lag_3: None,
            orders_lag_7: None,
            sales_rolling_7: None,
            sales_rolling_30: None,
            orders_rolling_7: None,
            orders_rolling_30: None,
            sales_rolling_7_prev: None,
            sales_rolling_30_prev: None,
            orders_rolling_7_prev: None,
            orders_rolling_30_prev: None,
            temp_lag_1: None,
            temp_lag_2: None,
            temp_lag_3: None,
            temp_lag_4: None,
            temp_lag_5: None,
            temp_lag_6: None,
            temp_lag_7: None,
            temp_rolling_7: None,
            rain_lag_1: None,
            rain_lag_2: None,
            rain_lag_3: None,
            rain_lag_4: None,
            rain_lag_5: None,
            rain_lag_6: None,
            rain_lag_7: None,
            rain_rolling_7: None,
            wind_lag_1: None,
            wind_lag_2: None,
            wind_lag_3: None,
            wind_lag_4: None,
            wind_lag_5: None,
            wind_lag_6: None,
            wind_lag_7: None,
            wind_rolling_7: None,
            humidity_lag_1: None,
            humidity_lag_2: None,
            humidity_lag_3: None,
            humidity_lag_4: None,
            humidity_lag_5: None,
            humidity_lag_6: None,
            humidity_lag_7: None,
            humidity_rolling_7: None,
            tourist_flow_lag_1: None,
            tourist_flow_lag_2: None,
            tourist_flow_lag_3: None,
            tourist_flow_lag_4: None,
            tourist_flow_lag_5: None,
            tourist_flow_lag_6: None,
            tourist_flow_lag_7: None,
            tourist_flow_rolling_7: None,
            platform_rows: 0,
        }
    }

    /// Look up a numeric column by name.
    ///
    /// Returns `None` for an unknown column, `Some(None)` for a missing value.
    pub fn value(&self, column: &str) -> Option<Option<f64>> {
        let v = match column {
            "grab_sales" => Some(self.grab_sales),
            "gojek_sales" => Some(self.gojek_sales),
            "total_sales" => Some(self.total_sales),
            "total_sales_raw" => Some(self.total_sales_raw),
            "grab_orders_raw" => Some(self.grab_orders_raw),
            "gojek_orders_raw" => Some(self.gojek_orders_raw),
            "grab_orders" => Some(self.grab_orders),
            "gojek_orders" => Some(self.gojek_orders),
            "total_orders" => Some(self.total_orders),
            "grab_ads_spend" => Some(self.grab_ads_spend),
            "gojek_ads_spend" => Some(self.gojek_ads_spend),
            "ads_spend_total" => Some(self.ads_spend_total),
            "ads_sales_total" => Some(self.ads_sales_total),
            "impressions" => Some(self.impressions),
            "menu_visits" => Some(self.menu_visits),
            "add_to_cart" => Some(self.add_to_cart),
            "ads_orders" => Some(self.ads_orders),
            "cancelled_orders" => Some(self.cancelled_orders),
            "preparation_time" => self.preparation_time,
            "delivery_time" => self.delivery_time,
            "accepting_time" => self.accepting_time,
            "offline_minutes" => Some(self.offline_minutes),
            "rating" => self.rating,
            "new_customers" => Some(self.new_customers),
            "repeat_customers" => Some(self.repeat_customers),
            "reactivated_customers" => Some(self.reactivated_customers),
            "payouts" => Some(self.payouts),
            "rating_five" => Some(self.rating_five),
            "rating_four" => Some(self.rating_four),
            "rating_three" => Some(self.rating_three),
            "rating_two" => Some(self.rating_two),
            "rating_one" => Some(self.rating_one),
            "temp" => self.temp,
            "rain" => self.rain,
            "wind" => self.wind,
            "humidity" => self.humidity,
            "is_holiday" => self.is_holiday,
            "tourist_flow" => self.tourist_flow,
            "day_of_week" => Some(self.day_of_week),
            "is_weekend" => Some(self.is_weekend),
            "sales_lag_1" => self.sales_lag_1,
            "sales_lag_3" => self.sales_lag_3,
            "sales_lag_7" => self.sales_lag_7,
            "orders_lag_1" => self.orders_lag_1,
            "orders_lag_3" => self.orders_lag_3,
            "orders_lag_7" => self.orders_lag_7,
            "sales_rolling_7" => self.sales_rolling_7,
            "sales_rolling_30" => self.sales_rolling_30,
            "orders_rolling_7" => self.orders_rolling_7,
            "orders_rolling_30" => self.orders_rolling_30,
            "sales_rolling_7_prev" => self.sales_rolling_7_prev,
            "sales_rolling_30_prev" => self.sales_rolling_30_prev,
            "orders_rolling_7_prev" => self.orders_rolling_7_prev,
            "orders_rolling_30_prev" => self.orders_rolling_30_prev,
            "temp_lag_1" => self.temp_lag_1,
            "temp_lag_2" => self.temp_lag_2,
            "temp_lag_3" => self.temp_lag_3,
            "temp_lag_4" => self.temp_lag_4,
            "temp_lag_5" => self.temp_lag_5,
            "temp_lag_6" => self.temp_lag_6,
            "temp_lag_7" => self.temp_lag_7,
            "temp_rolling_7" => self.temp_rolling_7,
            "rain_lag_1" => self.rain_lag_1,
            "rain_lag_2" => self.rain_lag_2,
            "rain_lag_3" => self.rain_lag_3,
            "rain_lag_4" => self.rain_lag_4,
            "rain_lag_5" => self.rain_lag_5,
            "rain_lag_6" => self.rain_lag_6,
            "rain_lag_7" => self.rain_lag_7,
            "rain_rolling_7" => self.rain_rolling_7,
            "wind_lag_1" => self.wind_lag_1,
            "wind_lag_2" => self.wind_lag_2,
            "wind_lag_3" => self.wind_lag_3,
            "wind_lag_4" => self.wind_lag_4,
            "wind_lag_5" => self.wind_lag_5,
            "wind_lag_6" => self.wind_lag_6,
            "wind_lag_7" => self.wind_lag_7,
            "wind_rolling_7" => self.wind_rolling_7,
            "humidity_lag_1" => self.humidity_lag_1,
            "humidity_lag_2" => self.humidity_lag_2,
            "humidity_lag_3" => self.humidity_lag_3,
            "humidity_lag_4" => self.humidity_lag_4,
            "humidity_lag_5" => self.humidity_lag_5,
            "humidity_lag_6" => self.humidity_lag_6,
            "humidity_lag_7" => self.humidity_lag_7,
            "humidity_rolling_7" => self.humidity_rolling_7,
            "tourist_flow_lag_1" => self.tourist_flow_lag_1,
            "tourist_flow_lag_2" => self.tourist_flow_lag_2,
            "tourist_flow_lag_3" => self.tourist_flow_lag_3,
            "tourist_flow_lag_4" => self.tourist_flow_lag_4,
            "tourist_flow_lag_5" => self.tourist_flow_lag_5,
            "tourist_flow_lag_6" => self.tourist_flow_lag_6,
            "tourist_flow_lag_7" => self.tourist_flow_lag_7,
            "tourist_flow_rolling_7" => self.tourist_flow_rolling_7,
            _ => return None,
        };
        Some(v)
    }

    /// Lag slots (1..=7 days) and the 7-day rolling slot of an external series
    pub fn external_history_mut(&mut self, series: &str) -> Option<([&mut Option<f64>; 7], &mut Option<f64>)> {
        let slots = match series {
            "temp" => (
                [
                    &mut self.temp_lag_1,
                    &mut self.temp_lag_2,
                    &mut self.temp_lag_3,
                    &mut self.temp_lag_4,
                    &mut self.temp_lag_5,
                    &mut self.temp_lag_6,
                    &mut self.temp_lag_7,
                ],
                &mut self.temp_rolling_7,
            ),
            "rain" => (
                [
                    &mut self.rain_lag_1,
                    &mut self.rain_lag_2,
                    &mut self.rain_lag_3,
                    &mut self.rain_lag_4,
                    &mut self.rain_lag_5,
                    &mut self.rain_lag_6,
                    &mut self.rain_lag_7,
                ],
                &mut self.rain_rolling_7,
            ),
            "wind" => (
                [
                    &mut self.wind_lag_1,
                    &mut self.wind_lag_2,
                    &mut self.wind_lag_3,
                    &mut self.wind_lag_4,
                    &mut self.wind_lag_5,
                    &mut self.wind_lag_6,
                    &mut self.wind_lag_7,
                ],
                &mut self.wind_rolling_7,
            ),
            "humidity" => (
                [
                    &mut self.humidity_lag_1,
                    &mut self.humidity_lag_2,
                    &mut self.humidity_lag_3,
                    &mut self.humidity_lag_4,
                    &mut self.humidity_lag_5,
                    &mut self.humidity_lag_6,
                    &mut self.humidity_lag_7,
                ],
                &mut self.humidity_rolling_7,
            ),
            "tourist_flow" => (
                [
                    &mut self.tourist_flow_lag_1,
                    &mut self.tourist_flow_lag_2,
                    &mut self.tourist_flow_lag_3,
                    &mut self.tourist_flow_lag_4,
                    &mut self.tourist_flow_lag_5,
                    &mut self.tourist_flow_lag_6,
                    &mut self.tourist_flow_lag_7,
                ],
                &mut self.tourist_flow_rolling_7,
            ),
            _ => return None,
        };
        Some(slots)
    }

    pub fn has_activity(&self) -> bool {
        self.platform_rows > 0
    }
}

/// Decimal IDR amount as f64 for feature/statistics arithmetic
pub fn money_to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).with_context(|| format!("invalid date '{s}'"))
}
