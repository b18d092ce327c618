//! Period statistics for report sections 1–7 (aggregate arithmetic only)

use crate::types::DailyRecord;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Offline time that counts as a platform outage
pub const OUTAGE_MINUTES: f64 = 60.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthStats {
    /// `YYYY-MM`
    pub month: String,
    pub total_sales: f64,
    pub days: usize,
    pub avg_per_day: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayFigure {
    pub date: NaiveDate,
    pub total_sales: f64,
    pub grab_sales: f64,
    pub gojek_sales: f64,
    pub grab_orders: f64,
    pub gojek_orders: f64,
}

impl From<&DailyRecord> for DayFigure {
    fn from(r: &DailyRecord) -> Self {
        Self {
            date: r.date,
            total_sales: r.total_sales,
            grab_sales: r.grab_sales,
            gojek_sales: r.gojek_sales,
            grab_orders: r.grab_orders,
            gojek_orders: r.gojek_orders,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SalesSummary {
    pub total_sales: f64,
    pub grab_sales: f64,
    pub gojek_sales: f64,
    pub total_orders: f64,
    pub grab_orders: f64,
    pub gojek_orders: f64,
    /// Orders removed by the fake-order adjustment
    pub fake_orders_removed: f64,
    pub avg_order_value: Option<f64>,
    pub avg_daily_sales: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendStats {
    pub monthly: Vec<MonthStats>,
    pub weekend_avg: Option<f64>,
    pub weekday_avg: Option<f64>,
    pub weekend_effect_pct: Option<f64>,
    pub best_day: Option<DayFigure>,
    pub worst_day: Option<DayFigure>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerStats {
    pub new_customers: f64,
    pub repeat_customers: f64,
    pub reactivated_customers: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunnelStats {
    pub impressions: f64,
    pub menu_visits: f64,
    pub add_to_cart: f64,
    pub ads_orders: f64,
    pub ctr: Option<f64>,
    pub visit_to_cart: Option<f64>,
    pub cart_to_order: Option<f64>,
    pub impression_to_order: Option<f64>,
    pub cpc: Option<f64>,
    pub cpa: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinanceStats {
    pub ads_spend: f64,
    pub grab_ads_spend: f64,
    pub gojek_ads_spend: f64,
    pub ads_sales: f64,
    pub ads_sales_share: Option<f64>,
    pub roas: Option<f64>,
    pub payouts: f64,
    /// Share of sales kept by the platforms (1 − payouts / sales)
    pub take_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outage {
    pub date: NaiveDate,
    pub minutes: f64,
    pub estimated_loss: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationsStats {
    pub avg_preparation_time: Option<f64>,
    pub avg_delivery_time: Option<f64>,
    pub avg_accepting_time: Option<f64>,
    pub cancelled_orders: f64,
    pub cancel_rate_pct: Option<f64>,
    pub outages: Vec<Outage>,
    pub outage_loss: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityStats {
    pub avg_rating: Option<f64>,
    /// Counts for 5, 4, 3, 2, 1 stars
    pub stars: [f64; 5],
    pub total_ratings: f64,
    pub satisfaction_index: Option<f64>,
    pub negative_pct: Option<f64>,
    pub not_five_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodStats {
    pub restaurant_id: i64,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub days: usize,
    pub active_days: usize,
    pub sales: SalesSummary,
    pub trends: TrendStats,
    pub customers: CustomerStats,
    pub funnel: FunnelStats,
    pub finance: FinanceStats,
    pub operations: OperationsStats,
    pub quality: QualityStats,
}

fn ratio(num: f64, den: f64) -> Option<f64> {
    (den > 0.0).then(|| num / den)
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

impl PeriodStats {
    /// Aggregate one restaurant's records for the period
    pub fn compute(restaurant_id: i64, start: NaiveDate, end: NaiveDate, records: &[&DailyRecord]) -> Self {
        let sum = |f: fn(&DailyRecord) -> f64| records.iter().map(|r| f(r)).sum::<f64>();
        let days = records.len();
        let active: Vec<&DailyRecord> = records.iter().copied().filter(|r| r.has_activity()).collect();

        let total_sales = sum(|r| r.total_sales);
        let total_orders = sum(|r| r.total_orders);
        let sales = SalesSummary {
            total_sales,
            grab_sales: sum(|r| r.grab_sales),
            gojek_sales: sum(|r| r.gojek_sales),
            total_orders,
            grab_orders: sum(|r| r.grab_orders),
            gojek_orders: sum(|r| r.gojek_orders),
            fake_orders_removed: sum(|r| r.grab_orders_raw + r.gojek_orders_raw - r.total_orders),
            avg_order_value: ratio(total_sales, total_orders),
            avg_daily_sales: ratio(total_sales, days as f64).unwrap_or(0.0),
        };

        let mut months: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        for r in records {
            let e = months.entry(format!("{:04}-{:02}", r.date.year(), r.date.month())).or_default();
            e.0 += r.total_sales;
            e.1 += 1;
        }
        let weekend_avg = mean(records.iter().filter(|r| r.is_weekend > 0.0).map(|r| r.total_sales));
        let weekday_avg = mean(records.iter().filter(|r| r.is_weekend == 0.0).map(|r| r.total_sales));
        let trends = TrendStats {
            monthly: months
                .into_iter()
                .map(|(month, (total, n))| MonthStats {
                    month,
                    total_sales: total,
                    days: n,
                    avg_per_day: total / n as f64,
                })
                .collect(),
            weekend_avg,
            weekday_avg,
            weekend_effect_pct: match (weekend_avg, weekday_avg) {
                (Some(we), Some(wd)) => ratio(we - wd, wd).map(|v| v * 100.0),
                _ => None,
            },
            best_day: active
                .iter()
                .max_by(|a, b| a.total_sales.total_cmp(&b.total_sales))
                .map(|r| DayFigure::from(*r)),
            worst_day: active
                .iter()
                .min_by(|a, b| a.total_sales.total_cmp(&b.total_sales))
                .map(|r| DayFigure::from(*r)),
        };

        let customers = CustomerStats {
            new_customers: sum(|r| r.new_customers),
            repeat_customers: sum(|r| r.repeat_customers),
            reactivated_customers: sum(|r| r.reactivated_customers),
        };

        let ads_spend = sum(|r| r.ads_spend_total);
        let impressions = sum(|r| r.impressions);
        let menu_visits = sum(|r| r.menu_visits);
        let add_to_cart = sum(|r| r.add_to_cart);
        let ads_orders = sum(|r| r.ads_orders);
        let funnel = FunnelStats {
            impressions,
            menu_visits,
            add_to_cart,
            ads_orders,
            ctr: ratio(menu_visits, impressions),
            visit_to_cart: ratio(add_to_cart, menu_visits),
            cart_to_order: ratio(ads_orders, add_to_cart),
            impression_to_order: ratio(ads_orders, impressions),
            cpc: ratio(ads_spend, menu_visits),
            cpa: ratio(ads_spend, ads_orders),
        };

        let ads_sales = sum(|r| r.ads_sales_total);
        let payouts = sum(|r| r.payouts);
        let finance = FinanceStats {
            ads_spend,
            grab_ads_spend: sum(|r| r.grab_ads_spend),
            gojek_ads_spend: sum(|r| r.gojek_ads_spend),
            ads_sales,
            ads_sales_share: ratio(ads_sales, total_sales),
            roas: ratio(ads_sales, ads_spend),
            payouts,
            take_rate: if payouts > 0.0 {
                ratio(total_sales - payouts, total_sales)
            } else {
                None
            },
        };

        let hourly_sales = ratio(total_sales, days as f64 * 24.0).unwrap_or(0.0);
        let outages: Vec<Outage> = records
            .iter()
            .filter(|r| r.offline_minutes >= OUTAGE_MINUTES)
            .map(|r| Outage {
                date: r.date,
                minutes: r.offline_minutes,
                estimated_loss: r.offline_minutes / 60.0 * hourly_sales,
            })
            .collect();
        let cancelled = sum(|r| r.cancelled_orders);
        let operations = OperationsStats {
            avg_preparation_time: mean(records.iter().filter_map(|r| r.preparation_time)),
            avg_delivery_time: mean(records.iter().filter_map(|r| r.delivery_time)),
            avg_accepting_time: mean(records.iter().filter_map(|r| r.accepting_time)),
            cancelled_orders: cancelled,
            cancel_rate_pct: ratio(cancelled, total_orders).map(|v| v * 100.0),
            outage_loss: outages.iter().map(|o| o.estimated_loss).sum(),
            outages,
        };

        let stars = [
            sum(|r| r.rating_five),
            sum(|r| r.rating_four),
            sum(|r| r.rating_three),
            sum(|r| r.rating_two),
            sum(|r| r.rating_one),
        ];
        let total_ratings: f64 = stars.iter().sum();
        let weighted: f64 = stars.iter().zip([5.0, 4.0, 3.0, 2.0, 1.0]).map(|(n, w)| n * w).sum();
        let quality = QualityStats {
            avg_rating: mean(records.iter().filter_map(|r| r.rating)),
            stars,
            total_ratings,
            satisfaction_index: ratio(weighted, total_ratings),
            negative_pct: ratio(stars[3] + stars[4], total_ratings).map(|v| v * 100.0),
            not_five_pct: ratio(total_ratings - stars[0], total_ratings).map(|v| v * 100.0),
        };

        Self {
            restaurant_id,
            start,
            end,
            days,
            active_days: active.len(),
            sales,
            trends,
            customers,
            funnel,
            finance,
            operations,
            quality,
        }
    }

    /// False when no platform row exists for the period
    pub fn has_data(&self) -> bool {
        self.active_days > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::parse_date;

    fn day(date: &str, grab: f64, gojek: f64, orders: f64) -> DailyRecord {
        let mut r = DailyRecord::empty(1, parse_date(date).unwrap());
        r.grab_sales = grab;
        r.gojek_sales = gojek;
        r.total_sales = grab + gojek;
        r.grab_orders = orders;
        r.grab_orders_raw = orders;
        r.total_orders = orders;
        r.platform_rows = 1;
        r
    }

    #[test]
    fn test_sales_and_trends() {
        // 2025-01-03 Fri, 01-04 Sat, 01-05 Sun, 01-06 Mon
        let mut records = vec![
            day("2025-01-03", 100.0, 100.0, 4.0),
            day("2025-01-04", 300.0, 100.0, 8.0),
            day("2025-01-05", 200.0, 200.0, 8.0),
            day("2025-01-06", 0.0, 0.0, 0.0),
        ];
        records[3].platform_rows = 0;
        let refs: Vec<&DailyRecord> = records.iter().collect();
        let s = PeriodStats::compute(1, parse_date("2025-01-03").unwrap(), parse_date("2025-01-06").unwrap(), &refs);

        assert_eq!(s.days, 4);
        assert_eq!(s.active_days, 3);
        assert_eq!(s.sales.total_sales, 1000.0);
        assert_eq!(s.sales.avg_order_value, Some(50.0));
        assert_eq!(s.trends.weekend_avg, Some(400.0));
        assert_eq!(s.trends.weekday_avg, Some(100.0));
        assert_eq!(s.trends.weekend_effect_pct, Some(300.0));
        // Worst day ignores the inactive day
        assert_eq!(s.trends.worst_day.as_ref().unwrap().date, parse_date("2025-01-03").unwrap());
        assert_eq!(s.trends.monthly.len(), 1);
        assert!(s.has_data());
    }

    #[test]
    fn test_funnel_finance_and_quality() {
        let mut r = day("2025-02-10", 1_000_000.0, 0.0, 20.0);
        r.impressions = 1000.0;
        r.menu_visits = 100.0;
        r.add_to_cart = 40.0;
        r.ads_orders = 10.0;
        r.ads_spend_total = 200_000.0;
        r.ads_sales_total = 600_000.0;
        r.payouts = 750_000.0;
        r.offline_minutes = 120.0;
        r.cancelled_orders = 2.0;
        r.rating_five = 8.0;
        r.rating_one = 2.0;
        let s = PeriodStats::compute(1, r.date, r.date, &[&r]);

        assert_eq!(s.funnel.ctr, Some(0.1));
        assert_eq!(s.funnel.cpc, Some(2000.0));
        assert_eq!(s.funnel.cpa, Some(20_000.0));
        assert_eq!(s.finance.roas, Some(3.0));
        assert_eq!(s.finance.take_rate, Some(0.25));
        assert_eq!(s.operations.cancel_rate_pct, Some(10.0));
        assert_eq!(s.operations.outages.len(), 1);
        // 1 day, 2 hours offline → 2/24 of the day's sales
        assert!((s.operations.outage_loss - 1_000_000.0 / 12.0).abs() < 1e-6);
        assert_eq!(s.quality.satisfaction_index, Some(4.2));
        assert_eq!(s.quality.negative_pct, Some(20.0));
    }

    #[test]
    fn test_no_activity_means_no_data() {
        let r = DailyRecord::empty(1, parse_date("2025-02-10").unwrap());
        let s = PeriodStats::compute(1, r.date, r.date, &[&r]);
        assert!(!s.has_data());
        assert_eq!(s.sales.avg_order_value, None);
        assert!(s.trends.best_day.is_none());
    }
}
