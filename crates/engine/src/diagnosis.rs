//! Rule-based diagnosis of a critical day against the rest of its period:
//! key figures, root causes, mitigating factors and costed recommendations.

use crate::types::DailyRecord;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Ad spend below this share of the period norm is a budget cut
pub const ADS_CUT_RATIO: f64 = 0.7;
/// Average check below this share of the period norm is a check drop
pub const CHECK_DROP_RATIO: f64 = 0.8;
pub const SLOW_KITCHEN_MINUTES: f64 = 25.0;
pub const LONG_OFFLINE_MINUTES: f64 = 60.0;
pub const HIGH_RATING: f64 = 4.7;

/// Sales lost per IDR of withheld ad spend
const ADS_LOSS_MULTIPLIER: f64 = 15.0;
const OFFLINE_LOSS_PER_HOUR: f64 = 200_000.0;
const GRAB_STRONG_ROAS: f64 = 20.0;
const GOJEK_STRONG_ROAS: f64 = 15.0;
const MAX_RECOMMENDATIONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueArea {
    Marketing,
    Operations,
    Technical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RootCause {
    AdsBudgetCut { spend: f64, normal: f64, impact_idr: f64 },
    AverageCheckDrop { check: f64, normal: f64, impact_idr: f64 },
    SlowKitchen { minutes: f64 },
    LongOffline { minutes: f64, impact_idr: f64 },
}

impl RootCause {
    pub fn area(&self) -> IssueArea {
        match self {
            RootCause::AdsBudgetCut { .. } => IssueArea::Marketing,
            RootCause::AverageCheckDrop { .. } | RootCause::SlowKitchen { .. } => IssueArea::Operations,
            RootCause::LongOffline { .. } => IssueArea::Technical,
        }
    }

    pub fn impact_idr(&self) -> Option<f64> {
        match self {
            RootCause::AdsBudgetCut { impact_idr, .. }
            | RootCause::AverageCheckDrop { impact_idr, .. }
            | RootCause::LongOffline { impact_idr, .. } => Some(*impact_idr),
            RootCause::SlowKitchen { .. } => None,
        }
    }

    pub fn title_ru(&self) -> &'static str {
        match self {
            RootCause::AdsBudgetCut { .. } => "КРИТИЧЕСКОЕ УРЕЗАНИЕ РЕКЛАМНОГО БЮДЖЕТА",
            RootCause::AverageCheckDrop { .. } => "КРИТИЧЕСКОЕ ПАДЕНИЕ СРЕДНЕГО ЧЕКА",
            RootCause::SlowKitchen { .. } => "МЕДЛЕННАЯ КУХНЯ",
            RootCause::LongOffline { .. } => "ДЛИТЕЛЬНЫЙ ОФФЛАЙН",
        }
    }
}

/// Something that kept the day from being worse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mitigation {
    StrongRoas { roas: f64, threshold: f64 },
    HighRating { rating: f64 },
}

/// Declaration order is display order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn icon(&self) -> &'static str {
        match self {
            Priority::High => "🔴",
            Priority::Medium => "🟡",
            Priority::Low => "🟢",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    HolidayBudgetBoost,
    HolidayTargeting,
    RestoreAdsBudget,
    UpsellPromo,
    KitchenStaffing,
    PlatformMonitoring,
    ReviewSimilarDays,
}

impl Action {
    pub fn label_ru(&self) -> &'static str {
        match self {
            Action::HolidayBudgetBoost => "Увеличить рекламный бюджет на 50-100% в праздники",
            Action::HolidayTargeting => "Таргетинг на немусульман и туристов в религиозные праздники",
            Action::RestoreAdsBudget => "Восстановить рекламный бюджет до нормального уровня",
            Action::UpsellPromo => "Запустить upsell стратегию: промо при заказе >400K IDR",
            Action::KitchenStaffing => "Оптимизировать процессы кухни: дополнительный персонал в пик",
            Action::PlatformMonitoring => "Настроить мониторинг доступности платформ + резервные каналы",
            Action::ReviewSimilarDays => "Провести детальный анализ операций в аналогичные дни",
        }
    }

    /// Share of the day's loss the action can recover, and its cap in IDR
    fn recovery(&self) -> (f64, f64) {
        match self {
            Action::HolidayBudgetBoost => (0.6, 3_000_000.0),
            Action::HolidayTargeting => (0.3, 1_500_000.0),
            Action::RestoreAdsBudget => (0.7, 4_000_000.0),
            Action::UpsellPromo => (0.4, 2_000_000.0),
            Action::KitchenStaffing => (0.2, 1_000_000.0),
            Action::PlatformMonitoring => (0.8, 5_000_000.0),
            Action::ReviewSimilarDays => (0.0, 0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: Action,
    pub priority: Priority,
    pub expected_idr: f64,
}

/// The day next to the average of the period's other active days
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyFigures {
    pub sales: f64,
    pub median: f64,
    /// Shortfall against the median, never negative
    pub loss_idr: f64,
    pub orders: f64,
    pub normal_orders: Option<f64>,
    pub avg_check: Option<f64>,
    pub normal_check: Option<f64>,
    pub ads_spend: f64,
    pub normal_ads_spend: Option<f64>,
}

fn change_pct(value: f64, normal: f64) -> Option<f64> {
    (normal > 0.0).then(|| (value - normal) / normal * 100.0)
}

impl KeyFigures {
    pub fn orders_change_pct(&self) -> Option<f64> {
        self.normal_orders.and_then(|n| change_pct(self.orders, n))
    }

    pub fn check_change_pct(&self) -> Option<f64> {
        match (self.avg_check, self.normal_check) {
            (Some(c), Some(n)) => change_pct(c, n),
            _ => None,
        }
    }

    pub fn ads_change_pct(&self) -> Option<f64> {
        self.normal_ads_spend.and_then(|n| change_pct(self.ads_spend, n))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub figures: KeyFigures,
    pub causes: Vec<RootCause>,
    pub mitigations: Vec<Mitigation>,
    /// Highest priority first, at most three
    pub recommendations: Vec<Recommendation>,
    pub potential_idr: f64,
    /// Potential as a share of the loss, 0..=100+
    pub recovery_pct: Option<f64>,
}

fn key_figures(day: &DailyRecord, period: &[&DailyRecord], median: f64) -> KeyFigures {
    let others: Vec<&DailyRecord> = period
        .iter()
        .copied()
        .filter(|r| r.date != day.date && r.has_activity())
        .collect();
    let n = others.len() as f64;
    let mean = |f: fn(&DailyRecord) -> f64| (n > 0.0).then(|| others.iter().map(|r| f(r)).sum::<f64>() / n);

    let other_sales: f64 = others.iter().map(|r| r.total_sales).sum();
    let other_orders: f64 = others.iter().map(|r| r.total_orders).sum();

    KeyFigures {
        sales: day.total_sales,
        median,
        loss_idr: (median - day.total_sales).max(0.0),
        orders: day.total_orders,
        normal_orders: mean(|r| r.total_orders),
        avg_check: (day.total_orders > 0.0).then(|| day.total_sales / day.total_orders),
        normal_check: (other_orders > 0.0).then(|| other_sales / other_orders),
        ads_spend: day.ads_spend_total,
        normal_ads_spend: mean(|r| r.ads_spend_total),
    }
}

fn root_causes(day: &DailyRecord, figures: &KeyFigures) -> Vec<RootCause> {
    let mut causes = Vec::new();

    if let Some(normal) = figures.normal_ads_spend.filter(|n| *n > 0.0) {
        if figures.ads_spend < normal * ADS_CUT_RATIO {
            causes.push(RootCause::AdsBudgetCut {
                spend: figures.ads_spend,
                normal,
                impact_idr: (normal - figures.ads_spend) * ADS_LOSS_MULTIPLIER,
            });
        }
    }

    if let (Some(check), Some(normal)) = (figures.avg_check, figures.normal_check) {
        if check < normal * CHECK_DROP_RATIO {
            causes.push(RootCause::AverageCheckDrop {
                check,
                normal,
                impact_idr: (normal - check) * figures.orders,
            });
        }
    }

    if let Some(minutes) = day.preparation_time.filter(|m| *m > SLOW_KITCHEN_MINUTES) {
        causes.push(RootCause::SlowKitchen { minutes });
    }

    if day.offline_minutes > LONG_OFFLINE_MINUTES {
        causes.push(RootCause::LongOffline {
            minutes: day.offline_minutes,
            impact_idr: day.offline_minutes / 60.0 * OFFLINE_LOSS_PER_HOUR,
        });
    }

    causes
}

fn mitigations(day: &DailyRecord) -> Vec<Mitigation> {
    let mut found = Vec::new();

    if day.ads_spend_total > 0.0 {
        let roas = day.ads_sales_total / day.ads_spend_total;
        // Platform bars weighted by where the money went
        let threshold = (GRAB_STRONG_ROAS * day.grab_ads_spend + GOJEK_STRONG_ROAS * day.gojek_ads_spend)
            / day.ads_spend_total;
        if roas > threshold {
            found.push(Mitigation::StrongRoas { roas, threshold });
        }
    }

    if let Some(rating) = day.rating.filter(|r| *r >= HIGH_RATING) {
        found.push(Mitigation::HighRating { rating });
    }

    found
}

fn recommendations(causes: &[RootCause], holiday: bool, loss: f64) -> Vec<Recommendation> {
    let has = |area: IssueArea| causes.iter().any(|c| c.area() == area);
    let mut planned: Vec<(Action, Priority)> = Vec::new();

    if has(IssueArea::Marketing) {
        if holiday {
            planned.push((Action::HolidayBudgetBoost, Priority::High));
            planned.push((Action::HolidayTargeting, Priority::High));
        } else {
            planned.push((Action::RestoreAdsBudget, Priority::High));
        }
    }
    if has(IssueArea::Operations) {
        planned.push((Action::UpsellPromo, Priority::High));
        planned.push((Action::KitchenStaffing, Priority::Medium));
    }
    if has(IssueArea::Technical) {
        planned.push((Action::PlatformMonitoring, Priority::High));
    }
    if planned.is_empty() {
        planned.push((Action::ReviewSimilarDays, Priority::Low));
    }

    let mut recs: Vec<Recommendation> = planned
        .into_iter()
        .map(|(action, priority)| {
            let (share, cap) = action.recovery();
            Recommendation {
                action,
                priority,
                expected_idr: (loss * share).min(cap),
            }
        })
        .collect();
    recs.sort_by_key(|r| r.priority);
    recs.truncate(MAX_RECOMMENDATIONS);
    recs
}

/// Diagnose `day` against the other days of `period`
pub fn diagnose(day: &DailyRecord, period: &[&DailyRecord], median: f64) -> Diagnosis {
    let figures = key_figures(day, period, median);
    let causes = root_causes(day, &figures);
    let holiday = day.is_holiday.is_some_and(|h| h > 0.0);
    let recommendations = recommendations(&causes, holiday, figures.loss_idr);
    let potential_idr: f64 = recommendations.iter().map(|r| r.expected_idr).sum();
    let recovery_pct = (figures.loss_idr > 0.0).then(|| potential_idr / figures.loss_idr * 100.0);

    debug!(
        date = %day.date,
        causes = causes.len(),
        potential_idr,
        "Critical day diagnosed"
    );
    Diagnosis {
        mitigations: mitigations(day),
        figures,
        causes,
        recommendations,
        potential_idr,
        recovery_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::parse_date;

    fn day(n: u32, sales: f64, orders: f64, ads: f64) -> DailyRecord {
        let mut r = DailyRecord::empty(1, parse_date(&format!("2025-04-{n:02}")).unwrap());
        r.total_sales = sales;
        r.total_orders = orders;
        r.grab_ads_spend = ads;
        r.ads_spend_total = ads;
        r.platform_rows = 1;
        r
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    /// Ten normal days: 10M sales, 25 orders (400K check), 300K ads
    fn normal_period() -> Vec<DailyRecord> {
        (1..=10).map(|n| day(n, 10_000_000.0, 25.0, 300_000.0)).collect()
    }

    #[test]
    fn test_ads_cut_is_a_marketing_cause() {
        let mut records = normal_period();
        records.push(day(11, 5_000_000.0, 12.5, 50_000.0));
        let refs: Vec<&DailyRecord> = records.iter().collect();

        let d = diagnose(&records[10], &refs, 10_000_000.0);
        assert_eq!(d.figures.loss_idr, 5_000_000.0);
        assert_eq!(d.figures.normal_orders, Some(25.0));
        assert_eq!(d.figures.orders_change_pct(), Some(-50.0));
        // Check unchanged at 400K: no check cause
        assert_eq!(d.figures.check_change_pct(), Some(0.0));
        assert_eq!(
            d.causes,
            vec![RootCause::AdsBudgetCut {
                spend: 50_000.0,
                normal: 300_000.0,
                impact_idr: 3_750_000.0,
            }]
        );
        assert_eq!(d.recommendations.len(), 1);
        assert_eq!(d.recommendations[0].action, Action::RestoreAdsBudget);
        assert!(close(d.recommendations[0].expected_idr, 3_500_000.0));
        assert!(close(d.potential_idr, 3_500_000.0));
        assert!(close(d.recovery_pct.unwrap(), 70.0));
    }

    #[test]
    fn test_holiday_ads_cut_gets_holiday_actions() {
        let mut records = normal_period();
        let mut holiday = day(11, 2_000_000.0, 5.0, 0.0);
        holiday.is_holiday = Some(1.0);
        records.push(holiday);
        let refs: Vec<&DailyRecord> = records.iter().collect();

        let d = diagnose(&records[10], &refs, 10_000_000.0);
        let actions: Vec<Action> = d.recommendations.iter().map(|r| r.action).collect();
        assert_eq!(actions, vec![Action::HolidayBudgetBoost, Action::HolidayTargeting]);
        // Both capped
        assert_eq!(d.potential_idr, 4_500_000.0);
    }

    #[test]
    fn test_check_drop_and_slow_kitchen_are_operational() {
        let mut records = normal_period();
        let mut bad = day(11, 6_000_000.0, 25.0, 300_000.0);
        bad.preparation_time = Some(31.0);
        bad.offline_minutes = 90.0;
        records.push(bad);
        let refs: Vec<&DailyRecord> = records.iter().collect();

        let d = diagnose(&records[10], &refs, 10_000_000.0);
        assert_eq!(d.figures.avg_check, Some(240_000.0));
        assert_eq!(d.figures.normal_check, Some(400_000.0));
        assert!(matches!(
            d.causes[0],
            RootCause::AverageCheckDrop { impact_idr, .. } if impact_idr == 4_000_000.0
        ));
        assert_eq!(d.causes[1], RootCause::SlowKitchen { minutes: 31.0 });
        assert!(matches!(
            d.causes[2],
            RootCause::LongOffline { impact_idr, .. } if impact_idr == 300_000.0
        ));

        // High before medium, three at most
        let actions: Vec<Action> = d.recommendations.iter().map(|r| r.action).collect();
        assert_eq!(
            actions,
            vec![Action::UpsellPromo, Action::PlatformMonitoring, Action::KitchenStaffing]
        );
        assert!(close(d.potential_idr, 1_600_000.0 + 3_200_000.0 + 800_000.0));
    }

    #[test]
    fn test_no_cause_falls_back_to_review() {
        let mut records = normal_period();
        let mut quiet = day(11, 6_500_000.0, 16.25, 300_000.0);
        quiet.rating = Some(4.8);
        quiet.ads_sales_total = 6_600_000.0;
        records.push(quiet);
        let refs: Vec<&DailyRecord> = records.iter().collect();

        let d = diagnose(&records[10], &refs, 10_000_000.0);
        assert!(d.causes.is_empty());
        assert_eq!(d.recommendations[0].action, Action::ReviewSimilarDays);
        assert_eq!(d.recommendations[0].priority, Priority::Low);
        assert_eq!(d.potential_idr, 0.0);
        assert_eq!(
            d.mitigations,
            vec![
                Mitigation::StrongRoas { roas: 22.0, threshold: 20.0 },
                Mitigation::HighRating { rating: 4.8 },
            ]
        );
    }
}
