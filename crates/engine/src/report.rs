//! Report composer: period statistics and ML insights rendered as numbered
//! Russian-language sections.

use crate::diagnosis::{Diagnosis, Mitigation, RootCause};
use crate::explainer::{CategoryTotal, CriticalDay, FactorContribution};
use crate::model::ModelKind;
use crate::stats::PeriodStats;
use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

const RULE: &str = "————————————————————————————————————————";

/// Rain (mm/day) at or above these marks moderate and heavy rain
pub const MODERATE_RAIN_MM: f64 = 10.0;
pub const HEAVY_RAIN_MM: f64 = 25.0;
const HOT_TEMP_C: f64 = 35.0;
const COOL_TEMP_C: f64 = 20.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    pub number: u8,
    pub title: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub restaurant_id: i64,
    pub restaurant_name: Option<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub sections: Vec<ReportSection>,
}

impl Report {
    pub fn render(&self) -> String {
        let name = self
            .restaurant_name
            .clone()
            .unwrap_or_else(|| format!("Ресторан #{}", self.restaurant_id));
        let mut out = format!("📋 ОТЧЁТ: {} | {} — {}\n\n", name, self.start, self.end);
        for (i, s) in self.sections.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&format!("{}. {}\n{}\n", s.number, s.title, RULE));
            for line in &s.lines {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}

/// Explained critical day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalDayInsight {
    pub day: CriticalDay,
    pub orders: f64,
    pub forecast: f64,
    pub offline_minutes: f64,
    pub is_holiday: Option<bool>,
    pub rain: Option<f64>,
    pub temp: Option<f64>,
    pub factors: Vec<FactorContribution>,
    pub categories: Vec<CategoryTotal>,
    pub diagnosis: Diagnosis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlInsights {
    pub median_sales: f64,
    pub days: Vec<CriticalDayInsight>,
    pub champion: ModelKind,
    pub mae: Option<f64>,
    pub trained_at: DateTime<Utc>,
    pub dataset_sha256: String,
    pub dataset_end: NaiveDate,
}

/// Section 8 input: never a fabricated value when the model is unavailable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MlSection {
    Unavailable { reason: String },
    Ready(MlInsights),
}

pub fn fmt_idr(value: f64) -> String {
    let rounded = value.round() as i64;
    let digits = rounded.unsigned_abs().to_string();
    let mut grouped = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(ch);
    }
    let sign = if rounded < 0 { "−" } else { "" };
    format!("{sign}{grouped} IDR")
}

fn fmt_opt_idr(value: Option<f64>) -> String {
    value.map(fmt_idr).unwrap_or_else(|| "—".to_string())
}

/// Ratio (0..1) as a percentage
fn fmt_share(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.1}%", v * 100.0))
        .unwrap_or_else(|| "—".to_string())
}

fn fmt_pct(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.1}%"))
        .unwrap_or_else(|| "—".to_string())
}

fn fmt_num(value: Option<f64>, digits: usize) -> String {
    value
        .map(|v| format!("{v:.digits$}"))
        .unwrap_or_else(|| "—".to_string())
}

fn fmt_minutes(minutes: f64) -> String {
    let total = minutes.max(0.0).round() as i64;
    format!("{}:{:02}", total / 60, total % 60)
}

pub fn weekday_ru(date: NaiveDate) -> &'static str {
    match date.weekday() {
        Weekday::Mon => "понедельник",
        Weekday::Tue => "вторник",
        Weekday::Wed => "среда",
        Weekday::Thu => "четверг",
        Weekday::Fri => "пятница",
        Weekday::Sat => "суббота",
        Weekday::Sun => "воскресенье",
    }
}

/// Human-readable feature name
pub fn feature_label(feature: &str) -> Cow<'_, str> {
    let label = match feature {
        "grab_ads_spend" => "Реклама GRAB",
        "gojek_ads_spend" => "Реклама GOJEK",
        "ads_spend_total" => "Рекламный бюджет",
        "ads_sales_total" => "Продажи с рекламы",
        "impressions" => "Показы рекламы",
        "menu_visits" => "Посещения меню",
        "add_to_cart" => "Добавления в корзину",
        "ads_orders" => "Заказы с рекламы",
        "new_customers" => "Новые клиенты",
        "repeat_customers" => "Повторные клиенты",
        "reactivated_customers" => "Реактивированные клиенты",
        "preparation_time" => "Время приготовления",
        "delivery_time" => "Время доставки",
        "accepting_time" => "Время принятия заказа",
        "offline_minutes" => "Время офлайн",
        "cancelled_orders" => "Отменённые заказы",
        "rating" => "Рейтинг",
        "rating_five" => "Оценки 5★",
        "rating_four" => "Оценки 4★",
        "rating_three" => "Оценки 3★",
        "rating_two" => "Оценки 2★",
        "rating_one" => "Оценки 1★",
        "temp" => "Температура",
        "rain" => "Осадки",
        "wind" => "Ветер",
        "humidity" => "Влажность",
        "is_holiday" => "Праздник",
        "tourist_flow" => "Турпоток",
        "day_of_week" => "День недели",
        "is_weekend" => "Выходной день",
        "sales_lag_1" => "Продажи вчера",
        "sales_lag_3" => "Продажи 3 дня назад",
        "sales_lag_7" => "Продажи неделю назад",
        "orders_lag_1" => "Заказы вчера",
        "orders_lag_3" => "Заказы 3 дня назад",
        "orders_lag_7" => "Заказы неделю назад",
        "sales_rolling_7_prev" => "Средние продажи за прошлые 7 дней",
        "sales_rolling_30_prev" => "Средние продажи за прошлые 30 дней",
        "orders_rolling_7_prev" => "Средние заказы за прошлые 7 дней",
        "orders_rolling_30_prev" => "Средние заказы за прошлые 30 дней",
        other => return derived_label(other),
    };
    Cow::Borrowed(label)
}

/// `rain_lag_3` → "Осадки 3 дн. назад", `temp_rolling_7` → "Температура, среднее за 7 дн."
fn derived_label(feature: &str) -> Cow<'_, str> {
    if let Some((base, days)) = feature.split_once("_lag_") {
        if let Cow::Borrowed(label) = feature_label(base) {
            if label != base {
                return Cow::Owned(format!("{label} {days} дн. назад"));
            }
        }
    }
    if let Some((base, days)) = feature.split_once("_rolling_") {
        if let Cow::Borrowed(label) = feature_label(base) {
            if label != base {
                return Cow::Owned(format!("{label}, среднее за {days} дн."));
            }
        }
    }
    Cow::Borrowed(feature)
}

fn section(number: u8, title: &str, lines: Vec<String>) -> ReportSection {
    ReportSection {
        number,
        title: title.to_string(),
        lines,
    }
}

fn executive_summary(s: &PeriodStats) -> ReportSection {
    let sales = &s.sales;
    let mut lines = vec![
        format!(
            "💰 Общая выручка: {} (GRAB: {} + GOJEK: {})",
            fmt_idr(sales.total_sales),
            fmt_idr(sales.grab_sales),
            fmt_idr(sales.gojek_sales)
        ),
        format!("📦 Общие заказы: {}", sales.total_orders.round()),
        format!("   ├── 📱 GRAB: {}", sales.grab_orders.round()),
        format!("   └── 🛵 GOJEK: {}", sales.gojek_orders.round()),
        format!("💵 Средний чек: {}", fmt_opt_idr(sales.avg_order_value)),
        format!("📊 Средняя выручка в день: {}", fmt_idr(sales.avg_daily_sales)),
        format!("📅 Дней с продажами: {} из {}", s.active_days, s.days),
    ];
    if sales.fake_orders_removed > 0.0 {
        lines.push(format!(
            "🧹 Исключено фиктивных заказов: {}",
            sales.fake_orders_removed.round()
        ));
    }
    section(1, "📊 ИСПОЛНИТЕЛЬНОЕ РЕЗЮМЕ", lines)
}

fn sales_trends(s: &PeriodStats) -> ReportSection {
    let t = &s.trends;
    let mut lines = vec!["📊 Динамика по месяцам:".to_string()];
    for m in &t.monthly {
        lines.push(format!(
            "  {}: {} ({} дней, {}/день)",
            m.month,
            fmt_idr(m.total_sales),
            m.days,
            fmt_idr(m.avg_per_day)
        ));
    }
    lines.push(String::new());
    lines.push("🗓️ Выходные vs Будни:".to_string());
    lines.push(format!("  📅 Средние продажи в выходные: {}", fmt_opt_idr(t.weekend_avg)));
    lines.push(format!("  📅 Средние продажи в будни: {}", fmt_opt_idr(t.weekday_avg)));
    lines.push(format!("  📊 Эффект выходных: {}", fmt_pct(t.weekend_effect_pct)));
    if let Some(best) = &t.best_day {
        lines.push(format!(
            "🏆 Лучший день: {} ({}) - {}",
            best.date,
            weekday_ru(best.date),
            fmt_idr(best.total_sales)
        ));
        lines.push(format!(
            "   💰 GRAB: {} ({} заказов) | GOJEK: {} ({} заказов)",
            fmt_idr(best.grab_sales),
            best.grab_orders.round(),
            fmt_idr(best.gojek_sales),
            best.gojek_orders.round()
        ));
    }
    if let Some(worst) = &t.worst_day {
        lines.push(format!(
            "📉 Худший день: {} ({}) - {}",
            worst.date,
            weekday_ru(worst.date),
            fmt_idr(worst.total_sales)
        ));
        lines.push(format!(
            "   💰 GRAB: {} | GOJEK: {}",
            fmt_idr(worst.grab_sales),
            fmt_idr(worst.gojek_sales)
        ));
    }
    section(2, "📈 АНАЛИЗ ПРОДАЖ И ТРЕНДОВ", lines)
}

fn customer_base(s: &PeriodStats) -> ReportSection {
    let c = &s.customers;
    let total = c.new_customers + c.repeat_customers + c.reactivated_customers;
    let share = |v: f64| fmt_share((total > 0.0).then(|| v / total));
    let lines = vec![
        "📊 Структура клиентской базы (GRAB + GOJEK):".to_string(),
        format!("  🆕 Новые клиенты: {} ({})", c.new_customers.round(), share(c.new_customers)),
        format!("  🔄 Повторные клиенты: {} ({})", c.repeat_customers.round(), share(c.repeat_customers)),
        format!(
            "  📲 Реактивированные: {} ({})",
            c.reactivated_customers.round(),
            share(c.reactivated_customers)
        ),
    ];
    section(3, "👥 КЛИЕНТСКАЯ БАЗА", lines)
}

fn marketing_funnel(s: &PeriodStats) -> ReportSection {
    let f = &s.funnel;
    let bounced = (f.menu_visits - f.add_to_cart).max(0.0);
    let abandoned = (f.add_to_cart - f.ads_orders).max(0.0);
    let lines = vec![
        "📊 Маркетинговая воронка:".to_string(),
        format!("  👁️ Показы рекламы: {}", f.impressions.round()),
        format!("  🔗 Посещения меню: {} (CTR: {})", f.menu_visits.round(), fmt_share(f.ctr)),
        format!(
            "  🛒 Добавления в корзину: {} (конверсия: {} от посещений)",
            f.add_to_cart.round(),
            fmt_share(f.visit_to_cart)
        ),
        format!(
            "  📦 Заказы от рекламы: {} (конверсия: {} от корзины)",
            f.ads_orders.round(),
            fmt_share(f.cart_to_order)
        ),
        format!("  🎯 Показ → Заказ: {}", fmt_share(f.impression_to_order)),
        format!("  💔 Ушли без покупки: {}", bounced.round()),
        format!("  🛒 Неоформленные корзины: {}", abandoned.round()),
        "💸 Стоимость привлечения:".to_string(),
        format!("  💰 CPC: {} (бюджет ÷ посещения меню)", fmt_opt_idr(f.cpc)),
        format!("  💰 CPA: {} (бюджет ÷ заказы от рекламы)", fmt_opt_idr(f.cpa)),
    ];
    section(4, "📈 МАРКЕТИНГОВАЯ ВОРОНКА", lines)
}

fn financials(s: &PeriodStats) -> ReportSection {
    let f = &s.finance;
    let lines = vec![
        "💸 Рекламный бюджет:".to_string(),
        format!("   ├── 📱 GRAB: {}", fmt_idr(f.grab_ads_spend)),
        format!("   ├── 🛵 GOJEK: {}", fmt_idr(f.gojek_ads_spend)),
        format!("   └── 💎 Всего: {}", fmt_idr(f.ads_spend)),
        "📊 Рекламная эффективность:".to_string(),
        format!("   ├── 💰 Продажи с рекламы: {}", fmt_idr(f.ads_sales)),
        format!("   ├── 📈 Доля от общих продаж: {}", fmt_share(f.ads_sales_share)),
        format!("   └── 🎯 ROAS: {}x", fmt_num(f.roas, 2)),
        format!("💰 Выплаты: {}", fmt_idr(f.payouts)),
        format!("   • Take rate (доля комиссий и удержаний): {}", fmt_share(f.take_rate)),
    ];
    section(5, "💳 ФИНАНСОВЫЕ ПОКАЗАТЕЛИ", lines)
}

fn operations(s: &PeriodStats) -> ReportSection {
    let o = &s.operations;
    let mut lines = vec![
        format!("⏱️ Время приготовления: {} мин", fmt_num(o.avg_preparation_time, 1)),
        format!("🚗 Время доставки: {} мин", fmt_num(o.avg_delivery_time, 1)),
        format!("⏰ Время принятия заказа: {} мин", fmt_num(o.avg_accepting_time, 1)),
        format!(
            "🚫 Отменённые заказы: {} ({})",
            o.cancelled_orders.round(),
            fmt_pct(o.cancel_rate_pct)
        ),
    ];
    if o.outages.is_empty() {
        lines.push("✅ Сбоев платформ дольше часа не было".to_string());
    } else {
        let share = (s.sales.total_sales > 0.0).then(|| o.outage_loss / s.sales.total_sales);
        lines.push(format!(
            "🔧 Сбои платформ (>1 часа): {} дн., потенциальные потери: {} ({})",
            o.outages.len(),
            fmt_idr(o.outage_loss),
            fmt_share(share)
        ));
        for outage in &o.outages {
            lines.push(format!(
                "   • {}: офлайн {} (потери: ~{})",
                outage.date,
                fmt_minutes(outage.minutes),
                fmt_idr(outage.estimated_loss)
            ));
        }
    }
    section(6, "⏰ ОПЕРАЦИОННЫЕ МЕТРИКИ", lines)
}

fn quality(s: &PeriodStats) -> ReportSection {
    let q = &s.quality;
    let share = |n: f64| fmt_share((q.total_ratings > 0.0).then(|| n / q.total_ratings));
    let labels = ["⭐⭐⭐⭐⭐ 5", "⭐⭐⭐⭐ 4", "⭐⭐⭐ 3", "⭐⭐ 2", "⭐ 1"];
    let mut lines = vec![format!("📊 Распределение оценок (всего: {}):", q.total_ratings.round())];
    for (label, n) in labels.iter().zip(q.stars) {
        lines.push(format!("  {label}: {} ({})", n.round(), share(n)));
    }
    lines.push(format!("⭐ Средний рейтинг: {}", fmt_num(q.avg_rating, 2)));
    lines.push(format!("📈 Индекс удовлетворённости: {}/5.0", fmt_num(q.satisfaction_index, 2)));
    lines.push(format!("🚨 Негативные оценки (1-2★): {}", fmt_pct(q.negative_pct)));
    lines.push(format!("📊 Оценки ниже 5★: {}", fmt_pct(q.not_five_pct)));
    section(7, "⭐ КАЧЕСТВО ОБСЛУЖИВАНИЯ", lines)
}

fn fmt_change(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:+.0}%"))
        .unwrap_or_else(|| "—".to_string())
}

fn cause_line(cause: &RootCause) -> String {
    let detail = match cause {
        RootCause::AdsBudgetCut { spend, normal, .. } => {
            format!("бюджет {} против нормы {}", fmt_idr(*spend), fmt_idr(*normal))
        }
        RootCause::AverageCheckDrop { check, normal, .. } => {
            format!("средний чек {} против нормы {}", fmt_idr(*check), fmt_idr(*normal))
        }
        RootCause::SlowKitchen { minutes } => format!("приготовление {minutes:.1} мин (норма до 25 мин)"),
        RootCause::LongOffline { minutes, .. } => format!("платформа недоступна {}", fmt_minutes(*minutes)),
    };
    match cause.impact_idr() {
        Some(impact) => format!("{}: {detail}, ~{} потерь", cause.title_ru(), fmt_idr(impact)),
        None => format!("{}: {detail}", cause.title_ru()),
    }
}

fn external_notes(d: &CriticalDayInsight) -> Vec<String> {
    let mut notes = Vec::new();
    if d.is_holiday == Some(true) {
        notes.push("праздничный день".to_string());
    }
    match d.rain {
        Some(rain) if rain >= HEAVY_RAIN_MM => notes.push(format!("сильный дождь {rain:.1} мм")),
        Some(rain) if rain >= MODERATE_RAIN_MM => notes.push(format!("умеренный дождь {rain:.1} мм")),
        Some(rain) if rain > 0.0 => notes.push(format!("лёгкий дождь {rain:.1} мм")),
        _ => {}
    }
    match d.temp {
        Some(t) if t > HOT_TEMP_C => notes.push(format!("очень жарко {t:.1}°C")),
        Some(t) if t < COOL_TEMP_C => notes.push(format!("прохладно {t:.1}°C")),
        _ => {}
    }
    notes
}

fn critical_day_lines(d: &CriticalDayInsight, lines: &mut Vec<String>) {
    let dx = &d.diagnosis;
    let fig = &dx.figures;

    lines.push("   📊 Ключевые цифры:".to_string());
    lines.push(format!(
        "      • Продажи: {} (медиана {}, потери {})",
        fmt_idr(fig.sales),
        fmt_idr(fig.median),
        fmt_idr(fig.loss_idr)
    ));
    lines.push(format!(
        "      • Заказы: {} (норма {}, {})",
        fig.orders.round(),
        fmt_num(fig.normal_orders, 1),
        fmt_change(fig.orders_change_pct())
    ));
    lines.push(format!(
        "      • Средний чек: {} (норма {}, {})",
        fmt_opt_idr(fig.avg_check),
        fmt_opt_idr(fig.normal_check),
        fmt_change(fig.check_change_pct())
    ));
    lines.push(format!(
        "      • Реклама: {} (норма {}, {})",
        fmt_idr(fig.ads_spend),
        fmt_opt_idr(fig.normal_ads_spend),
        fmt_change(fig.ads_change_pct())
    ));
    lines.push(format!("   🤖 Прогноз модели: {}", fmt_idr(d.forecast)));

    if !dx.causes.is_empty() {
        lines.push("   🔍 Реальные причины:".to_string());
        for (i, cause) in dx.causes.iter().enumerate() {
            lines.push(format!("   {}. {}", i + 1, cause_line(cause)));
        }
    }

    let external = external_notes(d);
    if !external.is_empty() {
        lines.push(format!("   🌍 Внешние факторы: {}", external.join(", ")));
    }

    if !dx.mitigations.is_empty() {
        let helped: Vec<String> = dx
            .mitigations
            .iter()
            .map(|m| match m {
                Mitigation::StrongRoas { roas, .. } => format!("высокий ROAS рекламы {roas:.1}x"),
                Mitigation::HighRating { rating } => format!("высокий рейтинг {rating:.1}/5.0"),
            })
            .collect();
        lines.push(format!("   ✅ Что помогло избежать больших потерь: {}", helped.join(", ")));
    }

    lines.push("   📈 Ключевые факторы модели:".to_string());
    for (i, f) in d.factors.iter().enumerate() {
        lines.push(format!(
            "   {}. {} {} ({}): {} ({:.1}%)",
            i + 1,
            f.direction.arrow(),
            feature_label(&f.feature),
            f.category.label_ru(),
            fmt_idr(f.contribution_idr),
            f.percent
        ));
    }
    if !d.categories.is_empty() {
        let cats: Vec<String> = d
            .categories
            .iter()
            .map(|c| format!("{} {:.1}%", c.category.label_ru(), c.percent))
            .collect();
        lines.push(format!("   📂 По категориям: {}", cats.join(", ")));
    }

    lines.push("   🎯 Конкретные рекомендации:".to_string());
    for (i, rec) in dx.recommendations.iter().enumerate() {
        let value = if rec.expected_idr > 0.0 {
            format!("до {}", fmt_idr(rec.expected_idr))
        } else {
            "требует анализа".to_string()
        };
        lines.push(format!(
            "   {}. {} {} ({})",
            i + 1,
            rec.priority.icon(),
            rec.action.label_ru(),
            value
        ));
    }
    lines.push(format!(
        "   💰 Финансовый итог: потери {}, потенциал восстановления {} ({})",
        fmt_idr(fig.loss_idr),
        fmt_idr(dx.potential_idr),
        fmt_pct(dx.recovery_pct)
    ));
}

fn critical_days_section(ml: &MlSection) -> ReportSection {
    let title = "🚨 КРИТИЧЕСКИЕ ДНИ (ML)";
    let insights = match ml {
        MlSection::Unavailable { reason } => {
            return section(8, title, vec![format!("❌ ML-анализ недоступен: {reason}")]);
        }
        MlSection::Ready(insights) => insights,
    };

    let mut lines = vec![format!("📊 Медианные продажи за период: {}", fmt_idr(insights.median_sales))];
    if insights.days.is_empty() {
        lines.push("✅ Критических провалов продаж (падение ≥30% от медианы) нет".to_string());
    }

    for d in &insights.days {
        lines.push(String::new());
        lines.push(format!(
            "🔴 {} ({}): {} ({:+.1}% к медиане)",
            d.day.date,
            weekday_ru(d.day.date),
            fmt_idr(d.day.sales),
            d.day.change_pct
        ));
        critical_day_lines(d, &mut lines);
    }

    lines.push(String::new());
    let mae = insights
        .mae
        .map(|m| format!(", MAE {}", fmt_idr(m)))
        .unwrap_or_default();
    let hash_prefix: String = insights.dataset_sha256.chars().take(12).collect();
    lines.push(format!(
        "ℹ️ Модель {} обучена {} на данных до {} (датасет {}){}",
        insights.champion,
        insights.trained_at.format("%Y-%m-%d %H:%M UTC"),
        insights.dataset_end,
        hash_prefix,
        mae
    ));
    section(8, title, lines)
}

/// Compose the report. Without data only section 1 is emitted.
pub fn compose(stats: &PeriodStats, ml: &MlSection, restaurant_name: Option<&str>) -> Report {
    let sections = if !stats.has_data() {
        vec![section(
            1,
            "📊 ИСПОЛНИТЕЛЬНОЕ РЕЗЮМЕ",
            vec![format!(
                "📭 Нет данных за период {} — {}",
                stats.start, stats.end
            )],
        )]
    } else {
        vec![
            executive_summary(stats),
            sales_trends(stats),
            customer_base(stats),
            marketing_funnel(stats),
            financials(stats),
            operations(stats),
            quality(stats),
            critical_days_section(ml),
        ]
    };

    Report {
        restaurant_id: stats.restaurant_id,
        restaurant_name: restaurant_name.map(str::to_string),
        start: stats.start,
        end: stats.end,
        sections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnosis::diagnose;
    use crate::explainer::{Direction, FactorCategory};
    use crate::types::{parse_date, DailyRecord};
    use chrono::TimeZone;

    fn stats_for(sales: &[f64]) -> PeriodStats {
        let records: Vec<DailyRecord> = sales
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let mut r = DailyRecord::empty(5, parse_date(&format!("2025-03-{:02}", i + 1)).unwrap());
                r.total_sales = *s;
                r.grab_sales = *s;
                r.total_orders = 10.0;
                r.platform_rows = u32::from(*s > 0.0);
                r
            })
            .collect();
        let refs: Vec<&DailyRecord> = records.iter().collect();
        PeriodStats::compute(5, records[0].date, records[records.len() - 1].date, &refs)
    }

    #[test]
    fn test_idr_formatting() {
        assert_eq!(fmt_idr(1234567.4), "1 234 567 IDR");
        assert_eq!(fmt_idr(999.0), "999 IDR");
        assert_eq!(fmt_idr(-150000.0), "−150 000 IDR");
        assert_eq!(fmt_idr(0.0), "0 IDR");
    }

    #[test]
    fn test_no_data_renders_only_section_one() {
        let stats = stats_for(&[0.0, 0.0, 0.0]);
        let report = compose(&stats, &MlSection::Unavailable { reason: "x".into() }, None);
        assert_eq!(report.sections.len(), 1);
        assert_eq!(report.sections[0].number, 1);
        assert!(report.render().contains("Нет данных"));
    }

    #[test]
    fn test_all_sections_numbered_in_order() {
        let stats = stats_for(&[100.0, 120.0, 90.0]);
        let report = compose(
            &stats,
            &MlSection::Unavailable { reason: "модель не обучена".into() },
            Some("Warung Test"),
        );
        let numbers: Vec<u8> = report.sections.iter().map(|s| s.number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6, 7, 8]);

        let text = report.render();
        assert!(text.starts_with("📋 ОТЧЁТ: Warung Test"));
        assert!(text.contains("8. 🚨 КРИТИЧЕСКИЕ ДНИ (ML)"));
        assert!(text.contains("ML-анализ недоступен: модель не обучена"));
    }

    #[test]
    fn test_critical_day_rendering() {
        let stats = stats_for(&[100.0, 100.0, 65.0]);
        let mut day = DailyRecord::empty(5, parse_date("2025-03-03").unwrap());
        day.total_sales = 65.0;
        day.total_orders = 3.0;
        day.ads_spend_total = 1.0;
        day.offline_minutes = 150.0;
        day.is_holiday = Some(1.0);
        let mut normal = DailyRecord::empty(5, parse_date("2025-03-01").unwrap());
        normal.total_sales = 100.0;
        normal.total_orders = 4.0;
        normal.ads_spend_total = 10.0;
        normal.platform_rows = 1;
        let diagnosis = diagnose(&day, &[&normal, &day], 100.0);

        let insights = MlInsights {
            median_sales: 100.0,
            days: vec![CriticalDayInsight {
                day: CriticalDay {
                    date: day.date,
                    sales: 65.0,
                    median: 100.0,
                    change_pct: -35.0,
                },
                orders: 3.0,
                forecast: 80.0,
                offline_minutes: 150.0,
                is_holiday: Some(true),
                rain: Some(22.0),
                temp: Some(36.5),
                factors: vec![FactorContribution {
                    feature: "rain_lag_1".into(),
                    category: FactorCategory::External,
                    direction: Direction::Down,
                    contribution_idr: -20.0,
                    percent: 80.0,
                }],
                categories: vec![CategoryTotal {
                    category: FactorCategory::External,
                    percent: 80.0,
                    contribution_idr: -20.0,
                }],
                diagnosis,
            }],
            champion: ModelKind::GradientBoosting,
            mae: Some(12.0),
            trained_at: Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap(),
            dataset_sha256: "0123456789abcdef".into(),
            dataset_end: parse_date("2025-03-09").unwrap(),
        };
        let report = compose(&stats, &MlSection::Ready(insights), None);
        let text = report.render();

        assert!(text.contains("🔴 2025-03-03 (понедельник): 65 IDR (-35.0% к медиане)"));
        assert!(text.contains("• Продажи: 65 IDR (медиана 100 IDR, потери 35 IDR)"));
        assert!(text.contains("• Заказы: 3 (норма 4.0, -25%)"));
        assert!(text.contains("1. КРИТИЧЕСКОЕ УРЕЗАНИЕ РЕКЛАМНОГО БЮДЖЕТА: бюджет 1 IDR против нормы 10 IDR"));
        assert!(text.contains("2. ДЛИТЕЛЬНЫЙ ОФФЛАЙН: платформа недоступна 2:30, ~500 000 IDR потерь"));
        assert!(text.contains("🌍 Внешние факторы: праздничный день, умеренный дождь 22.0 мм, очень жарко 36.5°C"));
        assert!(text.contains("1. ↓ Осадки 1 дн. назад (Внешние факторы): −20 IDR (80.0%)"));
        assert!(text.contains("🔴 Увеличить рекламный бюджет на 50-100% в праздники (до 21 IDR)"));
        assert!(text.contains("💰 Финансовый итог: потери 35 IDR"));
        assert!(text.contains("0123456789ab"));
        assert!(text.contains("gradient_boosting"));
    }

    #[test]
    fn test_derived_feature_labels() {
        assert_eq!(feature_label("temp_rolling_7"), "Температура, среднее за 7 дн.");
        assert_eq!(feature_label("tourist_flow_lag_5"), "Турпоток 5 дн. назад");
        assert_eq!(feature_label("sales_lag_3"), "Продажи 3 дня назад");
        assert_eq!(feature_label("mystery_lag_2"), "mystery_lag_2");
    }
}
