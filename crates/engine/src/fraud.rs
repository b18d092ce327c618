//! Fake-order adjustment
//!
//! Flagged orders are subtracted from the raw per-platform counts before any
//! aggregation. Adjusted values are clamped to `[0, raw]`.

use crate::types::{FakeOrderRecord, Platform, PlatformDay};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Raw and adjusted figures for one platform-day
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustedCounts {
    pub orders_raw: i64,
    pub orders: i64,
    pub sales_raw: Decimal,
    pub sales: Decimal,
}

#[derive(Debug, Default, Clone, Copy)]
struct Flagged {
    count: i64,
    amount: Option<Decimal>,
}

/// Lookup of flagged orders keyed by (restaurant, date, platform)
#[derive(Debug, Default)]
pub struct FakeOrderAdjuster {
    flagged: HashMap<(i64, NaiveDate, Platform), Flagged>,
}

impl FakeOrderAdjuster {
    /// Duplicate sheet rows for the same key are summed
    pub fn new(records: &[FakeOrderRecord]) -> Self {
        let mut flagged: HashMap<(i64, NaiveDate, Platform), Flagged> = HashMap::new();
        for r in records {
            let entry = flagged
                .entry((r.restaurant_id, r.date, r.platform))
                .or_default();
            entry.count += r.count.max(0);
            if let Some(amount) = r.amount {
                let amount = amount.max(Decimal::ZERO);
                entry.amount = Some(entry.amount.unwrap_or(Decimal::ZERO) + amount);
            }
        }
        Self { flagged }
    }

    pub fn len(&self) -> usize {
        self.flagged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flagged.is_empty()
    }

    /// Apply the flagged orders for this platform-day.
    ///
    /// Revenue drops by the flagged amount when known, otherwise in proportion
    /// to the removed orders. With zero raw orders the revenue is left as is.
    pub fn adjust(&self, day: &PlatformDay) -> AdjustedCounts {
        let orders_raw = day.orders.max(0);
        let sales_raw = day.sales.max(Decimal::ZERO);

        let Some(flag) = self
            .flagged
            .get(&(day.restaurant_id, day.date, day.platform))
        else {
            return AdjustedCounts {
                orders_raw,
                orders: orders_raw,
                sales_raw,
                sales: sales_raw,
            };
        };

        let orders = (orders_raw - flag.count).clamp(0, orders_raw);

        let sales = match flag.amount {
            Some(amount) => sales_raw - amount,
            None if orders_raw > 0 => {
                sales_raw * Decimal::from(orders) / Decimal::from(orders_raw)
            }
            None => sales_raw,
        };
        let sales = sales.clamp(Decimal::ZERO, sales_raw);

        AdjustedCounts {
            orders_raw,
            orders,
            sales_raw,
            sales,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::parse_date;
    use rust_decimal_macros::dec;

    fn day(orders: i64, sales: Decimal) -> PlatformDay {
        let mut d = PlatformDay::empty(1, parse_date("2025-01-03").unwrap(), Platform::Grab);
        d.orders = orders;
        d.sales = sales;
        d
    }

    fn flag(count: i64, amount: Option<Decimal>) -> FakeOrderRecord {
        FakeOrderRecord {
            restaurant_id: 1,
            date: parse_date("2025-01-03").unwrap(),
            platform: Platform::Grab,
            count,
            amount,
        }
    }

    #[test]
    fn test_subtracts_flagged_orders() {
        let adjuster = FakeOrderAdjuster::new(&[flag(2, None)]);
        let adj = adjuster.adjust(&day(8, dec!(800000)));
        assert_eq!(adj.orders_raw, 8);
        assert_eq!(adj.orders, 6);
        assert_eq!(adj.sales, dec!(600000));
        assert_eq!(adj.sales_raw, dec!(800000));
    }

    #[test]
    fn test_clamps_when_flagged_exceeds_raw() {
        let adjuster = FakeOrderAdjuster::new(&[flag(5, Some(dec!(999999)))]);
        let adj = adjuster.adjust(&day(3, dec!(300000)));
        assert_eq!(adj.orders, 0);
        assert_eq!(adj.sales, Decimal::ZERO);
    }

    #[test]
    fn test_uses_flagged_amount_when_present() {
        let adjuster = FakeOrderAdjuster::new(&[flag(1, Some(dec!(50000)))]);
        let adj = adjuster.adjust(&day(4, dec!(400000)));
        assert_eq!(adj.orders, 3);
        assert_eq!(adj.sales, dec!(350000));
    }

    #[test]
    fn test_duplicate_sheet_rows_are_summed() {
        let adjuster = FakeOrderAdjuster::new(&[flag(1, None), flag(2, None)]);
        assert_eq!(adjuster.len(), 1);
        assert_eq!(adjuster.adjust(&day(10, dec!(1000))).orders, 7);
    }

    #[test]
    fn test_other_platform_untouched() {
        let adjuster = FakeOrderAdjuster::new(&[flag(2, None)]);
        let mut gojek = day(5, dec!(500));
        gojek.platform = Platform::Gojek;
        let adj = adjuster.adjust(&gojek);
        assert_eq!(adj.orders, 5);
        assert_eq!(adj.sales, dec!(500));
    }

    #[test]
    fn test_adjusted_never_exceeds_raw_or_goes_negative() {
        for raw in 0..6i64 {
            for fake in -2..9i64 {
                let adjuster = FakeOrderAdjuster::new(&[flag(fake, None)]);
                let adj = adjuster.adjust(&day(raw, Decimal::from(raw * 1000)));
                assert!(adj.orders >= 0 && adj.orders <= adj.orders_raw);
                assert!(adj.sales >= Decimal::ZERO && adj.sales <= adj.sales_raw);
            }
        }
    }
}
