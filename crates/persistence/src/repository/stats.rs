//! Platform stats repository: raw per-platform daily observations and restaurants

use crate::repository::jobs::REFRESH_DATASET_JOB;
use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

/// A restaurant row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RestaurantRecord {
    pub id: i64,
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_active: i64,
}

/// One platform's observations for one restaurant-day
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct PlatformStatsRecord {
    pub id: Option<i64>,
    pub restaurant_id: i64,
    /// ISO date (YYYY-MM-DD)
    pub stat_date: String,
    /// "grab" or "gojek"
    pub platform: String,
    pub sales: String,
    pub orders: i64,
    pub ads_spend: String,
    pub ads_sales: String,
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
    pub payouts: String,
    pub rating_five: i64,
    pub rating_four: i64,
    pub rating_three: i64,
    pub rating_two: i64,
    pub rating_one: i64,
    pub updated_at: Option<i64>,
}

/// Repository for restaurants and raw platform statistics
pub struct StatsRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> StatsRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or update a restaurant (upsert by id)
    pub async fn upsert_restaurant(&self, record: &RestaurantRecord) -> DbResult<()> {
        sqlx::query(
            r#"INSERT INTO restaurants (id, name, latitude, longitude, is_active)
               VALUES (?1, ?2, ?3, ?4, ?5)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 latitude = excluded.latitude,
                 longitude = excluded.longitude,
                 is_active = excluded.is_active
            "#,
        )
        .bind(record.id)
        .bind(&record.name)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(record.is_active)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// All active restaurants, ordered by id
    pub async fn get_restaurants(&self) -> DbResult<Vec<RestaurantRecord>> {
        let records = sqlx::query_as::<_, RestaurantRecord>(
            "SELECT id, name, latitude, longitude, is_active FROM restaurants WHERE is_active = 1 ORDER BY id",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Upsert a batch of platform rows and enqueue a dataset refresh in the same transaction.
    ///
    /// Last write wins per (restaurant, date, platform): each row is a full observation.
    /// The refresh job is only added when none is already pending.
    pub async fn upsert_stats(&self, records: &[PlatformStatsRecord]) -> DbResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0usize;

        for r in records {
            let result = sqlx::query(
                r#"INSERT INTO platform_stats
                    (restaurant_id, stat_date, platform, sales, orders, ads_spend, ads_sales,
                     impressions, menu_visits, add_to_cart, ads_orders, cancelled_orders,
                     preparation_time, delivery_time, accepting_time, offline_minutes, rating,
                     new_customers, repeat_customers, reactivated_customers, payouts,
                     rating_five, rating_four, rating_three, rating_two, rating_one, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                           ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, strftime('%s', 'now'))
                   ON CONFLICT(restaurant_id, stat_date, platform) DO UPDATE SET
                     sales = excluded.sales,
                     orders = excluded.orders,
                     ads_spend = excluded.ads_spend,
                     ads_sales = excluded.ads_sales,
                     impressions = excluded.impressions,
                     menu_visits = excluded.menu_visits,
                     add_to_cart = excluded.add_to_cart,
                     ads_orders = excluded.ads_orders,
                     cancelled_orders = excluded.cancelled_orders,
                     preparation_time = excluded.preparation_time,
                     delivery_time = excluded.delivery_time,
                     accepting_time = excluded.accepting_time,
                     offline_minutes = excluded.offline_minutes,
                     rating = excluded.rating,
                     new_customers = excluded.new_customers,
                     repeat_customers = excluded.repeat_customers,
                     reactivated_customers = excluded.reactivated_customers,
                     payouts = excluded.payouts,
                     rating_five = excluded.rating_five,
                     rating_four = excluded.rating_four,
                     rating_three = excluded.rating_three,
                     rating_two = excluded.rating_two,
                     rating_one = excluded.rating_one,
                     updated_at = strftime('%s', 'now')
                "#,
            )
            .bind(r.restaurant_id)
            .bind(&r.stat_date)
            .bind(&r.platform)
            .bind(&r.sales)
            .bind(r.orders)
            .bind(&r.ads_spend)
            .bind(&r.ads_sales)
            .bind(r.impressions)
            .bind(r.menu_visits)
            .bind(r.add_to_cart)
            .bind(r.ads_orders)
            .bind(r.cancelled_orders)
            .bind(r.preparation_time)
            .bind(r.delivery_time)
            .bind(r.accepting_time)
            .bind(r.offline_minutes)
            .bind(r.rating)
            .bind(r.new_customers)
            .bind(r.repeat_customers)
            .bind(r.reactivated_customers)
            .bind(&r.payouts)
            .bind(r.rating_five)
            .bind(r.rating_four)
            .bind(r.rating_three)
            .bind(r.rating_two)
            .bind(r.rating_one)
            .execute(&mut *tx)
            .await?;

            written += result.rows_affected() as usize;
        }

        let queued = sqlx::query(
            r#"INSERT INTO jobs (job_type)
               SELECT ?1 WHERE NOT EXISTS
                 (SELECT 1 FROM jobs WHERE job_type = ?1 AND status = 'pending')"#,
        )
        .bind(REFRESH_DATASET_JOB)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            rows = written,
            refresh_queued = queued.rows_affected() > 0,
            "Platform stats upserted"
        );
        Ok(written)
    }

    /// Platform rows with `start <= stat_date <= end`, optionally restricted to some restaurants
    pub async fn get_stats_in_range(
        &self,
        start: &str,
        end: &str,
        restaurant_ids: Option<&[i64]>,
    ) -> DbResult<Vec<PlatformStatsRecord>> {
        let mut sql = String::from(
            "SELECT * FROM platform_stats WHERE stat_date >= ? AND stat_date <= ?",
        );

        if let Some(ids) = restaurant_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; ids.len()].join(", ");
            sql.push_str(&format!(" AND restaurant_id IN ({placeholders})"));
        }
        sql.push_str(" ORDER BY restaurant_id, stat_date, platform");

        let mut query = sqlx::query_as::<_, PlatformStatsRecord>(&sql)
            .bind(start)
            .bind(end);
        if let Some(ids) = restaurant_ids {
            for id in ids {
                query = query.bind(*id);
            }
        }

        let records = query.fetch_all(self.pool).await?;
        Ok(records)
    }

    /// Earliest and latest stat_date present, if any rows exist
    pub async fn get_date_span(&self) -> DbResult<Option<(String, String)>> {
        let row: (Option<String>, Option<String>) =
            sqlx::query_as("SELECT MIN(stat_date), MAX(stat_date) FROM platform_stats")
                .fetch_one(self.pool)
                .await?;

        Ok(match row {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::jobs::JobRepository;
    use crate::Database;

    fn row(restaurant_id: i64, date: &str, platform: &str, sales: &str, orders: i64) -> PlatformStatsRecord {
        PlatformStatsRecord {
            restaurant_id,
            stat_date: date.to_string(),
            platform: platform.to_string(),
            sales: sales.to_string(),
            orders,
            ads_spend: "0".into(),
            ads_sales: "0".into(),
            payouts: "0".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upsert_is_last_write_wins() {
        let db = Database::in_memory().await.unwrap();
        let repo = StatsRepository::new(db.pool());

        repo.upsert_stats(&[row(1, "2025-01-01", "grab", "100000", 3)])
            .await
            .unwrap();
        repo.upsert_stats(&[row(1, "2025-01-01", "grab", "250000", 7)])
            .await
            .unwrap();

        let rows = repo
            .get_stats_in_range("2025-01-01", "2025-01-31", None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sales, "250000");
        assert_eq!(rows[0].orders, 7);
    }

    #[tokio::test]
    async fn test_upsert_enqueues_single_pending_refresh() {
        let db = Database::in_memory().await.unwrap();
        let repo = StatsRepository::new(db.pool());

        repo.upsert_stats(&[row(1, "2025-01-01", "grab", "1", 1)])
            .await
            .unwrap();
        repo.upsert_stats(&[row(1, "2025-01-02", "gojek", "1", 1)])
            .await
            .unwrap();

        let jobs = JobRepository::new(db.pool());
        assert_eq!(jobs.count_by_status("pending").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_range_and_restaurant_filter() {
        let db = Database::in_memory().await.unwrap();
        let repo = StatsRepository::new(db.pool());

        repo.upsert_stats(&[
            row(1, "2025-01-01", "grab", "1", 1),
            row(2, "2025-01-01", "grab", "1", 1),
            row(1, "2025-02-01", "gojek", "1", 1),
        ])
        .await
        .unwrap();

        let only_r1_jan = repo
            .get_stats_in_range("2025-01-01", "2025-01-31", Some(&[1]))
            .await
            .unwrap();
        assert_eq!(only_r1_jan.len(), 1);
        assert_eq!(only_r1_jan[0].restaurant_id, 1);

        let none = repo
            .get_stats_in_range("2025-01-01", "2025-12-31", Some(&[]))
            .await
            .unwrap();
        assert!(none.is_empty());

        let span = repo.get_date_span().await.unwrap();
        assert_eq!(
            span,
            Some(("2025-01-01".to_string(), "2025-02-01".to_string()))
        );
    }
}
