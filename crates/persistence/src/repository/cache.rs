//! Cache repository: last successful weather and holiday fetches

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// Cached daily weather for a restaurant location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WeatherCacheRecord {
    pub restaurant_id: i64,
    pub obs_date: String,
    pub temp: Option<f64>,
    pub rain: Option<f64>,
    pub wind: Option<f64>,
    pub humidity: Option<f64>,
}

/// Cached holiday calendar entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct HolidayCacheRecord {
    pub holiday_date: String,
    pub name: String,
    pub region: String,
}

pub struct CacheRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CacheRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert_weather(&self, records: &[WeatherCacheRecord]) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(
                r#"INSERT INTO weather_cache (restaurant_id, obs_date, temp, rain, wind, humidity, fetched_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, strftime('%s', 'now'))
                   ON CONFLICT(restaurant_id, obs_date) DO UPDATE SET
                     temp = excluded.temp,
                     rain = excluded.rain,
                     wind = excluded.wind,
                     humidity = excluded.humidity,
                     fetched_at = excluded.fetched_at
                "#,
            )
            .bind(r.restaurant_id)
            .bind(&r.obs_date)
            .bind(r.temp)
            .bind(r.rain)
            .bind(r.wind)
            .bind(r.humidity)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(records.len())
    }

    pub async fn get_weather(
        &self,
        restaurant_id: i64,
        start: &str,
        end: &str,
    ) -> DbResult<Vec<WeatherCacheRecord>> {
        let records = sqlx::query_as::<_, WeatherCacheRecord>(
            r#"SELECT restaurant_id, obs_date, temp, rain, wind, humidity
               FROM weather_cache
               WHERE restaurant_id = ?1 AND obs_date >= ?2 AND obs_date <= ?3
               ORDER BY obs_date"#,
        )
        .bind(restaurant_id)
        .bind(start)
        .bind(end)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    pub async fn upsert_holidays(&self, records: &[HolidayCacheRecord]) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(
                r#"INSERT INTO holiday_cache (holiday_date, name, region, fetched_at)
                   VALUES (?1, ?2, ?3, strftime('%s', 'now'))
                   ON CONFLICT(holiday_date, name) DO UPDATE SET
                     region = excluded.region,
                     fetched_at = excluded.fetched_at
                "#,
            )
            .bind(&r.holiday_date)
            .bind(&r.name)
            .bind(&r.region)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(records.len())
    }

    pub async fn get_holidays(&self, start: &str, end: &str) -> DbResult<Vec<HolidayCacheRecord>> {
        let records = sqlx::query_as::<_, HolidayCacheRecord>(
            r#"SELECT holiday_date, name, region FROM holiday_cache
               WHERE holiday_date >= ?1 AND holiday_date <= ?2
               ORDER BY holiday_date, name"#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }
}
