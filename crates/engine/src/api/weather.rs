//! Open-Meteo historical weather client (no authentication required)

use anyhow::{bail, Result};
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::types::{WeatherObservation, DATE_FORMAT};

pub const DEFAULT_WEATHER_URL: &str = "https://archive-api.open-meteo.com/v1/era5";
const DAILY_VARIABLES: &str =
    "temperature_2m_mean,precipitation_sum,windspeed_10m_max,relative_humidity_2m_mean";

#[derive(Clone)]
pub struct OpenMeteoClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ArchiveResponse {
    daily: Option<DailySeries>,
}

/// Column-oriented daily series; values may be null
#[derive(Debug, Default, Deserialize)]
struct DailySeries {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    temperature_2m_mean: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
    #[serde(default)]
    windspeed_10m_max: Vec<Option<f64>>,
    #[serde(default)]
    relative_humidity_2m_mean: Vec<Option<f64>>,
}

impl OpenMeteoClient {
    pub fn new(base_url: Option<&str>) -> Result<Self> {
        Ok(Self {
            client: super::http_client()?,
            base_url: base_url.unwrap_or(DEFAULT_WEATHER_URL).trim_end_matches('/').to_string(),
        })
    }

    /// Daily observations for one location over an inclusive range
    pub async fn get_daily(
        &self,
        restaurant_id: i64,
        latitude: f64,
        longitude: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<WeatherObservation>> {
        let url = format!(
            "{}?latitude={}&longitude={}&start_date={}&end_date={}&daily={}&timezone=auto",
            self.base_url,
            latitude,
            longitude,
            start.format(DATE_FORMAT),
            end.format(DATE_FORMAT),
            DAILY_VARIABLES
        );

        debug!(restaurant_id, %start, %end, "Fetching weather from Open-Meteo");

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Open-Meteo API error {}: {}", status, body);
        }

        let body: ArchiveResponse = response.json().await?;
        parse_daily(restaurant_id, body.daily.unwrap_or_default())
    }
}

fn parse_daily(restaurant_id: i64, daily: DailySeries) -> Result<Vec<WeatherObservation>> {
    let at = |series: &[Option<f64>], i: usize| series.get(i).copied().flatten();

    daily
        .time
        .iter()
        .enumerate()
        .map(|(i, day)| -> Result<WeatherObservation> {
            Ok(WeatherObservation {
                restaurant_id,
                date: NaiveDate::parse_from_str(day, DATE_FORMAT)?,
                temp: at(&daily.temperature_2m_mean, i),
                rain: at(&daily.precipitation_sum, i),
                wind: at(&daily.windspeed_10m_max, i),
                humidity: at(&daily.relative_humidity_2m_mean, i),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_archive_payload() {
        let json = r#"{
            "latitude": -8.65, "longitude": 115.13,
            "daily": {
                "time": ["2025-01-01", "2025-01-02"],
                "temperature_2m_mean": [27.4, null],
                "precipitation_sum": [12.5, 0.0],
                "windspeed_10m_max": [14.0, 9.1],
                "relative_humidity_2m_mean": [84.0]
            }
        }"#;
        let body: ArchiveResponse = serde_json::from_str(json).unwrap();
        let obs = parse_daily(3, body.daily.unwrap()).unwrap();

        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].restaurant_id, 3);
        assert_eq!(obs[0].rain, Some(12.5));
        // Nulls and short columns stay missing
        assert_eq!(obs[1].temp, None);
        assert_eq!(obs[1].humidity, None);
        assert_eq!(obs[1].wind, Some(9.1));
    }

    #[test]
    fn test_missing_daily_block_is_empty() {
        let body: ArchiveResponse = serde_json::from_str(r#"{"error": false}"#).unwrap();
        assert!(parse_daily(1, body.daily.unwrap_or_default()).unwrap().is_empty());
    }
}
