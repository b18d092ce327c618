//! Indonesian public holidays: Nager.Date API plus a fixed-date calendar

use anyhow::{bail, Result};
use chrono::{Datelike, NaiveDate};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::types::Holiday;

pub const DEFAULT_HOLIDAY_URL: &str = "https://date.nager.at/api/v3";
const COUNTRY: &str = "ID";

/// National holidays that fall on the same date every year
const FIXED_HOLIDAYS: [(u32, u32, &str); 5] = [
    (1, 1, "New Year's Day"),
    (5, 1, "Labour Day"),
    (6, 1, "Pancasila Day"),
    (8, 17, "Independence Day"),
    (12, 25, "Christmas Day"),
];

#[derive(Clone)]
pub struct NagerClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicHoliday {
    date: NaiveDate,
    #[serde(default)]
    local_name: Option<String>,
    name: String,
    #[serde(default)]
    counties: Option<Vec<String>>,
}

impl From<PublicHoliday> for Holiday {
    fn from(h: PublicHoliday) -> Self {
        let region = match h.counties {
            Some(c) if !c.is_empty() => c.join(","),
            _ => COUNTRY.to_string(),
        };
        let name = match h.local_name {
            Some(local) if local != h.name => format!("{} ({})", h.name, local),
            _ => h.name,
        };
        Holiday {
            date: h.date,
            name,
            region,
        }
    }
}

impl NagerClient {
    pub fn new(base_url: Option<&str>) -> Result<Self> {
        Ok(Self {
            client: super::http_client()?,
            base_url: base_url.unwrap_or(DEFAULT_HOLIDAY_URL).trim_end_matches('/').to_string(),
        })
    }

    pub async fn get_year(&self, year: i32) -> Result<Vec<Holiday>> {
        let url = format!("{}/PublicHolidays/{}/{}", self.base_url, year, COUNTRY);
        debug!(year, "Fetching holidays from Nager.Date");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Nager.Date API error {}: {}", status, body);
        }

        let raw: Vec<PublicHoliday> = response.json().await?;
        Ok(raw.into_iter().map(Holiday::from).collect())
    }

    /// Holidays within an inclusive range, one request per calendar year
    pub async fn get_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Holiday>> {
        let mut out = Vec::new();
        for year in start.year()..=end.year() {
            out.extend(
                self.get_year(year)
                    .await?
                    .into_iter()
                    .filter(|h| h.date >= start && h.date <= end),
            );
        }
        Ok(out)
    }
}

/// Fixed-date national holidays in range
pub fn static_holidays(start: NaiveDate, end: NaiveDate) -> Vec<Holiday> {
    let mut out = Vec::new();
    for year in start.year()..=end.year() {
        for (month, day, name) in FIXED_HOLIDAYS {
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                if date >= start && date <= end {
                    out.push(Holiday {
                        date,
                        name: name.to_string(),
                        region: COUNTRY.to_string(),
                    });
                }
            }
        }
    }
    out
}

/// Keep national holidays and regional ones observed in any of `regions`
/// (ISO 3166-2 codes such as `ID-BA`). Without regions only national days remain.
pub fn applicable_holidays(holidays: Vec<Holiday>, regions: &[String]) -> Vec<Holiday> {
    let before = holidays.len();
    let kept: Vec<Holiday> = holidays
        .into_iter()
        .filter(|h| {
            h.region == COUNTRY
                || h
                    .region
                    .split(',')
                    .any(|r| regions.iter().any(|wanted| wanted.trim().eq_ignore_ascii_case(r.trim())))
        })
        .collect();
    if kept.len() < before {
        debug!(dropped = before - kept.len(), "Regional holidays outside configured regions dropped");
    }
    kept
}

/// Union keyed by date; the first name seen for a date wins
pub fn merge_holidays(sources: impl IntoIterator<Item = Vec<Holiday>>) -> Vec<Holiday> {
    let mut by_date: BTreeMap<NaiveDate, Holiday> = BTreeMap::new();
    for holidays in sources {
        for h in holidays {
            by_date.entry(h.date).or_insert(h);
        }
    }
    by_date.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::parse_date;

    #[test]
    fn test_parse_nager_payload() {
        let json = r#"[
            {"date":"2025-03-29","localName":"Hari Suci Nyepi","name":"Day of Silence","countryCode":"ID","fixed":false,"global":true,"counties":null},
            {"date":"2025-08-17","localName":"Hari Kemerdekaan","name":"Independence Day","countryCode":"ID","counties":["ID-BA"]}
        ]"#;
        let raw: Vec<PublicHoliday> = serde_json::from_str(json).unwrap();
        let holidays: Vec<Holiday> = raw.into_iter().map(Holiday::from).collect();

        assert_eq!(holidays[0].name, "Day of Silence (Hari Suci Nyepi)");
        assert_eq!(holidays[0].region, "ID");
        assert_eq!(holidays[1].region, "ID-BA");
    }

    #[test]
    fn test_static_calendar_spans_years() {
        let days = static_holidays(parse_date("2024-12-01").unwrap(), parse_date("2025-06-01").unwrap());
        let dates: Vec<String> = days.iter().map(|h| h.date.to_string()).collect();
        assert_eq!(dates, vec!["2024-12-25", "2025-01-01", "2025-05-01", "2025-06-01"]);
    }

    #[test]
    fn test_regional_holidays_need_a_matching_region() {
        let day = |date: &str, name: &str, region: &str| Holiday {
            date: parse_date(date).unwrap(),
            name: name.into(),
            region: region.into(),
        };
        let all = vec![
            day("2025-03-29", "Day of Silence", "ID"),
            day("2025-04-12", "Galungan", "ID-BA"),
            day("2025-06-20", "Regional Day", "ID-JK,ID-JB"),
        ];

        let national = applicable_holidays(all.clone(), &[]);
        assert_eq!(national.len(), 1);
        assert_eq!(national[0].name, "Day of Silence");

        let bali = applicable_holidays(all.clone(), &["id-ba".to_string()]);
        let names: Vec<&str> = bali.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["Day of Silence", "Galungan"]);

        let java = applicable_holidays(all, &["ID-JB".to_string()]);
        assert_eq!(java.len(), 2);
        assert_eq!(java[1].name, "Regional Day");
    }

    #[test]
    fn test_merge_deduplicates_by_date() {
        let start = parse_date("2025-08-01").unwrap();
        let end = parse_date("2025-08-31").unwrap();
        let api = vec![Holiday {
            date: parse_date("2025-08-17").unwrap(),
            name: "Independence Day (Hari Kemerdekaan)".into(),
            region: "ID".into(),
        }];
        let merged = merge_holidays([api, static_holidays(start, end)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "Independence Day (Hari Kemerdekaan)");
    }
}
