//! Environment configuration (a `.env` file is loaded first by `main`)

use engine::SourceConfig;
use std::path::PathBuf;

pub const DEFAULT_DB_PATH: &str = "data/sales.db";
pub const DEFAULT_DATASET_PATH: &str = "data/merged_dataset.csv";
pub const DEFAULT_ARTIFACT_DIR: &str = "data/artifacts";
/// Bali: regional holidays outside it are ignored
pub const DEFAULT_HOLIDAY_REGIONS: &str = "ID-BA";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub dataset_path: PathBuf,
    pub artifact_dir: PathBuf,
    pub fake_orders_path: Option<PathBuf>,
    pub tourism_path: Option<PathBuf>,
    pub weather_url: Option<String>,
    pub holiday_url: Option<String>,
    pub holiday_regions: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            db_path: var("SALES_INSIGHT_DB_PATH")
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string())
                .into(),
            dataset_path: var("SALES_INSIGHT_DATASET_PATH")
                .unwrap_or_else(|| DEFAULT_DATASET_PATH.to_string())
                .into(),
            artifact_dir: var("SALES_INSIGHT_ARTIFACT_DIR")
                .unwrap_or_else(|| DEFAULT_ARTIFACT_DIR.to_string())
                .into(),
            fake_orders_path: var("SALES_INSIGHT_FAKE_ORDERS").map(PathBuf::from),
            tourism_path: var("SALES_INSIGHT_TOURISM").map(PathBuf::from),
            weather_url: var("SALES_INSIGHT_WEATHER_URL"),
            holiday_url: var("SALES_INSIGHT_HOLIDAY_URL"),
            holiday_regions: var("SALES_INSIGHT_HOLIDAY_REGIONS")
                .unwrap_or_else(|| DEFAULT_HOLIDAY_REGIONS.to_string())
                .split(',')
                .map(|r| r.trim().to_uppercase())
                .filter(|r| !r.is_empty())
                .collect(),
        }
    }

    pub fn sources(&self, offline: bool) -> SourceConfig {
        SourceConfig {
            fake_orders_path: self.fake_orders_path.clone(),
            tourism_path: self.tourism_path.clone(),
            weather_url: self.weather_url.clone(),
            holiday_url: self.holiday_url.clone(),
            holiday_regions: self.holiday_regions.clone(),
            offline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_and_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SALES_INSIGHT_ARTIFACT_DIR", "/srv/models"),
            ("SALES_INSIGHT_TOURISM", "exports/tourism.csv"),
            ("SALES_INSIGHT_FAKE_ORDERS", "  "),
            ("SALES_INSIGHT_HOLIDAY_REGIONS", "id-ba, ID-JK,"),
        ]);
        let config = AppConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.db_path, PathBuf::from(DEFAULT_DB_PATH));
        assert_eq!(config.dataset_path, PathBuf::from(DEFAULT_DATASET_PATH));
        assert_eq!(config.artifact_dir, PathBuf::from("/srv/models"));
        assert_eq!(config.tourism_path, Some(PathBuf::from("exports/tourism.csv")));
        // Blank values count as unset
        assert_eq!(config.fake_orders_path, None);
        assert!(config.sources(true).offline);
        assert_eq!(config.sources(true).holiday_regions, vec!["ID-BA", "ID-JK"]);

        let bare = AppConfig::from_lookup(|_| None);
        assert_eq!(bare.holiday_regions, vec![DEFAULT_HOLIDAY_REGIONS]);
    }
}
