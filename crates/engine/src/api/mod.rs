//! External data sources reached over HTTP

pub mod holidays;
pub mod weather;

pub use holidays::{applicable_holidays, merge_holidays, static_holidays, NagerClient};
pub use weather::OpenMeteoClient;

use anyhow::Result;
use reqwest::Client;
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 30;

fn http_client() -> Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()?)
}
