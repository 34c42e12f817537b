// src/quotes.rs
use crate::error::MarketDataError;
use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

const BASE_URL: &str = "https://www.alphavantage.co/query";

/// Trading date to closing price.
pub type PriceSeries = BTreeMap<NaiveDate, f64>;

/// Closing price at the most recent date, if any.
pub fn latest_close(series: &PriceSeries) -> Option<f64> {
    series.iter().next_back().map(|(_, close)| *close)
}

#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Full daily history for `symbol`. May be empty.
    async fn fetch_daily_series(&self, symbol: &str) -> Result<PriceSeries, MarketDataError>;
}

#[derive(Deserialize)]
struct TimeSeriesData {
    #[serde(rename = "4. close")]
    close: String,
}

#[derive(Deserialize)]
struct AlphaVantageResponse {
    #[serde(rename = "Time Series (Daily)")]
    time_series: Option<HashMap<String, TimeSeriesData>>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

pub struct AlphaVantage {
    client: Client,
    api_key: String,
}

impl AlphaVantage {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, MarketDataError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MarketDataError::Provider(e.to_string()))?;
        Ok(AlphaVantage { client, api_key })
    }

    fn check_api_error(response: &AlphaVantageResponse) -> Result<(), MarketDataError> {
        if let Some(msg) = &response.error_message {
            if msg.contains("Invalid API call") {
                return Err(MarketDataError::SymbolNotFound(msg.clone()));
            }
            return Err(MarketDataError::Provider(msg.clone()));
        }
        for msg in [&response.note, &response.information].into_iter().flatten() {
            if msg.contains("API call frequency") || msg.contains("rate limit") {
                return Err(MarketDataError::RateLimited);
            }
            warn!("Alpha Vantage notice: {}", msg);
        }
        Ok(())
    }

    fn parse_series(time_series: HashMap<String, TimeSeriesData>) -> PriceSeries {
        time_series
            .into_iter()
            .filter_map(|(date_str, data)| {
                let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").ok()?;
                let close = data.close.parse::<f64>().ok()?;
                Some((date, close))
            })
            .collect()
    }
}

#[async_trait]
impl QuoteSource for AlphaVantage {
    async fn fetch_daily_series(&self, symbol: &str) -> Result<PriceSeries, MarketDataError> {
        let params = [
            ("function", "TIME_SERIES_DAILY"),
            ("symbol", symbol),
            ("outputsize", "full"),
            ("apikey", self.api_key.as_str()),
        ];
        debug!("Fetching daily series for {} from Alpha Vantage", symbol);

        let response = self
            .client
            .get(BASE_URL)
            .query(&params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MarketDataError::Timeout
                } else {
                    MarketDataError::Provider(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(MarketDataError::RateLimited);
        }
        if !status.is_success() {
            return Err(MarketDataError::Provider(format!("HTTP {}", status)));
        }

        let body: AlphaVantageResponse = response
            .json()
            .await
            .map_err(|e| MarketDataError::Provider(format!("Failed to parse response: {}", e)))?;
        Self::check_api_error(&body)?;

        let series = body.time_series.map(Self::parse_series).unwrap_or_default();
        debug!("Fetched {} closes for {}", series.len(), symbol);
        Ok(series)
    }
}
