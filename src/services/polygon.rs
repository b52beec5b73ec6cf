use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{
    error::ProviderError,
    models::{AssetClass, Quote},
};

/// Upstream source of quotes. One call covers one asset class; symbols the
/// provider doesn't know are simply missing from the map.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn get_multiple_quotes(
        &self,
        asset_class: AssetClass,
        symbols: &[String],
    ) -> Result<HashMap<String, Quote>, ProviderError>;
}

#[derive(Clone)]
pub struct PolygonClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl PolygonClient {
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn has_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    fn snapshot_path(asset_class: AssetClass) -> &'static str {
        match asset_class {
            AssetClass::Equity => "/v2/snapshot/locale/us/markets/stocks/tickers",
            AssetClass::Crypto => "/v2/snapshot/locale/global/markets/crypto/tickers",
        }
    }

    pub async fn snapshots(
        &self,
        asset_class: AssetClass,
        symbols: &[String],
    ) -> Result<SnapshotResponse, ProviderError> {
        if !self.has_key() {
            return Err(ProviderError::NotConfigured);
        }

        let url = format!("{}{}", self.base_url, Self::snapshot_path(asset_class));
        let tickers = symbols.join(",");

        let res = self
            .http
            .get(&url)
            .query(&[("tickers", tickers.as_str()), ("apiKey", self.api_key.as_str())])
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        Ok(res.json::<SnapshotResponse>().await?)
    }
}

#[async_trait]
impl MarketDataProvider for PolygonClient {
    async fn get_multiple_quotes(
        &self,
        asset_class: AssetClass,
        symbols: &[String],
    ) -> Result<HashMap<String, Quote>, ProviderError> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let resp = self.snapshots(asset_class, symbols).await?;

        Ok(resp
            .tickers
            .into_iter()
            .filter(|t| symbols.iter().any(|s| s.eq_ignore_ascii_case(&t.ticker)))
            .filter_map(|t| t.into_quote(asset_class))
            .map(|q| (q.symbol.clone(), q))
            .collect())
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SnapshotResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tickers: Vec<TickerSnapshot>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TickerSnapshot {
    pub ticker: String,

    #[serde(rename = "todaysChangePerc", default)]
    pub todays_change_perc: f64,

    #[serde(default)]
    pub day: Bar,
    #[serde(rename = "prevDay", default)]
    pub prev_day: Bar,
    #[serde(rename = "lastTrade", default)]
    pub last_trade: Option<LastTrade>,

    // nanoseconds since epoch
    #[serde(default)]
    pub updated: i64,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Bar {
    // close
    #[serde(default)]
    pub c: f64,
    // volume
    #[serde(default)]
    pub v: f64,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LastTrade {
    // price
    #[serde(default)]
    pub p: f64,
    // timestamp, nanoseconds
    #[serde(default)]
    pub t: i64,
}

fn first_positive(values: &[f64]) -> Option<f64> {
    values.iter().copied().find(|v| v.is_finite() && *v > 0.0)
}

impl TickerSnapshot {
    pub fn into_quote(self, asset_class: AssetClass) -> Option<Quote> {
        let last = self.last_trade.as_ref().map(|t| t.p).unwrap_or_default();
        let price = first_positive(&[last, self.day.c, self.prev_day.c])?;

        let volume = if self.day.v > 0.0 || asset_class == AssetClass::Crypto {
            self.day.v
        } else {
            self.prev_day.v
        };

        let nanos = self
            .last_trade
            .as_ref()
            .map(|t| t.t)
            .filter(|t| *t > 0)
            .unwrap_or(self.updated);
        let timestamp = if nanos > 0 {
            DateTime::from_timestamp_nanos(nanos)
        } else {
            Utc::now()
        };

        Some(Quote {
            symbol: self.ticker.to_uppercase(),
            price,
            volume: volume.max(0.0) as i64,
            reference_price: first_positive(&[self.prev_day.c]),
            reference_volume: Some(self.prev_day.v as i64).filter(|v| *v > 0),
            timestamp,
        })
    }
}
