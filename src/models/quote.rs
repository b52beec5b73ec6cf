use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Asset class a symbol belongs to. The batch fetcher issues at most one
/// upstream call per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Equity,
    Crypto,
}

impl AssetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Equity => "equity",
            AssetClass::Crypto => "crypto",
        }
    }
}

/// Fresh price/volume snapshot for one symbol. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub volume: i64,

    // previous close
    pub reference_price: Option<f64>,
    // previous session volume
    pub reference_volume: Option<i64>,

    pub timestamp: DateTime<Utc>,
}

impl Quote {
    pub fn change_pct(&self) -> Option<f64> {
        match self.reference_price {
            Some(reference) if reference != 0.0 && reference.is_finite() => {
                Some((self.price - reference) / reference * 100.0)
            }
            _ => None,
        }
    }
}

/// The part of a quote that is stored with an alert log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: f64,
    pub volume: i64,
    #[serde(default)]
    pub reference_price: Option<f64>,
    #[serde(default)]
    pub change_pct: Option<f64>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub quoted_at: DateTime<Utc>,
}

impl From<&Quote> for MarketSnapshot {
    fn from(q: &Quote) -> Self {
        Self {
            symbol: q.symbol.clone(),
            price: q.price,
            volume: q.volume,
            reference_price: q.reference_price,
            change_pct: q.change_pct(),
            quoted_at: q.timestamp,
        }
    }
}
