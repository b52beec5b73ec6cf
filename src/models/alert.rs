use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use super::quote::MarketSnapshot;

/// A user's standing instruction to watch one symbol for one condition.
///
/// `alert_type` and `conditions` are kept as stored; they are turned into a
/// typed [`crate::services::evaluator::Condition`] at evaluation time so a
/// malformed rule fails on its own instead of failing the whole load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub user_id: ObjectId,
    #[serde(default)]
    pub watch_list_id: Option<ObjectId>,

    pub name: String,
    pub symbol: String,

    pub alert_type: String,
    pub conditions: serde_json::Value,

    pub frequency: Frequency,
    pub is_active: bool,
    pub notify_email: bool,
    pub notify_in_app: bool,

    // only written by the trigger commit
    #[serde(default)]
    pub trigger_count: i64,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub last_triggered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_log_id: Option<ObjectId>,
    /// Log written together with the trigger commit and cleared once the
    /// standalone log document exists. A leftover one is picked up by
    /// the next pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_log: Option<AlertLog>,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub updated_at: DateTime<Utc>,
}

/// How often a satisfied condition may produce a new trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Once,
    Daily,
    Always,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Once => "once",
            Frequency::Daily => "daily",
            Frequency::Always => "always",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "once" => Ok(Frequency::Once),
            "daily" => Ok(Frequency::Daily),
            "always" => Ok(Frequency::Always),
            other => Err(format!(
                "invalid frequency `{other}`: must be 'once', 'daily', or 'always'"
            )),
        }
    }
}

/// Immutable record of one firing of one rule. Only the read/dismiss flags
/// change after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertLog {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub alert_rule_id: ObjectId,
    pub user_id: ObjectId,
    pub symbol: String,
    pub alert_type: String,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub triggered_at: DateTime<Utc>,

    pub market_data: MarketSnapshot,
    pub condition_met: String,

    #[serde(default)]
    pub is_read: bool,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_dismissed: bool,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub dismissed_at: Option<DateTime<Utc>>,
}

/// Human-readable label for an alert type; unknown types fall back to the
/// raw identifier with spaces.
pub fn alert_type_label(alert_type: &str) -> String {
    let label = match alert_type {
        "price_above" => "Price Above",
        "price_below" => "Price Below",
        "price_change_pct" => "Price Change %",
        "volume_above" => "Volume Above",
        "volume_below" => "Volume Below",
        "volume_spike" => "Volume Spike",
        other => return other.replace('_', " "),
    };
    label.to_string()
}
