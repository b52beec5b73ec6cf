use chrono::{DateTime, NaiveTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

pub const ALERT_TRIGGERED: &str = "alert_triggered";

/// In-app inbox entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub user_id: ObjectId,
    #[serde(default)]
    pub alert_log_id: Option<ObjectId>,

    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,

    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_dismissed: bool,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

/// Per-user delivery settings. A user without a stored document gets
/// [`NotificationPreference::defaults_for`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPreference {
    #[serde(rename = "_id")]
    pub user_id: ObjectId,

    pub email_enabled: bool,
    #[serde(default)]
    pub email_address: Option<String>,
    pub in_app_enabled: bool,

    pub quiet_hours_enabled: bool,
    // "HH:MM" or "HH:MM:SS", user-local
    pub quiet_hours_start: String,
    pub quiet_hours_end: String,
    // IANA zone name, e.g. "America/New_York". Required while quiet hours
    // are enabled; there is no server-side default.
    #[serde(default)]
    pub quiet_hours_timezone: Option<String>,

    pub price_alerts_enabled: bool,
    pub volume_alerts_enabled: bool,

    /// Alert emails allowed per calendar day, 0 for no cap. In-app
    /// notifications are never capped.
    #[serde(default)]
    pub max_emails_per_day: i64,
}

impl NotificationPreference {
    pub fn defaults_for(user_id: ObjectId) -> Self {
        Self {
            user_id,
            email_enabled: true,
            email_address: None,
            in_app_enabled: true,
            quiet_hours_enabled: false,
            quiet_hours_start: "22:00".to_string(),
            quiet_hours_end: "07:00".to_string(),
            quiet_hours_timezone: None,
            price_alerts_enabled: true,
            volume_alerts_enabled: true,
            max_emails_per_day: 0,
        }
    }

    /// Whether this alert type's category is enabled.
    pub fn category_enabled(&self, alert_type: &str) -> bool {
        if alert_type.starts_with("price_") {
            self.price_alerts_enabled
        } else if alert_type.starts_with("volume_") {
            self.volume_alerts_enabled
        } else {
            true
        }
    }
}

/// Parses a wall-clock time written as `HH:MM` or `HH:MM:SS`.
pub fn parse_clock(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}
