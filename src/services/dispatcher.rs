use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use mongodb::bson::oid::ObjectId;
use serde_json::json;
use tokio::sync::broadcast;

use crate::{
    error::EmailError,
    events,
    models::{
        alert_type_label, parse_clock, AlertLog, AlertRule, Notification, NotificationPreference,
        ALERT_TRIGGERED,
    },
};

use super::{
    email::{alert_body, alert_subject, EmailTransport},
    store::Store,
};

/// Why no email was attempted for a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailSkip {
    RuleDisabled,
    UserDisabled,
    CategoryDisabled,
    QuietHours,
    DailyLimit,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchResult {
    pub in_app_created: bool,
    pub in_app_error: Option<String>,
    pub email_sent: bool,
    pub email_error: Option<String>,
    pub email_skipped: Option<EmailSkip>,
}

/// Whether `now`, seen in the user's timezone, falls inside
/// `[quiet_hours_start, quiet_hours_end)`. Windows may wrap midnight; equal
/// start and end is an empty window.
///
/// A missing or unknown timezone is an error rather than a silent UTC
/// fallback.
pub fn in_quiet_hours(prefs: &NotificationPreference, now: DateTime<Utc>) -> Result<bool, String> {
    if !prefs.quiet_hours_enabled {
        return Ok(false);
    }

    let zone = prefs
        .quiet_hours_timezone
        .as_deref()
        .map(str::trim)
        .filter(|z| !z.is_empty())
        .ok_or_else(|| "quiet hours are enabled but no timezone is set".to_string())?;
    let tz = Tz::from_str(zone).map_err(|_| format!("unknown timezone `{zone}`"))?;
    let start = parse_clock(&prefs.quiet_hours_start)
        .ok_or_else(|| format!("invalid quiet_hours_start `{}`", prefs.quiet_hours_start))?;
    let end = parse_clock(&prefs.quiet_hours_end)
        .ok_or_else(|| format!("invalid quiet_hours_end `{}`", prefs.quiet_hours_end))?;

    let local = now.with_timezone(&tz).time();
    Ok(within_window(local, start, end))
}

/// Day the email cap counts against: the user's calendar day when a zone
/// is on file, the UTC day otherwise.
pub fn email_day(prefs: &NotificationPreference, now: DateTime<Utc>) -> NaiveDate {
    prefs
        .quiet_hours_timezone
        .as_deref()
        .and_then(|z| Tz::from_str(z.trim()).ok())
        .map(|tz| now.with_timezone(&tz).date_naive())
        .unwrap_or_else(|| now.date_naive())
}

pub fn within_window(t: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        t >= start && t < end
    } else {
        t >= start || t < end
    }
}

pub struct NotificationDispatcher {
    store: Arc<dyn Store>,
    email: Arc<dyn EmailTransport>,
    email_timeout: Duration,
    frontend_url: String,
    events_tx: Option<broadcast::Sender<String>>,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        email: Arc<dyn EmailTransport>,
        email_timeout: Duration,
        frontend_url: String,
    ) -> Self {
        Self {
            store,
            email,
            email_timeout,
            frontend_url,
            events_tx: None,
        }
    }

    pub fn with_events(mut self, events_tx: broadcast::Sender<String>) -> Self {
        self.events_tx = Some(events_tx);
        self
    }

    /// Fans a committed trigger out to the user's channels. Nothing here can
    /// undo the trigger: failures end up on the result and in the logs.
    pub async fn dispatch(
        &self,
        rule: &AlertRule,
        log: &AlertLog,
        prefs: &NotificationPreference,
        now: DateTime<Utc>,
    ) -> DispatchResult {
        let mut result = DispatchResult::default();

        if rule.notify_in_app {
            match self.create_in_app(rule, log, prefs, now).await {
                Ok(()) => result.in_app_created = true,
                Err(e) => {
                    tracing::error!(rule_id = %rule.id, error = %e, "in-app notification failed");
                    result.in_app_error = Some(e);
                }
            }
        }

        let skip = if !rule.notify_email {
            Some(EmailSkip::RuleDisabled)
        } else if !prefs.email_enabled {
            Some(EmailSkip::UserDisabled)
        } else if !prefs.category_enabled(&rule.alert_type) {
            Some(EmailSkip::CategoryDisabled)
        } else {
            match in_quiet_hours(prefs, now) {
                Ok(true) => Some(EmailSkip::QuietHours),
                Ok(false) => None,
                Err(e) => {
                    tracing::warn!(rule_id = %rule.id, user_id = %rule.user_id, error = %e, "cannot resolve quiet hours, not emailing");
                    result.email_error = Some(e);
                    return result;
                }
            }
        };

        if let Some(skip) = skip {
            if skip == EmailSkip::QuietHours {
                tracing::info!(rule_id = %rule.id, "skipping email, user in quiet hours");
            }
            result.email_skipped = Some(skip);
            return result;
        }

        let to = match self.recipient(rule, prefs).await {
            Ok(to) => to,
            Err(e) => {
                tracing::warn!(rule_id = %rule.id, user_id = %rule.user_id, error = %e, "no usable recipient");
                result.email_error = Some(e.to_string());
                return result;
            }
        };

        let mut reserved = None;
        if prefs.max_emails_per_day > 0 {
            let day = email_day(prefs, now);
            match self
                .store
                .try_reserve_email(rule.user_id, day, prefs.max_emails_per_day)
                .await
            {
                Ok(true) => reserved = Some(day),
                Ok(false) => {
                    tracing::info!(
                        rule_id = %rule.id,
                        user_id = %rule.user_id,
                        cap = prefs.max_emails_per_day,
                        "skipping email, daily limit reached"
                    );
                    result.email_skipped = Some(EmailSkip::DailyLimit);
                    return result;
                }
                Err(e) => {
                    tracing::warn!(user_id = %rule.user_id, error = %e, "email cap unavailable, sending anyway");
                }
            }
        }

        match self.send_email(&to, rule, log).await {
            Ok(()) => result.email_sent = true,
            Err(e) => {
                tracing::warn!(rule_id = %rule.id, error = %e, "alert email failed");
                result.email_error = Some(e.to_string());

                if let Some(day) = reserved {
                    if let Err(e) = self.store.release_email(rule.user_id, day).await {
                        tracing::warn!(user_id = %rule.user_id, error = %e, "could not release email slot");
                    }
                }
            }
        }

        result
    }

    /// The inbox record is always written; `in_app_enabled` only decides
    /// whether it is pushed live.
    async fn create_in_app(
        &self,
        rule: &AlertRule,
        log: &AlertLog,
        prefs: &NotificationPreference,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        let notification = Notification {
            id: ObjectId::new(),
            user_id: rule.user_id,
            alert_log_id: Some(log.id),
            kind: ALERT_TRIGGERED.to_string(),
            title: format!("{} {}", rule.symbol, alert_type_label(&rule.alert_type)),
            message: log.condition_met.clone(),
            metadata: json!({
                "alert_rule_id": rule.id.to_hex(),
                "watch_list_id": rule.watch_list_id.map(|w| w.to_hex()),
                "symbol": rule.symbol,
                "alert_type": rule.alert_type,
                "market_data": log.market_data,
            }),
            is_read: false,
            is_dismissed: false,
            created_at: now,
        };

        self.store
            .insert_notification(&notification)
            .await
            .map_err(|e| e.to_string())?;

        if prefs.in_app_enabled {
            if let Some(tx) = &self.events_tx {
                let _ = tx.send(events::NOTIFICATION_CREATED.to_string());
            }
        }
        Ok(())
    }

    /// The preference address, else the account address.
    async fn recipient(
        &self,
        rule: &AlertRule,
        prefs: &NotificationPreference,
    ) -> Result<String, EmailError> {
        if let Some(addr) = prefs.email_address.as_deref().map(str::trim) {
            if !addr.is_empty() {
                return Ok(addr.to_string());
            }
        }

        self.store
            .user_email(rule.user_id)
            .await?
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| EmailError::NoRecipient(rule.user_id.to_hex()))
    }

    async fn send_email(&self, to: &str, rule: &AlertRule, log: &AlertLog) -> Result<(), EmailError> {
        let subject = alert_subject(rule);
        let body = alert_body(rule, &log.market_data, &log.condition_met, &self.frontend_url);

        match tokio::time::timeout(self.email_timeout, self.email.send(to, &subject, &body)).await {
            Ok(res) => res,
            Err(_) => Err(EmailError::Timeout(self.email_timeout)),
        }
    }
}
