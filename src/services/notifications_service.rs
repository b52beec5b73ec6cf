use std::str::FromStr;

use chrono_tz::Tz;
use mongodb::bson::oid::ObjectId;
use serde::Deserialize;

use crate::{
    error::ApiError,
    models::{parse_clock, Notification, NotificationPreference},
    AppState,
};

pub const DEFAULT_NOTIFICATION_LIMIT: i64 = 50;

#[derive(Debug, Default, Deserialize)]
pub struct UpdatePreferencesRequest {
    pub email_enabled: Option<bool>,
    pub email_address: Option<String>,
    pub in_app_enabled: Option<bool>,
    pub quiet_hours_enabled: Option<bool>,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
    pub quiet_hours_timezone: Option<String>,
    pub price_alerts_enabled: Option<bool>,
    pub volume_alerts_enabled: Option<bool>,
    pub max_emails_per_day: Option<i64>,
}

pub async fn list_notifications(
    state: &AppState,
    user_id: ObjectId,
    unread_only: bool,
    limit: Option<i64>,
) -> Result<Vec<Notification>, ApiError> {
    let limit = limit
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_NOTIFICATION_LIMIT)
        .min(200);
    Ok(state
        .store
        .list_notifications(user_id, unread_only, limit)
        .await?)
}

pub async fn mark_read(state: &AppState, user_id: ObjectId, id: ObjectId) -> Result<(), ApiError> {
    if !state.store.mark_notification_read(user_id, id).await? {
        return Err(ApiError::NotFound("notification"));
    }
    Ok(())
}

pub async fn dismiss(state: &AppState, user_id: ObjectId, id: ObjectId) -> Result<(), ApiError> {
    if !state.store.dismiss_notification(user_id, id).await? {
        return Err(ApiError::NotFound("notification"));
    }
    Ok(())
}

pub async fn unread_count(state: &AppState, user_id: ObjectId) -> Result<u64, ApiError> {
    Ok(state.store.count_unread_notifications(user_id).await?)
}

pub async fn mark_all_read(state: &AppState, user_id: ObjectId) -> Result<u64, ApiError> {
    let changed = state.store.mark_all_notifications_read(user_id).await?;
    tracing::debug!(user_id = %user_id, changed, "marked all notifications read");
    Ok(changed)
}

pub async fn get_preferences(
    state: &AppState,
    user_id: ObjectId,
) -> Result<NotificationPreference, ApiError> {
    Ok(state
        .store
        .get_preferences(user_id)
        .await?
        .unwrap_or_else(|| NotificationPreference::defaults_for(user_id)))
}

fn clock_field(raw: String, field: &str) -> Result<String, ApiError> {
    let raw = raw.trim().to_string();
    match parse_clock(&raw) {
        Some(_) => Ok(raw),
        None => Err(ApiError::Validation(format!(
            "{field} must be HH:MM or HH:MM:SS"
        ))),
    }
}

/// Applies a partial update on top of the stored (or default) preferences.
/// Times and the timezone are validated here so the dispatcher never sees
/// a value it can't interpret from this path.
pub async fn update_preferences(
    state: &AppState,
    user_id: ObjectId,
    req: UpdatePreferencesRequest,
) -> Result<NotificationPreference, ApiError> {
    let mut prefs = get_preferences(state, user_id).await?;

    if let Some(v) = req.email_enabled {
        prefs.email_enabled = v;
    }
    if let Some(addr) = req.email_address {
        let addr = addr.trim().to_string();
        if addr.is_empty() {
            prefs.email_address = None;
        } else if !addr.contains('@') || addr.contains(['\r', '\n']) {
            return Err(ApiError::Validation("invalid email address".to_string()));
        } else {
            prefs.email_address = Some(addr);
        }
    }
    if let Some(v) = req.in_app_enabled {
        prefs.in_app_enabled = v;
    }
    if let Some(v) = req.quiet_hours_enabled {
        prefs.quiet_hours_enabled = v;
    }
    if let Some(v) = req.quiet_hours_start {
        prefs.quiet_hours_start = clock_field(v, "quiet_hours_start")?;
    }
    if let Some(v) = req.quiet_hours_end {
        prefs.quiet_hours_end = clock_field(v, "quiet_hours_end")?;
    }
    if let Some(tz) = req.quiet_hours_timezone {
        let tz = tz.trim().to_string();
        if tz.is_empty() {
            prefs.quiet_hours_timezone = None;
        } else if Tz::from_str(&tz).is_err() {
            return Err(ApiError::Validation(format!("unknown timezone `{tz}`")));
        } else {
            prefs.quiet_hours_timezone = Some(tz);
        }
    }
    if let Some(v) = req.price_alerts_enabled {
        prefs.price_alerts_enabled = v;
    }
    if let Some(v) = req.volume_alerts_enabled {
        prefs.volume_alerts_enabled = v;
    }
    if let Some(v) = req.max_emails_per_day {
        if v < 0 {
            return Err(ApiError::Validation(
                "max_emails_per_day must be 0 (no limit) or more".to_string(),
            ));
        }
        prefs.max_emails_per_day = v;
    }

    if prefs.quiet_hours_enabled && prefs.quiet_hours_timezone.is_none() {
        return Err(ApiError::Validation(
            "quiet_hours_timezone is required when quiet hours are enabled".to_string(),
        ));
    }

    state.store.save_preferences(&prefs).await?;
    tracing::info!(user_id = %user_id, "notification preferences updated");
    Ok(prefs)
}
