use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::ApiError,
    models::{CurrentUser, Notification, NotificationPreference},
    services::{
        alerts_service::parse_id,
        notifications_service::{self, UpdatePreferencesRequest},
    },
    AppState,
};

fn notification_json(n: &Notification) -> Value {
    json!({
        "id": n.id.to_hex(),
        "alert_log_id": n.alert_log_id.map(|id| id.to_hex()),
        "type": n.kind,
        "title": n.title,
        "message": n.message,
        "metadata": n.metadata,
        "is_read": n.is_read,
        "is_dismissed": n.is_dismissed,
        "created_at": n.created_at.to_rfc3339(),
    })
}

fn preferences_json(p: &NotificationPreference) -> Value {
    json!({
        "email_enabled": p.email_enabled,
        "email_address": p.email_address,
        "in_app_enabled": p.in_app_enabled,
        "quiet_hours_enabled": p.quiet_hours_enabled,
        "quiet_hours_start": p.quiet_hours_start,
        "quiet_hours_end": p.quiet_hours_end,
        "quiet_hours_timezone": p.quiet_hours_timezone,
        "price_alerts_enabled": p.price_alerts_enabled,
        "volume_alerts_enabled": p.volume_alerts_enabled,
        "max_emails_per_day": p.max_emails_per_day,
    })
}

fn current(user: Option<Extension<CurrentUser>>) -> Result<CurrentUser, ApiError> {
    user.map(|Extension(u)| u).ok_or(ApiError::Unauthorized)
}

#[derive(Debug, Default, Deserialize)]
pub struct ListNotificationsQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

// GET /api/notifications
pub async fn get_notifications(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
    Query(q): Query<ListNotificationsQuery>,
) -> Result<Json<Value>, ApiError> {
    let u = current(user)?;
    let list =
        notifications_service::list_notifications(&state, u.id, q.unread_only, q.limit).await?;
    let items: Vec<Value> = list.iter().map(notification_json).collect();
    Ok(Json(json!({ "notifications": items })))
}

// GET /api/notifications/unread-count
pub async fn get_unread_count(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
) -> Result<Json<Value>, ApiError> {
    let u = current(user)?;
    let count = notifications_service::unread_count(&state, u.id).await?;
    Ok(Json(json!({ "count": count })))
}

// POST /api/notifications/read-all
pub async fn post_read_all(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
) -> Result<Json<Value>, ApiError> {
    let u = current(user)?;
    let updated = notifications_service::mark_all_read(&state, u.id).await?;
    Ok(Json(json!({ "updated": updated })))
}

// POST /api/notifications/:id/read
pub async fn post_notification_read(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let u = current(user)?;
    notifications_service::mark_read(&state, u.id, parse_id(&id, "notification")?).await?;
    Ok(StatusCode::NO_CONTENT)
}

// POST /api/notifications/:id/dismiss
pub async fn post_notification_dismiss(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let u = current(user)?;
    notifications_service::dismiss(&state, u.id, parse_id(&id, "notification")?).await?;
    Ok(StatusCode::NO_CONTENT)
}

// GET /api/notifications/preferences
pub async fn get_preferences(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
) -> Result<Json<Value>, ApiError> {
    let u = current(user)?;
    let prefs = notifications_service::get_preferences(&state, u.id).await?;
    Ok(Json(preferences_json(&prefs)))
}

// PUT /api/notifications/preferences
pub async fn put_preferences(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
    Json(body): Json<UpdatePreferencesRequest>,
) -> Result<Json<Value>, ApiError> {
    let u = current(user)?;
    let prefs = notifications_service::update_preferences(&state, u.id, body).await?;
    Ok(Json(preferences_json(&prefs)))
}
