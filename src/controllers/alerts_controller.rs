use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::ApiError,
    models::{AlertLog, AlertRule, CurrentUser},
    services::{
        alerts_service::{self, parse_id, CreateAlertRequest, UpdateAlertRequest},
        store::RuleFilter,
    },
    AppState,
};

fn ts(t: Option<DateTime<Utc>>) -> Value {
    t.map(|t| Value::String(t.to_rfc3339())).unwrap_or(Value::Null)
}

pub fn rule_json(r: &AlertRule) -> Value {
    json!({
        "id": r.id.to_hex(),
        "user_id": r.user_id.to_hex(),
        "watch_list_id": r.watch_list_id.map(|w| w.to_hex()),
        "name": r.name,
        "symbol": r.symbol,
        "alert_type": r.alert_type,
        "conditions": r.conditions,
        "frequency": r.frequency.as_str(),
        "is_active": r.is_active,
        "notify_email": r.notify_email,
        "notify_in_app": r.notify_in_app,
        "trigger_count": r.trigger_count,
        "last_triggered_at": ts(r.last_triggered_at),
        "created_at": r.created_at.to_rfc3339(),
        "updated_at": r.updated_at.to_rfc3339(),
    })
}

pub fn log_json(l: &AlertLog) -> Value {
    json!({
        "id": l.id.to_hex(),
        "alert_rule_id": l.alert_rule_id.to_hex(),
        "symbol": l.symbol,
        "alert_type": l.alert_type,
        "triggered_at": l.triggered_at.to_rfc3339(),
        "market_data": l.market_data,
        "condition_met": l.condition_met,
        "is_read": l.is_read,
        "read_at": ts(l.read_at),
        "is_dismissed": l.is_dismissed,
        "dismissed_at": ts(l.dismissed_at),
    })
}

fn current(user: Option<Extension<CurrentUser>>) -> Result<CurrentUser, ApiError> {
    user.map(|Extension(u)| u).ok_or(ApiError::Unauthorized)
}

#[derive(Debug, Default, Deserialize)]
pub struct ListAlertsQuery {
    pub watch_list_id: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<i64>,
    pub offset: Option<u64>,
}

// POST /api/alerts
pub async fn post_create_alert(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
    Json(body): Json<CreateAlertRequest>,
) -> Result<Response, ApiError> {
    let u = current(user)?;
    let rule = alerts_service::create_alert(&state, u.id, body).await?;
    Ok((StatusCode::CREATED, Json(rule_json(&rule))).into_response())
}

// GET /api/alerts
pub async fn get_alerts(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
    Query(q): Query<ListAlertsQuery>,
) -> Result<Json<Value>, ApiError> {
    let u = current(user)?;

    let watch_list_id = match q.watch_list_id.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(raw) => Some(parse_id(raw, "watch list")?),
        None => None,
    };
    let filter = RuleFilter {
        watch_list_id,
        is_active: q.active,
    };

    let rules = alerts_service::list_alerts(&state, u.id, &filter).await?;
    let items: Vec<Value> = rules.iter().map(rule_json).collect();
    Ok(Json(json!({ "alerts": items, "count": items.len() })))
}

// GET /api/alerts/:id
pub async fn get_alert(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let u = current(user)?;
    let rule = alerts_service::get_alert(&state, u.id, parse_id(&id, "alert")?).await?;
    Ok(Json(rule_json(&rule)))
}

// PUT /api/alerts/:id
pub async fn put_update_alert(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateAlertRequest>,
) -> Result<Json<Value>, ApiError> {
    let u = current(user)?;
    let rule = alerts_service::update_alert(&state, u.id, parse_id(&id, "alert")?, body).await?;
    Ok(Json(rule_json(&rule)))
}

// DELETE /api/alerts/:id
pub async fn delete_alert(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let u = current(user)?;
    alerts_service::delete_alert(&state, u.id, parse_id(&id, "alert")?).await?;
    Ok(StatusCode::NO_CONTENT)
}

// GET /api/alerts/:id/logs
pub async fn get_alert_logs(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
    Path(id): Path<String>,
    Query(q): Query<LogsQuery>,
) -> Result<Json<Value>, ApiError> {
    let u = current(user)?;
    let logs =
        alerts_service::list_alert_logs(&state, u.id, parse_id(&id, "alert")?, q.limit, q.offset)
            .await?;
    let items: Vec<Value> = logs.iter().map(log_json).collect();
    Ok(Json(json!({ "logs": items })))
}

// POST /api/alerts/logs/:log_id/read
pub async fn post_log_read(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
    Path(log_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let u = current(user)?;
    alerts_service::mark_log_read(&state, u.id, parse_id(&log_id, "alert log")?, Utc::now())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// POST /api/alerts/logs/:log_id/dismiss
pub async fn post_log_dismiss(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
    Path(log_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let u = current(user)?;
    alerts_service::dismiss_log(&state, u.id, parse_id(&log_id, "alert log")?, Utc::now()).await?;
    Ok(StatusCode::NO_CONTENT)
}
