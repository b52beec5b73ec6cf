use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::ApiError,
    events,
    models::{AlertLog, AlertRule, Frequency},
    AppState,
};

use super::{evaluator::Condition, store::RuleFilter};

static SYMBOL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9][A-Z0-9.:\-]{0,19}$").expect("static regex"));

pub const MAX_NAME_LEN: usize = 255;
pub const DEFAULT_LOG_LIMIT: i64 = 50;

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct CreateAlertRequest {
    pub watch_list_id: String,
    pub symbol: String,
    pub alert_type: String,
    pub conditions: Value,
    pub name: String,
    pub frequency: String,
    #[serde(default)]
    pub notify_email: bool,
    #[serde(default = "default_true")]
    pub notify_in_app: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateAlertRequest {
    pub name: Option<String>,
    pub conditions: Option<Value>,
    pub frequency: Option<String>,
    pub is_active: Option<bool>,
    pub notify_email: Option<bool>,
    pub notify_in_app: Option<bool>,
}

pub fn parse_id(raw: &str, what: &'static str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(raw.trim()).map_err(|_| ApiError::Validation(format!("invalid {what} id")))
}

fn validate_name(name: &str) -> Result<String, ApiError> {
    let name = name.trim();
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(ApiError::Validation(format!(
            "name must be between 1 and {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

fn validate_symbol(symbol: &str) -> Result<String, ApiError> {
    let sym = symbol.trim().to_uppercase();
    if !SYMBOL_RE.is_match(&sym) {
        return Err(ApiError::Validation("invalid symbol".to_string()));
    }
    Ok(sym)
}

fn validate_conditions(alert_type: &str, conditions: &Value) -> Result<(), ApiError> {
    Condition::parse(alert_type, conditions)
        .map(|_| ())
        .map_err(|e| ApiError::Validation(e.to_string()))
}

fn validate_frequency(raw: &str) -> Result<Frequency, ApiError> {
    raw.parse::<Frequency>().map_err(ApiError::Validation)
}

/// Fails with `LimitReached` if activating one more rule would exceed the
/// owner's subscription tier.
async fn ensure_below_rule_limit(state: &AppState, user_id: ObjectId) -> Result<(), ApiError> {
    let limit = state
        .store
        .max_alert_rules(user_id)
        .await?
        .unwrap_or(state.settings.default_max_alert_rules);

    if limit < 0 {
        return Ok(());
    }

    let active = state.store.count_active_rules(user_id).await?;
    if active >= limit as u64 {
        return Err(ApiError::LimitReached(format!(
            "active alert limit reached ({active}/{limit}) for your subscription"
        )));
    }
    Ok(())
}

fn notify_alerts_updated(state: &AppState) {
    let _ = state.events_tx.send(events::ALERTS_UPDATED.to_string());
}

pub async fn create_alert(
    state: &AppState,
    user_id: ObjectId,
    req: CreateAlertRequest,
) -> Result<AlertRule, ApiError> {
    let name = validate_name(&req.name)?;
    let symbol = validate_symbol(&req.symbol)?;
    let alert_type = req.alert_type.trim().to_lowercase();
    validate_conditions(&alert_type, &req.conditions)?;
    let frequency = validate_frequency(&req.frequency)?;
    let watch_list_id = parse_id(&req.watch_list_id, "watch list")?;

    if !state.store.owns_watch_list(user_id, watch_list_id).await? {
        return Err(ApiError::NotFound("watch list"));
    }
    if !state.store.watch_list_has_symbol(watch_list_id, &symbol).await? {
        return Err(ApiError::Validation("symbol not found in watch list".to_string()));
    }

    ensure_below_rule_limit(state, user_id).await?;

    let now = Utc::now();
    let rule = AlertRule {
        id: ObjectId::new(),
        user_id,
        watch_list_id: Some(watch_list_id),
        name,
        symbol,
        alert_type,
        conditions: req.conditions,
        frequency,
        is_active: true,
        notify_email: req.notify_email,
        notify_in_app: req.notify_in_app,
        trigger_count: 0,
        last_triggered_at: None,
        last_log_id: None,
        pending_log: None,
        created_at: now,
        updated_at: now,
    };

    state.store.insert_rule(&rule).await?;
    notify_alerts_updated(state);

    tracing::info!(rule_id = %rule.id, user_id = %user_id, symbol = %rule.symbol, "alert rule created");
    Ok(rule)
}

pub async fn list_alerts(
    state: &AppState,
    user_id: ObjectId,
    filter: &RuleFilter,
) -> Result<Vec<AlertRule>, ApiError> {
    Ok(state.store.list_rules(user_id, filter).await?)
}

pub async fn get_alert(
    state: &AppState,
    user_id: ObjectId,
    rule_id: ObjectId,
) -> Result<AlertRule, ApiError> {
    state
        .store
        .get_rule(user_id, rule_id)
        .await?
        .ok_or(ApiError::NotFound("alert"))
}

pub async fn update_alert(
    state: &AppState,
    user_id: ObjectId,
    rule_id: ObjectId,
    req: UpdateAlertRequest,
) -> Result<AlertRule, ApiError> {
    let mut rule = get_alert(state, user_id, rule_id).await?;

    if let Some(name) = &req.name {
        rule.name = validate_name(name)?;
    }
    if let Some(conditions) = req.conditions {
        validate_conditions(&rule.alert_type, &conditions)?;
        rule.conditions = conditions;
    }
    if let Some(freq) = &req.frequency {
        rule.frequency = validate_frequency(freq)?;
    }
    if let Some(active) = req.is_active {
        if active && !rule.is_active {
            ensure_below_rule_limit(state, user_id).await?;
        }
        rule.is_active = active;
    }
    if let Some(v) = req.notify_email {
        rule.notify_email = v;
    }
    if let Some(v) = req.notify_in_app {
        rule.notify_in_app = v;
    }
    rule.updated_at = Utc::now();

    if !state.store.update_rule(&rule).await? {
        return Err(ApiError::NotFound("alert"));
    }
    notify_alerts_updated(state);

    // re-read so trigger bookkeeping reflects what is stored
    get_alert(state, user_id, rule_id).await
}

pub async fn delete_alert(
    state: &AppState,
    user_id: ObjectId,
    rule_id: ObjectId,
) -> Result<(), ApiError> {
    if !state.store.delete_rule(user_id, rule_id).await? {
        return Err(ApiError::NotFound("alert"));
    }
    notify_alerts_updated(state);
    Ok(())
}

pub async fn list_alert_logs(
    state: &AppState,
    user_id: ObjectId,
    rule_id: ObjectId,
    limit: Option<i64>,
    offset: Option<u64>,
) -> Result<Vec<AlertLog>, ApiError> {
    get_alert(state, user_id, rule_id).await?;

    let limit = limit.filter(|l| *l > 0).unwrap_or(DEFAULT_LOG_LIMIT).min(500);
    Ok(state
        .store
        .list_logs(user_id, rule_id, limit, offset.unwrap_or(0))
        .await?)
}

pub async fn mark_log_read(
    state: &AppState,
    user_id: ObjectId,
    log_id: ObjectId,
    at: DateTime<Utc>,
) -> Result<(), ApiError> {
    if !state.store.mark_log_read(user_id, log_id, at).await? {
        return Err(ApiError::NotFound("alert log"));
    }
    Ok(())
}

pub async fn dismiss_log(
    state: &AppState,
    user_id: ObjectId,
    log_id: ObjectId,
    at: DateTime<Utc>,
) -> Result<(), ApiError> {
    if !state.store.dismiss_log(user_id, log_id, at).await? {
        return Err(ApiError::NotFound("alert log"));
    }
    Ok(())
}
