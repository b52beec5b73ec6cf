use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;

use crate::{
    error::StoreError,
    models::{AlertLog, AlertRule, Frequency, MarketSnapshot},
};

use super::store::{Store, TriggerCommit};

/// Records "this rule fired now" exactly once.
///
/// The write is conditional on the `last_triggered_at` the caller saw when
/// it loaded the rule, so two evaluators racing on the same rule (threads,
/// processes, or a retried pass) produce one commit and one log between
/// them. Returns the stored log when this caller won.
pub async fn try_commit_trigger(
    store: &dyn Store,
    rule: &AlertRule,
    now: DateTime<Utc>,
    snapshot: MarketSnapshot,
    condition_met: String,
) -> Result<Option<AlertLog>, StoreError> {
    let log = AlertLog {
        id: ObjectId::new(),
        alert_rule_id: rule.id,
        user_id: rule.user_id,
        symbol: rule.symbol.clone(),
        alert_type: rule.alert_type.clone(),
        triggered_at: now,
        market_data: snapshot,
        condition_met,
        is_read: false,
        read_at: None,
        is_dismissed: false,
        dismissed_at: None,
    };

    let commit = TriggerCommit {
        rule_id: rule.id,
        expected_last_triggered_at: rule.last_triggered_at,
        now,
        deactivate: rule.frequency == Frequency::Once,
        log,
    };

    if store.try_commit_trigger(&commit).await? {
        Ok(Some(commit.log))
    } else {
        tracing::debug!(rule_id = %rule.id, "trigger already committed elsewhere");
        Ok(None)
    }
}
