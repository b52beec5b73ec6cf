use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use mongodb::bson::oid::ObjectId;

use crate::{
    error::StoreError,
    models::{AlertLog, AlertRule, Notification, NotificationPreference},
};

/// Filter for listing a user's rules.
#[derive(Debug, Clone, Default)]
pub struct RuleFilter {
    pub watch_list_id: Option<ObjectId>,
    pub is_active: Option<bool>,
}

/// A conditional trigger write: applies only if the rule is still active
/// and its `last_triggered_at` still equals `expected_last_triggered_at`.
/// On success the log is stored with it.
#[derive(Debug, Clone)]
pub struct TriggerCommit {
    pub rule_id: ObjectId,
    pub expected_last_triggered_at: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
    pub deactivate: bool,
    pub log: AlertLog,
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Cheap round trip to the backing storage.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn insert_rule(&self, rule: &AlertRule) -> Result<(), StoreError>;

    async fn get_rule(&self, user_id: ObjectId, rule_id: ObjectId)
        -> Result<Option<AlertRule>, StoreError>;

    async fn list_rules(&self, user_id: ObjectId, filter: &RuleFilter)
        -> Result<Vec<AlertRule>, StoreError>;

    /// Writes the user-editable fields only (name, conditions, frequency,
    /// flags). Trigger bookkeeping is left alone.
    async fn update_rule(&self, rule: &AlertRule) -> Result<bool, StoreError>;

    async fn delete_rule(&self, user_id: ObjectId, rule_id: ObjectId) -> Result<bool, StoreError>;

    async fn count_active_rules(&self, user_id: ObjectId) -> Result<u64, StoreError>;

    /// Every active rule across all users, read fresh on each call.
    async fn list_active_rules(&self) -> Result<Vec<AlertRule>, StoreError>;

    /// `Ok(false)` means someone else already fired this rule for this
    /// window: not an error, just nothing to do.
    ///
    /// The log travels on the rule document as `pending_log` in the same
    /// conditional write. An `Err` after that write leaves it there for
    /// [`AlertStore::recover_pending_logs`].
    async fn try_commit_trigger(&self, commit: &TriggerCommit) -> Result<bool, StoreError>;

    /// Writes out logs stranded on rules by an interrupted commit and
    /// returns the ones this caller claimed. Each stranded log is returned
    /// to exactly one caller, which then owes it its notifications.
    async fn recover_pending_logs(&self) -> Result<Vec<(AlertRule, AlertLog)>, StoreError>;

    async fn list_logs(
        &self,
        user_id: ObjectId,
        rule_id: ObjectId,
        limit: i64,
        offset: u64,
    ) -> Result<Vec<AlertLog>, StoreError>;

    async fn mark_log_read(&self, user_id: ObjectId, log_id: ObjectId, at: DateTime<Utc>)
        -> Result<bool, StoreError>;

    async fn dismiss_log(&self, user_id: ObjectId, log_id: ObjectId, at: DateTime<Utc>)
        -> Result<bool, StoreError>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert_notification(&self, n: &Notification) -> Result<(), StoreError>;

    async fn list_notifications(&self, user_id: ObjectId, unread_only: bool, limit: i64)
        -> Result<Vec<Notification>, StoreError>;

    async fn mark_notification_read(&self, user_id: ObjectId, id: ObjectId)
        -> Result<bool, StoreError>;

    async fn dismiss_notification(&self, user_id: ObjectId, id: ObjectId)
        -> Result<bool, StoreError>;

    async fn count_unread_notifications(&self, user_id: ObjectId) -> Result<u64, StoreError>;

    /// Returns how many notifications changed.
    async fn mark_all_notifications_read(&self, user_id: ObjectId) -> Result<u64, StoreError>;

    /// Takes one of the user's `cap` alert-email slots for `day`. `Ok(false)`
    /// when the day's slots are used up.
    async fn try_reserve_email(&self, user_id: ObjectId, day: NaiveDate, cap: i64)
        -> Result<bool, StoreError>;

    /// Gives back a slot whose email was never delivered.
    async fn release_email(&self, user_id: ObjectId, day: NaiveDate) -> Result<(), StoreError>;

    async fn get_preferences(&self, user_id: ObjectId)
        -> Result<Option<NotificationPreference>, StoreError>;

    async fn save_preferences(&self, prefs: &NotificationPreference) -> Result<(), StoreError>;
}

/// Account data owned by other parts of the system and only read here.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn owns_watch_list(&self, user_id: ObjectId, watch_list_id: ObjectId)
        -> Result<bool, StoreError>;

    async fn watch_list_has_symbol(&self, watch_list_id: ObjectId, symbol: &str)
        -> Result<bool, StoreError>;

    /// Active-rule limit from the user's subscription tier. `None` when the
    /// user has no subscription record; `Some(-1)` is unlimited.
    async fn max_alert_rules(&self, user_id: ObjectId) -> Result<Option<i64>, StoreError>;

    async fn user_email(&self, user_id: ObjectId) -> Result<Option<String>, StoreError>;
}

pub trait Store: AlertStore + NotificationStore + AccountDirectory {}

impl<T: AlertStore + NotificationStore + AccountDirectory> Store for T {}
