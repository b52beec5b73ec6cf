use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures_util::StreamExt;
use mongodb::bson::{self, doc, oid::ObjectId, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{FindOptions, IndexOptions, ReplaceOptions, UpdateOptions};
use mongodb::{Collection, Cursor, Database, IndexModel};
use serde::de::DeserializeOwned;

use crate::{
    error::StoreError,
    models::{AlertLog, AlertRule, Notification, NotificationPreference},
};

use super::store::{AccountDirectory, AlertStore, NotificationStore, RuleFilter, TriggerCommit};

const RULES: &str = "alert_rules";
const LOGS: &str = "alert_logs";
const NOTIFICATIONS: &str = "notifications";
const PREFERENCES: &str = "notification_preferences";
const WATCH_LISTS: &str = "watch_lists";
const WATCH_LIST_ITEMS: &str = "watch_list_items";
const SUBSCRIPTIONS: &str = "user_subscriptions";
const USERS: &str = "users";
const EMAIL_COUNTERS: &str = "alert_email_counters";

const LOG_INSERT_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn rules(&self) -> Collection<AlertRule> {
        self.db.collection::<AlertRule>(RULES)
    }

    fn logs(&self) -> Collection<AlertLog> {
        self.db.collection::<AlertLog>(LOGS)
    }

    fn notifications(&self) -> Collection<Notification> {
        self.db.collection::<Notification>(NOTIFICATIONS)
    }

    fn preferences(&self) -> Collection<NotificationPreference> {
        self.db.collection::<NotificationPreference>(PREFERENCES)
    }

    fn raw(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }

    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        // rules: the pass scans active rules
        {
            let model = IndexModel::builder()
                .keys(doc! { "is_active": 1, "symbol": 1 })
                .build();
            self.raw(RULES).create_index(model, None).await?;
        }

        // rules: per-user listing
        {
            let model = IndexModel::builder()
                .keys(doc! { "user_id": 1, "created_at": -1 })
                .build();
            self.raw(RULES).create_index(model, None).await?;
        }

        // logs: history per rule, newest first
        {
            let model = IndexModel::builder()
                .keys(doc! { "alert_rule_id": 1, "triggered_at": -1 })
                .build();
            self.raw(LOGS).create_index(model, None).await?;
        }

        // rules: interrupted commits awaiting recovery
        {
            let model = IndexModel::builder()
                .keys(doc! { "pending_log._id": 1 })
                .options(IndexOptions::builder().sparse(true).build())
                .build();
            self.raw(RULES).create_index(model, None).await?;
        }

        // notifications: inbox per user
        {
            let model = IndexModel::builder()
                .keys(doc! { "user_id": 1, "created_at": -1 })
                .build();
            self.raw(NOTIFICATIONS).create_index(model, None).await?;
        }

        // watch list items: unique per (watch_list_id, symbol)
        {
            let model = IndexModel::builder()
                .keys(doc! { "watch_list_id": 1, "symbol": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build();

            // owned by the watch list feature; it may already exist with other options
            let _ = self.raw(WATCH_LIST_ITEMS).create_index(model, None).await;
        }

        Ok(())
    }

    async fn insert_log_idempotent(&self, log: &AlertLog) -> Result<(), StoreError> {
        let mut last_err = None;

        for attempt in 1..=LOG_INSERT_ATTEMPTS {
            match self.logs().insert_one(log, None).await {
                Ok(_) => return Ok(()),
                Err(e) if is_duplicate_key(&e) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        log_id = %log.id,
                        rule_id = %log.alert_rule_id,
                        attempt,
                        error = %e,
                        "alert log insert failed"
                    );
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Clears `pending_log` if it still holds `log_id`. Whoever clears it
    /// owns the log's notifications.
    async fn claim_pending_log(&self, rule_id: ObjectId, log_id: ObjectId) -> Result<bool, StoreError> {
        let res = self
            .rules()
            .update_one(
                doc! { "_id": rule_id, "pending_log._id": log_id },
                doc! { "$unset": { "pending_log": "" } },
                None,
            )
            .await?;
        Ok(res.modified_count > 0)
    }
}

fn email_counter_key(user_id: ObjectId, day: NaiveDate) -> String {
    format!("{}:{}", user_id.to_hex(), day.format("%Y-%m-%d"))
}

fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    match e.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(we)) => we.code == 11000,
        _ => false,
    }
}

async fn collect<T>(mut cursor: Cursor<T>) -> Result<Vec<T>, StoreError>
where
    T: DeserializeOwned + Unpin + Send + Sync,
{
    let mut items: Vec<T> = Vec::new();
    while let Some(res) = cursor.next().await {
        items.push(res?);
    }
    Ok(items)
}

#[async_trait]
impl AlertStore for MongoStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.db.run_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }

    async fn insert_rule(&self, rule: &AlertRule) -> Result<(), StoreError> {
        self.rules().insert_one(rule, None).await?;
        Ok(())
    }

    async fn get_rule(
        &self,
        user_id: ObjectId,
        rule_id: ObjectId,
    ) -> Result<Option<AlertRule>, StoreError> {
        Ok(self
            .rules()
            .find_one(doc! { "_id": rule_id, "user_id": user_id }, None)
            .await?)
    }

    async fn list_rules(
        &self,
        user_id: ObjectId,
        filter: &RuleFilter,
    ) -> Result<Vec<AlertRule>, StoreError> {
        let mut query = doc! { "user_id": user_id };
        if let Some(wl) = filter.watch_list_id {
            query.insert("watch_list_id", wl);
        }
        if let Some(active) = filter.is_active {
            query.insert("is_active", active);
        }

        let find_opts = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();

        collect(self.rules().find(query, find_opts).await?).await
    }

    async fn update_rule(&self, rule: &AlertRule) -> Result<bool, StoreError> {
        let conditions = bson::to_bson(&rule.conditions)?;

        let res = self
            .rules()
            .update_one(
                doc! { "_id": rule.id, "user_id": rule.user_id },
                doc! { "$set": {
                    "name": rule.name.as_str(),
                    "conditions": conditions,
                    "frequency": rule.frequency.as_str(),
                    "is_active": rule.is_active,
                    "notify_email": rule.notify_email,
                    "notify_in_app": rule.notify_in_app,
                    "updated_at": rule.updated_at.timestamp(),
                } },
                None,
            )
            .await?;

        Ok(res.matched_count > 0)
    }

    async fn delete_rule(&self, user_id: ObjectId, rule_id: ObjectId) -> Result<bool, StoreError> {
        let res = self
            .rules()
            .delete_one(doc! { "_id": rule_id, "user_id": user_id }, None)
            .await?;
        Ok(res.deleted_count > 0)
    }

    async fn count_active_rules(&self, user_id: ObjectId) -> Result<u64, StoreError> {
        Ok(self
            .rules()
            .count_documents(doc! { "user_id": user_id, "is_active": true }, None)
            .await?)
    }

    async fn list_active_rules(&self) -> Result<Vec<AlertRule>, StoreError> {
        let find_opts = FindOptions::builder().sort(doc! { "created_at": 1 }).build();
        collect(self.rules().find(doc! { "is_active": true }, find_opts).await?).await
    }

    async fn try_commit_trigger(&self, commit: &TriggerCommit) -> Result<bool, StoreError> {
        let now = commit.now.timestamp();
        let expected = commit.expected_last_triggered_at.map(|t| t.timestamp());

        // `null` also matches a missing field, which covers the first fire.
        let filter = doc! {
            "_id": commit.rule_id,
            "is_active": true,
            "last_triggered_at": expected,
        };

        let mut set = doc! {
            "last_triggered_at": now,
            "updated_at": now,
            "last_log_id": commit.log.id,
            "pending_log": bson::to_bson(&commit.log)?,
        };
        if commit.deactivate {
            set.insert("is_active", false);
        }

        let res = self
            .rules()
            .update_one(
                filter,
                doc! { "$set": set, "$inc": { "trigger_count": 1 } },
                None,
            )
            .await?;

        if res.matched_count == 0 {
            return Ok(false);
        }

        // From here on the log is durable on the rule; a failure below
        // leaves it for recover_pending_logs.
        self.insert_log_idempotent(&commit.log).await?;
        self.claim_pending_log(commit.rule_id, commit.log.id).await
    }

    async fn recover_pending_logs(&self) -> Result<Vec<(AlertRule, AlertLog)>, StoreError> {
        let stranded = collect(
            self.rules()
                .find(doc! { "pending_log": { "$exists": true } }, None)
                .await?,
        )
        .await?;

        let mut recovered = Vec::new();
        for mut rule in stranded {
            let Some(log) = rule.pending_log.take() else {
                continue;
            };
            self.insert_log_idempotent(&log).await?;
            if self.claim_pending_log(rule.id, log.id).await? {
                tracing::warn!(rule_id = %rule.id, log_id = %log.id, "recovered alert log from an interrupted commit");
                recovered.push((rule, log));
            }
        }
        Ok(recovered)
    }

    async fn list_logs(
        &self,
        user_id: ObjectId,
        rule_id: ObjectId,
        limit: i64,
        offset: u64,
    ) -> Result<Vec<AlertLog>, StoreError> {
        let find_opts = FindOptions::builder()
            .sort(doc! { "triggered_at": -1 })
            .limit(limit)
            .skip(offset)
            .build();

        collect(
            self.logs()
                .find(doc! { "user_id": user_id, "alert_rule_id": rule_id }, find_opts)
                .await?,
        )
        .await
    }

    async fn mark_log_read(
        &self,
        user_id: ObjectId,
        log_id: ObjectId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let filter = doc! { "_id": log_id, "user_id": user_id };
        let res = self
            .logs()
            .update_one(
                doc! { "_id": log_id, "user_id": user_id, "is_read": false },
                doc! { "$set": { "is_read": true, "read_at": at.timestamp() } },
                None,
            )
            .await?;
        if res.matched_count > 0 {
            return Ok(true);
        }
        Ok(self.logs().count_documents(filter, None).await? > 0)
    }

    async fn dismiss_log(
        &self,
        user_id: ObjectId,
        log_id: ObjectId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let filter = doc! { "_id": log_id, "user_id": user_id };
        let res = self
            .logs()
            .update_one(
                doc! { "_id": log_id, "user_id": user_id, "is_dismissed": false },
                doc! { "$set": { "is_dismissed": true, "dismissed_at": at.timestamp() } },
                None,
            )
            .await?;
        if res.matched_count > 0 {
            return Ok(true);
        }
        Ok(self.logs().count_documents(filter, None).await? > 0)
    }
}

#[async_trait]
impl NotificationStore for MongoStore {
    async fn insert_notification(&self, n: &Notification) -> Result<(), StoreError> {
        self.notifications().insert_one(n, None).await?;
        Ok(())
    }

    async fn list_notifications(
        &self,
        user_id: ObjectId,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError> {
        let mut query = doc! { "user_id": user_id, "is_dismissed": false };
        if unread_only {
            query.insert("is_read", false);
        }

        let find_opts = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .limit(limit)
            .build();

        collect(self.notifications().find(query, find_opts).await?).await
    }

    async fn mark_notification_read(
        &self,
        user_id: ObjectId,
        id: ObjectId,
    ) -> Result<bool, StoreError> {
        let res = self
            .notifications()
            .update_one(
                doc! { "_id": id, "user_id": user_id },
                doc! { "$set": { "is_read": true } },
                None,
            )
            .await?;
        Ok(res.matched_count > 0)
    }

    async fn dismiss_notification(
        &self,
        user_id: ObjectId,
        id: ObjectId,
    ) -> Result<bool, StoreError> {
        let res = self
            .notifications()
            .update_one(
                doc! { "_id": id, "user_id": user_id },
                doc! { "$set": { "is_dismissed": true } },
                None,
            )
            .await?;
        Ok(res.matched_count > 0)
    }

    async fn count_unread_notifications(&self, user_id: ObjectId) -> Result<u64, StoreError> {
        Ok(self
            .notifications()
            .count_documents(
                doc! { "user_id": user_id, "is_read": false, "is_dismissed": false },
                None,
            )
            .await?)
    }

    async fn mark_all_notifications_read(&self, user_id: ObjectId) -> Result<u64, StoreError> {
        let res = self
            .notifications()
            .update_many(
                doc! { "user_id": user_id, "is_read": false, "is_dismissed": false },
                doc! { "$set": { "is_read": true } },
                None,
            )
            .await?;
        Ok(res.modified_count)
    }

    async fn try_reserve_email(
        &self,
        user_id: ObjectId,
        day: NaiveDate,
        cap: i64,
    ) -> Result<bool, StoreError> {
        // A full counter fails the filter, so the upsert collides on _id.
        let res = self
            .raw(EMAIL_COUNTERS)
            .update_one(
                doc! { "_id": email_counter_key(user_id, day), "count": { "$lt": cap } },
                doc! {
                    "$inc": { "count": 1_i64 },
                    "$setOnInsert": { "user_id": user_id, "day": day.format("%Y-%m-%d").to_string() },
                },
                UpdateOptions::builder().upsert(true).build(),
            )
            .await;

        match res {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn release_email(&self, user_id: ObjectId, day: NaiveDate) -> Result<(), StoreError> {
        self.raw(EMAIL_COUNTERS)
            .update_one(
                doc! { "_id": email_counter_key(user_id, day), "count": { "$gt": 0 } },
                doc! { "$inc": { "count": -1_i64 } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn get_preferences(
        &self,
        user_id: ObjectId,
    ) -> Result<Option<NotificationPreference>, StoreError> {
        Ok(self.preferences().find_one(doc! { "_id": user_id }, None).await?)
    }

    async fn save_preferences(&self, prefs: &NotificationPreference) -> Result<(), StoreError> {
        self.preferences()
            .replace_one(
                doc! { "_id": prefs.user_id },
                prefs,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AccountDirectory for MongoStore {
    async fn owns_watch_list(
        &self,
        user_id: ObjectId,
        watch_list_id: ObjectId,
    ) -> Result<bool, StoreError> {
        let n = self
            .raw(WATCH_LISTS)
            .count_documents(doc! { "_id": watch_list_id, "user_id": user_id }, None)
            .await?;
        Ok(n > 0)
    }

    async fn watch_list_has_symbol(
        &self,
        watch_list_id: ObjectId,
        symbol: &str,
    ) -> Result<bool, StoreError> {
        let n = self
            .raw(WATCH_LIST_ITEMS)
            .count_documents(
                doc! { "watch_list_id": watch_list_id, "symbol": symbol.to_uppercase() },
                None,
            )
            .await?;
        Ok(n > 0)
    }

    async fn max_alert_rules(&self, user_id: ObjectId) -> Result<Option<i64>, StoreError> {
        let found = self
            .raw(SUBSCRIPTIONS)
            .find_one(doc! { "user_id": user_id }, None)
            .await?;

        Ok(found.and_then(|d| match d.get("max_alert_rules") {
            Some(bson::Bson::Int32(n)) => Some(i64::from(*n)),
            Some(bson::Bson::Int64(n)) => Some(*n),
            _ => None,
        }))
    }

    async fn user_email(&self, user_id: ObjectId) -> Result<Option<String>, StoreError> {
        let found = self
            .raw(USERS)
            .find_one(doc! { "_id": user_id }, None)
            .await?;

        Ok(found.and_then(|d| d.get_str("email").ok().map(str::to_string)))
    }
}
