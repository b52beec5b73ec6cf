//! In-process [`Store`](super::store::Store) for local runs and tests.
//!
//! All state sits behind one mutex, so the trigger compare-and-swap and the
//! log insert happen in a single critical section. Log inserts can be made
//! to fail on purpose, which leaves the log pending on the rule the same
//! way an interrupted Mongo commit does.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use mongodb::bson::oid::ObjectId;

use crate::{
    error::StoreError,
    models::{AlertLog, AlertRule, Notification, NotificationPreference},
};

use super::store::{AccountDirectory, AlertStore, NotificationStore, RuleFilter, TriggerCommit};

#[derive(Default)]
struct Inner {
    rules: HashMap<ObjectId, AlertRule>,
    logs: Vec<AlertLog>,
    notifications: Vec<Notification>,
    preferences: HashMap<ObjectId, NotificationPreference>,

    watch_lists: HashMap<ObjectId, ObjectId>,
    watch_list_items: HashSet<(ObjectId, String)>,
    rule_limits: HashMap<ObjectId, i64>,
    emails: HashMap<ObjectId, String>,
    email_slots: HashMap<(ObjectId, NaiveDate), i64>,

    unavailable: bool,
    failing_log_inserts: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".to_string()))?;
        if guard.unavailable {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(guard)
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes every call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner().unavailable = unavailable;
    }

    /// The next `n` trigger commits land but fail to write their log.
    pub fn fail_log_inserts(&self, n: usize) {
        self.inner().failing_log_inserts = n;
    }

    pub fn add_watch_list(&self, user_id: ObjectId, watch_list_id: ObjectId, symbols: &[&str]) {
        let mut inner = self.inner();
        inner.watch_lists.insert(watch_list_id, user_id);
        for s in symbols {
            inner.watch_list_items.insert((watch_list_id, s.to_uppercase()));
        }
    }

    pub fn set_rule_limit(&self, user_id: ObjectId, limit: i64) {
        self.inner().rule_limits.insert(user_id, limit);
    }

    pub fn set_user_email(&self, user_id: ObjectId, email: &str) {
        self.inner().emails.insert(user_id, email.to_string());
    }

    pub fn rule(&self, rule_id: ObjectId) -> Option<AlertRule> {
        self.inner().rules.get(&rule_id).cloned()
    }

    pub fn logs(&self) -> Vec<AlertLog> {
        self.inner().logs.clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.inner().notifications.clone()
    }
}

fn newest_first<T>(items: &mut [T], key: impl Fn(&T) -> DateTime<Utc>) {
    items.sort_by_key(|b| std::cmp::Reverse(key(b)));
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    async fn insert_rule(&self, rule: &AlertRule) -> Result<(), StoreError> {
        self.lock()?.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn get_rule(
        &self,
        user_id: ObjectId,
        rule_id: ObjectId,
    ) -> Result<Option<AlertRule>, StoreError> {
        Ok(self
            .lock()?
            .rules
            .get(&rule_id)
            .filter(|r| r.user_id == user_id)
            .cloned())
    }

    async fn list_rules(
        &self,
        user_id: ObjectId,
        filter: &RuleFilter,
    ) -> Result<Vec<AlertRule>, StoreError> {
        let inner = self.lock()?;
        let mut out: Vec<AlertRule> = inner
            .rules
            .values()
            .filter(|r| r.user_id == user_id)
            .filter(|r| filter.watch_list_id.is_none() || r.watch_list_id == filter.watch_list_id)
            .filter(|r| filter.is_active.is_none_or(|a| r.is_active == a))
            .cloned()
            .collect();
        newest_first(&mut out, |r| r.created_at);
        Ok(out)
    }

    async fn update_rule(&self, rule: &AlertRule) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let Some(existing) = inner
            .rules
            .get_mut(&rule.id)
            .filter(|r| r.user_id == rule.user_id)
        else {
            return Ok(false);
        };

        existing.name = rule.name.clone();
        existing.conditions = rule.conditions.clone();
        existing.frequency = rule.frequency;
        existing.is_active = rule.is_active;
        existing.notify_email = rule.notify_email;
        existing.notify_in_app = rule.notify_in_app;
        existing.updated_at = rule.updated_at;
        Ok(true)
    }

    async fn delete_rule(&self, user_id: ObjectId, rule_id: ObjectId) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let owned = inner.rules.get(&rule_id).is_some_and(|r| r.user_id == user_id);
        if owned {
            inner.rules.remove(&rule_id);
        }
        Ok(owned)
    }

    async fn count_active_rules(&self, user_id: ObjectId) -> Result<u64, StoreError> {
        Ok(self
            .lock()?
            .rules
            .values()
            .filter(|r| r.user_id == user_id && r.is_active)
            .count() as u64)
    }

    async fn list_active_rules(&self) -> Result<Vec<AlertRule>, StoreError> {
        let inner = self.lock()?;
        let mut out: Vec<AlertRule> = inner.rules.values().filter(|r| r.is_active).cloned().collect();
        out.sort_by_key(|r| r.created_at);
        Ok(out)
    }

    async fn try_commit_trigger(&self, commit: &TriggerCommit) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;

        let Some(rule) = inner.rules.get_mut(&commit.rule_id) else {
            return Ok(false);
        };
        if !rule.is_active || rule.last_triggered_at != commit.expected_last_triggered_at {
            return Ok(false);
        }

        rule.last_triggered_at = Some(commit.now);
        rule.trigger_count += 1;
        rule.last_log_id = Some(commit.log.id);
        rule.updated_at = commit.now;
        if commit.deactivate {
            rule.is_active = false;
        }

        if inner.failing_log_inserts > 0 {
            inner.failing_log_inserts -= 1;
            if let Some(rule) = inner.rules.get_mut(&commit.rule_id) {
                rule.pending_log = Some(commit.log.clone());
            }
            return Err(StoreError::Unavailable("alert log insert failed".to_string()));
        }

        inner.logs.push(commit.log.clone());
        Ok(true)
    }

    async fn recover_pending_logs(&self) -> Result<Vec<(AlertRule, AlertLog)>, StoreError> {
        let mut inner = self.lock()?;
        let Inner { rules, logs, .. } = &mut *inner;

        let mut recovered = Vec::new();
        for rule in rules.values_mut() {
            let Some(log) = rule.pending_log.take() else {
                continue;
            };
            if !logs.iter().any(|l| l.id == log.id) {
                logs.push(log.clone());
            }
            recovered.push((rule.clone(), log));
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
        let inner = self.lock()?;
        let mut out: Vec<AlertLog> = inner
            .logs
            .iter()
            .filter(|l| l.user_id == user_id && l.alert_rule_id == rule_id)
            .cloned()
            .collect();
        newest_first(&mut out, |l| l.triggered_at);
        Ok(out
            .into_iter()
            .skip(offset as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn mark_log_read(
        &self,
        user_id: ObjectId,
        log_id: ObjectId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        match inner.logs.iter_mut().find(|l| l.id == log_id && l.user_id == user_id) {
            Some(l) => {
                if !l.is_read {
                    l.is_read = true;
                    l.read_at = Some(at);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn dismiss_log(
        &self,
        user_id: ObjectId,
        log_id: ObjectId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        match inner.logs.iter_mut().find(|l| l.id == log_id && l.user_id == user_id) {
            Some(l) => {
                if !l.is_dismissed {
                    l.is_dismissed = true;
                    l.dismissed_at = Some(at);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert_notification(&self, n: &Notification) -> Result<(), StoreError> {
        self.lock()?.notifications.push(n.clone());
        Ok(())
    }

    async fn list_notifications(
        &self,
        user_id: ObjectId,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError> {
        let inner = self.lock()?;
        let mut out: Vec<Notification> = inner
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_dismissed)
            .filter(|n| !unread_only || !n.is_read)
            .cloned()
            .collect();
        newest_first(&mut out, |n| n.created_at);
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn mark_notification_read(
        &self,
        user_id: ObjectId,
        id: ObjectId,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        match inner.notifications.iter_mut().find(|n| n.id == id && n.user_id == user_id) {
            Some(n) => {
                n.is_read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn dismiss_notification(
        &self,
        user_id: ObjectId,
        id: ObjectId,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        match inner.notifications.iter_mut().find(|n| n.id == id && n.user_id == user_id) {
            Some(n) => {
                n.is_dismissed = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count_unread_notifications(&self, user_id: ObjectId) -> Result<u64, StoreError> {
        Ok(self
            .lock()?
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read && !n.is_dismissed)
            .count() as u64)
    }

    async fn mark_all_notifications_read(&self, user_id: ObjectId) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        let mut changed = 0;
        for n in inner
            .notifications
            .iter_mut()
            .filter(|n| n.user_id == user_id && !n.is_read && !n.is_dismissed)
        {
            n.is_read = true;
            changed += 1;
        }
        Ok(changed)
    }

    async fn try_reserve_email(
        &self,
        user_id: ObjectId,
        day: NaiveDate,
        cap: i64,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let used = inner.email_slots.entry((user_id, day)).or_insert(0);
        if *used >= cap {
            return Ok(false);
        }
        *used += 1;
        Ok(true)
    }

    async fn release_email(&self, user_id: ObjectId, day: NaiveDate) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if let Some(used) = inner.email_slots.get_mut(&(user_id, day)) {
            *used = (*used - 1).max(0);
        }
        Ok(())
    }

    async fn get_preferences(
        &self,
        user_id: ObjectId,
    ) -> Result<Option<NotificationPreference>, StoreError> {
        Ok(self.lock()?.preferences.get(&user_id).cloned())
    }

    async fn save_preferences(&self, prefs: &NotificationPreference) -> Result<(), StoreError> {
        self.lock()?.preferences.insert(prefs.user_id, prefs.clone());
        Ok(())
    }
}

#[async_trait]
impl AccountDirectory for MemoryStore {
    async fn owns_watch_list(
        &self,
        user_id: ObjectId,
        watch_list_id: ObjectId,
    ) -> Result<bool, StoreError> {
        Ok(self.lock()?.watch_lists.get(&watch_list_id) == Some(&user_id))
    }

    async fn watch_list_has_symbol(
        &self,
        watch_list_id: ObjectId,
        symbol: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .lock()?
            .watch_list_items
            .contains(&(watch_list_id, symbol.to_uppercase())))
    }

    async fn max_alert_rules(&self, user_id: ObjectId) -> Result<Option<i64>, StoreError> {
        Ok(self.lock()?.rule_limits.get(&user_id).copied())
    }

    async fn user_email(&self, user_id: ObjectId) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.emails.get(&user_id).cloned())
    }
}
