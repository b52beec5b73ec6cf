//! One evaluation pass over every active rule.
//!
//! `Idle -> LoadingRules -> FetchingQuotes -> Evaluating -> Dispatching -> Idle`.
//! Quotes arrive per asset class; each class's rules are evaluated and
//! dispatched as soon as its batch lands. A processor never runs two passes
//! at once; cross-process safety comes from the conditional trigger commit.
//! Logs stranded by an interrupted commit are recovered and dispatched at
//! the start of the next pass.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Timelike, Utc};
use futures_util::{stream, StreamExt};
use mongodb::bson::oid::ObjectId;
use tokio::sync::broadcast;

use crate::{
    error::{ProcessError, StoreError},
    events,
    models::{AlertLog, AlertRule, MarketSnapshot, NotificationPreference, Quote},
};

use super::{
    dispatcher::{DispatchResult, NotificationDispatcher},
    evaluator, frequency,
    quote_fetcher::QuoteBatchFetcher,
    store::Store,
    trigger,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Idle,
    LoadingRules,
    FetchingQuotes,
    Evaluating,
    Dispatching,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub recovered: usize,
    pub rules_loaded: usize,
    pub evaluated: usize,
    pub triggered: usize,
    pub not_met: usize,
    pub suppressed: usize,
    pub conflicts: usize,
    pub skipped_no_quote: usize,
    pub skipped_provider: usize,
    pub skipped_invalid: usize,
    pub in_app_created: usize,
    pub emails_sent: usize,
    pub email_failures: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Completed(PassReport),
    /// Another pass was still running on this processor.
    Skipped,
}

#[derive(Debug)]
enum Verdict {
    Invalid,
    NotMet,
    Suppressed,
    Conflict,
    Committed(AlertLog),
}

/// Resets the state to `Idle` however the pass ends.
struct PassGuard<'a> {
    state: &'a Mutex<PassState>,
}

impl PassGuard<'_> {
    fn set(&self, next: PassState) {
        if let Ok(mut s) = self.state.lock() {
            *s = next;
        }
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.set(PassState::Idle);
    }
}

pub struct AlertProcessor {
    store: Arc<dyn Store>,
    fetcher: QuoteBatchFetcher,
    dispatcher: NotificationDispatcher,
    workers: usize,
    state: Mutex<PassState>,
    events_tx: Option<broadcast::Sender<String>>,
}

impl AlertProcessor {
    pub fn new(
        store: Arc<dyn Store>,
        fetcher: QuoteBatchFetcher,
        dispatcher: NotificationDispatcher,
        workers: usize,
    ) -> Self {
        Self {
            store,
            fetcher,
            dispatcher,
            workers: workers.max(1),
            state: Mutex::new(PassState::Idle),
            events_tx: None,
        }
    }

    pub fn with_events(mut self, events_tx: broadcast::Sender<String>) -> Self {
        self.events_tx = Some(events_tx);
        self
    }

    pub fn state(&self) -> PassState {
        self.state.lock().map(|s| *s).unwrap_or(PassState::Idle)
    }

    fn begin(&self) -> Option<PassGuard<'_>> {
        let mut s = self.state.lock().ok()?;
        if *s != PassState::Idle {
            return None;
        }
        *s = PassState::LoadingRules;
        Some(PassGuard { state: &self.state })
    }

    pub async fn process_all_alerts(&self) -> Result<PassOutcome, ProcessError> {
        self.process_all_alerts_at(Utc::now()).await
    }

    /// Runs a pass as of `now`. Trigger timestamps are stored in whole
    /// seconds, so `now` is truncated to keep the compare-and-swap exact.
    pub async fn process_all_alerts_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<PassOutcome, ProcessError> {
        let Some(guard) = self.begin() else {
            tracing::warn!("alert pass still running, skipping this invocation");
            return Ok(PassOutcome::Skipped);
        };
        let now = now.with_nanosecond(0).unwrap_or(now);

        tracing::info!("starting alert pass");

        let stranded = self.store.recover_pending_logs().await.map_err(|e| {
            tracing::error!(error = %e, "failed to recover pending alert logs, aborting pass");
            e
        })?;

        let rules = self.store.list_active_rules().await.map_err(|e| {
            tracing::error!(error = %e, "failed to load active alert rules, aborting pass");
            e
        })?;

        let mut report = PassReport {
            recovered: stranded.len(),
            rules_loaded: rules.len(),
            ..Default::default()
        };

        if !stranded.is_empty() {
            tracing::warn!(logs = stranded.len(), "dispatching alert logs recovered from an interrupted pass");
            guard.set(PassState::Dispatching);
            let fired = stranded
                .into_iter()
                .map(|(rule, log)| (Arc::new(rule), log))
                .collect();
            self.dispatch_all(fired, now, &mut report).await;
            guard.set(PassState::LoadingRules);
        }

        let mut by_symbol: HashMap<String, Vec<Arc<AlertRule>>> = HashMap::new();
        for rule in rules {
            by_symbol
                .entry(rule.symbol.trim().to_uppercase())
                .or_default()
                .push(Arc::new(rule));
        }

        if by_symbol.is_empty() {
            tracing::info!("no active alert rules");
            return Ok(PassOutcome::Completed(report));
        }

        guard.set(PassState::FetchingQuotes);
        let mut batches = self.fetcher.start(by_symbol.keys());

        while let Some(batch) = batches.next().await {
            let quotes = match batch.quotes {
                Ok(q) => q,
                Err(e) => {
                    let skipped: usize = batch
                        .symbols
                        .iter()
                        .filter_map(|s| by_symbol.get(s))
                        .map(Vec::len)
                        .sum();
                    tracing::warn!(
                        asset_class = batch.asset_class.as_str(),
                        rules = skipped,
                        error = %e,
                        "quote batch failed, skipping its rules this pass"
                    );
                    report.skipped_provider += skipped;
                    continue;
                }
            };

            let mut work: Vec<(Arc<AlertRule>, Quote)> = Vec::new();
            for sym in &batch.symbols {
                let Some(rules) = by_symbol.get(sym) else {
                    continue;
                };
                match quotes.get(sym) {
                    Some(quote) => work.extend(rules.iter().map(|r| (Arc::clone(r), quote.clone()))),
                    None => {
                        tracing::warn!(symbol = %sym, rules = rules.len(), "no quote returned, skipping");
                        report.skipped_no_quote += rules.len();
                    }
                }
            }

            guard.set(PassState::Evaluating);
            self.run_partition(&guard, work, now, &mut report).await?;
            guard.set(PassState::FetchingQuotes);
        }

        if report.triggered > 0 {
            if let Some(tx) = &self.events_tx {
                let _ = tx.send(events::ALERTS_UPDATED.to_string());
            }
        }

        tracing::info!(
            recovered = report.recovered,
            loaded = report.rules_loaded,
            evaluated = report.evaluated,
            triggered = report.triggered,
            suppressed = report.suppressed,
            conflicts = report.conflicts,
            skipped_no_quote = report.skipped_no_quote,
            skipped_provider = report.skipped_provider,
            skipped_invalid = report.skipped_invalid,
            emails_sent = report.emails_sent,
            email_failures = report.email_failures,
            "alert pass completed"
        );

        Ok(PassOutcome::Completed(report))
    }

    async fn evaluate_and_commit(
        &self,
        rule: &AlertRule,
        quote: &Quote,
        now: DateTime<Utc>,
    ) -> Result<Verdict, StoreError> {
        let eval = match evaluator::evaluate(&rule.alert_type, &rule.conditions, quote) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(rule_id = %rule.id, symbol = %rule.symbol, error = %e, "cannot evaluate rule, skipping");
                return Ok(Verdict::Invalid);
            }
        };

        if !eval.triggered {
            return Ok(Verdict::NotMet);
        }

        if !frequency::should_fire(rule.frequency, rule.last_triggered_at, now) {
            return Ok(Verdict::Suppressed);
        }

        let snapshot = MarketSnapshot::from(quote);
        match trigger::try_commit_trigger(self.store.as_ref(), rule, now, snapshot, eval.reason)
            .await?
        {
            Some(log) => {
                tracing::info!(
                    rule_id = %rule.id,
                    symbol = %rule.symbol,
                    alert_type = %rule.alert_type,
                    log_id = %log.id,
                    "alert triggered"
                );
                Ok(Verdict::Committed(log))
            }
            None => Ok(Verdict::Conflict),
        }
    }

    async fn run_partition(
        &self,
        guard: &PassGuard<'_>,
        work: Vec<(Arc<AlertRule>, Quote)>,
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) -> Result<(), ProcessError> {
        let verdicts: Vec<(Arc<AlertRule>, Result<Verdict, StoreError>)> = stream::iter(work)
            .map(|(rule, quote)| async move {
                let verdict = self.evaluate_and_commit(&rule, &quote, now).await;
                (rule, verdict)
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let mut fired: Vec<(Arc<AlertRule>, AlertLog)> = Vec::new();
        let mut failure = None;
        for (rule, verdict) in verdicts {
            match verdict {
                Ok(Verdict::Invalid) => report.skipped_invalid += 1,
                Ok(Verdict::NotMet) => {
                    report.evaluated += 1;
                    report.not_met += 1;
                }
                Ok(Verdict::Suppressed) => {
                    report.evaluated += 1;
                    report.suppressed += 1;
                }
                Ok(Verdict::Conflict) => {
                    report.evaluated += 1;
                    report.conflicts += 1;
                }
                Ok(Verdict::Committed(log)) => {
                    report.evaluated += 1;
                    report.triggered += 1;
                    fired.push((rule, log));
                }
                Err(e) => {
                    report.evaluated += 1;
                    failure.get_or_insert(e);
                }
            }
        }

        // Commits that did land still get their notifications before the
        // pass gives up.
        if !fired.is_empty() {
            guard.set(PassState::Dispatching);
            self.dispatch_all(fired, now, report).await;
        }

        match failure {
            Some(e) => {
                tracing::error!(error = %e, "trigger commit failed, aborting pass");
                Err(e.into())
            }
            None => Ok(()),
        }
    }

    async fn dispatch_all(
        &self,
        fired: Vec<(Arc<AlertRule>, AlertLog)>,
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) {
        let mut prefs_cache: HashMap<ObjectId, NotificationPreference> = HashMap::new();
        for (rule, _) in &fired {
            if prefs_cache.contains_key(&rule.user_id) {
                continue;
            }
            let prefs = match self.store.get_preferences(rule.user_id).await {
                Ok(Some(p)) => p,
                Ok(None) => NotificationPreference::defaults_for(rule.user_id),
                Err(e) => {
                    tracing::warn!(user_id = %rule.user_id, error = %e, "preferences unavailable, not emailing");
                    NotificationPreference {
                        email_enabled: false,
                        ..NotificationPreference::defaults_for(rule.user_id)
                    }
                }
            };
            prefs_cache.insert(rule.user_id, prefs);
        }

        let jobs: Vec<(Arc<AlertRule>, AlertLog, NotificationPreference)> = fired
            .into_iter()
            .map(|(rule, log)| {
                let prefs = prefs_cache
                    .get(&rule.user_id)
                    .cloned()
                    .unwrap_or_else(|| NotificationPreference::defaults_for(rule.user_id));
                (rule, log, prefs)
            })
            .collect();

        let results: Vec<DispatchResult> = stream::iter(jobs)
            .map(|(rule, log, prefs)| async move {
                self.dispatcher.dispatch(&rule, &log, &prefs, now).await
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        for r in results {
            if r.in_app_created {
                report.in_app_created += 1;
            }
            if r.email_sent {
                report.emails_sent += 1;
            }
            if r.email_error.is_some() {
                report.email_failures += 1;
            }
        }
    }
}
