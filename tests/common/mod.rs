#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mongodb::bson::oid::ObjectId;
use serde_json::Value;
use tokio::sync::Notify;

use marketalerts::{
    config,
    error::{EmailError, ProviderError},
    models::{AlertRule, AssetClass, Frequency, Quote},
    services::{
        alert_processor::AlertProcessor,
        dispatcher::NotificationDispatcher,
        email::EmailTransport,
        memory_store::MemoryStore,
        polygon::MarketDataProvider,
        quote_fetcher::{QuoteBatchFetcher, SymbolClassifier},
        store::Store,
    },
    AppState,
};

pub const TEST_JWT_SECRET: &str = "test-secret";

pub fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

pub fn quote(symbol: &str, price: f64, volume: i64) -> Quote {
    Quote {
        symbol: symbol.to_string(),
        price,
        volume,
        reference_price: None,
        reference_volume: None,
        timestamp: at(2026, 3, 2, 15, 0, 0),
    }
}

pub fn rule(
    user_id: ObjectId,
    symbol: &str,
    alert_type: &str,
    conditions: Value,
    frequency: Frequency,
) -> AlertRule {
    let created = at(2026, 3, 1, 12, 0, 0);
    AlertRule {
        id: ObjectId::new(),
        user_id,
        watch_list_id: Some(ObjectId::new()),
        name: format!("{symbol} {alert_type}"),
        symbol: symbol.to_string(),
        alert_type: alert_type.to_string(),
        conditions,
        frequency,
        is_active: true,
        notify_email: true,
        notify_in_app: true,
        trigger_count: 0,
        last_triggered_at: None,
        last_log_id: None,
        pending_log: None,
        created_at: created,
        updated_at: created,
    }
}

/// Serves canned quotes and records every upstream call.
#[derive(Default)]
pub struct FakeProvider {
    quotes: Mutex<HashMap<String, Quote>>,
    failing: Mutex<HashSet<AssetClass>>,
    calls: Mutex<Vec<(AssetClass, Vec<String>)>>,
    started: AtomicUsize,
    delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
    gated_class: Option<AssetClass>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Every call waits until the gate is notified.
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// Only calls for `class` wait on the gate.
    pub fn gated_class(gate: Arc<Notify>, class: AssetClass) -> Self {
        Self {
            gate: Some(gate),
            gated_class: Some(class),
            ..Self::default()
        }
    }

    pub fn set_quote(&self, q: Quote) {
        self.quotes.lock().unwrap().insert(q.symbol.clone(), q);
    }

    pub fn fail(&self, class: AssetClass) {
        self.failing.lock().unwrap().insert(class);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<(AssetClass, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MarketDataProvider for FakeProvider {
    async fn get_multiple_quotes(
        &self,
        asset_class: AssetClass,
        symbols: &[String],
    ) -> Result<HashMap<String, Quote>, ProviderError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            if self.gated_class.map_or(true, |c| c == asset_class) {
                gate.notified().await;
            }
        }
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }

        self.calls
            .lock()
            .unwrap()
            .push((asset_class, symbols.to_vec()));

        if self.failing.lock().unwrap().contains(&asset_class) {
            return Err(ProviderError::Status {
                status: 503,
                body: "upstream unavailable".to_string(),
            });
        }

        let quotes = self.quotes.lock().unwrap();
        Ok(symbols
            .iter()
            .filter_map(|s| quotes.get(s).cloned().map(|q| (s.clone(), q)))
            .collect())
    }
}

/// Records sent messages instead of delivering them.
#[derive(Default)]
pub struct FakeEmail {
    sent: Mutex<Vec<(String, String, String)>>,
    failing: AtomicBool,
    delay: Option<Duration>,
}

impl FakeEmail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let e = Self::default();
        e.failing.store(true, Ordering::SeqCst);
        e
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// (to, subject, body)
    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailTransport for FakeEmail {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), EmailError> {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmailError::Rejected {
                status: 500,
                body: "smtp relay down".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), html_body.to_string()));
        Ok(())
    }
}

pub fn dispatcher(store: Arc<MemoryStore>, email: Arc<FakeEmail>) -> NotificationDispatcher {
    NotificationDispatcher::new(
        store,
        email,
        Duration::from_millis(200),
        "http://localhost:3000".to_string(),
    )
}

pub fn processor(
    store: Arc<MemoryStore>,
    provider: Arc<FakeProvider>,
    email: Arc<FakeEmail>,
) -> AlertProcessor {
    let fetcher = QuoteBatchFetcher::new(
        provider,
        SymbolClassifier::default(),
        Duration::from_secs(2),
    );
    AlertProcessor::new(store.clone(), fetcher, dispatcher(store, email), 4)
}

pub fn test_state(store: Arc<MemoryStore>) -> AppState {
    let mut settings = config::load();
    settings.jwt_secret = TEST_JWT_SECRET.to_string();
    settings.default_max_alert_rules = 10;

    let (events_tx, _events_rx) = tokio::sync::broadcast::channel::<String>(16);
    let store: Arc<dyn Store> = store;

    AppState {
        store,
        settings,
        events_tx,
    }
}
