mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveTime;
use mongodb::bson::oid::ObjectId;
use serde_json::json;

use tokio::sync::broadcast;

use marketalerts::{
    events,
    models::{AlertLog, AlertRule, Frequency, MarketSnapshot, NotificationPreference},
    services::{
        dispatcher::{in_quiet_hours, within_window, EmailSkip},
        email::{alert_subject, sanitize_header},
        memory_store::MemoryStore,
    },
};

use common::{at, dispatcher, quote, rule, FakeEmail};

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn fired(user: ObjectId) -> (AlertRule, AlertLog) {
    let r = rule(user, "AAPL", "price_above", json!({ "threshold": 150.0 }), Frequency::Daily);
    let log = AlertLog {
        id: ObjectId::new(),
        alert_rule_id: r.id,
        user_id: user,
        symbol: r.symbol.clone(),
        alert_type: r.alert_type.clone(),
        triggered_at: at(2026, 3, 2, 15, 0, 0),
        market_data: MarketSnapshot::from(&quote("AAPL", 151.0, 1_000)),
        condition_met: "AAPL crossed above $150.00 (current: $151.00)".to_string(),
        is_read: false,
        read_at: None,
        is_dismissed: false,
        dismissed_at: None,
    };
    (r, log)
}

fn quiet(tz: &str, start: &str, end: &str) -> NotificationPreference {
    NotificationPreference {
        email_address: Some("trader@example.com".to_string()),
        quiet_hours_enabled: true,
        quiet_hours_start: start.to_string(),
        quiet_hours_end: end.to_string(),
        quiet_hours_timezone: Some(tz.to_string()),
        ..NotificationPreference::defaults_for(ObjectId::new())
    }
}

#[test]
fn window_wraps_midnight() {
    let (start, end) = (hm(22, 0), hm(7, 0));
    assert!(within_window(hm(23, 30), start, end));
    assert!(within_window(hm(3, 0), start, end));
    assert!(within_window(hm(22, 0), start, end));
    assert!(!within_window(hm(7, 0), start, end));
    assert!(!within_window(hm(12, 0), start, end));
}

#[test]
fn window_without_wrap_and_empty_window() {
    assert!(within_window(hm(13, 0), hm(12, 0), hm(14, 0)));
    assert!(!within_window(hm(14, 0), hm(12, 0), hm(14, 0)));
    assert!(!within_window(hm(9, 0), hm(9, 0), hm(9, 0)));
}

#[test]
fn quiet_hours_are_evaluated_in_user_timezone() {
    let prefs = quiet("America/New_York", "22:00", "07:00");

    // 04:30 UTC is 23:30 in New York (EST)
    assert_eq!(in_quiet_hours(&prefs, at(2026, 1, 15, 4, 30, 0)), Ok(true));
    // 16:00 UTC is 11:00 in New York
    assert_eq!(in_quiet_hours(&prefs, at(2026, 1, 15, 16, 0, 0)), Ok(false));
}

#[test]
fn unknown_timezone_is_an_error() {
    let prefs = quiet("Mars/Olympus_Mons", "22:00", "07:00");
    assert!(in_quiet_hours(&prefs, at(2026, 1, 15, 4, 30, 0)).is_err());
}

#[test]
fn enabled_quiet_hours_without_timezone_is_an_error() {
    let mut prefs = quiet("UTC", "22:00", "07:00");
    prefs.quiet_hours_timezone = None;
    assert!(in_quiet_hours(&prefs, at(2026, 1, 15, 4, 30, 0)).unwrap_err().contains("no timezone"));

    prefs.quiet_hours_timezone = Some("  ".to_string());
    assert!(in_quiet_hours(&prefs, at(2026, 1, 15, 4, 30, 0)).is_err());
}

#[test]
fn disabled_quiet_hours_never_match() {
    let mut prefs = quiet("UTC", "00:00", "23:59");
    prefs.quiet_hours_enabled = false;
    assert_eq!(in_quiet_hours(&prefs, at(2026, 1, 15, 12, 0, 0)), Ok(false));
}

#[tokio::test]
async fn quiet_hours_suppress_email_but_not_in_app() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(FakeEmail::new());
    let d = dispatcher(store.clone(), email.clone());

    let user = ObjectId::new();
    let (r, log) = fired(user);
    let prefs = quiet("UTC", "22:00", "07:00");

    let res = d.dispatch(&r, &log, &prefs, at(2026, 1, 15, 23, 30, 0)).await;

    assert!(res.in_app_created);
    assert!(!res.email_sent);
    assert_eq!(res.email_skipped, Some(EmailSkip::QuietHours));
    assert!(email.sent().is_empty());
    assert_eq!(store.notifications().len(), 1);
}

#[tokio::test]
async fn email_sent_outside_quiet_hours() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(FakeEmail::new());
    let d = dispatcher(store.clone(), email.clone());

    let (r, log) = fired(ObjectId::new());
    let prefs = quiet("UTC", "22:00", "07:00");

    let res = d.dispatch(&r, &log, &prefs, at(2026, 1, 15, 12, 0, 0)).await;

    assert!(res.email_sent);
    let sent = email.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "trader@example.com");
    assert_eq!(sent[0].1, "Alert: AAPL Price Above");
    assert!(sent[0].2.contains("crossed above $150.00"));
}

#[tokio::test]
async fn unknown_timezone_suppresses_email_and_reports_it() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(FakeEmail::new());
    let d = dispatcher(store.clone(), email.clone());

    let (r, log) = fired(ObjectId::new());
    let prefs = quiet("Nowhere/Special", "22:00", "07:00");

    let res = d.dispatch(&r, &log, &prefs, at(2026, 1, 15, 12, 0, 0)).await;

    assert!(res.in_app_created);
    assert!(!res.email_sent);
    assert!(res.email_error.unwrap().contains("Nowhere/Special"));
    assert!(email.sent().is_empty());
}

#[tokio::test]
async fn disabled_category_gates_email_only() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(FakeEmail::new());
    let d = dispatcher(store.clone(), email.clone());

    let user = ObjectId::new();
    let (r, log) = fired(user);
    let prefs = NotificationPreference {
        price_alerts_enabled: false,
        email_address: Some("trader@example.com".to_string()),
        ..NotificationPreference::defaults_for(user)
    };

    let res = d.dispatch(&r, &log, &prefs, at(2026, 1, 15, 12, 0, 0)).await;

    assert!(res.in_app_created);
    assert_eq!(res.email_skipped, Some(EmailSkip::CategoryDisabled));
}

#[tokio::test]
async fn in_app_record_follows_the_rule_flag_only() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(FakeEmail::new());
    let (events_tx, mut events_rx) = broadcast::channel::<String>(8);
    let d = dispatcher(store.clone(), email.clone()).with_events(events_tx);

    let user = ObjectId::new();
    let (mut r, log) = fired(user);
    r.notify_email = false;
    let mut prefs = NotificationPreference::defaults_for(user);
    prefs.in_app_enabled = false;

    let res = d.dispatch(&r, &log, &prefs, at(2026, 1, 15, 12, 0, 0)).await;

    assert!(res.in_app_created);
    assert_eq!(res.email_skipped, Some(EmailSkip::RuleDisabled));
    assert_eq!(store.notifications().len(), 1);
    // stored, but not pushed live
    assert!(events_rx.try_recv().is_err());

    prefs.in_app_enabled = true;
    d.dispatch(&r, &log, &prefs, at(2026, 1, 15, 12, 0, 0)).await;
    assert_eq!(events_rx.try_recv().unwrap(), events::NOTIFICATION_CREATED);

    r.notify_in_app = false;
    let res = d.dispatch(&r, &log, &prefs, at(2026, 1, 15, 12, 0, 0)).await;
    assert!(!res.in_app_created);
    assert_eq!(store.notifications().len(), 2);
}

#[tokio::test]
async fn enabled_quiet_hours_without_timezone_blocks_email() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(FakeEmail::new());
    let d = dispatcher(store.clone(), email.clone());

    let (r, log) = fired(ObjectId::new());
    let mut prefs = quiet("UTC", "22:00", "07:00");
    prefs.quiet_hours_timezone = None;

    let res = d.dispatch(&r, &log, &prefs, at(2026, 1, 15, 12, 0, 0)).await;

    assert!(res.in_app_created);
    assert!(!res.email_sent);
    assert!(res.email_error.unwrap().contains("no timezone"));
    assert!(email.sent().is_empty());
}

#[tokio::test]
async fn falls_back_to_account_email() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(FakeEmail::new());
    let d = dispatcher(store.clone(), email.clone());

    let user = ObjectId::new();
    store.set_user_email(user, "account@example.com");
    let (r, log) = fired(user);

    let res = d
        .dispatch(&r, &log, &NotificationPreference::defaults_for(user), at(2026, 1, 15, 12, 0, 0))
        .await;

    assert!(res.email_sent);
    assert_eq!(email.sent()[0].0, "account@example.com");
}

#[tokio::test]
async fn missing_recipient_is_an_email_error() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(FakeEmail::new());
    let d = dispatcher(store.clone(), email.clone());

    let user = ObjectId::new();
    let (r, log) = fired(user);

    let res = d
        .dispatch(&r, &log, &NotificationPreference::defaults_for(user), at(2026, 1, 15, 12, 0, 0))
        .await;

    assert!(res.in_app_created);
    assert!(!res.email_sent);
    assert!(res.email_error.unwrap().contains("no email address on file"));
}

#[tokio::test]
async fn recipient_lookup_failure_is_not_a_missing_address() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(FakeEmail::new());
    let d = dispatcher(store.clone(), email.clone());

    let user = ObjectId::new();
    store.set_user_email(user, "account@example.com");
    let (r, log) = fired(user);
    store.set_unavailable(true);

    let res = d
        .dispatch(&r, &log, &NotificationPreference::defaults_for(user), at(2026, 1, 15, 12, 0, 0))
        .await;

    assert!(!res.email_sent);
    assert!(res.in_app_error.is_some());
    let err = res.email_error.unwrap();
    assert!(err.contains("recipient lookup failed"), "{err}");
    assert!(email.sent().is_empty());
}

#[tokio::test]
async fn daily_cap_limits_email_but_not_in_app() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(FakeEmail::new());
    let d = dispatcher(store.clone(), email.clone());

    let user = ObjectId::new();
    let (r, log) = fired(user);
    let prefs = NotificationPreference {
        email_address: Some("trader@example.com".to_string()),
        max_emails_per_day: 1,
        ..NotificationPreference::defaults_for(user)
    };

    let first = d.dispatch(&r, &log, &prefs, at(2026, 1, 15, 12, 0, 0)).await;
    assert!(first.email_sent);

    let second = d.dispatch(&r, &log, &prefs, at(2026, 1, 15, 18, 0, 0)).await;
    assert!(second.in_app_created);
    assert!(!second.email_sent);
    assert_eq!(second.email_skipped, Some(EmailSkip::DailyLimit));
    assert_eq!(second.email_error, None);

    let next_day = d.dispatch(&r, &log, &prefs, at(2026, 1, 16, 12, 0, 0)).await;
    assert!(next_day.email_sent);

    assert_eq!(email.sent().len(), 2);
    assert_eq!(store.notifications().len(), 3);
}

#[tokio::test]
async fn daily_cap_counts_the_users_calendar_day() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(FakeEmail::new());
    let d = dispatcher(store.clone(), email.clone());

    let user = ObjectId::new();
    let (r, log) = fired(user);
    let prefs = NotificationPreference {
        email_address: Some("trader@example.com".to_string()),
        quiet_hours_timezone: Some("America/New_York".to_string()),
        max_emails_per_day: 1,
        ..NotificationPreference::defaults_for(user)
    };

    // 15:00 UTC and 03:00 UTC next day are both Jan 15 in New York
    assert!(d.dispatch(&r, &log, &prefs, at(2026, 1, 15, 15, 0, 0)).await.email_sent);
    let late = d.dispatch(&r, &log, &prefs, at(2026, 1, 16, 3, 0, 0)).await;
    assert_eq!(late.email_skipped, Some(EmailSkip::DailyLimit));
}

#[tokio::test]
async fn failed_send_gives_its_cap_slot_back() {
    let store = Arc::new(MemoryStore::new());
    let user = ObjectId::new();
    let (r, log) = fired(user);
    let prefs = NotificationPreference {
        email_address: Some("trader@example.com".to_string()),
        max_emails_per_day: 1,
        ..NotificationPreference::defaults_for(user)
    };
    let now = at(2026, 1, 15, 12, 0, 0);

    let broken = dispatcher(store.clone(), Arc::new(FakeEmail::failing()));
    let res = broken.dispatch(&r, &log, &prefs, now).await;
    assert!(res.email_error.is_some());

    let email = Arc::new(FakeEmail::new());
    let working = dispatcher(store.clone(), email.clone());
    assert!(working.dispatch(&r, &log, &prefs, now).await.email_sent);
    assert_eq!(email.sent().len(), 1);
}

#[tokio::test]
async fn slow_email_times_out() {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(FakeEmail::slow(Duration::from_secs(5)));
    let d = dispatcher(store.clone(), email.clone());

    let user = ObjectId::new();
    let (r, log) = fired(user);
    let prefs = NotificationPreference {
        email_address: Some("trader@example.com".to_string()),
        ..NotificationPreference::defaults_for(user)
    };

    let res = d.dispatch(&r, &log, &prefs, at(2026, 1, 15, 12, 0, 0)).await;

    assert!(!res.email_sent);
    assert!(res.email_error.unwrap().contains("timed out"));
}

#[test]
fn header_values_lose_line_breaks() {
    assert_eq!(sanitize_header("a@b.com\r\nBcc: x@y.com"), "a@b.comBcc: x@y.com");
    assert_eq!(sanitize_header("Alert: AAPL\n"), "Alert: AAPL");
}

#[test]
fn subject_names_symbol_and_kind() {
    let r = rule(ObjectId::new(), "TSLA", "volume_spike", json!({}), Frequency::Once);
    assert_eq!(alert_subject(&r), "Alert: TSLA Volume Spike");
}

#[tokio::test]
async fn unconfigured_transport_does_not_pretend_to_send() {
    use marketalerts::{
        config,
        error::EmailError,
        services::email::{EmailTransport, HttpEmailTransport},
    };

    let mut settings = config::load();
    settings.email_api_url = String::new();

    let transport = HttpEmailTransport::from_settings(&settings);
    let err = transport
        .send("trader@example.com", "Alert: AAPL Price Above", "<p>hi</p>")
        .await
        .unwrap_err();
    assert!(matches!(err, EmailError::NotConfigured));
}
