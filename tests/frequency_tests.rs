mod common;

use chrono::Duration;
use marketalerts::{models::Frequency, services::frequency::should_fire};

use common::at;

#[test]
fn never_triggered_rule_always_fires() {
    let now = at(2026, 3, 2, 10, 0, 0);
    for f in [Frequency::Once, Frequency::Daily, Frequency::Always] {
        assert!(should_fire(f, None, now), "{f} should fire on first trigger");
    }
}

#[test]
fn once_never_fires_again() {
    let last = at(2016, 3, 2, 10, 0, 0);
    let now = last + Duration::days(3653);
    assert!(!should_fire(Frequency::Once, Some(last), now));
}

#[test]
fn daily_waits_for_full_24_hours() {
    let last = at(2026, 3, 2, 10, 0, 0);

    let early = last + Duration::hours(23) + Duration::minutes(59) + Duration::seconds(59);
    assert!(!should_fire(Frequency::Daily, Some(last), early));

    assert!(should_fire(Frequency::Daily, Some(last), last + Duration::hours(24)));

    let late = last + Duration::hours(24) + Duration::seconds(1);
    assert!(should_fire(Frequency::Daily, Some(last), late));
}

#[test]
fn daily_uses_elapsed_time_not_calendar_day() {
    // 23:30 -> 00:30 is a new calendar day but only an hour apart
    let last = at(2026, 3, 2, 23, 30, 0);
    let now = at(2026, 3, 3, 0, 30, 0);
    assert!(!should_fire(Frequency::Daily, Some(last), now));
}

#[test]
fn always_fires_every_time() {
    let last = at(2026, 3, 2, 10, 0, 0);
    assert!(should_fire(Frequency::Always, Some(last), last));
    assert!(should_fire(Frequency::Always, Some(last), last + Duration::seconds(60)));
}

#[test]
fn trigger_in_the_future_is_suppressed() {
    let now = at(2026, 3, 2, 10, 0, 0);
    let last = now + Duration::minutes(5);

    assert!(!should_fire(Frequency::Always, Some(last), now));
    assert!(!should_fire(Frequency::Daily, Some(last), now));
    assert!(!should_fire(Frequency::Once, Some(last), now));
}
