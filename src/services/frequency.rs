use chrono::{DateTime, Duration, Utc};

use crate::models::Frequency;

/// Minimum spacing between two `daily` triggers. Elapsed time, not calendar
/// days, so there is no timezone in play.
pub fn daily_window() -> Duration {
    Duration::hours(24)
}

/// Whether a rule whose condition holds may fire now.
///
/// A `last_triggered_at` in the future (the clock went backwards) is not
/// eligible yet, whatever the policy. Apart from that `always` never
/// suppresses.
pub fn should_fire(
    policy: Frequency,
    last_triggered_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    let Some(last) = last_triggered_at else {
        return true;
    };

    if now < last {
        return false;
    }

    match policy {
        Frequency::Once => false,
        Frequency::Daily => now - last >= daily_window(),
        Frequency::Always => true,
    }
}
