use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use super::alert_processor::{AlertProcessor, PassOutcome};

/// Runs an alert pass every `every`. A tick that comes due while a pass is
/// still running is dropped, not queued.
pub fn spawn_alert_scheduler(processor: Arc<AlertProcessor>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            match processor.process_all_alerts().await {
                Ok(PassOutcome::Completed(_)) => {}
                Ok(PassOutcome::Skipped) => {
                    tracing::debug!("[alert-scheduler] previous pass still running");
                }
                Err(e) => {
                    tracing::error!(error = %e, "[alert-scheduler] pass failed, will retry next tick");
                }
            }
        }
    })
}
