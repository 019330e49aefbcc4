use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Runs `task` every `period` on the blocking pool until cancelled.
///
/// Each tick is awaited before the next one may start, so one task type never
/// overlaps itself. Ticks missed while a slow run was in progress are skipped.
pub fn spawn_fixed_rate<F>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    task: F,
) -> JoinHandle<()>
where
    F: Fn() + Send + Sync + 'static,
{
    let task = Arc::new(task);
    // interval() panics on a zero period.
    let period = period.max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(task = name, "scheduler stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let task = task.clone();
                    if let Err(join_error) = tokio::task::spawn_blocking(move || task()).await {
                        error!(task = name, %join_error, "scheduled run panicked");
                    }
                }
            }
        }
    })
}
