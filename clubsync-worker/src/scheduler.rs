use std::future::Future;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::state::WorkerState;

/// Tolerance before a late wake-up counts as a misfire, to absorb
/// ordinary scheduler jitter rather than flagging every few-millisecond
/// slip.
const MISFIRE_SLACK: Duration = Duration::from_millis(250);

/// Fires `tick` on a fixed cadence until `shutdown` is signalled.
///
/// The contract from the design notes: at most one active job per
/// worker at a time; a tick is never started while the previous one is
/// still running (this loop is sequential, so that's automatic), and a
/// wake-up that lands late — because the previous tick overran its
/// slot — is counted as a misfire rather than silently absorbed. The
/// schedule is cumulative (`expected += interval` each time) rather than
/// re-anchored to "now" after each tick, so a worker that falls behind
/// keeps a consistent notion of how far behind it is instead of
/// perpetually resetting to on-time.
pub async fn run_scheduled<F, Fut>(
    interval: Duration,
    state: &WorkerState,
    shutdown: &CancellationToken,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut expected = Instant::now() + interval;
    state.set_next_run_time(Some(Utc::now() + chrono_duration(interval)));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep_until(expected.into()) => {}
        }

        if shutdown.is_cancelled() {
            return;
        }

        let woke_at = Instant::now();
        if woke_at > expected + MISFIRE_SLACK {
            state.record_misfire();
        } else {
            state.record_successful_fire();
        }

        tick().await;

        expected += interval;
        state.set_next_run_time(Some(Utc::now() + chrono_duration(interval)));
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clubsync_source::SyncType;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn ticks_fire_on_the_configured_cadence_until_shutdown() {
        let state = WorkerState::new(1, SyncType::Changes, "Test");
        let shutdown = CancellationToken::new();
        let fires = Arc::new(AtomicU32::new(0));

        let fires_clone = fires.clone();
        let shutdown_clone = shutdown.clone();
        let handle = tokio::spawn(async move {
            let state = state;
            run_scheduled(Duration::from_secs(10), &state, &shutdown_clone, || {
                let fires = fires_clone.clone();
                async move {
                    fires.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        });

        tokio::time::advance(Duration::from_secs(35)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert!(fires.load(Ordering::SeqCst) >= 3);
    }
}
