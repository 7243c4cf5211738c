use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use clubsync_sink::{AppendOutcome, ChangeLogStore, WorkItem};
use clubsync_source::{SourceChange, SourceClient, SyncType};

use crate::scheduler;
use crate::state::{Phase, WorkerState};

/// Everything one sync worker (C4) needs, collected so `run` takes a
/// single owned value rather than a sprawling parameter list. One
/// instance lives for the lifetime of one `(tenant_id, sync_type)` pair.
pub struct SyncWorkerContext {
    pub source: SourceClient,
    pub changes: ChangeLogStore,
    pub semaphore: Arc<Semaphore>,
    pub state: Arc<WorkerState>,
    pub shutdown: CancellationToken,

    pub tenant_id: i64,
    pub realm: String,
    pub sync_type: SyncType,
    pub tenant_created: DateTime<Utc>,

    pub populate_interval_hours: i64,
    pub overlap_hours: i64,
    pub initial_timedelta_secs: i64,
    pub sync_delay_secs: u64,
    pub sync_max_errors: u32,
    pub populate_grace_millis: u64,
    pub sync_interval: Duration,
}

/// Runs the full `initialized -> checking -> {populating | syncing}`
/// state machine for one tenant/sync_type pair until shutdown or
/// self-termination. Never returns an error: failures are recorded on
/// `ctx.state` and surfaced to the coordinator only as a dead worker
/// (§7's propagation policy — workers never propagate errors directly).
pub async fn run(ctx: SyncWorkerContext) {
    let worker_shutdown = ctx.shutdown.child_token();
    ctx.state.set_phase(Phase::Checking);

    if worker_shutdown.is_cancelled() {
        ctx.state.set_phase(Phase::Terminated);
        return;
    }

    let last = match ctx.changes.latest_for_tenant(ctx.tenant_id, &ctx.realm).await {
        Ok(v) => v,
        Err(err) => {
            ctx.state.set_reason(format!("checking change log at startup: {err}"));
            ctx.state.set_phase(Phase::Terminated);
            return;
        }
    };

    let now = Utc::now();
    let populate_threshold = chrono::Duration::hours(ctx.populate_interval_hours);

    // check(): none found -> populate from creation; found but stale ->
    // populate resuming from the last seen ordinal minus overlap;
    // otherwise resume straight into the sync scheduler.
    let (populate_from, resume_from) = match &last {
        None => (Some(ctx.tenant_created), None),
        Some(item) if now - item.sequence_ordinal > populate_threshold => (
            Some(item.sequence_ordinal - chrono::Duration::hours(ctx.overlap_hours)),
            None,
        ),
        Some(item) => (None, Some(item.sequence_ordinal)),
    };

    let mut last_window_end = match populate_from {
        Some(start) => match populate(&ctx, &worker_shutdown, start).await {
            Ok(end) => end,
            Err(()) => return,
        },
        None => resume_from.expect("check() always yields a resume point when not populating"),
    };

    ctx.state.set_phase(Phase::Sleeping);
    scheduler::run_scheduled(ctx.sync_interval, &ctx.state, &worker_shutdown, || {
        sync_tick(&ctx, &mut last_window_end, &worker_shutdown)
    })
    .await;

    if ctx.state.phase() != Phase::Terminated {
        ctx.state.set_phase(Phase::Terminating);
        ctx.state.set_phase(Phase::Terminated);
    }
}

/// Walks forward in fixed-size windows from `start_date` until it
/// catches up with `now`, at which point it clamps to `now`, does one
/// last fetch, and hands the resulting `window_to` to the caller so the
/// sync scheduler can pick up exactly where populate left off. This is
/// a single loop with one fetch call site on both the natural and the
/// clamped-to-now exit, deliberately replacing the source's two
/// asymmetric code paths while preserving its at-most-once-fetch
/// behavior per window.
async fn populate(
    ctx: &SyncWorkerContext,
    shutdown: &CancellationToken,
    start_date: DateTime<Utc>,
) -> Result<DateTime<Utc>, ()> {
    ctx.state.set_phase(Phase::Populating);
    let window = chrono::Duration::hours(ctx.populate_interval_hours);
    let mut window_start = start_date + chrono::Duration::seconds(ctx.initial_timedelta_secs);

    loop {
        if shutdown.is_cancelled() {
            ctx.state.set_phase(Phase::Terminated);
            return Err(());
        }

        let permit = match ctx.semaphore.acquire().await {
            Ok(p) => p,
            Err(_) => return Err(()),
        };

        if shutdown.is_cancelled() {
            drop(permit);
            ctx.state.set_phase(Phase::Terminated);
            return Err(());
        }

        let (window_end, is_last_window) = next_window(window_start, window, Utc::now());
        let result = ctx.source.get_changes(ctx.sync_type, window_start, window_end).await;
        drop(permit);

        match result {
            Ok(items) => {
                ctx.state.set_window(window_start, window_end);
                insert_changes(ctx, items).await;
                ctx.state.record_clean_window();
            }
            Err(err) => {
                let count = ctx.state.record_error();
                log::warn!(
                    "tenant {} sync_type {:?}: source error during populate: {err}",
                    ctx.tenant_id,
                    ctx.sync_type
                );
                if count >= ctx.sync_max_errors {
                    ctx.state.set_reason(format!("populate error streak exhausted: {err}"));
                    ctx.state.set_phase(Phase::Terminated);
                    return Err(());
                }
                tokio::time::sleep(Duration::from_secs(3 * count as u64)).await;
                continue;
            }
        }

        if is_last_window {
            return Ok(window_end);
        }

        tokio::time::sleep(Duration::from_millis(ctx.populate_grace_millis)).await;
        window_start = window_end;
    }
}

/// Pure window-arithmetic step, pulled out of [`populate`] so the
/// clamp-to-now behavior is unit-testable without a source client.
fn next_window(
    window_start: DateTime<Utc>,
    window: chrono::Duration,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, bool) {
    let computed_end = window_start + window;
    if computed_end >= now {
        (now, true)
    } else {
        (computed_end, false)
    }
}

/// One steady-state scheduler tick (§4.3 Sync): `end = now`, `start =
/// last_window_end + initial_timedelta`. A window that has gone
/// nonsensical (`end <= start`, which can only happen from clock skew
/// or an unexpectedly large `initial_timedelta`) is logged and skipped
/// rather than fetched.
async fn sync_tick(
    ctx: &SyncWorkerContext,
    last_window_end: &mut DateTime<Utc>,
    shutdown: &CancellationToken,
) {
    if shutdown.is_cancelled() {
        return;
    }

    let end = Utc::now();
    let start = *last_window_end + chrono::Duration::seconds(ctx.initial_timedelta_secs);
    if end <= start {
        log::debug!(
            "tenant {} sync_type {:?}: window inconsistency (end <= start), skipping tick",
            ctx.tenant_id,
            ctx.sync_type
        );
        return;
    }

    tokio::time::sleep(Duration::from_secs(ctx.sync_delay_secs)).await;
    if shutdown.is_cancelled() {
        return;
    }

    let permit = match ctx.semaphore.acquire().await {
        Ok(p) => p,
        Err(_) => return,
    };
    ctx.state.set_phase(Phase::Syncing);
    let result = ctx.source.get_changes(ctx.sync_type, start, end).await;
    drop(permit);

    match result {
        Ok(items) => {
            ctx.state.set_window(start, end);
            insert_changes(ctx, items).await;
            *last_window_end = end;
            ctx.state.record_clean_window();
        }
        Err(err) => {
            let count = ctx.state.record_error();
            log::warn!(
                "tenant {} sync_type {:?}: source error on sync tick: {err}",
                ctx.tenant_id,
                ctx.sync_type
            );
            if count >= ctx.sync_max_errors {
                ctx.state.set_reason(format!("sync error streak exhausted: {err}"));
                ctx.state.set_phase(Phase::Terminated);
                shutdown.cancel();
            } else {
                tokio::time::sleep(Duration::from_secs(3 * count as u64)).await;
            }
        }
    }
    ctx.state.set_phase(Phase::Sleeping);
}

/// The insert policy shared by populate and sync: every change becomes
/// a `ready` work item, appended idempotently by `ordinal`. A duplicate
/// is silent success; anything else is logged and counted, but does not
/// itself count toward the error streak (that streak tracks source
/// reachability, not individual insert failures).
async fn insert_changes(ctx: &SyncWorkerContext, items: Vec<SourceChange>) {
    let mut created = 0u64;
    for change in items {
        let work_item = WorkItem::new_ready(
            change.entity_type,
            change.entity_id,
            change.sequence_ordinal,
            ctx.tenant_id,
            ctx.realm.clone(),
            change.merged_from,
        );
        match ctx.changes.append(work_item).await {
            Ok(AppendOutcome::Created(_)) => created += 1,
            Ok(AppendOutcome::AlreadyExists) => {}
            Err(err) => {
                log::error!(
                    "tenant {} sync_type {:?}: failed appending change {}: {err}",
                    ctx.tenant_id,
                    ctx.sync_type,
                    change.entity_id
                );
            }
        }
    }
    ctx.state.add_messages_ingested(created);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_crossing_now_clamps_and_marks_last_window() {
        let start = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let now = DateTime::parse_from_rfc3339("2024-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let (end, is_last) = next_window(start, chrono::Duration::hours(24), now);
        assert_eq!(end, now);
        assert!(is_last);
    }

    #[test]
    fn window_within_interval_advances_without_clamping() {
        let start = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let now = DateTime::parse_from_rfc3339("2024-03-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let (end, is_last) = next_window(start, chrono::Duration::hours(24), now);
        assert_eq!(end, start + chrono::Duration::hours(24));
        assert!(!is_last);
    }
}
