use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use clubsync_sink::{ChangeLogStore, SinkClient, SinkError, WorkItem, WorkItemStatus};
use clubsync_source::SourceClient;

use crate::apply;
use crate::geocode::Geocoder;
use crate::log_ring::LogRing;
use crate::resume_token::ResumeToken;
use crate::state::{Phase, WorkerState};

/// Everything the stream consumer (C5) needs for its lifetime. There is
/// exactly one of these per daemon — unlike sync workers, the consumer
/// is a process-wide singleton, which is what makes the resume token's
/// single-writer discipline safe without cross-process locking.
pub struct StreamConsumerContext {
    pub source: SourceClient,
    pub changes: ChangeLogStore,
    pub sink: SinkClient,
    pub semaphore: std::sync::Arc<Semaphore>,
    pub state: std::sync::Arc<WorkerState>,
    pub shutdown: CancellationToken,
    pub log_ring: std::sync::Arc<LogRing>,
    pub geocoder: std::sync::Arc<dyn Geocoder>,
    pub geocode_enabled: bool,
    pub realm: String,
    pub resume_token: ResumeToken,
    pub max_restarts: u32,
}

/// Restart-with-backstop loop around [`run_once`]: the watch can
/// terminate with a substrate-internal fault (token stale, network
/// partition); restart up to `max_restarts` times, then reset the
/// resume token and make exactly one more attempt before giving up.
pub async fn run(ctx: StreamConsumerContext) {
    let mut attempts = 0u32;

    loop {
        if ctx.shutdown.is_cancelled() {
            ctx.state.set_phase(Phase::Terminated);
            return;
        }

        match run_once(&ctx).await {
            Ok(()) => {
                // clean exit only happens on shutdown
                ctx.state.set_phase(Phase::Terminated);
                return;
            }
            Err(err) => {
                attempts += 1;
                let message = format!("stream consumer restart {attempts}/{}: {err}", ctx.max_restarts);
                log::error!("{message}");
                ctx.log_ring.push(message);

                if attempts > ctx.max_restarts {
                    log::warn!("stream consumer exhausted restart budget, resetting resume token for one final attempt");
                    if let Err(reset_err) = ctx.resume_token.reset() {
                        log::error!("failed to reset resume token: {reset_err}");
                    }
                    match run_once(&ctx).await {
                        Ok(()) => {
                            ctx.state.set_phase(Phase::Terminated);
                            return;
                        }
                        Err(err) => {
                            ctx.state.set_reason(format!("fatal after token reset: {err}"));
                            ctx.state.set_phase(Phase::Terminated);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// One pass over the tail of C3 until the watch itself fails. Returns
/// `Ok(())` only when shutdown was observed; a watch-stream error
/// surfaces as `Err` so the caller's restart policy takes over.
async fn run_once(ctx: &StreamConsumerContext) -> Result<(), SinkError> {
    let resume_after = ctx
        .resume_token
        .read()
        .unwrap_or_else(|err| {
            log::warn!("failed to read resume token, starting from live tail: {err}");
            None
        });

    ctx.state.set_phase(Phase::Syncing);
    let mut watch = Box::pin(ctx.changes.watch(resume_after, ctx.realm.clone()));

    loop {
        if ctx.shutdown.is_cancelled() {
            return Ok(());
        }

        let item = match watch.next().await {
            Some(Ok(item)) => item,
            Some(Err(err)) => return Err(err),
            None => return Ok(()),
        };

        if item.realm != ctx.realm {
            continue;
        }

        handle_event(ctx, item).await;
    }
}

/// Steps 2-7 of §4.5's main loop for one observed work item.
async fn handle_event(ctx: &StreamConsumerContext, item: WorkItem) {
    let id = match &item.id {
        Some(id) => id.clone(),
        None => return,
    };
    let etag = match &item.etag {
        Some(etag) => etag.clone(),
        None => return,
    };

    let pending = match ctx
        .changes
        .update_status(&id, &etag, WorkItemStatus::Pending, None)
        .await
    {
        Ok(item) => item,
        Err(err) => {
            log::error!("failed to transition work item {id} to pending: {err}");
            return;
        }
    };

    let insertion_seq = pending.insertion_seq;

    let apply_result = apply::resolve_and_apply(
        &ctx.source,
        &ctx.sink,
        &ctx.semaphore,
        ctx.geocoder.as_ref(),
        ctx.geocode_enabled,
        &pending,
    )
    .await;

    let pending_etag = pending.etag.clone().unwrap_or(etag);

    match apply_result {
        Ok(()) => {
            if let Err(err) = ctx
                .changes
                .update_status(&id, &pending_etag, WorkItemStatus::Finished, None)
                .await
            {
                log::error!("failed to transition work item {id} to finished: {err}");
                return;
            }

            if let Some(cursor) = insertion_seq {
                if let Err(err) = ctx.resume_token.write(cursor) {
                    log::error!("failed to persist resume token at {cursor}: {err}");
                }
            }
            ctx.state.add_messages_ingested(1);
        }
        Err(err) => {
            let message = format!("applying work item {id} failed: {err}");
            log::error!("{message}");
            ctx.log_ring.push(message);
            let issues = serde_json::json!({ "message": err.to_string() });
            if let Err(err) = ctx
                .changes
                .update_status(&id, &pending_etag, WorkItemStatus::Error, Some(issues))
                .await
            {
                log::error!("failed to transition work item {id} to error: {err}");
            }
        }
    }
}
