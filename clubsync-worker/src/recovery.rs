use std::sync::Arc;

use tokio::sync::Semaphore;

use clubsync_sink::{ChangeLogStore, SinkClient, WorkItemStatus};
use clubsync_source::SourceClient;

use crate::apply;
use crate::geocode::Geocoder;

/// Outcome tally for one recovery sweep, returned so a caller (the CLI
/// binary, or an RPC-triggered sweep) can report what happened without
/// re-deriving it from logs.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct RecoveryReport {
    pub considered: u64,
    pub finished: u64,
    pub still_erroring: u64,
}

/// Reprocesses work items stuck in `ready` (the default, routine
/// clean-up case) or, on demand, `{pending, error}` (after a longer
/// outage), through the same apply path the stream consumer uses.
///
/// Deliberately does not touch the resume token: recovery runs out of
/// band from the live tail, so a crash mid-sweep must never advance the
/// cursor the stream consumer trusts (§4.5's `resume_token_lock`
/// discipline). The sweep also requests a single page bounded by the
/// change-log store's soft ceiling rather than paging — a known,
/// deliberate limit (see the design notes' resolved open question on
/// recovery-sweep paging), not an oversight.
pub async fn sweep(
    source: &SourceClient,
    sink: &SinkClient,
    changes: &ChangeLogStore,
    semaphore: &Arc<Semaphore>,
    geocoder: &dyn Geocoder,
    geocode_enabled: bool,
    realm: &str,
    include_pending_and_error: bool,
) -> Result<RecoveryReport, clubsync_sink::SinkError> {
    let statuses: &[WorkItemStatus] = if include_pending_and_error {
        &[WorkItemStatus::Ready, WorkItemStatus::Pending, WorkItemStatus::Error]
    } else {
        &[WorkItemStatus::Ready]
    };

    let items = changes.list_by_status(statuses, realm).await?;
    let mut report = RecoveryReport::default();

    for item in items {
        report.considered += 1;

        let (id, etag) = match (item.id.clone(), item.etag.clone()) {
            (Some(id), Some(etag)) => (id, etag),
            _ => continue,
        };

        let pending = match changes
            .update_status(&id, &etag, WorkItemStatus::Pending, None)
            .await
        {
            Ok(item) => item,
            Err(err) => {
                log::error!("recovery: failed to transition {id} to pending: {err}");
                report.still_erroring += 1;
                continue;
            }
        };
        let pending_etag = pending.etag.clone().unwrap_or(etag);

        match apply::resolve_and_apply(source, sink, semaphore, geocoder, geocode_enabled, &pending).await
        {
            Ok(()) => {
                if let Err(err) = changes
                    .update_status(&id, &pending_etag, WorkItemStatus::Finished, None)
                    .await
                {
                    log::error!("recovery: failed to transition {id} to finished: {err}");
                    report.still_erroring += 1;
                    continue;
                }
                report.finished += 1;
            }
            Err(err) => {
                log::error!("recovery: applying {id} failed: {err}");
                let issues = serde_json::json!({ "message": err.to_string() });
                if let Err(status_err) = changes
                    .update_status(&id, &pending_etag, WorkItemStatus::Error, Some(issues))
                    .await
                {
                    log::error!("recovery: failed to transition {id} to error: {status_err}");
                }
                report.still_erroring += 1;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_defaults_to_all_zero() {
        let report = RecoveryReport::default();
        assert_eq!(report.considered, 0);
        assert_eq!(report.finished, 0);
        assert_eq!(report.still_erroring, 0);
    }
}
