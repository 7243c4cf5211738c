use miette::Diagnostic;
use thiserror::Error;

use clubsync_sink::SinkError;
use clubsync_source::SourceError;

/// Crate-wide error type for the worker fleet's own orchestration logic.
/// Per-call source/sink failures stay typed as [`SourceError`] /
/// [`SinkError`] as long as possible; this only wraps them at the
/// boundaries where the core's own error-handling policy (retry,
/// self-termination, failed-tenant bookkeeping) takes over.
#[derive(Debug, Error, Diagnostic)]
pub enum WorkerError {
    #[error("source error")]
    Source(#[from] SourceError),

    #[error("sink error")]
    Sink(#[from] SinkError),

    #[error("integration-user provisioning for tenant {tenant_id} did not authenticate within the ceiling")]
    ProvisioningTimedOut { tenant_id: i64 },
}
