use miette::Diagnostic;
use thiserror::Error;

/// Failure modes of a call against the downstream REST document store.
///
/// Mirrors the taxonomy in the design's error-handling section: transport
/// faults, optimistic-concurrency mismatches, and duplicate-key conflicts
/// are distinguished so callers can apply the right recovery (re-read,
/// treat-as-success, or propagate) without inspecting status codes.
#[derive(Debug, Error, Diagnostic)]
pub enum SinkError {
    #[error("sink is unavailable")]
    Unavailable(#[source] reqwest::Error),

    #[error("error decoding sink response as JSON")]
    DecodeError(#[source] reqwest::Error),

    #[error("sink has no record at {resource}/{id}")]
    NotFound { resource: String, id: String },

    #[error("etag precondition failed on {resource}/{id}")]
    PreconditionFailed { resource: String, id: String },

    #[error("duplicate key inserting into {resource}")]
    Conflict { resource: String },

    #[error("sink reported an unexpected status {status} on {resource}: {body}")]
    UnexpectedStatus {
        resource: String,
        status: u16,
        body: String,
    },

    #[error("optimistic-concurrency retries exhausted on {resource}/{id}")]
    RetriesExhausted { resource: String, id: String },
}

impl SinkError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SinkError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SinkError::Conflict { .. })
    }

    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, SinkError::PreconditionFailed { .. })
    }
}
