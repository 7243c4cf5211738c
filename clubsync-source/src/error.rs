use miette::Diagnostic;
use thiserror::Error;

/// Failure modes of a call against the upstream federation API.
///
/// The client never retries internally (see the module-level docs on
/// [`crate::SourceClient`]); retry policy belongs to callers.
#[derive(Debug, Error, Diagnostic)]
pub enum SourceError {
    #[error("source is unavailable")]
    Unavailable(#[source] reqwest::Error),

    #[error("error reading source response body")]
    RequestBodyError(#[source] reqwest::Error),

    #[error("error parsing SOAP envelope")]
    EnvelopeParseError(#[source] quick_xml::DeError),

    #[error("source reported a fault: {code} {message}")]
    ApplicationFault { code: String, message: String },

    #[error("source returned a malformed change record: {0}")]
    MalformedChange(String),
}
