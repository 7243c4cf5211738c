//! Typed client for the upstream federation API (C1 in the design).
//!
//! Three WSDL-ish services are modelled: `SynchronizationService` (change
//! windows, liveness, user provisioning), `IntegrationService` (person /
//! function / organization / license / payment fetch) and
//! `Competence2Service` (competence fetch). All three share one SOAP
//! envelope shape, handled by [`soap`].

pub mod auth;
pub mod client;
pub mod error;
pub mod kind;
mod soap;

pub use auth::Credential;
pub use client::{EntityPayload, IntegrationUserRecord, SourceChange, SourceClient};
pub use error::SourceError;
pub use kind::{EntityKind, SyncType};
