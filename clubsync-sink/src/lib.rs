//! Client and durable queue for the downstream REST document store.
//!
//! [`client`] is the generic CRUD layer (C2): optimistic-concurrency REST
//! against an Eve-shaped API (`_items`/`_meta.total`/`_etag`/`_id`).
//! [`changes`] layers the change-log store (C3) on top of it: the
//! `integration/changes` collection workers append to and the stream
//! consumer tails.

pub mod changes;
pub mod client;
pub mod error;
pub mod ordinal;
pub mod retry;
pub mod work_item;

pub use changes::{AppendOutcome, ChangeLogStore};
pub use client::{BatchItemResult, ListResult, Meta, Record, SinkClient};
pub use error::SinkError;
pub use ordinal::ordinal;
pub use work_item::{WorkItem, WorkItemStatus};
