use chrono::{DateTime, Utc};
use clubsync_source::EntityKind;
use serde::{Deserialize, Serialize};

/// `status` transitions are restricted to `ready -> pending -> {finished,
/// error}`, plus `error -> pending` for retry. No other transition is
/// legal; [`WorkItemStatus::can_transition_to`] is the single place that
/// encodes the DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Ready,
    Pending,
    Finished,
    Error,
}

impl WorkItemStatus {
    pub fn can_transition_to(self, next: WorkItemStatus) -> bool {
        use WorkItemStatus::*;
        matches!(
            (self, next),
            (Ready, Pending) | (Pending, Finished) | (Pending, Error) | (Error, Pending)
        )
    }
}

/// One row in the change-log store (C3): a durable, append-mostly record
/// of an observed source change, carried through to application via the
/// status field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing)]
    pub etag: Option<String>,

    pub entity_type: EntityKind,
    pub entity_id: i64,
    pub sequence_ordinal: DateTime<Utc>,
    pub tenant_id: i64,
    pub realm: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_from: Vec<i64>,

    pub status: WorkItemStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issues: Option<serde_json::Value>,

    /// Stable fingerprint of `(entity_type, entity_id, sequence_ordinal,
    /// tenant_id)`; the sink's unique-key field for dedup. See
    /// [`crate::ordinal::ordinal`].
    pub ordinal: u64,

    /// Server-assigned monotonic insertion sequence, distinct from
    /// `ordinal`. Used only as the stream consumer's resume cursor; it
    /// has no dedup role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insertion_seq: Option<i64>,
}

impl WorkItem {
    pub fn new_ready(
        entity_type: EntityKind,
        entity_id: i64,
        sequence_ordinal: DateTime<Utc>,
        tenant_id: i64,
        realm: impl Into<String>,
        merged_from: Vec<i64>,
    ) -> Self {
        let realm = realm.into();
        WorkItem {
            id: None,
            etag: None,
            entity_type,
            entity_id,
            sequence_ordinal,
            tenant_id,
            realm,
            merged_from,
            status: WorkItemStatus::Ready,
            issues: None,
            ordinal: crate::ordinal::ordinal(entity_type, entity_id, sequence_ordinal, tenant_id),
            insertion_seq: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use WorkItemStatus::*;

    #[test]
    fn status_dag_allows_only_the_documented_edges() {
        let legal = [
            (Ready, Pending),
            (Pending, Finished),
            (Pending, Error),
            (Error, Pending),
        ];
        for from in [Ready, Pending, Finished, Error] {
            for to in [Ready, Pending, Finished, Error] {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from:?} -> {to:?}"
                );
            }
        }
    }
}
