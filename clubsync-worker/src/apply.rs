use std::sync::Arc;

use tokio::sync::Semaphore;

use clubsync_sink::{SinkClient, SinkError, WorkItem};
use clubsync_sink::retry::{UpdateOutcome, optimistic_update};
use clubsync_source::{EntityKind, SourceClient};

use crate::error::WorkerError;
use crate::geocode::Geocoder;

const MERGE_STUB_MAX_RETRIES: u32 = 3;

/// The at-least-once, insertion-order apply path shared by the stream
/// consumer and the recovery sweep (§4.5 steps 3-5): resolve the
/// authoritative entity from the source, write it to the sink, and
/// close the Person merge chain.
pub async fn resolve_and_apply(
    source: &SourceClient,
    sink: &SinkClient,
    semaphore: &Semaphore,
    geocoder: &dyn Geocoder,
    geocode_enabled: bool,
    item: &WorkItem,
) -> Result<(), WorkerError> {
    let entity = {
        let _permit = semaphore
            .acquire()
            .await
            .expect("semaphore is never closed while workers are running");
        source.get_entity(item.entity_type, item.entity_id).await?
    };

    apply_entity(sink, geocoder, geocode_enabled, item.entity_type, &entity.data, item.entity_id)
        .await?;

    if item.entity_type == EntityKind::Person {
        for &merged_from_id in &item.merged_from {
            ensure_merge_stub(sink, merged_from_id, item.entity_id).await?;
        }
    }

    Ok(())
}

/// Insert / replace / patch-resolve one entity snapshot against the
/// sink, per §4.5 step 4. Club organizations (`type_id = 5`) are patched
/// rather than replaced, with `activities`/`main_activity` stripped from
/// the outgoing body so the downstream-computed aggregates already on
/// the document survive the write untouched.
async fn apply_entity(
    sink: &SinkClient,
    geocoder: &dyn Geocoder,
    geocode_enabled: bool,
    kind: EntityKind,
    data: &serde_json::Value,
    entity_id: i64,
) -> Result<(), SinkError> {
    let resource = kind.sink_resource();
    let id = entity_id.to_string();
    let processed = SinkClient::processed_resource(resource, true);

    let mut body = data.clone();
    if let serde_json::Value::Object(map) = &mut body {
        map.entry("id").or_insert_with(|| serde_json::json!(entity_id));
    }

    match sink.get::<serde_json::Value>(resource, &id).await {
        Err(err) if err.is_not_found() => {
            if geocode_enabled && matches!(kind, EntityKind::Person | EntityKind::Organization) {
                if let Some(enrichment) = geocoder.enrich(&body) {
                    merge_object(&mut body, enrichment);
                }
            }
            sink.insert(&processed, &body).await?;
            Ok(())
        }
        Ok(existing) => {
            let is_club = kind == EntityKind::Organization
                && existing.body.get("type_id").and_then(|v| v.as_i64()) == Some(5);

            if is_club {
                if let serde_json::Value::Object(map) = &mut body {
                    map.remove("activities");
                    map.remove("main_activity");
                }
                sink.patch(&processed, &id, &existing.etag, &body).await?;
            } else {
                sink.replace(&processed, &id, &existing.etag, &body).await?;
            }
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// A Person's `merged_from` ids must carry `merged_to` pointing back at
/// the surviving entity (§4.5 step 5). Unbounded chains are resolved
/// lazily by readers following `merged_to`; this only ensures the one
/// edge this work item names exists, creating a stub snapshot if the
/// predecessor was never itself observed.
async fn ensure_merge_stub(sink: &SinkClient, merged_from_id: i64, merged_to: i64) -> Result<(), SinkError> {
    let resource = EntityKind::Person.sink_resource();
    let processed = SinkClient::processed_resource(resource, true);
    let id = merged_from_id.to_string();

    match sink.get::<serde_json::Value>(resource, &id).await {
        Ok(existing) => {
            let _: UpdateOutcome<serde_json::Value> = optimistic_update(
                sink,
                resource,
                &processed,
                &id,
                &existing.etag,
                MERGE_STUB_MAX_RETRIES,
                move |current: &serde_json::Value| {
                    current.get("merged_to").and_then(|v| v.as_i64()) == Some(merged_to)
                },
                move |_current: &serde_json::Value| Ok(serde_json::json!({ "merged_to": merged_to })),
            )
            .await?;
            Ok(())
        }
        Err(err) if err.is_not_found() => {
            let stub = serde_json::json!({ "id": merged_from_id, "merged_to": merged_to });
            sink.insert(&processed, &stub).await?;
            Ok(())
        }
        Err(err) => Err(err),
    }
}

fn merge_object(into: &mut serde_json::Value, from: serde_json::Value) {
    if let (serde_json::Value::Object(into), serde_json::Value::Object(from)) = (into, from) {
        into.extend(from);
    }
}

/// Shared handle to a source connection-pool permit set, so callers
/// don't need to reach into the coordinator to apply one item in
/// isolation (recovery runs outside the coordinator's worker fleet).
pub fn shared_semaphore(permits: usize) -> Arc<Semaphore> {
    Arc::new(Semaphore::new(permits))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_object_overlays_enrichment_fields() {
        let mut body = serde_json::json!({ "name": "x" });
        merge_object(&mut body, serde_json::json!({ "latitude": 1.0, "longitude": 2.0 }));
        assert_eq!(body["name"], "x");
        assert_eq!(body["latitude"], 1.0);
        assert_eq!(body["longitude"], 2.0);
    }
}
