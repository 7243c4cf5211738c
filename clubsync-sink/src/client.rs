use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::SinkError;

/// A fetched or written record, carrying the optimistic-concurrency token
/// every subsequent mutation against it must present.
#[derive(Debug, Clone)]
pub struct Record<T> {
    pub id: String,
    pub etag: String,
    pub updated: Option<DateTime<Utc>>,
    pub body: T,
}

#[derive(Debug, Clone)]
pub struct ListResult<T> {
    pub items: Vec<Record<T>>,
    pub total: u64,
}

/// The `_id`/`_etag` pair a mutation returns, without re-fetching the body.
#[derive(Debug, Clone)]
pub struct Meta {
    pub id: String,
    pub etag: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default, rename = "_id")]
    id: Option<String>,
    #[serde(default, rename = "_etag")]
    etag: Option<String>,
    #[serde(default, rename = "_updated")]
    updated: Option<DateTime<Utc>>,
    #[serde(flatten)]
    body: T,
}

#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    #[serde(rename = "_items")]
    items: Vec<Envelope<T>>,
    #[serde(rename = "_meta")]
    meta: ListMeta,
}

#[derive(Debug, Deserialize)]
struct ListMeta {
    total: u64,
}

#[derive(Debug, Deserialize)]
struct MutationEnvelope {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_etag")]
    etag: String,
}

#[derive(Debug, Deserialize)]
struct BatchEnvelope {
    #[serde(rename = "_items")]
    items: Vec<BatchItemEnvelope>,
}

#[derive(Debug, Deserialize)]
struct BatchItemEnvelope {
    #[serde(rename = "_status")]
    status: String,
    #[serde(default, rename = "_id")]
    id: Option<String>,
    #[serde(default, rename = "_etag")]
    etag: Option<String>,
    #[serde(default, rename = "_issues")]
    issues: Option<serde_json::Value>,
}

/// Outcome of one item within a batch insert.
#[derive(Debug, Clone)]
pub enum BatchItemResult {
    Ok(Meta),
    Err(serde_json::Value),
}

/// REST client over the downstream document store (Eve-shaped: `_items`,
/// `_meta.total`, and per-item `_etag`/`_id`/`_updated`). Every mutation
/// requires the `etag` of the most recently read representation; on
/// mismatch the server answers 412 and the caller must re-read (see
/// [`crate::retry::optimistic_update`]).
///
/// Entity-snapshot resources are written through their `.../process`
/// variant, which triggers server-side enrichment (geocoding, computed
/// aggregate fields); control resources such as `integration/changes`
/// are written directly.
pub struct SinkClient {
    http: reqwest::Client,
    base_url: String,
}

impl SinkClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        SinkClient {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), resource)
    }

    fn item_url(&self, resource: &str, id: &str) -> String {
        format!("{}/{}", self.url(resource), id)
    }

    /// Apply the `.../process` suffix for resources that want server-side
    /// enrichment on write (entity snapshots). Control resources pass
    /// `processed = false`.
    pub fn processed_resource(resource: &str, processed: bool) -> String {
        if processed {
            format!("{resource}/process")
        } else {
            resource.to_string()
        }
    }

    pub async fn list<T: DeserializeOwned>(
        &self,
        resource: &str,
        where_clause: Option<&serde_json::Value>,
        sort: Option<&str>,
        max_results: usize,
    ) -> Result<ListResult<T>, SinkError> {
        let mut query = vec![("max_results".to_string(), max_results.to_string())];
        if let Some(where_clause) = where_clause {
            query.push(("where".to_string(), where_clause.to_string()));
        }
        if let Some(sort) = sort {
            query.push(("sort".to_string(), sort.to_string()));
        }

        let response = self
            .http
            .get(self.url(resource))
            .query(&query)
            .send()
            .await
            .map_err(SinkError::Unavailable)?;

        let response = check_status(resource, "", response).await?;
        let envelope: ListEnvelope<T> = response.json().await.map_err(SinkError::DecodeError)?;

        Ok(ListResult {
            total: envelope.meta.total,
            items: envelope
                .items
                .into_iter()
                .map(|item| Record {
                    id: item.id.unwrap_or_default(),
                    etag: item.etag.unwrap_or_default(),
                    updated: item.updated,
                    body: item.body,
                })
                .collect(),
        })
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        resource: &str,
        id: &str,
    ) -> Result<Record<T>, SinkError> {
        let response = self
            .http
            .get(self.item_url(resource, id))
            .send()
            .await
            .map_err(SinkError::Unavailable)?;

        let response = check_status(resource, id, response).await?;
        let envelope: Envelope<T> = response.json().await.map_err(SinkError::DecodeError)?;

        Ok(Record {
            id: envelope.id.unwrap_or_else(|| id.to_string()),
            etag: envelope.etag.unwrap_or_default(),
            updated: envelope.updated,
            body: envelope.body,
        })
    }

    /// Insert a new document. A duplicate-key conflict (422-equivalent)
    /// is surfaced as [`SinkError::Conflict`]; callers that dedup by a
    /// unique field (C3's `ordinal`) treat that as idempotent success.
    pub async fn insert<T: Serialize>(
        &self,
        resource: &str,
        body: &T,
    ) -> Result<Meta, SinkError> {
        let response = self
            .http
            .post(self.url(resource))
            .json(body)
            .send()
            .await
            .map_err(SinkError::Unavailable)?;

        let response = check_status(resource, "", response).await?;
        let envelope: MutationEnvelope = response.json().await.map_err(SinkError::DecodeError)?;
        Ok(Meta {
            id: envelope.id,
            etag: envelope.etag,
        })
    }

    pub async fn batch_insert<T: Serialize>(
        &self,
        resource: &str,
        bodies: &[T],
    ) -> Result<Vec<BatchItemResult>, SinkError> {
        let response = self
            .http
            .post(self.url(resource))
            .json(bodies)
            .send()
            .await
            .map_err(SinkError::Unavailable)?;

        let response = check_status(resource, "", response).await?;
        let envelope: BatchEnvelope = response.json().await.map_err(SinkError::DecodeError)?;

        Ok(envelope
            .items
            .into_iter()
            .map(|item| match (item.id, item.etag) {
                (Some(id), Some(etag)) if item.status == "OK" => {
                    BatchItemResult::Ok(Meta { id, etag })
                }
                _ => BatchItemResult::Err(
                    item.issues
                        .unwrap_or_else(|| serde_json::json!({"status": item.status})),
                ),
            })
            .collect())
    }

    /// Full replace (PUT), conditional on `etag`.
    pub async fn replace<T: Serialize>(
        &self,
        resource: &str,
        id: &str,
        etag: &str,
        body: &T,
    ) -> Result<Meta, SinkError> {
        let response = self
            .http
            .put(self.item_url(resource, id))
            .header("If-Match", etag)
            .json(body)
            .send()
            .await
            .map_err(SinkError::Unavailable)?;

        let response = check_status(resource, id, response).await?;
        let envelope: MutationEnvelope = response.json().await.map_err(SinkError::DecodeError)?;
        Ok(Meta {
            id: envelope.id,
            etag: envelope.etag,
        })
    }

    /// Partial update (PATCH), conditional on `etag`.
    pub async fn patch<T: Serialize>(
        &self,
        resource: &str,
        id: &str,
        etag: &str,
        patch_body: &T,
    ) -> Result<Meta, SinkError> {
        let response = self
            .http
            .patch(self.item_url(resource, id))
            .header("If-Match", etag)
            .json(patch_body)
            .send()
            .await
            .map_err(SinkError::Unavailable)?;

        let response = check_status(resource, id, response).await?;
        let envelope: MutationEnvelope = response.json().await.map_err(SinkError::DecodeError)?;
        Ok(Meta {
            id: envelope.id,
            etag: envelope.etag,
        })
    }

    pub async fn delete(&self, resource: &str, id: &str, etag: &str) -> Result<(), SinkError> {
        let response = self
            .http
            .delete(self.item_url(resource, id))
            .header("If-Match", etag)
            .send()
            .await
            .map_err(SinkError::Unavailable)?;

        check_status(resource, id, response).await?;
        Ok(())
    }
}

async fn check_status(
    resource: &str,
    id: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, SinkError> {
    match response.status().as_u16() {
        200..=299 => Ok(response),
        404 => Err(SinkError::NotFound {
            resource: resource.to_string(),
            id: id.to_string(),
        }),
        412 => Err(SinkError::PreconditionFailed {
            resource: resource.to_string(),
            id: id.to_string(),
        }),
        422 => Err(SinkError::Conflict {
            resource: resource.to_string(),
        }),
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(SinkError::UnexpectedStatus {
                resource: resource.to_string(),
                status,
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processed_resource_appends_process_suffix_only_when_requested() {
        assert_eq!(
            SinkClient::processed_resource("persons", true),
            "persons/process"
        );
        assert_eq!(
            SinkClient::processed_resource("integration/changes", false),
            "integration/changes"
        );
    }
}
