use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::str::FromStr;

use crate::auth::Credential;
use crate::error::SourceError;
use crate::kind::{EntityKind, SyncType};
use crate::soap;

/// One change record as reported by a `GetChanges*` call, before it is
/// turned into a durable work item by the caller.
#[derive(Debug, Clone)]
pub struct SourceChange {
    pub entity_type: EntityKind,
    pub entity_id: i64,
    pub sequence_ordinal: DateTime<Utc>,
    pub merged_from: Vec<i64>,
}

/// A fetched entity snapshot. The body is kept as an opaque JSON value
/// (schema translation is out of scope); a handful of fields the apply
/// path needs to branch on are extracted eagerly.
#[derive(Debug, Clone)]
pub struct EntityPayload {
    pub entity_id: i64,
    pub data: serde_json::Value,
}

impl EntityPayload {
    pub fn type_id(&self) -> Option<i64> {
        self.data.get("type_id").and_then(|v| v.as_i64())
    }
}

#[derive(Debug, Clone)]
pub struct IntegrationUserRecord {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
struct ChangesResult {
    #[serde(rename = "Change", default)]
    changes: Vec<RawChange>,
}

#[derive(Debug, Deserialize)]
struct RawChange {
    #[serde(rename = "EntityType")]
    entity_type: String,
    #[serde(rename = "Id")]
    id: i64,
    #[serde(rename = "SequenceOrdinal")]
    sequence_ordinal: DateTime<Utc>,
    #[serde(rename = "MergeResultOf", default)]
    merge_result_of: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct EntityResult {
    #[serde(rename = "Id")]
    id: i64,
    #[serde(rename = "$value")]
    fields: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct HelloResult {
    #[serde(rename = "$text", default)]
    ok: bool,
}

#[derive(Debug, Deserialize)]
struct CreateIntegrationUserResult {
    #[serde(rename = "Username")]
    username: String,
    #[serde(rename = "Password")]
    password: String,
}

/// Typed client over the three WSDL services the core depends on:
/// `SynchronizationService` (change windows), `IntegrationService`
/// (person/function/organization fetch, user provisioning) and
/// `Competence2Service` (competence fetch).
///
/// The client never retries internally; retry policy lives in callers
/// (see the sync worker's back-off and the provisioning poll loop).
pub struct SourceClient {
    http: reqwest::Client,
    sync_url: String,
    integration_url: String,
    competence_url: String,
    credential: Credential,
}

impl SourceClient {
    pub fn new(
        sync_url: impl Into<String>,
        integration_url: impl Into<String>,
        competence_url: impl Into<String>,
        credential: Credential,
    ) -> Self {
        SourceClient {
            http: reqwest::Client::new(),
            sync_url: sync_url.into(),
            integration_url: integration_url.into(),
            competence_url: competence_url.into(),
            credential,
        }
    }

    fn with_credential(&self, op: &'static str, from: DateTime<Utc>, to: DateTime<Utc>) -> String {
        let mut writer = quick_xml::Writer::new(Vec::new());
        let elem = quick_xml::events::BytesStart::new(op);
        writer
            .write_event(quick_xml::events::Event::Start(elem.clone()))
            .expect("writing to an in-memory buffer cannot fail");
        for (tag, value) in [
            ("Username", self.credential.composite_username()),
            ("Password", self.credential.password.clone()),
            ("From", from.to_rfc3339()),
            ("To", to.to_rfc3339()),
        ] {
            writer
                .create_element(tag)
                .write_text_content(quick_xml::events::BytesText::new(&value))
                .expect("writing to an in-memory buffer cannot fail");
        }
        writer
            .write_event(quick_xml::events::Event::End(elem.to_end()))
            .expect("writing to an in-memory buffer cannot fail");
        String::from_utf8(writer.into_inner()).expect("SOAP body is valid UTF-8")
    }

    /// `get_changes(kind, from, to)` for `kind` in {changes, license,
    /// competence, payments, federation}. `from`/`to` are wall-clock
    /// timestamps; the caller is responsible for avoiding future-dated
    /// windows (see `sync_delay` in the worker configuration).
    pub async fn get_changes(
        &self,
        sync_type: SyncType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SourceChange>, SourceError> {
        let op = sync_type.soap_operation();
        let body_xml = self.with_credential(op, from, to);

        let result: ChangesResult = soap::call_raw(&self.http, &self.sync_url, op, body_xml).await?;

        result
            .changes
            .into_iter()
            .map(|raw| {
                let entity_type = EntityKind::from_str(&raw.entity_type)
                    .map_err(|_| SourceError::MalformedChange(raw.entity_type.clone()))?;
                Ok(SourceChange {
                    entity_type,
                    entity_id: raw.id,
                    sequence_ordinal: raw.sequence_ordinal,
                    merged_from: raw.merge_result_of,
                })
            })
            .collect()
    }

    /// Fetch one entity snapshot by kind and id.
    pub async fn get_entity(
        &self,
        kind: EntityKind,
        id: i64,
    ) -> Result<EntityPayload, SourceError> {
        let (url, op) = match kind {
            EntityKind::Person => (&self.integration_url, "PersonGet"),
            EntityKind::Function => (&self.integration_url, "FunctionGet"),
            EntityKind::Organization => (&self.integration_url, "OrgGet"),
            EntityKind::Competence => (&self.competence_url, "CompetenceGet"),
            EntityKind::License => (&self.integration_url, "LicenseGet"),
            EntityKind::Payment => (&self.integration_url, "PaymentGet"),
        };

        let mut writer = quick_xml::Writer::new(Vec::new());
        let elem = quick_xml::events::BytesStart::new(op);
        writer
            .write_event(quick_xml::events::Event::Start(elem.clone()))
            .expect("writing to an in-memory buffer cannot fail");
        writer
            .create_element("Username")
            .write_text_content(quick_xml::events::BytesText::new(
                &self.credential.composite_username(),
            ))
            .expect("writing to an in-memory buffer cannot fail");
        writer
            .create_element("Password")
            .write_text_content(quick_xml::events::BytesText::new(&self.credential.password))
            .expect("writing to an in-memory buffer cannot fail");
        writer
            .create_element("Id")
            .write_text_content(quick_xml::events::BytesText::new(&id.to_string()))
            .expect("writing to an in-memory buffer cannot fail");
        writer
            .write_event(quick_xml::events::Event::End(elem.to_end()))
            .expect("writing to an in-memory buffer cannot fail");
        let body_xml = String::from_utf8(writer.into_inner()).expect("SOAP body is valid UTF-8");

        let result: EntityResult = soap::call_raw(&self.http, url, op, body_xml).await?;
        Ok(EntityPayload {
            entity_id: result.id,
            data: result.fields,
        })
    }

    /// Lightweight liveness/auth check. Used both as a basic health probe
    /// and as the poll primitive during integration-user provisioning.
    pub async fn hello(&self) -> Result<bool, SourceError> {
        let mut writer = quick_xml::Writer::new(Vec::new());
        let elem = quick_xml::events::BytesStart::new("Hello");
        writer
            .write_event(quick_xml::events::Event::Start(elem.clone()))
            .expect("writing to an in-memory buffer cannot fail");
        writer
            .create_element("Username")
            .write_text_content(quick_xml::events::BytesText::new(
                &self.credential.composite_username(),
            ))
            .expect("writing to an in-memory buffer cannot fail");
        writer
            .create_element("Password")
            .write_text_content(quick_xml::events::BytesText::new(&self.credential.password))
            .expect("writing to an in-memory buffer cannot fail");
        writer
            .write_event(quick_xml::events::Event::End(elem.to_end()))
            .expect("writing to an in-memory buffer cannot fail");
        let body_xml = String::from_utf8(writer.into_inner()).expect("SOAP body is valid UTF-8");

        match soap::call_raw::<HelloResult>(&self.http, &self.sync_url, "Hello", body_xml).await {
            Ok(result) => Ok(result.ok),
            Err(SourceError::ApplicationFault { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Provisioning path: create a fresh integration user for a tenant.
    /// The returned credentials may take up to ~180s to become
    /// authenticatable; see the provisioning poll in the coordinator.
    pub async fn create_integration_user(
        &self,
        tenant_id: i64,
        first_name: &str,
        last_name: &str,
        password: &str,
    ) -> Result<IntegrationUserRecord, SourceError> {
        let mut writer = quick_xml::Writer::new(Vec::new());
        let elem = quick_xml::events::BytesStart::new("CreateIntegrationUser");
        writer
            .write_event(quick_xml::events::Event::Start(elem.clone()))
            .expect("writing to an in-memory buffer cannot fail");
        for (tag, value) in [
            (
                "AdminUsername",
                self.credential.composite_username(),
            ),
            ("AdminPassword", self.credential.password.clone()),
            ("TenantId", tenant_id.to_string()),
            ("FirstName", first_name.to_string()),
            ("LastName", last_name.to_string()),
            ("Password", password.to_string()),
        ] {
            writer
                .create_element(tag)
                .write_text_content(quick_xml::events::BytesText::new(&value))
                .expect("writing to an in-memory buffer cannot fail");
        }
        writer
            .write_event(quick_xml::events::Event::End(elem.to_end()))
            .expect("writing to an in-memory buffer cannot fail");
        let body_xml = String::from_utf8(writer.into_inner()).expect("SOAP body is valid UTF-8");

        let result: CreateIntegrationUserResult =
            soap::call_raw(&self.http, &self.sync_url, "CreateIntegrationUser", body_xml).await?;

        Ok(IntegrationUserRecord {
            username: result.username,
            password: result.password,
        })
    }
}
