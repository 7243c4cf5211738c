use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use clubsync_sink::SinkClient;
use clubsync_source::{Credential, SourceClient};

use crate::config::Config;
use crate::error::WorkerError;
use crate::tenant::Tenant;

#[derive(Debug, Deserialize, Serialize)]
struct IntegrationUserBody {
    tenant_id: i64,
    realm: String,
    username: String,
    password: String,
    active: bool,
}

/// Exactly one active integration credential per `(tenant, realm)`:
/// reuse the stored one if present, otherwise provision a fresh user
/// through the source's admin-only `CreateIntegrationUser` call, persist
/// it, and poll `hello()` until the new credential authenticates (or the
/// provisioning ceiling is reached).
pub async fn ensure_credential(
    sink: &SinkClient,
    admin_source: &SourceClient,
    tenant: &Tenant,
    realm: &str,
    app_id: &str,
    function_id: &str,
    config: &Config,
) -> Result<Credential, WorkerError> {
    let where_clause =
        serde_json::json!({ "tenant_id": tenant.tenant_id, "realm": realm, "active": true });
    let existing = sink
        .list::<IntegrationUserBody>("integration/users", Some(&where_clause), None, 1)
        .await?;

    if let Some(record) = existing.items.into_iter().next() {
        return Ok(Credential {
            app_id: app_id.to_string(),
            function_id: function_id.to_string(),
            username: record.body.username,
            password: record.body.password,
            realm: realm.to_string(),
        });
    }

    let (first_name, last_name) = split_display_name(&tenant.display_name);
    let password = generate_password(tenant.tenant_id);

    let created = admin_source
        .create_integration_user(tenant.tenant_id, &first_name, &last_name, &password)
        .await?;

    sink.insert(
        "integration/users",
        &IntegrationUserBody {
            tenant_id: tenant.tenant_id,
            realm: realm.to_string(),
            username: created.username.clone(),
            password: created.password.clone(),
            active: true,
        },
    )
    .await?;

    let credential = Credential {
        app_id: app_id.to_string(),
        function_id: function_id.to_string(),
        username: created.username,
        password: created.password,
        realm: realm.to_string(),
    };

    let probe = SourceClient::new(
        config.source_sync_url.clone(),
        config.source_integration_url.clone(),
        config.source_competence_url.clone(),
        credential.clone(),
    );
    poll_until_authenticated(&probe, tenant.tenant_id, config).await?;

    Ok(credential)
}

/// Newly created credentials may take up to ~180s to become
/// authenticatable; callers treat "not yet" as a retry condition, never
/// as a failure, until the ceiling is reached.
async fn poll_until_authenticated(
    probe: &SourceClient,
    tenant_id: i64,
    config: &Config,
) -> Result<(), WorkerError> {
    let ceiling = Duration::from_secs(config.provisioning_ceiling_secs);
    let interval = Duration::from_secs(config.provisioning_poll_interval_secs);
    let deadline = Instant::now() + ceiling;

    loop {
        if let Ok(true) = probe.hello().await {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(WorkerError::ProvisioningTimedOut { tenant_id });
        }
        tokio::time::sleep(interval).await;
    }
}

fn split_display_name(display_name: &str) -> (String, String) {
    match display_name.split_once(' ') {
        Some((first, last)) => (first.to_string(), last.to_string()),
        None => (display_name.to_string(), "Integration".to_string()),
    }
}

fn generate_password(tenant_id: i64) -> String {
    let mut hasher = DefaultHasher::new();
    tenant_id.hash(&mut hasher);
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .hash(&mut hasher);
    format!("cs-{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_a_two_word_display_name() {
        assert_eq!(
            split_display_name("Example FC"),
            ("Example".to_string(), "FC".to_string())
        );
    }

    #[test]
    fn falls_back_to_a_placeholder_last_name_for_a_single_word() {
        assert_eq!(
            split_display_name("Rovers"),
            ("Rovers".to_string(), "Integration".to_string())
        );
    }

    #[test]
    fn generated_passwords_are_not_trivially_guessable_identical() {
        let a = generate_password(1);
        std::thread::sleep(std::time::Duration::from_millis(1));
        let b = generate_password(1);
        assert_ne!(a, b);
    }
}
