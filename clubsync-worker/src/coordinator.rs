use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use clubsync_sink::{ChangeLogStore, SinkClient};
use clubsync_source::{Credential, SourceClient, SyncType};

use crate::config::Config;
use crate::credential_provisioning::ensure_credential;
use crate::geocode::Geocoder;
use crate::log_ring::LogRing;
use crate::notify::Notifier;
use crate::resume_token::ResumeToken;
use crate::state::{WorkerState, WorkerStateSnapshot};
use crate::sync_worker::{self, SyncWorkerContext};
use crate::tenant::{discover_tenants, Tenant};

/// A tenant that could not be brought up at startup (credential
/// provisioning failure, unknown tenant, source error on creation).
/// The coordinator continues with the rest of the fleet rather than
/// aborting the whole startup sequence.
#[derive(Debug, Clone, Serialize)]
pub struct FailedTenant {
    pub tenant_id: i64,
    pub display_name: String,
    pub reason: String,
}

struct WorkerHandle {
    state: Arc<WorkerState>,
    /// Kept so a future per-worker cancellation could stop just this
    /// worker without touching the fleet-wide shutdown token.
    #[allow(dead_code)]
    shutdown: CancellationToken,
    /// Retained so `restart_worker` can respawn a dead worker without
    /// re-running tenant discovery or credential provisioning: the
    /// original inputs to `spawn_sync_worker` are all it needs.
    tenant: Tenant,
    sync_type: SyncType,
    credential: Credential,
}

/// Owns the worker fleet, the bounded semaphore throttling concurrent
/// source calls, the shutdown broadcast, and the worker registry keyed
/// by `(tenant_id, sync_type)` (C6). This is the only component that
/// starts, stops, or restarts workers; the control RPC (C7) only talks
/// to a `Coordinator` handle.
pub struct Coordinator {
    config: Arc<Config>,
    sink: SinkClient,
    semaphore: Arc<Semaphore>,
    /// Replaced with a fresh, uncancelled token every time the fleet
    /// stops, so a later `start`/`reboot_workers` hands new workers a
    /// child token that isn't already cancelled (cancelling a
    /// `CancellationToken` also cancels every `child_token()` derived
    /// from it afterwards).
    shutdown: Mutex<CancellationToken>,
    log_ring: Arc<LogRing>,
    notifier: Arc<dyn Notifier>,
    geocoder: Arc<dyn Geocoder>,
    registry: Mutex<HashMap<(i64, SyncType), Arc<WorkerHandle>>>,
    failed_tenants: Mutex<Vec<FailedTenant>>,
    /// Guards `start()` against being re-entered while the fleet is
    /// already up (§4.7 `start_workers`: "start if not started"). Cleared
    /// whenever the fleet is stopped so a later `start_workers` can bring
    /// it back.
    started: AtomicBool,
}

impl Coordinator {
    pub fn new(
        config: Arc<Config>,
        notifier: Arc<dyn Notifier>,
        geocoder: Arc<dyn Geocoder>,
        log_ring: Arc<LogRing>,
    ) -> Self {
        Coordinator {
            sink: SinkClient::new(config.sink_base_url.clone()),
            semaphore: Arc::new(Semaphore::new(config.connection_pool_size)),
            shutdown: Mutex::new(CancellationToken::new()),
            log_ring,
            notifier,
            geocoder,
            registry: Mutex::new(HashMap::new()),
            failed_tenants: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            config,
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.lock().unwrap().clone()
    }

    /// The §4.6 startup sequence: discover tenants, ensure each has an
    /// integration credential (waiting out provisioning if newly
    /// created), instantiate one `changes` worker per tenant plus the
    /// federation-wide workers, then start all of them staggered.
    ///
    /// A no-op if the fleet is already started (§4.7 `start_workers`:
    /// "start if not started") — otherwise a second `POST /start_workers`
    /// would re-run discovery and spawn a duplicate fleet, silently
    /// overwriting the registry while the original tasks kept running.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            log::info!("coordinator: start_workers called while already started; ignoring");
            return;
        }

        let tenants = match discover_tenants(
            &self.sink,
            &self.config.exclude_tenants,
            &self.config.groups_as_clubs_mapping,
        )
        .await
        {
            Ok(tenants) => tenants,
            Err(err) => {
                log::error!("coordinator: failed to discover tenants: {err}");
                self.notifier
                    .notify("clubsync startup failure", &format!("tenant discovery failed: {err}"));
                self.started.store(false, Ordering::Release);
                return;
            }
        };

        let admin_credential = Credential {
            app_id: self.config.integration_app_id.clone(),
            function_id: self.config.integration_function_id.clone(),
            username: self.config.admin_username.clone(),
            password: self.config.admin_password.clone(),
            realm: self.config.realm.clone(),
        };
        let admin_source = self.make_source_client(admin_credential);

        let mut provisioned_any = false;
        let mut per_tenant_credentials = Vec::with_capacity(tenants.len());

        for tenant in &tenants {
            match ensure_credential(
                &self.sink,
                &admin_source,
                tenant,
                &self.config.realm,
                &self.config.integration_app_id,
                &self.config.integration_function_id,
                &self.config,
            )
            .await
            {
                Ok(credential) => {
                    provisioned_any = true;
                    per_tenant_credentials.push((tenant.clone(), credential));
                }
                Err(err) => {
                    let reason = err.to_string();
                    log::error!("coordinator: credential provisioning failed for tenant {}: {reason}", tenant.tenant_id);
                    self.failed_tenants.lock().unwrap().push(FailedTenant {
                        tenant_id: tenant.tenant_id,
                        display_name: tenant.display_name.clone(),
                        reason,
                    });
                }
            }
        }

        if provisioned_any {
            tokio::time::sleep(Duration::from_secs(self.config.post_creation_grace_secs)).await;
        }

        let mut pending: Vec<(Tenant, SyncType, Credential)> = per_tenant_credentials
            .into_iter()
            .map(|(tenant, credential)| (tenant, SyncType::Changes, credential))
            .collect();

        let federation_credential = Credential {
            app_id: self.config.integration_app_id.clone(),
            function_id: self.config.integration_function_id.clone(),
            username: self.config.federation_username.clone(),
            password: self.config.federation_password.clone(),
            realm: self.config.realm.clone(),
        };
        for sync_type in [SyncType::Payments, SyncType::License, SyncType::Competence, SyncType::Federation] {
            if !self.config.is_sync_type_enabled(sync_type) {
                continue;
            }
            let tenant = Tenant {
                tenant_id: 0,
                created: Utc::now(),
                display_name: format!("{sync_type}"),
                active: true,
            };
            pending.push((tenant, sync_type, federation_credential.clone()));
        }

        // Start each worker, then sleep, so starts are actually spread out
        // (§4.6 step 6) rather than all fired before the first sleep begins.
        for (tenant, sync_type, credential) in pending {
            self.spawn_sync_worker(tenant, sync_type, credential);
            tokio::time::sleep(Duration::from_millis(self.config.worker_start_stagger_millis)).await;
        }
    }

    fn make_source_client(&self, credential: Credential) -> SourceClient {
        SourceClient::new(
            self.config.source_sync_url.clone(),
            self.config.source_integration_url.clone(),
            self.config.source_competence_url.clone(),
            credential,
        )
    }

    fn spawn_sync_worker(&self, tenant: Tenant, sync_type: SyncType, credential: Credential) {
        let state = WorkerState::new(tenant.tenant_id, sync_type, tenant.display_name.clone());
        let worker_shutdown = self.shutdown.lock().unwrap().child_token();

        let ctx = SyncWorkerContext {
            source: self.make_source_client(credential.clone()),
            changes: ChangeLogStore::new(SinkClient::new(self.config.sink_base_url.clone())),
            semaphore: self.semaphore.clone(),
            state: state.clone(),
            shutdown: worker_shutdown.clone(),
            tenant_id: tenant.tenant_id,
            realm: self.config.realm.clone(),
            sync_type,
            tenant_created: tenant.created,
            populate_interval_hours: self.config.populate_interval_hours,
            overlap_hours: self.config.overlap_hours,
            initial_timedelta_secs: self.config.initial_timedelta_secs,
            sync_delay_secs: self.config.sync_delay_secs,
            sync_max_errors: self.config.sync_max_errors,
            populate_grace_millis: self.config.populate_grace_millis,
            sync_interval: Duration::from_secs(
                60 * self.config.sync_interval_minutes_for(sync_type),
            ),
        };

        tokio::spawn(sync_worker::run(ctx));

        let key = (tenant.tenant_id, sync_type);
        self.registry.lock().unwrap().insert(
            key,
            Arc::new(WorkerHandle {
                state,
                shutdown: worker_shutdown,
                tenant,
                sync_type,
                credential,
            }),
        );
    }

    /// Restart a worker only if it is not currently alive (§4.7
    /// `restart_worker`): respawn it from the credential and tenant
    /// retained in its registry entry, without re-running tenant
    /// discovery or credential provisioning. A no-op (returns `false`) if
    /// the key is unknown or the worker is still running, matching the
    /// original's `self.work.workers[index].run()` on an already-dead
    /// worker.
    pub fn restart_worker(&self, tenant_id: i64, sync_type: SyncType) -> bool {
        let existing = self.registry.lock().unwrap().get(&(tenant_id, sync_type)).cloned();
        let Some(existing) = existing else {
            return false;
        };
        if existing.state.is_alive() {
            return false;
        }

        self.spawn_sync_worker(
            existing.tenant.clone(),
            existing.sync_type,
            existing.credential.clone(),
        );
        true
    }

    pub fn worker_snapshots(&self) -> Vec<WorkerStateSnapshot> {
        self.registry
            .lock()
            .unwrap()
            .values()
            .map(|handle| handle.state.snapshot())
            .collect()
    }

    pub fn worker_snapshot(&self, tenant_id: i64, sync_type: SyncType) -> Option<WorkerStateSnapshot> {
        self.registry
            .lock()
            .unwrap()
            .get(&(tenant_id, sync_type))
            .map(|handle| handle.state.snapshot())
    }

    /// The control RPC addresses workers by a stable positional index
    /// (`get_worker_status(i)`, `restart_worker(i)`) rather than the
    /// `(tenant_id, sync_type)` key the registry is keyed on; this
    /// imposes the index by sorting the registry each call.
    fn sorted_keys(&self) -> Vec<(i64, SyncType)> {
        let registry = self.registry.lock().unwrap();
        let mut keys: Vec<_> = registry.keys().copied().collect();
        keys.sort_by_key(|(tenant_id, sync_type)| (*tenant_id, sync_type.to_string()));
        keys
    }

    pub fn worker_snapshot_by_index(&self, index: usize) -> Option<WorkerStateSnapshot> {
        let key = *self.sorted_keys().get(index)?;
        self.worker_snapshot(key.0, key.1)
    }

    pub fn restart_worker_by_index(&self, index: usize) -> bool {
        match self.sorted_keys().get(index).copied() {
            Some((tenant_id, sync_type)) => self.restart_worker(tenant_id, sync_type),
            None => false,
        }
    }

    pub fn failed_tenants(&self) -> Vec<FailedTenant> {
        self.failed_tenants.lock().unwrap().clone()
    }

    pub fn log_tail(&self) -> Vec<crate::log_ring::LogRecord> {
        self.log_ring.tail()
    }

    /// Approximates a per-worker log view by filtering the single
    /// process-wide error ring for lines mentioning this worker's
    /// tenant id. The ring itself is not partitioned per worker (see
    /// the design notes' logging section).
    pub fn worker_log_tail(&self, index: usize) -> Vec<crate::log_ring::LogRecord> {
        let snapshot = match self.worker_snapshot_by_index(index) {
            Some(snapshot) => snapshot,
            None => return Vec::new(),
        };
        let needle = format!("tenant {}", snapshot.tenant_id);
        self.log_ring
            .tail()
            .into_iter()
            .filter(|record| record.message.contains(&needle))
            .collect()
    }

    /// Sets the shutdown flag and waits for every worker to mark itself
    /// terminated. Workers observe the flag at their own checkpoints
    /// (scheduler tick entry, before a semaphore acquisition, before
    /// each sink write); this never forcibly interrupts an in-flight
    /// network call.
    ///
    /// Replaces the shutdown token with a fresh, uncancelled one once the
    /// fleet is down and clears the started flag, so a later
    /// `start`/`reboot_workers` can bring workers back up instead of
    /// handing them an already-cancelled token.
    pub async fn shutdown_workers(&self) {
        self.shutdown.lock().unwrap().cancel();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
        loop {
            let all_dead = self
                .registry
                .lock()
                .unwrap()
                .values()
                .all(|handle| !handle.state.is_alive());
            if all_dead || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        *self.shutdown.lock().unwrap() = CancellationToken::new();
        self.started.store(false, Ordering::Release);
    }

    pub async fn reboot_workers(&self) {
        self.shutdown_workers().await;
        self.registry.lock().unwrap().clear();
        self.start().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_tenant_serializes_with_reason() {
        let failed = FailedTenant {
            tenant_id: 7,
            display_name: "FC Example".to_string(),
            reason: "provisioning timed out".to_string(),
        };
        let json = serde_json::to_string(&failed).unwrap();
        assert!(json.contains("provisioning timed out"));
    }
}
