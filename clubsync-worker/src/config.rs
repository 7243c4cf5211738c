use std::collections::HashMap;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use clubsync_source::SyncType;

/// Per-`sync_type` override of the top-level interval/enabled defaults,
/// the same shape the ingest pipeline uses to let each entity kind
/// override batch size independently of the global default.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SyncTypeConfig {
    pub enabled: bool,
    pub changes_sync_interval_minutes: Option<u64>,
}

impl Default for SyncTypeConfig {
    fn default() -> Self {
        SyncTypeConfig {
            enabled: true,
            changes_sync_interval_minutes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Environment selector; partitions the change-log store and scopes
    /// credentials.
    pub realm: String,

    /// Minutes between steady-state sync ticks per worker.
    pub changes_sync_interval_minutes: u64,
    /// Hours per populate window, and the threshold for populate vs. sync
    /// at startup.
    pub populate_interval_hours: i64,
    /// Hours subtracted from the last-seen ordinal when resuming populate.
    pub overlap_hours: i64,
    /// Seconds added to a window's start to avoid refetching the last
    /// instant already covered.
    pub initial_timedelta_secs: i64,
    /// Seconds slept before each source call, keeping windows from
    /// reaching into the future relative to source clock skew.
    pub sync_delay_secs: u64,
    /// Error streak before a sync worker self-terminates.
    pub sync_max_errors: u32,
    /// Milliseconds slept between populate windows.
    pub populate_grace_millis: u64,

    /// Semaphore permits throttling concurrent source calls fleet-wide.
    pub connection_pool_size: usize,

    /// Subset of sync types this deployment runs.
    pub sync_types: Vec<SyncType>,
    /// Keyed by the sync type's snake_case name (`"changes"`, `"license"`,
    /// ...) rather than the enum itself, so this layers cleanly through
    /// TOML tables and `CLUBSYNC_`-prefixed env vars.
    #[serde(default)]
    pub sync_type_overrides: HashMap<String, SyncTypeConfig>,

    /// Enables address -> coordinates enrichment on insert (Person /
    /// Organization only); the geocoder itself is an external
    /// collaborator, see [`crate::geocode`].
    pub geocode_enabled: bool,

    pub exclude_tenants: Vec<i64>,
    pub groups_as_clubs_mapping: HashMap<i64, String>,

    /// Stream consumer restart ceiling before the resume token is reset.
    pub max_restarts: u32,
    pub resume_token_path: String,
    pub pid_dir: String,
    pub log_dir: String,

    pub rpc_bind_addr: String,

    pub db_request_timeout_secs: u64,

    /// `hello()` poll cadence and ceiling while waiting for a freshly
    /// created integration user to become authenticatable.
    pub provisioning_poll_interval_secs: u64,
    pub provisioning_ceiling_secs: u64,
    /// Wait after provisioning a batch of users before using them.
    pub post_creation_grace_secs: u64,
    /// Inter-start delay staggering worker startup.
    pub worker_start_stagger_millis: u64,

    pub source_sync_url: String,
    pub source_integration_url: String,
    pub source_competence_url: String,
    pub sink_base_url: String,

    /// Shared across every credential this deployment presents to the
    /// source; only the username/password differ per tenant.
    pub integration_app_id: String,
    pub integration_function_id: String,

    /// Admin credential used to call `CreateIntegrationUser` on behalf
    /// of newly discovered tenants.
    pub admin_username: String,
    pub admin_password: String,

    /// Federation-wide credential used by the payments/license/
    /// competence/federation workers, which are not scoped to one
    /// tenant.
    pub federation_username: String,
    pub federation_password: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            realm: "prod".to_string(),
            changes_sync_interval_minutes: 15,
            populate_interval_hours: 24,
            overlap_hours: 2,
            initial_timedelta_secs: 1,
            sync_delay_secs: 5,
            sync_max_errors: 10,
            populate_grace_millis: 500,
            connection_pool_size: 10,
            sync_types: SyncType::ALL.to_vec(),
            sync_type_overrides: HashMap::new(),
            geocode_enabled: false,
            exclude_tenants: Vec::new(),
            groups_as_clubs_mapping: HashMap::new(),
            max_restarts: 5,
            resume_token_path: "resume.token".to_string(),
            pid_dir: ".".to_string(),
            log_dir: "logs".to_string(),
            rpc_bind_addr: "127.0.0.1:8910".to_string(),
            db_request_timeout_secs: 30,
            provisioning_poll_interval_secs: 10,
            provisioning_ceiling_secs: 220,
            post_creation_grace_secs: 140,
            worker_start_stagger_millis: 1000,
            source_sync_url: "https://source.example.invalid/SynchronizationService".to_string(),
            source_integration_url: "https://source.example.invalid/IntegrationService"
                .to_string(),
            source_competence_url: "https://source.example.invalid/Competence2Service"
                .to_string(),
            sink_base_url: "https://sink.example.invalid/api".to_string(),
            integration_app_id: "clubsync".to_string(),
            integration_function_id: "1".to_string(),
            admin_username: "admin".to_string(),
            admin_password: String::new(),
            federation_username: "federation".to_string(),
            federation_password: String::new(),
        }
    }
}

impl Config {
    /// Layers, in increasing priority: compiled-in defaults, an optional
    /// `clubsync.toml`, then `CLUBSYNC_`-prefixed environment variables.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("clubsync.toml"))
            .merge(Env::prefixed("CLUBSYNC_").split("__"))
    }

    pub fn load() -> figment::Result<Self> {
        Self::figment().extract()
    }

    pub fn sync_interval_minutes_for(&self, sync_type: SyncType) -> u64 {
        self.sync_type_overrides
            .get(&sync_type.to_string())
            .and_then(|ov| ov.changes_sync_interval_minutes)
            .unwrap_or(self.changes_sync_interval_minutes)
    }

    pub fn is_sync_type_enabled(&self, sync_type: SyncType) -> bool {
        self.sync_types.contains(&sync_type)
            && self
                .sync_type_overrides
                .get(&sync_type.to_string())
                .map(|ov| ov.enabled)
                .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_enables_every_sync_type() {
        let config = Config::default();
        for sync_type in SyncType::ALL {
            assert!(config.is_sync_type_enabled(sync_type));
        }
    }

    #[test]
    fn per_sync_type_override_wins_over_the_top_level_interval() {
        let mut config = Config::default();
        config.sync_type_overrides.insert(
            SyncType::Payments.to_string(),
            SyncTypeConfig {
                enabled: false,
                changes_sync_interval_minutes: Some(60),
            },
        );
        assert_eq!(
            config.sync_interval_minutes_for(SyncType::Payments),
            60
        );
        assert_eq!(
            config.sync_interval_minutes_for(SyncType::Changes),
            config.changes_sync_interval_minutes
        );
        assert!(!config.is_sync_type_enabled(SyncType::Payments));
    }
}
