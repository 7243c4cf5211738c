use std::sync::Arc;

use clubsync_sink::{ChangeLogStore, SinkClient};
use clubsync_source::{Credential, SourceClient};
use clubsync_worker::config::Config;
use clubsync_worker::geocode::NoopGeocoder;
use clubsync_worker::recovery;
use miette::IntoDiagnostic;
use tokio::sync::Semaphore;

/// Standalone CLI invoking one recovery sweep and exiting. Pass
/// `--include-pending-and-error` to also replay items stuck in
/// `pending`/`error` rather than only `ready`.
#[tokio::main]
async fn main() -> miette::Result<()> {
    env_logger::init();

    let include_pending_and_error = std::env::args().any(|arg| arg == "--include-pending-and-error");

    let config = Config::load().into_diagnostic()?;

    let credential = Credential {
        app_id: config.integration_app_id.clone(),
        function_id: config.integration_function_id.clone(),
        username: config.federation_username.clone(),
        password: config.federation_password.clone(),
        realm: config.realm.clone(),
    };
    let source = SourceClient::new(
        config.source_sync_url.clone(),
        config.source_integration_url.clone(),
        config.source_competence_url.clone(),
        credential,
    );
    let sink = SinkClient::new(config.sink_base_url.clone());
    let changes = ChangeLogStore::new(SinkClient::new(config.sink_base_url.clone()));
    let semaphore = Arc::new(Semaphore::new(config.connection_pool_size));
    let geocoder = NoopGeocoder;

    let report = recovery::sweep(
        &source,
        &sink,
        &changes,
        &semaphore,
        &geocoder,
        config.geocode_enabled,
        &config.realm,
        include_pending_and_error,
    )
    .await
    .into_diagnostic()?;

    log::info!(
        "recovery sweep complete: {} considered, {} finished, {} still erroring",
        report.considered,
        report.finished,
        report.still_erroring
    );

    Ok(())
}
