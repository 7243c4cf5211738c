use std::path::PathBuf;
use std::sync::Arc;

use clubsync_sink::{ChangeLogStore, SinkClient};
use clubsync_source::{Credential, SourceClient, SyncType};
use clubsync_worker::config::Config;
use clubsync_worker::geocode::NoopGeocoder;
use clubsync_worker::log_ring::LogRing;
use clubsync_worker::pidlock::PidLock;
use clubsync_worker::resume_token::ResumeToken;
use clubsync_worker::state::WorkerState;
use clubsync_worker::stream_consumer::{self, StreamConsumerContext};
use miette::IntoDiagnostic;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

const LOG_RING_CAPACITY: usize = 256;
const PID_FILE_NAME: &str = "clubsync-streamd.pid";

/// The stream consumer daemon: a singleton process tailing the
/// change-log store and applying work items to the sink (C5).
#[tokio::main]
async fn main() -> miette::Result<()> {
    env_logger::init();

    let config = Config::load().into_diagnostic()?;

    let pid_path = PathBuf::from(&config.pid_dir).join(PID_FILE_NAME);
    let _pid_lock = PidLock::acquire(&pid_path).into_diagnostic()?;

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

    let shutdown = CancellationToken::new();
    let ctx = StreamConsumerContext {
        source,
        changes: ChangeLogStore::new(SinkClient::new(config.sink_base_url.clone())),
        sink: SinkClient::new(config.sink_base_url.clone()),
        semaphore: Arc::new(Semaphore::new(config.connection_pool_size)),
        state: WorkerState::new(0, SyncType::Changes, "stream-consumer"),
        shutdown: shutdown.clone(),
        log_ring: Arc::new(LogRing::new(LOG_RING_CAPACITY)),
        geocoder: Arc::new(NoopGeocoder),
        geocode_enabled: config.geocode_enabled,
        realm: config.realm.clone(),
        resume_token: ResumeToken::new(PathBuf::from(&config.resume_token_path)),
        max_restarts: config.max_restarts,
    };

    let consumer_handle = tokio::spawn(stream_consumer::run(ctx));

    wait_for_shutdown_signal().await;
    shutdown.cancel();

    if let Err(err) = consumer_handle.await {
        log::error!("stream consumer task panicked: {err}");
    }

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let mut sighup = signal(SignalKind::hangup()).expect("registering SIGHUP handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("registering SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("registering SIGTERM handler");
    let mut sigtstp = signal(SignalKind::from_raw(20)).expect("registering SIGTSTP handler");
    let mut sigttin = signal(SignalKind::from_raw(21)).expect("registering SIGTTIN handler");
    let mut sigttou = signal(SignalKind::from_raw(22)).expect("registering SIGTTOU handler");

    tokio::select! {
        _ = sighup.recv() => log::info!("received SIGHUP, shutting down"),
        _ = sigint.recv() => log::info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => log::info!("received SIGTERM, shutting down"),
        _ = sigtstp.recv() => log::info!("received SIGTSTP, shutting down"),
        _ = sigttin.recv() => log::info!("received SIGTTIN, shutting down"),
        _ = sigttou.recv() => log::info!("received SIGTTOU, shutting down"),
    }
}
