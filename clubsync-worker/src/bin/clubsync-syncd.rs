use std::path::PathBuf;
use std::sync::Arc;

use clubsync_worker::config::Config;
use clubsync_worker::coordinator::Coordinator;
use clubsync_worker::geocode::NoopGeocoder;
use clubsync_worker::log_ring::LogRing;
use clubsync_worker::notify::LogNotifier;
use clubsync_worker::pidlock::PidLock;
use clubsync_worker::rpc;
use miette::IntoDiagnostic;
use tokio::signal::unix::{SignalKind, signal};

const LOG_RING_CAPACITY: usize = 256;
const PID_FILE_NAME: &str = "clubsync-syncd.pid";

/// The sync daemon: discovers tenants, runs one `changes` worker per
/// tenant plus the federation-wide workers, and serves the control RPC
/// (C7) alongside them.
#[tokio::main]
async fn main() -> miette::Result<()> {
    env_logger::init();

    let config = Arc::new(Config::load().into_diagnostic()?);

    let pid_path = PathBuf::from(&config.pid_dir).join(PID_FILE_NAME);
    let _pid_lock = PidLock::acquire(&pid_path).into_diagnostic()?;

    let log_ring = Arc::new(LogRing::new(LOG_RING_CAPACITY));
    let notifier = Arc::new(LogNotifier);
    let geocoder = Arc::new(NoopGeocoder);

    let coordinator = Arc::new(Coordinator::new(
        config.clone(),
        notifier,
        geocoder,
        log_ring,
    ));
    coordinator.start().await;

    let rocket = rpc::build(coordinator.clone(), &config.rpc_bind_addr);
    let rocket_handle = tokio::spawn(async move {
        if let Err(err) = rocket.launch().await {
            log::error!("control RPC server exited with an error: {err}");
        }
    });

    wait_for_shutdown_or_reboot(&coordinator).await;

    coordinator.shutdown_workers().await;
    rocket_handle.abort();

    Ok(())
}

/// SIGHUP/SIGINT/SIGTERM/SIGTSTP/SIGTTIN/SIGTTOU trigger an orderly
/// shutdown; SIGUSR1 is specific to this daemon and triggers
/// reboot-workers without exiting the process (§6 Process control).
async fn wait_for_shutdown_or_reboot(coordinator: &Arc<Coordinator>) {
    let mut sighup = signal(SignalKind::hangup()).expect("registering SIGHUP handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("registering SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("registering SIGTERM handler");
    // Linux signal numbers; tokio::signal::unix has no named constants
    // for these three job-control signals.
    let mut sigtstp = signal(SignalKind::from_raw(20)).expect("registering SIGTSTP handler");
    let mut sigttin = signal(SignalKind::from_raw(21)).expect("registering SIGTTIN handler");
    let mut sigttou = signal(SignalKind::from_raw(22)).expect("registering SIGTTOU handler");
    let mut sigusr1 = signal(SignalKind::user_defined1()).expect("registering SIGUSR1 handler");

    loop {
        tokio::select! {
            _ = sighup.recv() => { log::info!("received SIGHUP, shutting down"); return; }
            _ = sigint.recv() => { log::info!("received SIGINT, shutting down"); return; }
            _ = sigterm.recv() => { log::info!("received SIGTERM, shutting down"); return; }
            _ = sigtstp.recv() => { log::info!("received SIGTSTP, shutting down"); return; }
            _ = sigttin.recv() => { log::info!("received SIGTTIN, shutting down"); return; }
            _ = sigttou.recv() => { log::info!("received SIGTTOU, shutting down"); return; }
            _ = sigusr1.recv() => {
                log::info!("received SIGUSR1, rebooting workers");
                coordinator.reboot_workers().await;
            }
        }
    }
}
