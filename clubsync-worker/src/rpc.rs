use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{Shutdown, State, get, post, routes};

use crate::coordinator::{Coordinator, FailedTenant};
use crate::log_ring::LogRecord;
use crate::state::WorkerStateSnapshot;

/// Control RPC (C7): a small request-driven surface over the
/// coordinator, mounted at the root of a single-instance Rocket
/// server. Transport choice is explicitly out of scope in the design
/// notes; Rocket is used here the same way the rest of this corpus uses
/// it for its own HTTP-facing control surface.
#[get("/status")]
fn status() -> &'static str {
    "ok"
}

#[post("/shutdown")]
async fn shutdown(coordinator: &State<Arc<Coordinator>>, shutdown: Shutdown) -> Status {
    coordinator.shutdown_workers().await;
    shutdown.notify();
    Status::Accepted
}

#[post("/shutdown_workers")]
async fn shutdown_workers(coordinator: &State<Arc<Coordinator>>) -> Status {
    coordinator.shutdown_workers().await;
    Status::Accepted
}

#[post("/start_workers")]
async fn start_workers(coordinator: &State<Arc<Coordinator>>) -> Status {
    coordinator.start().await;
    Status::Accepted
}

#[post("/reboot_workers")]
async fn reboot_workers(coordinator: &State<Arc<Coordinator>>) -> Status {
    coordinator.reboot_workers().await;
    Status::Accepted
}

#[get("/workers")]
fn get_workers_status(coordinator: &State<Arc<Coordinator>>) -> Json<Vec<WorkerStateSnapshot>> {
    Json(coordinator.worker_snapshots())
}

#[get("/workers/<index>")]
fn get_worker_status(coordinator: &State<Arc<Coordinator>>, index: usize) -> Option<Json<WorkerStateSnapshot>> {
    coordinator.worker_snapshot_by_index(index).map(Json)
}

#[post("/workers/<index>/restart")]
fn restart_worker(coordinator: &State<Arc<Coordinator>>, index: usize) -> Status {
    if coordinator.restart_worker_by_index(index) {
        Status::Ok
    } else {
        Status::Conflict
    }
}

#[get("/logs")]
fn get_logs(coordinator: &State<Arc<Coordinator>>) -> Json<Vec<LogRecord>> {
    Json(coordinator.log_tail())
}

#[get("/workers/<index>/logs")]
fn get_worker_log(coordinator: &State<Arc<Coordinator>>, index: usize) -> Json<Vec<LogRecord>> {
    Json(coordinator.worker_log_tail(index))
}

#[get("/failed_tenants")]
fn get_failed_tenants(coordinator: &State<Arc<Coordinator>>) -> Json<Vec<FailedTenant>> {
    Json(coordinator.failed_tenants())
}

/// Builds the Rocket instance bound to `bind_addr`, with the
/// coordinator managed as shared state. The caller is responsible for
/// `.launch()`-ing it after the PID lock has been acquired (§10.5's
/// lock-then-bind ordering).
pub fn build(coordinator: Arc<Coordinator>, bind_addr: &str) -> rocket::Rocket<rocket::Build> {
    let socket_addr = SocketAddr::from_str(bind_addr)
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8910)));

    let figment = rocket::Config::figment()
        .merge(("address", socket_addr.ip()))
        .merge(("port", socket_addr.port()));

    rocket::custom(figment).manage(coordinator).mount(
        "/",
        routes![
            status,
            shutdown,
            shutdown_workers,
            start_workers,
            reboot_workers,
            get_workers_status,
            get_worker_status,
            restart_worker,
            get_logs,
            get_worker_log,
            get_failed_tenants,
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn an_unparseable_bind_address_falls_back_to_loopback() {
        let socket_addr = SocketAddr::from_str("not-an-address")
            .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8910)));
        assert_eq!(socket_addr, SocketAddr::from(([127, 0, 0, 1], 8910)));
    }
}
