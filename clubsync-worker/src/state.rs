use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use clubsync_source::SyncType;

/// The coarse phase of a sync worker's state machine (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initialized,
    Checking,
    Populating,
    Syncing,
    Sleeping,
    Terminating,
    Terminated,
}

/// Why a worker is in its current phase — populated on errors and
/// self-termination so the RPC surface can explain a dead worker without
/// requiring a log dive.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Reason(pub Option<String>);

/// In-memory record mutated only by the owning worker; read by the
/// coordinator and the control RPC. Mutation is always `Release`-ordered
/// so a reader calling `snapshot()` after observing a phase change also
/// observes every counter update that preceded it.
pub struct WorkerState {
    tenant_id: i64,
    sync_type: SyncType,
    display_name: Mutex<String>,
    started_at: DateTime<Utc>,
    phase: Mutex<Phase>,
    reason: Mutex<Reason>,
    messages_ingested: AtomicU64,
    sync_errors: AtomicU32,
    misfires: AtomicU32,
    next_run_time: Mutex<Option<DateTime<Utc>>>,
    window_from: Mutex<Option<DateTime<Utc>>>,
    window_to: Mutex<Option<DateTime<Utc>>>,
    alive: AtomicBool,
}

/// A point-in-time read of [`WorkerState`], the shape returned over RPC.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WorkerStateSnapshot {
    pub tenant_id: i64,
    pub sync_type: SyncType,
    pub display_name: String,
    pub phase: Phase,
    pub reason: Option<String>,
    pub uptime_secs: i64,
    pub messages_ingested: u64,
    pub sync_errors: u32,
    pub misfires: u32,
    pub next_run_time: Option<DateTime<Utc>>,
    pub window_from: Option<DateTime<Utc>>,
    pub window_to: Option<DateTime<Utc>>,
    pub alive: bool,
}

impl WorkerState {
    pub fn new(tenant_id: i64, sync_type: SyncType, display_name: impl Into<String>) -> Arc<Self> {
        Arc::new(WorkerState {
            tenant_id,
            sync_type,
            display_name: Mutex::new(display_name.into()),
            started_at: Utc::now(),
            phase: Mutex::new(Phase::Initialized),
            reason: Mutex::new(Reason::default()),
            messages_ingested: AtomicU64::new(0),
            sync_errors: AtomicU32::new(0),
            misfires: AtomicU32::new(0),
            next_run_time: Mutex::new(None),
            window_from: Mutex::new(None),
            window_to: Mutex::new(None),
            alive: AtomicBool::new(true),
        })
    }

    pub fn tenant_id(&self) -> i64 {
        self.tenant_id
    }

    pub fn sync_type(&self) -> SyncType {
        self.sync_type
    }

    pub fn set_phase(&self, phase: Phase) {
        *self.phase.lock().unwrap() = phase;
        if matches!(phase, Phase::Terminated) {
            self.alive.store(false, Ordering::Release);
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap()
    }

    pub fn set_reason(&self, reason: impl Into<String>) {
        *self.reason.lock().unwrap() = Reason(Some(reason.into()));
    }

    pub fn clear_reason(&self) {
        *self.reason.lock().unwrap() = Reason::default();
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn add_messages_ingested(&self, n: u64) {
        self.messages_ingested.fetch_add(n, Ordering::Relaxed);
    }

    /// Each clean window decrements the error streak; it saturates at
    /// zero rather than wrapping.
    pub fn record_clean_window(&self) {
        let _ = self
            .sync_errors
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            });
    }

    /// Returns the post-increment error count, which the caller compares
    /// against `sync_max_errors` to decide on self-termination.
    pub fn record_error(&self) -> u32 {
        self.sync_errors.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn sync_errors(&self) -> u32 {
        self.sync_errors.load(Ordering::Acquire)
    }

    pub fn record_misfire(&self) {
        self.misfires.fetch_add(1, Ordering::Relaxed);
    }

    /// A sustained misfire bias is the only thing worth surfacing; a
    /// single successful fire decrements the counter rather than
    /// resetting it, so occasional isolated misfires don't linger
    /// forever in the RPC view.
    pub fn record_successful_fire(&self) {
        let _ = self
            .misfires
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            });
    }

    pub fn set_next_run_time(&self, at: Option<DateTime<Utc>>) {
        *self.next_run_time.lock().unwrap() = at;
    }

    pub fn set_window(&self, from: DateTime<Utc>, to: DateTime<Utc>) {
        *self.window_from.lock().unwrap() = Some(from);
        *self.window_to.lock().unwrap() = Some(to);
    }

    pub fn snapshot(&self) -> WorkerStateSnapshot {
        WorkerStateSnapshot {
            tenant_id: self.tenant_id,
            sync_type: self.sync_type,
            display_name: self.display_name.lock().unwrap().clone(),
            phase: self.phase(),
            reason: self.reason.lock().unwrap().0.clone(),
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            messages_ingested: self.messages_ingested.load(Ordering::Relaxed),
            sync_errors: self.sync_errors(),
            misfires: self.misfires.load(Ordering::Relaxed),
            next_run_time: *self.next_run_time.lock().unwrap(),
            window_from: *self.window_from.lock().unwrap(),
            window_to: *self.window_to.lock().unwrap(),
            alive: self.is_alive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_streak_saturates_and_drains_on_clean_windows() {
        let state = WorkerState::new(1, SyncType::Changes, "Test Club");
        assert_eq!(state.record_error(), 1);
        assert_eq!(state.record_error(), 2);
        state.record_clean_window();
        assert_eq!(state.sync_errors(), 1);
        state.record_clean_window();
        state.record_clean_window();
        assert_eq!(state.sync_errors(), 0);
    }

    #[test]
    fn terminated_phase_marks_the_worker_dead() {
        let state = WorkerState::new(1, SyncType::Changes, "Test Club");
        assert!(state.is_alive());
        state.set_phase(Phase::Terminated);
        assert!(!state.is_alive());
        assert_eq!(state.phase(), Phase::Terminated);
    }

    #[test]
    fn snapshot_reflects_display_name_and_reason() {
        let state = WorkerState::new(42, SyncType::Payments, "FC Example");
        state.set_reason("source unavailable");
        let snap = state.snapshot();
        assert_eq!(snap.tenant_id, 42);
        assert_eq!(snap.display_name, "FC Example");
        assert_eq!(snap.reason.as_deref(), Some("source unavailable"));
    }
}
