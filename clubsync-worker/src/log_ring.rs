use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// One retained error-level log line for a worker's `get_worker_log`
/// view. Carries only what the RPC surface needs to render a line; the
/// full-fidelity log still goes to whatever destination `env_logger`
/// writes to.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LogRecord {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// A fixed-capacity ring buffer of error-level log records, one per
/// worker. This is the direct structural analogue of a tailing log
/// handler attached at a single severity level: workers call
/// [`LogRing::push`] alongside their normal `log::error!` call so the
/// control RPC can serve a bounded recent-errors view without holding
/// the full log.
pub struct LogRing {
    capacity: usize,
    records: Mutex<VecDeque<LogRecord>>,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        LogRing {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, message: impl Into<String>) {
        let mut records = self.records.lock().unwrap();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(LogRecord {
            at: Utc::now(),
            message: message.into(),
        });
    }

    pub fn tail(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_drops_the_oldest_record_once_at_capacity() {
        let ring = LogRing::new(2);
        ring.push("first");
        ring.push("second");
        ring.push("third");
        let tail: Vec<_> = ring.tail().into_iter().map(|r| r.message).collect();
        assert_eq!(tail, vec!["second", "third"]);
    }
}
