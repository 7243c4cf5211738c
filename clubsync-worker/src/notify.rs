/// Notification side-channels (email/SMS) are an external collaborator
/// (§1, out of scope); the core only needs somewhere to report a
/// tenant's startup failure or a worker's self-termination.
pub trait Notifier: Send + Sync {
    fn notify(&self, subject: &str, body: &str);
}

pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _subject: &str, _body: &str) {}
}

pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, subject: &str, body: &str) {
        log::warn!("notification [{subject}]: {body}");
    }
}
