use std::fs::File;
use std::io::Write;
use std::path::Path;

use fs2::FileExt;

/// An exclusive advisory lock on a `*.pid` file, held for the lifetime
/// of the daemon process and released implicitly on exit.
///
/// Acquired before any other destructive startup step (creating
/// directories, truncating the resume token, binding the RPC listener)
/// so a second instance of the same daemon refuses to start rather than
/// racing the first one (§10.5's lock-first ordering).
pub struct PidLock {
    file: File,
}

impl PidLock {
    pub fn acquire(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        file.try_lock_exclusive().map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                format!("another instance already holds {}", path.display()),
            )
        })?;

        let mut file = file;
        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(PidLock { file })
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
