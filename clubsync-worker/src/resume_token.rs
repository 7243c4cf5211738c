use std::io;
use std::path::{Path, PathBuf};

/// The stream consumer's durable cursor into the change-log watch.
/// Single-writer discipline is sufficient — the consumer is a singleton
/// process — so no cross-process locking is needed, but writes still go
/// through a temp-file-then-rename so a crash mid-write can never leave
/// a partially-written cursor behind.
pub struct ResumeToken {
    path: PathBuf,
}

impl ResumeToken {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ResumeToken { path: path.into() }
    }

    /// `None` means "start from the live tail" — either because no
    /// token has ever been written, or because [`ResumeToken::reset`]
    /// deleted it after exhausting restarts.
    pub fn read(&self) -> io::Result<Option<i64>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents.trim().parse::<i64>().ok()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Called only after the sink has acknowledged the apply for the
    /// event this cursor points past — never before, and never during a
    /// recovery sweep (the caller holds `resume_token_lock` for that;
    /// see [`crate::recovery`]).
    pub fn write(&self, cursor: i64) -> io::Result<()> {
        let tmp_path = tmp_path_for(&self.path);
        std::fs::write(&tmp_path, cursor.to_string())?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    pub fn reset(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_cursor_through_write_and_read() {
        let dir = tempdir();
        let token = ResumeToken::new(dir.join("resume.token"));
        assert_eq!(token.read().unwrap(), None);

        token.write(42).unwrap();
        assert_eq!(token.read().unwrap(), Some(42));

        token.write(43).unwrap();
        assert_eq!(token.read().unwrap(), Some(43));

        token.reset().unwrap();
        assert_eq!(token.read().unwrap(), None);
    }

    #[test]
    fn reset_on_an_absent_file_is_not_an_error() {
        let dir = tempdir();
        let token = ResumeToken::new(dir.join("absent.token"));
        token.reset().unwrap();
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "clubsync-resume-token-test-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
