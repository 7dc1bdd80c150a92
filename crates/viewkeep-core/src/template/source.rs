//! Template sources and clocks.

use crate::SourceId;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Where template sources live, as far as staleness checks are concerned.
pub trait TemplateSource: Send + Sync {
    /// Last modification time of `source` in milliseconds since the epoch.
    ///
    /// `0` means "unknown" and is always treated as stale. Errors are fatal to
    /// the lookup that triggered the check.
    fn last_modified(&self, source: &SourceId) -> io::Result<u64>;

    /// Human-readable name used in diagnostics.
    fn display_name(&self, source: &SourceId) -> String {
        source.to_string()
    }
}

/// Millisecond clock used for refresh windows.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        to_millis(SystemTime::now())
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn new(start_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(start_millis),
        }
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

fn to_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

// =============================================================================
// FILE SYSTEM SOURCE
// =============================================================================

/// Template sources stored as files under a root directory.
///
/// A [`SourceId`] is a path relative to the root.
#[derive(Debug, Clone)]
pub struct FileSystemSource {
    root: PathBuf,
}

impl FileSystemSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Absolute path of `source`.
    #[must_use]
    pub fn path_of(&self, source: &SourceId) -> PathBuf {
        self.root.join(source.as_str().trim_start_matches('/'))
    }
}

impl TemplateSource for FileSystemSource {
    fn last_modified(&self, source: &SourceId) -> io::Result<u64> {
        match std::fs::metadata(self.path_of(source)) {
            Ok(meta) => Ok(meta.modified().map(to_millis).unwrap_or(0)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn display_name(&self, source: &SourceId) -> String {
        self.path_of(source).display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn manual_clock_moves_only_on_demand() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_millis(), 1_500);
        clock.set(10);
        assert_eq!(clock.now_millis(), 10);
    }

    #[test]
    fn file_source_reports_mtime_and_unknown_for_missing() {
        let temp = tempdir().expect("temp dir");
        std::fs::write(temp.path().join("home.xhtml"), "<page/>").expect("write");
        let source = FileSystemSource::new(temp.path());

        let modified = source
            .last_modified(&SourceId::new("/home.xhtml"))
            .expect("mtime");
        assert!(modified > 0);

        let missing = source
            .last_modified(&SourceId::new("missing.xhtml"))
            .expect("missing is not an error");
        assert_eq!(missing, 0);
        assert!(source.display_name(&SourceId::new("home.xhtml")).ends_with("home.xhtml"));
    }

    #[test]
    fn system_clock_is_past_epoch() {
        assert!(SystemClock.now_millis() > 0);
    }
}
