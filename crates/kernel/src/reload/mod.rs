//! Module reloading (spec.md §4.8).
//!
//! Scoped down from "reload modified modules and patch their live objects
//! into running cells" to "detect a modified module file and mark the
//! cells that imported it stale" — this crate has no dynamic class/module
//! object graph to patch in place the way the distilled system's host
//! language does (Design Notes, Open Questions). [`ObjectPatcher`] is left
//! as the extension point a host with a real object graph implements;
//! [`StaleOnlyReloader`] is what ships by default and is sufficient to
//! drive the kernel's own re-run scheduling.

pub mod watcher;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::ReloadError;

/// What changed during one reload pass.
#[derive(Debug, Default, Clone)]
pub struct ReloadReport {
    pub changed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl ReloadReport {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.failed.is_empty()
    }
}

/// The extension point a host with a real live-object graph implements to
/// actually patch reloaded definitions into running cells. The default
/// [`StaleOnlyReloader`] never calls one — see the module doc comment.
pub trait ObjectPatcher: Send + Sync {
    fn patch(&self, module_path: &Path) -> Result<(), ReloadError>;
}

/// An [`ObjectPatcher`] that does nothing, for hosts that only want
/// stale-marking and re-run scheduling without any live patching.
#[derive(Debug, Default)]
pub struct NullPatcher;

impl ObjectPatcher for NullPatcher {
    fn patch(&self, _module_path: &Path) -> Result<(), ReloadError> {
        Ok(())
    }
}

/// Tracks each watched module's last-seen mtime and detects changes
/// (spec.md §4.8 "detect modified file"). A module that previously failed
/// to reload stays sticky-failed for as long as its mtime matches the one
/// it failed at (spec.md §204's `failed?: mtime`) — retried only once the
/// file changes again.
pub struct StaleOnlyReloader {
    patcher: Box<dyn ObjectPatcher>,
    mtimes: HashMap<PathBuf, SystemTime>,
    /// The mtime a path last failed to reload at, plus the error message.
    sticky_failures: HashMap<PathBuf, (SystemTime, String)>,
}

impl StaleOnlyReloader {
    pub fn new(patcher: Box<dyn ObjectPatcher>) -> Self {
        Self {
            patcher,
            mtimes: HashMap::new(),
            sticky_failures: HashMap::new(),
        }
    }

    /// Register a module path to watch, capturing its current mtime as the
    /// baseline so the first [`Self::check`] doesn't report it as changed.
    pub fn track(&mut self, path: PathBuf) -> Result<(), ReloadError> {
        let mtime = mtime_of(&path)?;
        self.mtimes.insert(path, mtime);
        Ok(())
    }

    /// Re-stat every tracked path, updating the baseline and calling the
    /// configured [`ObjectPatcher`] for anything that changed. Retrying at
    /// the same mtime a path previously failed at is a no-op (spec.md
    /// §338); only a subsequent mtime change triggers another attempt.
    pub fn check(&mut self) -> ReloadReport {
        let mut report = ReloadReport::default();
        let paths: Vec<PathBuf> = self.mtimes.keys().cloned().collect();
        for path in paths {
            let current = match mtime_of(&path) {
                Ok(m) => m,
                Err(e) => {
                    report.failed.push((path.clone(), e.to_string()));
                    continue;
                }
            };
            let previous = self.mtimes.get(&path).copied();
            let failed_at_current = self.sticky_failures.get(&path).map(|(m, _)| *m) == Some(current);
            if previous == Some(current) || failed_at_current {
                continue;
            }
            match self.patcher.patch(&path) {
                Ok(()) => {
                    self.sticky_failures.remove(&path);
                    report.changed.push(path.clone());
                }
                Err(e) => {
                    self.sticky_failures.insert(path.clone(), (current, e.to_string()));
                    report.failed.push((path.clone(), e.to_string()));
                }
            }
            self.mtimes.insert(path, current);
        }
        report
    }

    pub fn is_stale(&self, path: &Path) -> bool {
        self.sticky_failures.contains_key(path)
    }
}

fn mtime_of(path: &Path) -> Result<SystemTime, ReloadError> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|source| ReloadError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct CountingPatcher(Arc<AtomicUsize>);
    impl ObjectPatcher for CountingPatcher {
        fn patch(&self, _module_path: &Path) -> Result<(), ReloadError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn unchanged_file_does_not_trigger_patch() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("m.py");
        fs::write(&file, "x = 1").unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let mut reloader = StaleOnlyReloader::new(Box::new(CountingPatcher(count.clone())));
        reloader.track(file).unwrap();

        let report = reloader.check();
        assert!(report.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn modified_file_triggers_patch_and_updates_baseline() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("m.py");
        fs::write(&file, "x = 1").unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let mut reloader = StaleOnlyReloader::new(Box::new(CountingPatcher(count.clone())));
        reloader.track(file.clone()).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&file, "x = 2").unwrap();

        let report = reloader.check();
        assert_eq!(report.changed, vec![file]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_patch_is_sticky_until_mtime_changes_again() {
        struct FlakyPatcher(Arc<AtomicUsize>);
        impl ObjectPatcher for FlakyPatcher {
            fn patch(&self, _module_path: &Path) -> Result<(), ReloadError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(ReloadError::ReloadFailed {
                    module: "m".into(),
                    message: "boom".into(),
                })
            }
        }

        let dir = TempDir::new().unwrap();
        let file = dir.path().join("m.py");
        fs::write(&file, "x = 1").unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let mut reloader = StaleOnlyReloader::new(Box::new(FlakyPatcher(count.clone())));
        reloader.track(file.clone()).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&file, "x = 2").unwrap();
        let first = reloader.check();
        assert_eq!(first.failed.len(), 1);
        assert!(reloader.is_stale(&file));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Same mtime: the patcher is not called again, and the path stays
        // sticky-failed rather than being cleared.
        let second = reloader.check();
        assert!(second.is_empty());
        assert!(reloader.is_stale(&file));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Only once the file's mtime advances again does it get retried.
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&file, "x = 3").unwrap();
        let third = reloader.check();
        assert_eq!(third.failed.len(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_patch_succeeds_once_mtime_changes_and_patcher_recovers() {
        struct FlakyPatcher(Arc<AtomicUsize>);
        impl ObjectPatcher for FlakyPatcher {
            fn patch(&self, _module_path: &Path) -> Result<(), ReloadError> {
                let n = self.0.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(ReloadError::ReloadFailed {
                        module: "m".into(),
                        message: "boom".into(),
                    })
                } else {
                    Ok(())
                }
            }
        }

        let dir = TempDir::new().unwrap();
        let file = dir.path().join("m.py");
        fs::write(&file, "x = 1").unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let mut reloader = StaleOnlyReloader::new(Box::new(FlakyPatcher(count.clone())));
        reloader.track(file.clone()).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&file, "x = 2").unwrap();
        let first = reloader.check();
        assert_eq!(first.failed.len(), 1);
        assert!(reloader.is_stale(&file));

        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&file, "x = 3").unwrap();
        let second = reloader.check();
        assert_eq!(second.changed, vec![file]);
        assert!(!reloader.is_stale(&file));
    }
}
