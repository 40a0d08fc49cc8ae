//! Modification-time polling for hot reload.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crate::registry::ServiceMetadata;
use crate::types::{Error, Result};

/// Polls a fixed set of files and reports modification-time changes.
#[derive(Debug)]
pub struct FileWatcher {
    interval: Duration,
    seen: BTreeMap<PathBuf, Option<SystemTime>>,
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

impl FileWatcher {
    /// Watch `paths`, recording their current modification times as the
    /// baseline.
    pub fn new(paths: impl IntoIterator<Item = PathBuf>, interval: Duration) -> Self {
        let seen = paths
            .into_iter()
            .map(|path| {
                let mtime = modified(&path);
                (path, mtime)
            })
            .collect();
        Self { interval, seen }
    }

    /// Watch the source files of `services` plus the running executable.
    pub fn for_services(services: &[Arc<ServiceMetadata>], interval: Duration) -> Self {
        let mut paths: Vec<PathBuf> = services
            .iter()
            .filter_map(|svc| svc.source_file.clone())
            .collect();
        match std::env::current_exe() {
            Ok(exe) => paths.push(exe),
            Err(e) => tracing::warn!(error = %e, "cannot locate running executable, not watching it"),
        }
        Self::new(paths, interval)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.seen.keys().cloned().collect()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stat every path once and return those whose modification time moved.
    ///
    /// A path that cannot be stat'ed keeps its previous baseline and is
    /// retried on the next call.
    pub fn check_once(&mut self) -> Vec<PathBuf> {
        let mut changed = Vec::new();
        for (path, last) in self.seen.iter_mut() {
            let Some(now) = modified(path) else {
                continue;
            };
            if matches!(*last, Some(previous) if previous != now) {
                changed.push(path.clone());
            }
            *last = Some(now);
        }
        changed
    }

    /// Poll on a background thread until a change is seen, then call
    /// `on_change` once with the changed paths.
    pub fn spawn<F>(mut self, on_change: F) -> Result<WatcherHandle>
    where
        F: FnOnce(Vec<PathBuf>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        tracing::info!(files = self.seen.len(), interval = ?self.interval, "watching for changes");
        let thread = thread::Builder::new()
            .name("file-watcher".to_string())
            .spawn(move || {
                while !flag.load(Ordering::SeqCst) {
                    thread::sleep(self.interval);
                    let changed = self.check_once();
                    if !changed.is_empty() {
                        tracing::info!(files = ?changed, "change detected");
                        on_change(changed);
                        return;
                    }
                }
            })
            .map_err(Error::from)?;
        Ok(WatcherHandle {
            stop,
            thread: Some(thread),
        })
    }
}

/// Handle to a running watcher thread.
#[derive(Debug)]
pub struct WatcherHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Stop polling. The thread exits after its current sleep.
    pub fn cancel(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.thread.take();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

/// Replace the current process with a fresh run of the same executable and
/// arguments. Only returns on failure.
pub fn restart_process() -> Error {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => return Error::from(e),
    };
    let args: Vec<_> = std::env::args_os().skip(1).collect();
    tracing::info!(exe = %exe.display(), "restarting");

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        Error::from(std::process::Command::new(&exe).args(&args).exec())
    }
    #[cfg(not(unix))]
    {
        match std::process::Command::new(&exe).args(&args).spawn() {
            Ok(_) => std::process::exit(0),
            Err(e) => Error::from(e),
        }
    }
}
