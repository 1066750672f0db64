//! Device presence monitoring.
//!
//! One polling thread per watched path reports attach and removal. Monitors
//! are independent of the listener registry and keyed by path.

use crate::config::Config;
use crate::error::{Result, SerialError};
use crate::listener::{PresenceCallback, Waker};
use crate::platform::{native, TerminalDriver};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_CAPACITY: usize = 1024;

struct Watcher {
    descriptor: RawFd,
    thread: JoinHandle<()>,
    waker: Arc<Waker>,
    cancel: Arc<AtomicBool>,
}

enum Entry {
    Starting,
    Running(Watcher),
}

/// Watches device paths for presence changes.
pub struct PortMonitor {
    capacity: usize,
    interval: Duration,
    entries: Mutex<HashMap<PathBuf, Entry>>,
}

impl Default for PortMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_POLL_INTERVAL)
    }
}

impl PortMonitor {
    pub fn new(capacity: usize, interval: Duration) -> Self {
        Self {
            capacity,
            interval,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.monitor.capacity,
            Duration::from_millis(config.monitor.poll_interval_ms),
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn poll_interval(&self) -> Duration {
        self.interval
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_monitoring(&self, path: impl AsRef<Path>) -> bool {
        self.entries.lock().contains_key(path.as_ref())
    }

    /// Descriptor recorded when `path` was registered.
    pub fn descriptor(&self, path: impl AsRef<Path>) -> Option<RawFd> {
        match self.entries.lock().get(path.as_ref())? {
            Entry::Running(watcher) => Some(watcher.descriptor),
            Entry::Starting => None,
        }
    }

    /// Start watching `path`.
    ///
    /// The current presence is sampled before this returns; `callback` only
    /// sees transitions after that. A second registration for the same path
    /// fails with [`SerialError::AlreadyRegistered`].
    pub fn register(
        &self,
        descriptor: RawFd,
        path: impl AsRef<Path>,
        callback: impl PresenceCallback,
    ) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        {
            let mut entries = self.entries.lock();
            if entries.contains_key(&path) {
                return Err(SerialError::AlreadyRegistered {
                    key: path.display().to_string(),
                });
            }
            if entries.len() >= self.capacity {
                warn!(path = %path.display(), capacity = self.capacity, "port monitor full");
                return Err(SerialError::CapacityExceeded {
                    capacity: self.capacity,
                });
            }
            entries.insert(path.clone(), Entry::Starting);
        }

        match self.spawn(descriptor, &path, Arc::new(callback)) {
            Ok(watcher) => {
                self.entries.lock().insert(path.clone(), Entry::Running(watcher));
                info!(fd = descriptor, path = %path.display(), "monitoring device presence");
                Ok(())
            }
            Err(err) => {
                self.entries.lock().remove(&path);
                Err(err)
            }
        }
    }

    fn spawn(
        &self,
        descriptor: RawFd,
        path: &Path,
        callback: Arc<dyn PresenceCallback>,
    ) -> Result<Watcher> {
        let cancel = Arc::new(AtomicBool::new(false));
        let (ready, armed) = mpsc::sync_channel(1);
        let interval = self.interval;
        let thread_cancel = Arc::clone(&cancel);
        let thread_path = path.to_path_buf();

        let thread = thread::Builder::new()
            .name(format!("serial-monitor-{descriptor}"))
            .spawn(move || {
                let waker = match Waker::new() {
                    Ok(waker) => Arc::new(waker),
                    Err(err) => {
                        let _ = ready.send(Err(err));
                        return;
                    }
                };
                let present = native().device_present(&thread_path);
                if ready.send(Ok(Arc::clone(&waker))).is_err() {
                    return;
                }
                watch(&thread_path, present, &waker, &thread_cancel, interval, &*callback);
            })
            .map_err(|err| {
                error!(path = %path.display(), error = %err, "spawning monitor thread failed");
                SerialError::lifecycle("spawn")
            })?;

        match armed.recv() {
            Ok(Ok(waker)) => Ok(Watcher {
                descriptor,
                thread,
                waker,
                cancel,
            }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(SerialError::lifecycle("start"))
            }
        }
    }

    /// Stop watching `path`.
    pub fn unregister(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let watcher = {
            let mut entries = self.entries.lock();
            match entries.remove(path) {
                Some(Entry::Running(watcher)) => watcher,
                Some(Entry::Starting) => {
                    entries.insert(path.to_path_buf(), Entry::Starting);
                    return Err(SerialError::lifecycle("stop"));
                }
                None => {
                    return Err(SerialError::NotRegistered {
                        key: path.display().to_string(),
                    })
                }
            }
        };
        stop(path, watcher)
    }

    /// Stop every monitor.
    pub fn shutdown(&self) {
        let watchers: Vec<(PathBuf, Watcher)> = {
            let mut entries = self.entries.lock();
            let running: Vec<PathBuf> = entries
                .iter()
                .filter(|(_, entry)| matches!(entry, Entry::Running(_)))
                .map(|(path, _)| path.clone())
                .collect();
            running
                .into_iter()
                .filter_map(|path| match entries.remove(&path) {
                    Some(Entry::Running(watcher)) => Some((path, watcher)),
                    _ => None,
                })
                .collect()
        };
        for (path, watcher) in watchers {
            if let Err(err) = stop(&path, watcher) {
                warn!(path = %path.display(), error = %err, "stopping monitor during shutdown failed");
            }
        }
    }
}

fn stop(path: &Path, watcher: Watcher) -> Result<()> {
    watcher.cancel.store(true, Ordering::Release);
    watcher.waker.wake()?;
    watcher
        .thread
        .join()
        .map_err(|_| SerialError::lifecycle("join"))?;
    debug!(path = %path.display(), "monitor stopped");
    Ok(())
}

fn watch(
    path: &Path,
    mut present: bool,
    waker: &Waker,
    cancel: &AtomicBool,
    interval: Duration,
    callback: &dyn PresenceCallback,
) {
    debug!(path = %path.display(), present, "monitor running");
    while !cancel.load(Ordering::Acquire) {
        match waker.wait(Some(interval)) {
            Ok(true) => {
                waker.reset();
                continue;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(path = %path.display(), error = %err, "monitor wait failed, exiting");
                return;
            }
        }
        let now = native().device_present(path);
        if now != present {
            info!(path = %path.display(), present = now, "device presence changed");
            callback.on_presence_changed(now);
            present = now;
        }
    }
}

impl fmt::Debug for PortMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortMonitor")
            .field("capacity", &self.capacity)
            .field("interval", &self.interval)
            .field("watching", &self.len())
            .finish()
    }
}

impl Drop for PortMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = PortMonitor::new(1, Duration::from_millis(10));
        monitor.register(3, dir.path().join("a"), |_: bool| {}).unwrap();
        assert_eq!(
            monitor
                .register(4, dir.path().join("b"), |_: bool| {})
                .unwrap_err(),
            SerialError::CapacityExceeded { capacity: 1 }
        );
        assert_eq!(monitor.descriptor(dir.path().join("a")), Some(3));
    }

    #[test]
    fn test_unregister_unknown_path() {
        let monitor = PortMonitor::default();
        assert!(matches!(
            monitor.unregister("/dev/ttyNOPE"),
            Err(SerialError::NotRegistered { .. })
        ));
    }
}
