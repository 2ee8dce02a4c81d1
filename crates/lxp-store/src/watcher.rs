//! Filesystem watcher that invalidates bucket caches.
//!
//! One background thread per store receives `notify` events over a channel
//! and tells the bucket owning the changed directory to drop its cache and
//! memoised listing. Watches are non-recursive: bucket contents are flat.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::StoreResult;

/// Something whose cached view of a directory can be thrown away.
pub trait CacheInvalidation: Send + Sync {
    fn invalidate_cache(&self);
}

enum WatchMessage {
    Fs(notify::Result<notify::Event>),
    Shutdown,
}

type Targets = Arc<Mutex<HashMap<PathBuf, Weak<dyn CacheInvalidation>>>>;

/// Background filesystem monitor shared by all buckets of a store.
pub struct Watcher {
    backend: Mutex<RecommendedWatcher>,
    targets: Targets,
    tx: Sender<WatchMessage>,
    thread: Option<JoinHandle<()>>,
    dispatched: Arc<AtomicU64>,
}

impl Watcher {
    /// Start the backend and its delivery thread.
    pub fn start() -> StoreResult<Self> {
        let (tx, rx) = mpsc::channel();
        let event_tx = tx.clone();
        let backend = notify::recommended_watcher(move |res| {
            // The receiver only goes away during shutdown.
            let _ = event_tx.send(WatchMessage::Fs(res));
        })?;

        let targets: Targets = Arc::new(Mutex::new(HashMap::new()));
        let dispatched = Arc::new(AtomicU64::new(0));
        let thread = {
            let targets = targets.clone();
            let dispatched = dispatched.clone();
            thread::Builder::new()
                .name("lxp-watcher".into())
                .spawn(move || run(rx, targets, dispatched))?
        };

        debug!("watcher started");
        Ok(Self {
            backend: Mutex::new(backend),
            targets,
            tx,
            thread: Some(thread),
            dispatched,
        })
    }

    /// Subscribe to changes directly under `dir`.
    pub fn watch(&self, dir: &Path, target: Weak<dyn CacheInvalidation>) -> StoreResult<()> {
        self.backend.lock().watch(dir, RecursiveMode::NonRecursive)?;
        self.targets.lock().insert(dir.to_path_buf(), target);
        debug!(dir = %dir.display(), "watching");
        Ok(())
    }

    /// Drop the subscription for `dir`. Unknown directories are ignored.
    pub fn unwatch(&self, dir: &Path) {
        if self.targets.lock().remove(dir).is_some() {
            if let Err(e) = self.backend.lock().unwatch(dir) {
                debug!(dir = %dir.display(), error = %e, "unwatch failed");
            }
        }
    }

    /// Number of invalidations delivered so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Acquire)
    }

    pub fn watched(&self) -> usize {
        self.targets.lock().len()
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        let _ = self.tx.send(WatchMessage::Shutdown);
        if let Some(handle) = self.thread.take() {
            // The last handle can be released on the watcher thread itself.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn run(rx: Receiver<WatchMessage>, targets: Targets, dispatched: Arc<AtomicU64>) {
    while let Ok(message) = rx.recv() {
        let event = match message {
            WatchMessage::Shutdown => break,
            WatchMessage::Fs(Err(e)) => {
                warn!(error = %e, "watch error");
                continue;
            }
            WatchMessage::Fs(Ok(event)) => event,
        };
        if matches!(event.kind, EventKind::Access(_)) {
            continue;
        }
        for path in &event.paths {
            let target = {
                let targets = targets.lock();
                targets
                    .get(path.as_path())
                    .or_else(|| path.parent().and_then(|p| targets.get(p)))
                    .and_then(Weak::upgrade)
            };
            if let Some(target) = target {
                target.invalidate_cache();
                dispatched.fetch_add(1, Ordering::Release);
            }
        }
    }
    debug!("watcher stopped");
}
