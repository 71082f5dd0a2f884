//! Shared session store abstraction
//!
//! The race only needs four operations from the backing store: overwrite a
//! path, delete a path, and start or stop watching a path. All of them return
//! immediately. A watch delivers the current value once on registration and
//! then the new value after every write that touches the watched path.
//! Deliveries are queued on an unbounded channel and consumed by whoever owns
//! the receiver; nothing runs on the store's side of the channel.
//!
//! [`MemoryStore`] keeps the document in process. It is what two local
//! clients share in tests and in the single-process demo, and it can inject
//! duplicated and reordered deliveries to exercise the protocol.

use log::debug;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use shared::document::{paths_overlap, Document};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;

pub type WatchId = u64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is offline")]
    Offline,
    #[error("store connection closed")]
    Closed,
    #[error("failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A registered observer of one path.
#[derive(Debug)]
pub struct Watch {
    pub id: WatchId,
    /// `None` means nothing is stored at the path.
    pub updates: mpsc::UnboundedReceiver<Option<Value>>,
}

pub trait SessionStore: Send + Sync {
    fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Removing an absent path succeeds.
    fn delete(&self, path: &str) -> Result<(), StoreError>;

    fn watch(&self, path: &str) -> Result<Watch, StoreError>;

    /// Unknown ids are ignored.
    fn unwatch(&self, id: WatchId);
}

struct Watcher {
    path: String,
    tx: mpsc::UnboundedSender<Option<Value>>,
}

struct Chaos {
    rng: StdRng,
    duplicate: f64,
    reorder: f64,
    held: Vec<(WatchId, Option<Value>)>,
}

struct Inner {
    document: Document,
    watchers: HashMap<WatchId, Watcher>,
    next_watch_id: WatchId,
    offline: bool,
    writes: usize,
    deletes: HashMap<String, usize>,
    chaos: Option<Chaos>,
}

impl Inner {
    fn notify(&mut self, path: &str) {
        let deliveries: Vec<(WatchId, Option<Value>)> = self
            .watchers
            .iter()
            .filter(|(_, watcher)| paths_overlap(&watcher.path, path))
            .map(|(id, watcher)| (*id, self.document.get(&watcher.path).cloned()))
            .collect();
        self.dispatch(deliveries);
    }

    fn dispatch(&mut self, deliveries: Vec<(WatchId, Option<Value>)>) {
        let Some(chaos) = self.chaos.as_mut() else {
            for (id, value) in deliveries {
                deliver(&self.watchers, id, value);
            }
            return;
        };

        let released = std::mem::take(&mut chaos.held);
        for (id, value) in deliveries {
            if chaos.rng.gen_bool(chaos.reorder) {
                chaos.held.push((id, value));
                continue;
            }
            if chaos.rng.gen_bool(chaos.duplicate) {
                deliver(&self.watchers, id, value.clone());
            }
            deliver(&self.watchers, id, value);
        }
        // held deliveries land after fresher ones
        for (id, value) in released {
            deliver(&self.watchers, id, value);
        }
    }
}

fn deliver(watchers: &HashMap<WatchId, Watcher>, id: WatchId, value: Option<Value>) {
    if let Some(watcher) = watchers.get(&id) {
        if watcher.tx.send(value).is_err() {
            debug!("Watch {} receiver dropped", id);
        }
    }
}

/// In-process [`SessionStore`] over a [`Document`].
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                document: Document::new(),
                watchers: HashMap::new(),
                next_watch_id: 1,
                offline: false,
                writes: 0,
                deletes: HashMap::new(),
                chaos: None,
            }),
        }
    }

    /// Delivers some notifications twice and holds some back until after
    /// the next write, both decided by a seeded generator.
    pub fn with_chaos(seed: u64, duplicate: f64, reorder: f64) -> Self {
        let store = Self::new();
        store.inner.lock().chaos = Some(Chaos {
            rng: StdRng::seed_from_u64(seed),
            duplicate: duplicate.clamp(0.0, 1.0),
            reorder: reorder.clamp(0.0, 1.0),
            held: Vec::new(),
        });
        store
    }

    /// While offline every operation fails with [`StoreError::Offline`].
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        self.inner.lock().document.get(path).cloned()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Number of accepted delete calls on exactly `path`.
    pub fn delete_count(&self, path: &str) -> usize {
        self.inner
            .lock()
            .deletes
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub fn write_count(&self) -> usize {
        self.inner.lock().writes
    }

    pub fn watcher_count(&self) -> usize {
        self.inner.lock().watchers.len()
    }

    /// Releases deliveries held back by chaos mode.
    pub fn flush(&self) {
        self.inner.lock().dispatch(Vec::new());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for MemoryStore {
    fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.offline {
            return Err(StoreError::Offline);
        }
        inner.document.set(path, value);
        inner.writes += 1;
        inner.notify(path);
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.offline {
            return Err(StoreError::Offline);
        }
        *inner.deletes.entry(path.to_string()).or_insert(0) += 1;
        if inner.document.delete(path) {
            inner.notify(path);
        }
        Ok(())
    }

    fn watch(&self, path: &str) -> Result<Watch, StoreError> {
        let mut inner = self.inner.lock();
        if inner.offline {
            return Err(StoreError::Offline);
        }
        let id = inner.next_watch_id;
        inner.next_watch_id += 1;

        let (tx, updates) = mpsc::unbounded_channel();
        let current = inner.document.get(path).cloned();
        if tx.send(current).is_err() {
            debug!("Watch {} receiver dropped", id);
        }
        inner.watchers.insert(
            id,
            Watcher {
                path: path.to_string(),
                tx,
            },
        );
        Ok(Watch { id, updates })
    }

    fn unwatch(&self, id: WatchId) {
        self.inner.lock().watchers.remove(&id);
    }
}
