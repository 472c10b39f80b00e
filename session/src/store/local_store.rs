use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::tree;
use super::{Query, ReplicatedStore, StoreError, WATCH_BUFFER, push_key};
use crate::clock::{Clock, SystemClock};

/// In-process replicated store for single-process play and tests.
///
/// Every write publishes a fresh snapshot of the whole tree; each watcher
/// projects the snapshot onto its own path and forwards it only when its
/// projection changed.
pub struct LocalStore {
    root: Mutex<Value>,
    snapshots: watch::Sender<Arc<Value>>,
    clock: Arc<dyn Clock>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (snapshots, _) = watch::channel(Arc::new(Value::Null));
        Self {
            root: Mutex::new(Value::Null),
            snapshots,
            clock,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Makes every one-shot read fail until switched off
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every write fail until switched off
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Copy of the whole tree
    pub fn dump(&self) -> Value {
        self.lock_root().clone()
    }

    fn lock_root(&self) -> std::sync::MutexGuard<'_, Value> {
        // A panic while holding the lock leaves a tree that is still valid JSON.
        self.root.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_read(&self, path: &str) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::read(path, "reads are failing"));
        }
        Ok(())
    }

    fn mutate<R>(&self, path: &str, apply: impl FnOnce(&mut Value, i64) -> R) -> Result<R, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::write(path, "writes are failing"));
        }
        let now = self.clock.now_ms();
        let (result, snapshot) = {
            let mut root = self.lock_root();
            let result = apply(&mut root, now);
            (result, Arc::new(root.clone()))
        };
        self.snapshots.send_replace(snapshot);
        Ok(result)
    }
}

#[async_trait]
impl ReplicatedStore for LocalStore {
    async fn set(&self, path: &str, mut value: Value) -> Result<(), StoreError> {
        self.mutate(path, |root, now| {
            tree::resolve_server_values(&mut value, now);
            tree::set(root, path, value);
        })
    }

    async fn update(&self, path: &str, mut fields: Map<String, Value>) -> Result<(), StoreError> {
        self.mutate(path, |root, now| {
            for value in fields.values_mut() {
                tree::resolve_server_values(value, now);
            }
            tree::merge(root, path, fields);
        })
    }

    async fn increment(&self, path: &str, delta: i64) -> Result<i64, StoreError> {
        self.mutate(path, |root, _| tree::increment(root, path, delta))
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        self.check_read(path)?;
        Ok(tree::get(&self.lock_root(), path).cloned())
    }

    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError> {
        let key = push_key(self.clock.now_ms());
        self.set(&tree::join(path, &key), value).await?;
        Ok(key)
    }

    async fn server_time_ms(&self) -> Result<i64, StoreError> {
        Ok(self.clock.now_ms())
    }

    async fn watch(
        &self,
        path: &str,
        query: Option<Query>,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Option<Value>>, StoreError> {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        // Subscribe before reading so that a write in between still wakes the watcher
        let mut snapshots = self.snapshots.subscribe();
        let mut last: Option<Value> = {
            let root = self.lock_root();
            tree::project(Some(&*root), &tree::segments(path), query.as_ref())
        };
        let path = path.to_string();

        tokio::spawn(async move {
            let owned: Vec<String> = tree::segments(&path).into_iter().map(String::from).collect();
            let segs: Vec<&str> = owned.iter().map(String::as_str).collect();

            if tx.send(last.clone()).await.is_err() {
                return;
            }
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = snapshots.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let current = {
                    let root = snapshots.borrow_and_update();
                    tree::project(Some(&**root), &segs, query.as_ref())
                };
                if current != last {
                    if tx.send(current.clone()).await.is_err() {
                        break;
                    }
                    last = current;
                }
            }
            debug!("Watch on '{}' detached", path);
        });

        Ok(rx)
    }
}
