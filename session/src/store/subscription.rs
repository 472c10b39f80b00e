use std::collections::{BTreeMap, VecDeque};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Query, ReplicatedStore, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub enum ChildEvent {
    Added { key: String, value: Value },
    Changed { key: String, value: Value },
    Removed { key: String, value: Value },
}

impl ChildEvent {
    pub fn key(&self) -> &str {
        match self {
            ChildEvent::Added { key, .. }
            | ChildEvent::Changed { key, .. }
            | ChildEvent::Removed { key, .. } => key,
        }
    }
}

/// Snapshot feed that detaches from the store when dropped
struct Feed {
    path: String,
    rx: mpsc::Receiver<Option<Value>>,
    cancel: CancellationToken,
}

impl Feed {
    async fn open(store: &dyn ReplicatedStore, path: &str, query: Option<Query>) -> Result<Self, StoreError> {
        let cancel = CancellationToken::new();
        let rx = store.watch(path, query, cancel.clone()).await?;
        Ok(Self { path: path.to_string(), rx, cancel })
    }

    async fn next(&mut self) -> Result<Option<Value>, StoreError> {
        if self.cancel.is_cancelled() {
            return Err(StoreError::SubscriptionCancelled(self.path.clone()));
        }
        self.rx
            .recv()
            .await
            .ok_or_else(|| StoreError::SubscriptionCancelled(self.path.clone()))
    }
}

impl Drop for Feed {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Fires with the initial value at a path and again on every change
pub struct ValueSubscription {
    feed: Feed,
}

impl ValueSubscription {
    pub async fn open(store: &dyn ReplicatedStore, path: &str) -> Result<Self, StoreError> {
        Ok(Self { feed: Feed::open(store, path, None).await? })
    }

    pub async fn next(&mut self) -> Result<Option<Value>, StoreError> {
        self.feed.next().await
    }

    pub fn path(&self) -> &str {
        &self.feed.path
    }

    pub fn cancel(&self) {
        self.feed.cancel.cancel();
    }
}

/// Delivers one `Added` per existing child, then live added/changed/removed events
pub struct ChildSubscription {
    feed: Feed,
    known: BTreeMap<String, Value>,
    pending: VecDeque<ChildEvent>,
}

impl ChildSubscription {
    pub async fn open(
        store: &dyn ReplicatedStore,
        path: &str,
        query: Option<Query>,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            feed: Feed::open(store, path, query).await?,
            known: BTreeMap::new(),
            pending: VecDeque::new(),
        })
    }

    pub async fn next(&mut self) -> Result<ChildEvent, StoreError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }
            let snapshot = self.feed.next().await?;
            let events = diff_children(&mut self.known, snapshot);
            self.pending.extend(events);
        }
    }

    /// Children as of the last delivered snapshot
    pub fn children(&self) -> &BTreeMap<String, Value> {
        &self.known
    }

    pub fn path(&self) -> &str {
        &self.feed.path
    }

    pub fn cancel(&self) {
        self.feed.cancel.cancel();
    }
}

/// Brings `known` up to `snapshot` and returns the child events that describe the step
pub(crate) fn diff_children(known: &mut BTreeMap<String, Value>, snapshot: Option<Value>) -> Vec<ChildEvent> {
    let next: BTreeMap<String, Value> = match snapshot {
        Some(Value::Object(map)) => map.into_iter().collect(),
        _ => BTreeMap::new(),
    };

    let mut events = Vec::new();
    for (key, value) in known.iter() {
        if !next.contains_key(key) {
            events.push(ChildEvent::Removed { key: key.clone(), value: value.clone() });
        }
    }
    for (key, value) in next.iter() {
        match known.get(key) {
            None => events.push(ChildEvent::Added { key: key.clone(), value: value.clone() }),
            Some(previous) if previous != value => {
                events.push(ChildEvent::Changed { key: key.clone(), value: value.clone() })
            }
            Some(_) => {}
        }
    }

    *known = next;
    events
}
