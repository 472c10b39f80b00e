//! Replicated key/value tree consumed by every session component.
//!
//! The store is the only medium clients share. It offers point writes,
//! multi-field merge-writes, atomic increments, one-shot reads and snapshot
//! feeds; [`ValueSubscription`] and [`ChildSubscription`] turn a feed into the
//! listener shapes the components use.

mod local_store;
mod query;
mod redis_store;
mod subscription;
pub mod tree;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use local_store::LocalStore;
pub use query::{Limit, Query};
pub use redis_store::RedisStore;
pub use subscription::{ChildEvent, ChildSubscription, ValueSubscription};

/// Capacity of a snapshot feed before the producer waits on the consumer
pub const WATCH_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("write to '{path}' failed: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("read of '{path}' failed: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("subscription on '{0}' was cancelled")]
    SubscriptionCancelled(String),

    #[error("malformed record at '{path}': {reason}")]
    ParseFailed { path: String, reason: String },

    #[error("unsupported store operation: {0}")]
    Unsupported(String),
}

impl StoreError {
    pub fn write(path: &str, reason: impl ToString) -> Self {
        StoreError::WriteFailed { path: path.to_string(), reason: reason.to_string() }
    }

    pub fn read(path: &str, reason: impl ToString) -> Self {
        StoreError::ReadFailed { path: path.to_string(), reason: reason.to_string() }
    }

    pub fn parse(path: &str, reason: impl ToString) -> Self {
        StoreError::ParseFailed { path: path.to_string(), reason: reason.to_string() }
    }
}

/// Placeholder the store replaces with its own clock when the value is written
pub fn server_timestamp() -> Value {
    let mut placeholder = Map::new();
    placeholder.insert(tree::SERVER_VALUE_KEY.to_string(), Value::from("timestamp"));
    Value::Object(placeholder)
}

/// Child key for an appended value. Keys sort by creation time.
pub fn push_key(now_ms: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{:013}-{}", now_ms.max(0), &suffix[..12])
}

#[async_trait]
pub trait ReplicatedStore: Send + Sync {
    /// Overwrites the node at `path`. Writing `null` deletes it.
    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Merge-writes the given fields below `path`, leaving the other children untouched
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError>;

    /// Atomically adds `delta` to the integer at `path` and returns the new value
    async fn increment(&self, path: &str, delta: i64) -> Result<i64, StoreError>;

    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.set(path, Value::Null).await
    }

    /// Appends `value` under a generated, time-ordered child key
    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError>;

    async fn query(&self, path: &str, query: &Query) -> Result<Vec<(String, Value)>, StoreError> {
        let node = self.get(path).await?;
        Ok(query.apply(node.as_ref()))
    }

    /// Current time on the store's clock, in epoch milliseconds
    async fn server_time_ms(&self) -> Result<i64, StoreError>;

    /// Feed of snapshots of `path`, starting with the current value.
    /// The feed ends once `cancel` fires.
    async fn watch(
        &self,
        path: &str,
        query: Option<Query>,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Option<Value>>, StoreError>;
}
