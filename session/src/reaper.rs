use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::paths::{StorePaths, fields};
use crate::store::{Query, ReplicatedStore, StoreError, tree};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// No activity for longer than the hard TTL
    Expired,
    /// Past the grace period with nobody active
    Abandoned,
}

/// Decides whether a raw session record should be deleted.
///
/// Missing timestamps count as epoch 0, so a record without them is always expired.
pub fn staleness(record: &Value, now_ms: i64, ttl_ms: i64, grace_ms: i64) -> Option<StaleReason> {
    let timestamp = |field: &str| record.get(field).and_then(Value::as_i64).unwrap_or(0);

    if now_ms - timestamp(fields::LAST_ACTIVITY_AT) > ttl_ms {
        return Some(StaleReason::Expired);
    }

    let any_active = record
        .get(fields::PLAYERS)
        .and_then(Value::as_object)
        .is_some_and(|players| {
            players
                .values()
                .any(|p| p.get(fields::ACTIVE).and_then(Value::as_bool) == Some(true))
        });
    if now_ms - timestamp(fields::CREATED_AT) > grace_ms && !any_active {
        return Some(StaleReason::Abandoned);
    }
    None
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReapReport {
    pub scanned: usize,
    pub deleted: Vec<(String, StaleReason)>,
    pub failures: usize,
}

/// Deletes stale sessions from a bounded scan of the oldest records
#[derive(Clone)]
pub struct SessionReaper {
    store: Arc<dyn ReplicatedStore>,
    clock: Arc<dyn Clock>,
    scan_limit: usize,
    ttl_ms: i64,
    grace_ms: i64,
}

impl SessionReaper {
    pub fn new(store: Arc<dyn ReplicatedStore>, clock: Arc<dyn Clock>, config: &SessionConfig) -> Self {
        Self {
            store,
            clock,
            scan_limit: config.reaper_scan_limit,
            ttl_ms: config.stale_session_ttl_ms,
            grace_ms: config.empty_session_grace_ms,
        }
    }

    /// One scan. Failures are logged and never abort the scan.
    pub async fn sweep(&self) -> ReapReport {
        let mut report = ReapReport::default();

        let query = Query::order_by_child(fields::CREATED_AT).limit_to_first(self.scan_limit);
        let sessions = match self.store.query(StorePaths::SESSIONS, &query).await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!("Stale session scan failed: {}", e);
                return report;
            }
        };
        let now = match self.store.server_time_ms().await {
            Ok(now) => now,
            Err(_) => self.clock.now_ms(),
        };

        for (session_id, record) in sessions {
            report.scanned += 1;
            let Some(reason) = staleness(&record, now, self.ttl_ms, self.grace_ms) else {
                continue;
            };
            match self.delete(&session_id).await {
                Ok(()) => {
                    debug!("Reaped session {} ({:?})", session_id, reason);
                    report.deleted.push((session_id, reason));
                }
                Err(e) => {
                    warn!("Failed to delete stale session {}: {}", session_id, e);
                    report.failures += 1;
                }
            }
        }

        if !report.deleted.is_empty() {
            info!("Reaped {} of {} scanned sessions", report.deleted.len(), report.scanned);
        }
        report
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        self.store.remove(&tree::join(StorePaths::SESSIONS, session_id)).await?;
        self.store.remove(&tree::join(StorePaths::DIRECTORY, session_id)).await
    }

    /// Runs a sweep in the background; the caller does not wait for it
    pub fn spawn_sweep(&self) -> JoinHandle<ReapReport> {
        let reaper = self.clone();
        tokio::spawn(async move { reaper.sweep().await })
    }

    /// Sweeps every `period` until cancelled
    pub async fn run(&self, period: Duration, cancellation_token: CancellationToken) {
        info!("Starting stale session reaper");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!("Stale session reaper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.sweep().await;
                }
            }
        }
    }
}
