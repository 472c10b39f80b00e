//! Check-then-act decisions that a store without transactions can only approximate.
//!
//! Joining a session and latching a rematch both read shared state, decide, and
//! then write. Keeping them behind [`ConsistencyPolicy`] lets a backend with
//! compare-and-swap tighten them without touching the components that call them.

use async_trait::async_trait;
use common::{PlayerId, PlayerState, SessionId, SessionSettings};
use serde_json::Value;
use tracing::{debug, warn};

use crate::directory::read_session;
use crate::error::SessionError;
use crate::paths::{StorePaths, fields};
use crate::store::ReplicatedStore;

/// Result of a successful slot claim
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedSlot {
    pub player_id: PlayerId,
    /// Settings as read from the live record
    pub settings: SessionSettings,
    /// `playerCount` after the claim
    pub player_count: i64,
}

#[async_trait]
pub trait ConsistencyPolicy: Send + Sync {
    /// Re-reads the live session and writes `state` into a free player slot
    async fn claim_slot(
        &self,
        store: &dyn ReplicatedStore,
        session: &SessionId,
        state: &PlayerState,
        capacity: usize,
    ) -> Result<ClaimedSlot, SessionError>;

    /// Marks the rematch decision as made
    async fn latch_rematch(&self, store: &dyn ReplicatedStore, session: &SessionId) -> Result<(), SessionError>;
}

/// Last-write-wins policy. Two joiners that both read a single player can both
/// claim `player1`; the later write wins the slot and `playerCount` is bumped twice.
#[derive(Debug, Default, Clone, Copy)]
pub struct BestEffort;

#[async_trait]
impl ConsistencyPolicy for BestEffort {
    async fn claim_slot(
        &self,
        store: &dyn ReplicatedStore,
        session: &SessionId,
        state: &PlayerState,
        capacity: usize,
    ) -> Result<ClaimedSlot, SessionError> {
        let record = read_session(store, session).await?;
        if record.started {
            return Err(SessionError::AlreadyStarted(session.to_string()));
        }
        if record.live_player_count() >= capacity {
            return Err(SessionError::SessionFull(session.to_string()));
        }
        let player_id = record
            .next_free_slot(capacity)
            .ok_or_else(|| SessionError::SessionFull(session.to_string()))?;

        let node = serde_json::to_value(state).map_err(|e| SessionError::WriteFailed(e.to_string()))?;
        let player_path = StorePaths::player(session, &player_id);
        store.set(&player_path, node).await?;
        let player_count = match store.increment(&StorePaths::field(session, fields::PLAYER_COUNT), 1).await {
            Ok(count) => count,
            Err(e) => {
                // A slot stays claimed only together with its playerCount bump
                if let Err(cleanup) = store.remove(&player_path).await {
                    warn!("Failed to release {} in session {}: {}", player_id, session, cleanup);
                }
                return Err(e.into());
            }
        };
        debug!("Claimed {} in session {} ({} players)", player_id, session, player_count);

        Ok(ClaimedSlot { player_id, settings: record.settings(), player_count })
    }

    async fn latch_rematch(&self, store: &dyn ReplicatedStore, session: &SessionId) -> Result<(), SessionError> {
        store
            .set(&StorePaths::rematch_in_progress(session), Value::Bool(true))
            .await?;
        Ok(())
    }
}
