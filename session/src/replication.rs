use std::sync::Arc;

use common::{Color, NormalizedPoint, PlayerId, PlayerMode, PlayerState, SessionId};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::error::SessionError;
use crate::paths::StorePaths;
use crate::store::{ChildEvent, ChildSubscription, ReplicatedStore};

/// Partial player-state write. Fields left as `None` are not touched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStatePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub norm_x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub norm_y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<PlayerMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ink: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
}

impl PlayerStatePatch {
    /// Position-only patch, used for the first spawn correction
    pub fn position(point: NormalizedPoint) -> Self {
        Self { norm_x: Some(point.x), norm_y: Some(point.y), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerUpdate {
    /// A player's state was added or changed. Inactive states are forwarded as-is.
    Changed { player_id: PlayerId, state: PlayerState },
    Removed { player_id: PlayerId },
}

/// Publishes the local player's state and observes everyone's
pub struct StateChannel {
    store: Arc<dyn ReplicatedStore>,
    session_id: SessionId,
    player_id: PlayerId,
}

impl StateChannel {
    pub fn new(store: Arc<dyn ReplicatedStore>, session_id: SessionId, player_id: PlayerId) -> Self {
        Self { store, session_id, player_id }
    }

    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    /// Overwrites the local player's node
    pub async fn publish_full(&self, state: &PlayerState) -> Result<(), SessionError> {
        let node = serde_json::to_value(state).map_err(|e| SessionError::WriteFailed(e.to_string()))?;
        self.store
            .set(&StorePaths::player(&self.session_id, &self.player_id), node)
            .await?;
        Ok(())
    }

    /// Merge-writes only the fields set in `patch`
    pub async fn publish_partial(&self, patch: &PlayerStatePatch) -> Result<(), SessionError> {
        if patch.is_empty() {
            return Ok(());
        }
        let fields = match serde_json::to_value(patch) {
            Ok(Value::Object(fields)) => fields,
            Ok(_) => return Ok(()),
            Err(e) => return Err(SessionError::WriteFailed(e.to_string())),
        };
        self.store
            .update(&StorePaths::player(&self.session_id, &self.player_id), fields)
            .await?;
        Ok(())
    }

    /// Snapshot of every player as `Changed`, then live updates
    pub async fn subscribe(&self) -> Result<PlayerStateSubscription, SessionError> {
        let players = ChildSubscription::open(self.store.as_ref(), &StorePaths::players(&self.session_id), None).await?;
        Ok(PlayerStateSubscription { players, dropped_records: 0 })
    }
}

pub struct PlayerStateSubscription {
    players: ChildSubscription,
    dropped_records: u64,
}

impl PlayerStateSubscription {
    /// Next player update. Malformed player nodes are logged and skipped.
    pub async fn next(&mut self) -> Result<PlayerUpdate, SessionError> {
        loop {
            let (key, value) = match self.players.next().await? {
                ChildEvent::Removed { key, .. } => {
                    return Ok(PlayerUpdate::Removed { player_id: PlayerId::from_key(&key) });
                }
                ChildEvent::Added { key, value } | ChildEvent::Changed { key, value } => (key, value),
            };
            match serde_json::from_value::<PlayerState>(value) {
                Ok(state) => return Ok(PlayerUpdate::Changed { player_id: PlayerId::from_key(&key), state }),
                Err(e) => {
                    self.dropped_records += 1;
                    warn!(
                        "Dropping malformed state for {} in {}: {}",
                        key,
                        self.players.path(),
                        SessionError::ParseFailed(e.to_string())
                    );
                }
            }
        }
    }

    /// Player nodes skipped because they did not parse
    pub fn dropped_records(&self) -> u64 {
        self.dropped_records
    }

    pub fn cancel(&self) {
        self.players.cancel();
    }
}
