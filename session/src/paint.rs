use std::sync::Arc;

use common::{Color, NormalizedPoint, PaintEvent, PlayerId, SessionId};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::paths::{StorePaths, fields};
use crate::store::{ChildEvent, ChildSubscription, Query, ReplicatedStore, server_timestamp};

/// Append-only paint log of one session
pub struct PaintStream {
    store: Arc<dyn ReplicatedStore>,
    session_id: SessionId,
    player_id: PlayerId,
}

impl PaintStream {
    pub fn new(store: Arc<dyn ReplicatedStore>, session_id: SessionId, player_id: PlayerId) -> Self {
        Self { store, session_id, player_id }
    }

    /// Appends a paint event and returns its key.
    /// Without normalized coordinates nothing is sent.
    pub async fn publish(&self, color: Color, point: Option<NormalizedPoint>) -> Result<Option<String>, SessionError> {
        let Some(point) = point else {
            debug!("Skipping paint event without normalized coordinates");
            return Ok(None);
        };
        let event = json!({
            "color": color,
            "timestamp": server_timestamp(),
            "player": self.player_id,
            "normalizedX": point.x,
            "normalizedY": point.y,
        });
        let key = self.store.push(&StorePaths::paint(&self.session_id), event).await?;
        Ok(Some(key))
    }

    /// Events stamped at or after the store's current time, excluding this player's own
    pub async fn subscribe_from_now(&self) -> Result<PaintSubscription, SessionError> {
        let now = self.store.server_time_ms().await?;
        let query = Query::order_by_child(fields::TIMESTAMP).start_at(now);
        let events = ChildSubscription::open(self.store.as_ref(), &StorePaths::paint(&self.session_id), Some(query)).await?;
        Ok(PaintSubscription { events, local_player: self.player_id.clone() })
    }

    /// Drops the whole log
    pub async fn clear(&self) -> Result<(), SessionError> {
        self.store.remove(&StorePaths::paint(&self.session_id)).await?;
        Ok(())
    }
}

pub struct PaintSubscription {
    events: ChildSubscription,
    local_player: PlayerId,
}

impl PaintSubscription {
    /// Next paint event from another player
    pub async fn next(&mut self) -> Result<PaintEvent, SessionError> {
        loop {
            let ChildEvent::Added { key, value } = self.events.next().await? else {
                continue;
            };
            match serde_json::from_value::<PaintEvent>(value) {
                Ok(event) if event.player == self.local_player => continue,
                Ok(event) => return Ok(event),
                Err(e) => warn!("Dropping malformed paint event {}: {}", key, e),
            }
        }
    }

    pub fn cancel(&self) {
        self.events.cancel();
    }
}
