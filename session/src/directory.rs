use std::cmp::Reverse;
use std::sync::Arc;

use common::{
    DiscoveryEntry, MatchOptions, PlayerId, PlayerState, SESSION_CODE_CHARSET, SESSION_CODE_LENGTH, SessionId,
    SessionRecord, SessionSettings,
};
use rand::Rng;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::consistency::{BestEffort, ConsistencyPolicy};
use crate::error::SessionError;
use crate::identity::{IdentityProvider, require_user};
use crate::paths::{StorePaths, fields};
use crate::reaper::SessionReaper;
use crate::store::{Query, ReplicatedStore, server_timestamp};

/// A client's seat in a session
#[derive(Debug, Clone, PartialEq)]
pub struct Membership {
    pub session_id: SessionId,
    pub player_id: PlayerId,
    pub settings: SessionSettings,
}

/// Reads and parses the live session record
pub async fn read_session(store: &dyn ReplicatedStore, session: &SessionId) -> Result<SessionRecord, SessionError> {
    let path = StorePaths::session(session);
    let raw = store
        .get(&path)
        .await?
        .ok_or_else(|| SessionError::SessionNotFound(session.to_string()))?;
    serde_json::from_value(raw).map_err(|e| SessionError::ParseFailed(format!("{}: {}", path, e)))
}

fn generate_session_code() -> String {
    let mut rng = rand::thread_rng();
    (0..SESSION_CODE_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..SESSION_CODE_CHARSET.len());
            SESSION_CODE_CHARSET[idx] as char
        })
        .collect()
}

/// Seeds stay below 2^31 so every store backend keeps them exact
pub(crate) fn generate_maze_seed() -> i64 {
    rand::thread_rng().gen_range(0..i32::MAX as i64)
}

/// Creates, discovers, joins and leaves sessions
pub struct SessionDirectory {
    store: Arc<dyn ReplicatedStore>,
    identity: Arc<dyn IdentityProvider>,
    policy: Arc<dyn ConsistencyPolicy>,
    reaper: SessionReaper,
    config: SessionConfig,
}

impl SessionDirectory {
    pub fn new(
        store: Arc<dyn ReplicatedStore>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        Self::with_policy(store, identity, clock, config, Arc::new(BestEffort))
    }

    pub fn with_policy(
        store: Arc<dyn ReplicatedStore>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
        policy: Arc<dyn ConsistencyPolicy>,
    ) -> Self {
        let reaper = SessionReaper::new(store.clone(), clock, &config);
        Self { store, identity, policy, reaper, config }
    }

    pub fn store(&self) -> &Arc<dyn ReplicatedStore> {
        &self.store
    }

    pub fn policy(&self) -> &Arc<dyn ConsistencyPolicy> {
        &self.policy
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create a new session hosted by the current user as `player0`.
    ///
    /// The record is read back after the write; a missing record or a different
    /// seed fails with [`SessionError::CreationUnverified`].
    pub async fn create_session(
        &self,
        host_state: &PlayerState,
        options: MatchOptions,
    ) -> Result<Membership, SessionError> {
        let user = require_user(self.identity.as_ref())?;

        // Not awaited; creation never waits on cleanup
        self.reaper.spawn_sweep();

        let code = generate_session_code();
        let session_id = SessionId::parse(&code)
            .ok_or_else(|| SessionError::CreationUnverified(format!("generated invalid code '{}'", code)))?;
        let maze_seed = generate_maze_seed();
        let host = PlayerId::host();

        let mut host_state = host_state.clone();
        host_state.uid = user.to_string();

        let record = json!({
            "players": { (host.as_str()): host_state },
            "mazeSeed": maze_seed,
            "matchDurationMs": options.match_duration_ms,
            "mazeComplexity": options.maze_complexity,
            "gameMode": options.game_mode,
            "isPrivate": options.is_private,
            "createdAt": server_timestamp(),
            "lastActivityAt": server_timestamp(),
            "started": false,
            "playerCount": 1,
            "rematchInProgress": false,
        });
        self.store.set(&StorePaths::session(&session_id), record).await?;

        let written = read_session(self.store.as_ref(), &session_id)
            .await
            .map_err(|e| SessionError::CreationUnverified(e.to_string()))?;
        if written.maze_seed != maze_seed {
            return Err(SessionError::CreationUnverified(format!(
                "session {} holds seed {} instead of {}",
                session_id, written.maze_seed, maze_seed
            )));
        }

        let entry = json!({
            "isPrivate": options.is_private,
            "playerCount": 1,
            "started": false,
            "createdAt": server_timestamp(),
        });
        if let Err(e) = self.store.set(&StorePaths::directory_entry(&session_id), entry).await {
            warn!("Failed to publish discovery entry for session {}: {}", session_id, e);
        }

        info!(
            "Created session {} for user {} ({:?}, {:?}, private: {})",
            session_id, user, options.maze_complexity, options.game_mode, options.is_private
        );

        Ok(Membership { session_id, player_id: host, settings: written.settings() })
    }

    /// Joins the session with the given code, or any open public session when `code` is `None`.
    ///
    /// A direct join fails on the first error. Random discovery moves on to the
    /// next candidate and fails with [`SessionError::NoGameAvailable`] once none are left.
    pub async fn join_session(&self, code: Option<&str>, joiner: &PlayerState) -> Result<Membership, SessionError> {
        let user = require_user(self.identity.as_ref())?;
        let mut joiner = joiner.clone();
        joiner.uid = user.to_string();

        match code {
            Some(code) => {
                let session_id = SessionId::parse(code)
                    .ok_or_else(|| SessionError::SessionNotFound(code.trim().to_string()))?;
                self.attempt_join(&session_id, &joiner).await
            }
            None => self.join_random(&joiner).await,
        }
    }

    async fn join_random(&self, joiner: &PlayerState) -> Result<Membership, SessionError> {
        let candidates = self.discover().await?;
        debug!("Random join found {} candidate sessions", candidates.len());

        for session_id in candidates {
            match self.attempt_join(&session_id, joiner).await {
                Ok(membership) => return Ok(membership),
                Err(e) if e.is_recoverable() => {
                    debug!("Skipping session {}: {}", session_id, e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(SessionError::NoGameAvailable)
    }

    /// Joinable public sessions among the most recently created, newest first
    pub async fn discover(&self) -> Result<Vec<SessionId>, SessionError> {
        let query = Query::order_by_child(fields::CREATED_AT).limit_to_last(self.config.discovery_scan_limit);
        let entries = self.store.query(StorePaths::DIRECTORY, &query).await?;

        let mut joinable: Vec<(SessionId, DiscoveryEntry)> = entries
            .into_iter()
            .filter_map(|(key, raw)| {
                let session_id = SessionId::parse(&key)?;
                match serde_json::from_value::<DiscoveryEntry>(raw) {
                    Ok(entry) => Some((session_id, entry)),
                    Err(e) => {
                        debug!("Ignoring malformed discovery entry {}: {}", key, e);
                        None
                    }
                }
            })
            .filter(|(_, entry)| entry.is_joinable())
            .collect();
        joinable.sort_by_key(|(_, entry)| Reverse(entry.created_at));

        Ok(joinable.into_iter().map(|(session_id, _)| session_id).collect())
    }

    async fn attempt_join(&self, session_id: &SessionId, joiner: &PlayerState) -> Result<Membership, SessionError> {
        let claim = self
            .policy
            .claim_slot(self.store.as_ref(), session_id, joiner, self.config.max_players)
            .await?;

        let directory_count = StorePaths::directory_field(session_id, fields::PLAYER_COUNT);
        if let Err(e) = self.store.increment(&directory_count, 1).await {
            warn!("Failed to update discovery entry for session {}: {}", session_id, e);
        }

        info!("Joined session {} as {}", session_id, claim.player_id);
        Ok(Membership { session_id: session_id.clone(), player_id: claim.player_id, settings: claim.settings })
    }

    /// Leaves a session. The session and its discovery entry are deleted once
    /// no remaining player is active.
    pub async fn leave_session(&self, session_id: &SessionId, player_id: &PlayerId) -> Result<(), SessionError> {
        let player_path = StorePaths::player(session_id, player_id);
        let mut inactive = Map::new();
        inactive.insert(fields::ACTIVE.to_string(), Value::Bool(false));
        self.store.update(&player_path, inactive).await?;
        self.store.remove(&player_path).await?;

        self.store
            .increment(&StorePaths::field(session_id, fields::PLAYER_COUNT), -1)
            .await?;
        let directory_count = StorePaths::directory_field(session_id, fields::PLAYER_COUNT);
        if let Err(e) = self.store.increment(&directory_count, -1).await {
            warn!("Failed to update discovery entry for session {}: {}", session_id, e);
        }
        info!("Player {} left session {}", player_id, session_id);

        let players = self.store.get(&StorePaths::players(session_id)).await?;
        let any_active = players
            .as_ref()
            .and_then(Value::as_object)
            .is_some_and(|players| {
                players
                    .values()
                    .any(|p| p.get(fields::ACTIVE).and_then(Value::as_bool) == Some(true))
            });
        if !any_active {
            self.store.remove(&StorePaths::session(session_id)).await?;
            self.store.remove(&StorePaths::directory_entry(session_id)).await?;
            info!("Deleted session {} after the last active player left", session_id);
        }
        Ok(())
    }

    /// Refreshes `lastActivityAt` so the reaper sees the session as in use
    pub async fn touch_session(&self, session_id: &SessionId) -> Result<(), SessionError> {
        self.store
            .set(&StorePaths::field(session_id, fields::LAST_ACTIVITY_AT), server_timestamp())
            .await?;
        Ok(())
    }

    pub fn reaper(&self) -> &SessionReaper {
        &self.reaper
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes_are_valid_session_ids() {
        for _ in 0..100 {
            let code = generate_session_code();
            assert_eq!(SessionId::parse(&code).map(|id| id.to_string()), Some(code));
        }
    }

    #[test]
    fn test_maze_seed_range() {
        for _ in 0..100 {
            let seed = generate_maze_seed();
            assert!((0..i32::MAX as i64).contains(&seed));
        }
    }
}
