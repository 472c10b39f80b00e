use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use common::{PlayerId, SessionId};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::consistency::ConsistencyPolicy;
use crate::directory::generate_maze_seed;
use crate::error::SessionError;
use crate::paths::{StorePaths, fields};
use crate::store::{ChildSubscription, ReplicatedStore, ValueSubscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RematchPhase {
    Idle,
    AwaitingVotes,
    Decided { all_yes: bool },
    InProgress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RematchOutcome {
    pub all_yes: bool,
    pub votes: BTreeMap<PlayerId, bool>,
}

fn collect_votes<'a>(nodes: impl IntoIterator<Item = (&'a String, &'a Value)>) -> BTreeMap<PlayerId, bool> {
    nodes
        .into_iter()
        .map(|(key, vote)| (PlayerId::from_key(key), vote.as_bool().unwrap_or(false)))
        .collect()
}

fn count_active(players: Option<&Value>) -> usize {
    players
        .and_then(Value::as_object)
        .map_or(0, |players| {
            players
                .values()
                .filter(|p| p.get(fields::ACTIVE).and_then(Value::as_bool) == Some(true))
                .count()
        })
}

/// Collects rematch votes and agrees on the decision
pub struct RematchNegotiator {
    store: Arc<dyn ReplicatedStore>,
    session_id: SessionId,
    player_id: PlayerId,
    policy: Arc<dyn ConsistencyPolicy>,
    fallback_expected_votes: usize,
    cleanup_delay: Duration,
    phase: watch::Sender<RematchPhase>,
}

impl RematchNegotiator {
    pub fn new(
        store: Arc<dyn ReplicatedStore>,
        session_id: SessionId,
        player_id: PlayerId,
        policy: Arc<dyn ConsistencyPolicy>,
        config: &SessionConfig,
    ) -> Self {
        let (phase, _) = watch::channel(RematchPhase::Idle);
        Self {
            store,
            session_id,
            player_id,
            policy,
            fallback_expected_votes: config.fallback_expected_votes,
            cleanup_delay: config.rematch_cleanup_delay,
            phase,
        }
    }

    pub fn phase(&self) -> RematchPhase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: RematchPhase) {
        self.phase.send_replace(phase);
        debug!("Rematch in {} for {}: {:?}", self.session_id, self.player_id, phase);
    }

    /// Clears the latch and returns how many votes to wait for.
    ///
    /// Counts the players marked active. If that read fails or finds nobody,
    /// the fallback count is used.
    pub async fn open_voting(&self) -> usize {
        let latch = StorePaths::rematch_in_progress(&self.session_id);
        if let Err(e) = self.store.set(&latch, Value::Bool(false)).await {
            warn!("Failed to reset rematch latch for {}: {}", self.session_id, e);
        }

        let expected = match self.store.get(&StorePaths::players(&self.session_id)).await {
            Ok(players) => match count_active(players.as_ref()) {
                0 => None,
                n => Some(n),
            },
            Err(e) => {
                debug!("Active player count for {} failed: {}", self.session_id, e);
                None
            }
        };
        let expected = expected.unwrap_or_else(|| {
            warn!(
                "{} for {}; expecting {} votes",
                SessionError::VoteCountUnavailable,
                self.session_id,
                self.fallback_expected_votes
            );
            self.fallback_expected_votes
        });

        self.set_phase(RematchPhase::AwaitingVotes);
        expected
    }

    pub async fn submit_vote(&self, want_rematch: bool) -> Result<(), SessionError> {
        self.store
            .set(
                &StorePaths::rematch_vote(&self.session_id, &self.player_id),
                Value::Bool(want_rematch),
            )
            .await?;
        debug!("{} voted {} in {}", self.player_id, want_rematch, self.session_id);
        Ok(())
    }

    /// Resolves exactly once, when `expected` votes are in. A unanimous yes also
    /// sets the rematch latch. The vote subscription is dropped before returning.
    pub async fn await_decision(&self, expected: usize) -> Result<RematchOutcome, SessionError> {
        let votes = {
            let mut votes =
                ChildSubscription::open(self.store.as_ref(), &StorePaths::rematch_votes(&self.session_id), None)
                    .await?;
            loop {
                votes.next().await?;
                if votes.children().len() >= expected {
                    break collect_votes(votes.children());
                }
            }
        };

        let all_yes = votes.values().all(|yes| *yes);
        self.set_phase(RematchPhase::Decided { all_yes });
        info!(
            "Rematch vote in {} decided with {} votes: {}",
            self.session_id,
            votes.len(),
            if all_yes { "rematch" } else { "declined" }
        );

        if all_yes {
            self.policy
                .latch_rematch(self.store.as_ref(), &self.session_id)
                .await?;
        }
        Ok(RematchOutcome { all_yes, votes })
    }

    /// Resolves when the latch is set and the votes still show `expected` yes answers
    pub async fn await_rematch_signal(&self, expected: usize) -> Result<(), SessionError> {
        let mut latch =
            ValueSubscription::open(self.store.as_ref(), &StorePaths::rematch_in_progress(&self.session_id)).await?;
        loop {
            if latch.next().await? != Some(Value::Bool(true)) {
                continue;
            }
            let votes = self.store.get(&StorePaths::rematch_votes(&self.session_id)).await?;
            let yes_count = votes
                .as_ref()
                .and_then(Value::as_object)
                .map_or(0, |votes| collect_votes(votes).values().filter(|yes| **yes).count());
            if yes_count == expected {
                self.set_phase(RematchPhase::InProgress);
                return Ok(());
            }
            warn!(
                "Ignoring rematch latch in {}: {} yes votes, expected {}",
                self.session_id, yes_count, expected
            );
        }
    }

    /// Host only. After the cleanup delay, clears votes and paint, resets the
    /// latch and `started`, and writes a new maze seed, which is returned.
    pub async fn reset_after_rematch(&self) -> Result<i64, SessionError> {
        tokio::time::sleep(self.cleanup_delay).await;

        let maze_seed = generate_maze_seed();
        let mut update = Map::new();
        update.insert(fields::REMATCH_VOTES.to_string(), Value::Null);
        update.insert(fields::REMATCH_IN_PROGRESS.to_string(), Value::Bool(false));
        update.insert(fields::PAINT.to_string(), Value::Null);
        update.insert(fields::STARTED.to_string(), Value::Bool(false));
        update.insert(fields::START_TIME.to_string(), Value::Null);
        update.insert(fields::MAZE_SEED.to_string(), Value::from(maze_seed));
        self.store.update(&StorePaths::session(&self.session_id), update).await?;

        let directory_started = StorePaths::directory_field(&self.session_id, fields::STARTED);
        if let Err(e) = self.store.set(&directory_started, Value::Bool(false)).await {
            warn!("Failed to reopen discovery entry {}: {}", self.session_id, e);
        }

        info!("Reset session {} for a rematch with seed {}", self.session_id, maze_seed);
        self.set_phase(RematchPhase::Idle);
        Ok(maze_seed)
    }

    /// Non-host side of the reset: resolves once the latch is cleared again
    pub async fn await_reset(&self) -> Result<(), SessionError> {
        let mut latch =
            ValueSubscription::open(self.store.as_ref(), &StorePaths::rematch_in_progress(&self.session_id)).await?;
        while latch.next().await? == Some(Value::Bool(true)) {}
        self.set_phase(RematchPhase::Idle);
        Ok(())
    }
}
