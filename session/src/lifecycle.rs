use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{PlayerId, SessionId};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::paths::{StorePaths, fields};
use crate::store::{ChildSubscription, ReplicatedStore, ValueSubscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    Idle,
    AwaitingPlayers,
    Countdown,
    Active,
    Ended,
}

/// Agreed match timeline. `start_time_ms` is t=0 on every client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchClock {
    pub start_time_ms: i64,
    pub duration_ms: i64,
}

impl MatchClock {
    pub fn countdown_remaining_ms(&self, now_ms: i64) -> i64 {
        (self.start_time_ms - now_ms).max(0)
    }

    pub fn elapsed_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.start_time_ms).max(0)
    }

    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        (self.duration_ms - self.elapsed_ms(now_ms)).max(0)
    }

    pub fn is_ended(&self, now_ms: i64) -> bool {
        now_ms >= self.start_time_ms && self.elapsed_ms(now_ms) >= self.duration_ms
    }

    pub fn phase(&self, now_ms: i64) -> MatchPhase {
        if now_ms < self.start_time_ms {
            MatchPhase::Countdown
        } else if self.is_ended(now_ms) {
            MatchPhase::Ended
        } else {
            MatchPhase::Active
        }
    }
}

/// Local verdict from locally sampled coverage. Clients may disagree at the buzzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Win,
    Loss,
    Draw,
}

impl MatchOutcome {
    pub fn from_coverage(local: f64, best_opponent: f64) -> Self {
        if local > best_opponent {
            MatchOutcome::Win
        } else if local < best_opponent {
            MatchOutcome::Loss
        } else {
            MatchOutcome::Draw
        }
    }
}

/// Drives one client through Idle, AwaitingPlayers, Countdown, Active and Ended
pub struct MatchLifecycle {
    store: Arc<dyn ReplicatedStore>,
    session_id: SessionId,
    player_id: PlayerId,
    clock: Arc<dyn Clock>,
    required_players: usize,
    start_lead_ms: i64,
    duration_ms: i64,
    phase: watch::Sender<MatchPhase>,
    previous_start: Mutex<Option<i64>>,
}

impl MatchLifecycle {
    pub fn new(
        store: Arc<dyn ReplicatedStore>,
        session_id: SessionId,
        player_id: PlayerId,
        clock: Arc<dyn Clock>,
        config: &SessionConfig,
        duration_ms: i64,
    ) -> Self {
        let (phase, _) = watch::channel(MatchPhase::Idle);
        Self {
            store,
            session_id,
            player_id,
            clock,
            required_players: config.required_players,
            start_lead_ms: config.start_lead_ms,
            duration_ms,
            phase,
            previous_start: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> MatchPhase {
        *self.phase.borrow()
    }

    pub fn phase_changes(&self) -> watch::Receiver<MatchPhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: MatchPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            debug!("Session {} {}: {:?} -> {:?}", self.session_id, self.player_id, previous, phase);
        }
    }

    /// Used after a rematch reset to run the next match with the same lifecycle
    pub fn set_duration_ms(&mut self, duration_ms: i64) {
        self.duration_ms = duration_ms;
    }

    /// Resolves once the player map holds the required number of players
    pub async fn wait_for_players(&self) -> Result<usize, SessionError> {
        self.set_phase(MatchPhase::AwaitingPlayers);
        let mut players = ChildSubscription::open(self.store.as_ref(), &StorePaths::players(&self.session_id), None).await?;
        loop {
            players.next().await?;
            let count = players.children().len();
            if count >= self.required_players {
                debug!("Session {} has {} players", self.session_id, count);
                return Ok(count);
            }
        }
    }

    /// Host only. Records the player count, sets `started` and a `startTime`
    /// one lead interval ahead, and copies both onto the discovery entry.
    pub async fn signal_start(&self) -> Result<i64, SessionError> {
        let players = self.store.get(&StorePaths::players(&self.session_id)).await?;
        let player_count = players.as_ref().and_then(Value::as_object).map_or(0, |p| p.len());
        let start_time = self.clock.now_ms() + self.start_lead_ms;

        let mut update = Map::new();
        update.insert(fields::PLAYER_COUNT.to_string(), Value::from(player_count));
        update.insert(fields::STARTED.to_string(), Value::Bool(true));
        update.insert(fields::START_TIME.to_string(), Value::from(start_time));
        self.store.update(&StorePaths::session(&self.session_id), update).await?;

        let mut listing = Map::new();
        listing.insert(fields::PLAYER_COUNT.to_string(), Value::from(player_count));
        listing.insert(fields::STARTED.to_string(), Value::Bool(true));
        if let Err(e) = self.store.update(&StorePaths::directory_entry(&self.session_id), listing).await {
            warn!("Failed to mark discovery entry {} as started: {}", self.session_id, e);
        }

        info!(
            "Signalled start of session {} with {} players at {}",
            self.session_id, player_count, start_time
        );
        Ok(start_time)
    }

    /// Waits for `started`, then reads `startTime` once.
    ///
    /// `started` and `startTime` are watched together: a rematch can rewrite
    /// `startTime` while the flag reads `true` throughout, and a feed may fold
    /// a quick false/true flip into nothing. A start still carrying the
    /// previous match's `startTime` is ignored. If `startTime` cannot be read
    /// the countdown starts from the local clock.
    pub async fn await_start(&self) -> Result<MatchClock, SessionError> {
        if self.phase() == MatchPhase::Idle {
            self.set_phase(MatchPhase::AwaitingPlayers);
        }
        let previous = *self.previous_start.lock().unwrap_or_else(|p| p.into_inner());

        let start_time_ms = {
            let store = self.store.as_ref();
            let mut started = ValueSubscription::open(store, &StorePaths::field(&self.session_id, fields::STARTED)).await?;
            let mut start_time =
                ValueSubscription::open(store, &StorePaths::field(&self.session_id, fields::START_TIME)).await?;
            let mut is_started = false;
            loop {
                tokio::select! {
                    flag = started.next() => is_started = flag? == Some(Value::Bool(true)),
                    moved = start_time.next() => {
                        moved?;
                    }
                }
                if !is_started {
                    continue;
                }
                match self.read_start_time().await {
                    Some(start_time_ms) if Some(start_time_ms) == previous => {
                        debug!("Ignoring start flag of the previous match in {}", self.session_id);
                    }
                    Some(start_time_ms) => break start_time_ms,
                    None => break self.clock.now_ms() + self.start_lead_ms,
                }
            }
        };

        *self.previous_start.lock().unwrap_or_else(|p| p.into_inner()) = Some(start_time_ms);
        self.set_phase(MatchPhase::Countdown);
        Ok(MatchClock { start_time_ms, duration_ms: self.duration_ms })
    }

    async fn read_start_time(&self) -> Option<i64> {
        let path = StorePaths::field(&self.session_id, fields::START_TIME);
        match self.store.get(&path).await {
            Ok(value) => {
                let start_time = value.as_ref().and_then(Value::as_i64);
                if start_time.is_none() {
                    warn!("Session {} started without a startTime; using the local clock", self.session_id);
                }
                start_time
            }
            Err(e) => {
                warn!("Failed to read startTime of {}: {}; using the local clock", self.session_id, e);
                None
            }
        }
    }

    /// Sleeps through the countdown and the match, moving to Active and then Ended
    pub async fn run_match(&self, clock: MatchClock) -> MatchPhase {
        let countdown = clock.countdown_remaining_ms(self.clock.now_ms());
        tokio::time::sleep(Duration::from_millis(countdown as u64)).await;
        self.set_phase(MatchPhase::Active);

        let remaining = clock.remaining_ms(self.clock.now_ms());
        tokio::time::sleep(Duration::from_millis(remaining as u64)).await;
        self.set_phase(MatchPhase::Ended);
        MatchPhase::Ended
    }

    /// Moves the phase to wherever `clock` says the match is now
    pub fn tick(&self, clock: &MatchClock) -> MatchPhase {
        let phase = clock.phase(self.clock.now_ms());
        self.set_phase(phase);
        phase
    }

    pub fn reset(&self) {
        self.set_phase(MatchPhase::Idle);
    }
}
