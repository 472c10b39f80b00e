//! Per-session handle owning every component and background task of one client.

use std::collections::HashSet;
use std::sync::Arc;

use common::{Color, MatchOptions, NormalizedPoint, PlayerId, PlayerState, SessionId, SessionSettings};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::directory::{Membership, SessionDirectory, read_session};
use crate::error::SessionError;
use crate::lifecycle::{MatchClock, MatchLifecycle};
use crate::paint::PaintStream;
use crate::rematch::{RematchNegotiator, RematchOutcome};
use crate::replication::{PlayerStatePatch, PlayerUpdate, StateChannel};

/// Callbacks into the rendering/gameplay layer. Only remote players are reported.
pub trait GameplayListener: Send + Sync {
    fn on_player_state_changed(&self, player_id: &PlayerId, state: &PlayerState);

    /// Called when a player node disappears or a player marks itself inactive
    fn on_player_removed(&self, player_id: &PlayerId);

    fn on_paint_event(&self, color: Color, point: NormalizedPoint);

    fn on_error(&self, error: &SessionError) {
        warn!("Session listener error: {}", error);
    }
}

pub struct SessionClient {
    directory: Arc<SessionDirectory>,
    membership: Membership,
    state: StateChannel,
    paint: PaintStream,
    lifecycle: MatchLifecycle,
    rematch: RematchNegotiator,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionClient {
    /// Creates a session and becomes its host
    pub async fn host(
        directory: Arc<SessionDirectory>,
        clock: Arc<dyn Clock>,
        host_state: &PlayerState,
        options: MatchOptions,
    ) -> Result<Self, SessionError> {
        let membership = directory.create_session(host_state, options).await?;
        Ok(Self::from_membership(directory, clock, membership))
    }

    /// Joins by code, or any open public session when `code` is `None`
    pub async fn join(
        directory: Arc<SessionDirectory>,
        clock: Arc<dyn Clock>,
        code: Option<&str>,
        joiner: &PlayerState,
    ) -> Result<Self, SessionError> {
        let membership = directory.join_session(code, joiner).await?;
        Ok(Self::from_membership(directory, clock, membership))
    }

    fn from_membership(directory: Arc<SessionDirectory>, clock: Arc<dyn Clock>, membership: Membership) -> Self {
        let store = directory.store().clone();
        let config = directory.config().clone();
        let session_id = membership.session_id.clone();
        let player_id = membership.player_id.clone();

        let state = StateChannel::new(store.clone(), session_id.clone(), player_id.clone());
        let paint = PaintStream::new(store.clone(), session_id.clone(), player_id.clone());
        let lifecycle = MatchLifecycle::new(
            store.clone(),
            session_id.clone(),
            player_id.clone(),
            clock,
            &config,
            membership.settings.match_duration_ms,
        );
        let rematch = RematchNegotiator::new(store, session_id, player_id, directory.policy().clone(), &config);

        let mut client = Self {
            directory,
            membership,
            state,
            paint,
            lifecycle,
            rematch,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        };
        client.spawn_heartbeat();
        client
    }

    fn spawn_heartbeat(&mut self) {
        let directory = self.directory.clone();
        let session_id = self.membership.session_id.clone();
        let cancel = self.cancel.clone();
        let period = directory.config().heartbeat_interval;

        self.tasks.push(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = directory.touch_session(&session_id).await {
                            warn!("Failed to refresh activity of session {}: {}", session_id, e);
                        }
                    }
                }
            }
            debug!("Heartbeat for session {} stopped", session_id);
        }));
    }

    pub fn session_id(&self) -> &SessionId {
        &self.membership.session_id
    }

    pub fn player_id(&self) -> &PlayerId {
        &self.membership.player_id
    }

    pub fn is_host(&self) -> bool {
        self.membership.player_id.is_host()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.membership.settings
    }

    pub fn state_channel(&self) -> &StateChannel {
        &self.state
    }

    pub fn paint_stream(&self) -> &PaintStream {
        &self.paint
    }

    pub fn lifecycle(&self) -> &MatchLifecycle {
        &self.lifecycle
    }

    pub fn rematch(&self) -> &RematchNegotiator {
        &self.rematch
    }

    /// Per-tick state publish. Failures are logged; the next tick publishes again.
    pub async fn publish_tick(&self, state: &PlayerState) {
        if let Err(e) = self.state.publish_full(state).await {
            debug!("Dropped state tick for {}: {}", self.membership.player_id, e);
        }
    }

    /// Spawn-point correction that leaves the other fields alone
    pub async fn publish_spawn(&self, point: NormalizedPoint) -> Result<(), SessionError> {
        self.state.publish_partial(&PlayerStatePatch::position(point)).await
    }

    /// Paint publish. Failures are logged and dropped.
    pub async fn publish_paint(&self, color: Color, point: Option<NormalizedPoint>) {
        if let Err(e) = self.paint.publish(color, point).await {
            debug!("Dropped paint event from {}: {}", self.membership.player_id, e);
        }
    }

    /// Forwards remote player state and paint to `listener` until the client is dropped or leaves
    pub async fn attach_listener(&mut self, listener: Arc<dyn GameplayListener>) -> Result<(), SessionError> {
        let mut players = self.state.subscribe().await?;
        let mut paint = self.paint.subscribe_from_now().await?;
        let local = self.membership.player_id.clone();

        let cancel = self.cancel.clone();
        let player_listener = listener.clone();
        self.tasks.push(tokio::spawn(async move {
            // A leave goes inactive and then disappears; report it once
            let mut gone: HashSet<PlayerId> = HashSet::new();
            loop {
                let update = tokio::select! {
                    _ = cancel.cancelled() => break,
                    update = players.next() => update,
                };
                match update {
                    Ok(PlayerUpdate::Changed { player_id, .. }) if player_id == local => {}
                    Ok(PlayerUpdate::Changed { player_id, state }) if !state.active => {
                        if gone.insert(player_id.clone()) {
                            player_listener.on_player_removed(&player_id);
                        }
                    }
                    Ok(PlayerUpdate::Changed { player_id, state }) => {
                        gone.remove(&player_id);
                        player_listener.on_player_state_changed(&player_id, &state)
                    }
                    Ok(PlayerUpdate::Removed { player_id }) if player_id == local => {}
                    Ok(PlayerUpdate::Removed { player_id }) => {
                        if gone.insert(player_id.clone()) {
                            player_listener.on_player_removed(&player_id);
                        }
                    }
                    Err(e) => {
                        player_listener.on_error(&e);
                        break;
                    }
                }
            }
        }));

        let cancel = self.cancel.clone();
        self.tasks.push(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = paint.next() => event,
                };
                match event {
                    Ok(event) => listener.on_paint_event(event.color, event.point()),
                    Err(e) => {
                        listener.on_error(&e);
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    /// Host waits for the other players and signals the start; everyone then
    /// waits for `started` and gets the agreed clock.
    pub async fn start_match(&self) -> Result<MatchClock, SessionError> {
        if self.is_host() {
            self.lifecycle.wait_for_players().await?;
            self.lifecycle.signal_start().await?;
        }
        self.lifecycle.await_start().await
    }

    /// Runs the whole vote. On a unanimous yes this waits for the latch, and the
    /// host resets the session; every client then re-reads its settings.
    pub async fn negotiate_rematch(&mut self, want_rematch: bool) -> Result<RematchOutcome, SessionError> {
        let expected = self.rematch.open_voting().await;
        self.rematch.submit_vote(want_rematch).await?;
        let outcome = self.rematch.await_decision(expected).await?;
        if !outcome.all_yes {
            return Ok(outcome);
        }

        self.rematch.await_rematch_signal(expected).await?;
        if self.is_host() {
            self.rematch.reset_after_rematch().await?;
        } else {
            self.rematch.await_reset().await?;
        }
        self.refresh_settings().await?;
        self.lifecycle.reset();
        Ok(outcome)
    }

    /// Re-reads the live settings, e.g. the new maze seed after a rematch
    pub async fn refresh_settings(&mut self) -> Result<&SessionSettings, SessionError> {
        let record = read_session(self.directory.store().as_ref(), &self.membership.session_id).await?;
        self.membership.settings = record.settings();
        self.lifecycle.set_duration_ms(record.match_duration_ms);
        Ok(&self.membership.settings)
    }

    /// Stops every task and leaves the session
    pub async fn leave(mut self) -> Result<(), SessionError> {
        self.shutdown();
        self.directory
            .leave_session(&self.membership.session_id, &self.membership.player_id)
            .await?;
        info!("Left session {}", self.membership.session_id);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
