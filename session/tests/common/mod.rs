#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::{Color, GameMode, MatchOptions, MazeComplexity, PlayerState};
use session::clock::{Clock, ManualClock};
use session::identity::{AnonymousIdentity, UserId};
use session::store::{LocalStore, ReplicatedStore};
use session::{SessionConfig, SessionDirectory};

pub const START_MS: i64 = 1_700_000_000_000;

/// Upper bound for any single await on a subscription
pub const TEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Awaits `future` or panics once [`TEST_TIMEOUT`] elapses
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(TEST_TIMEOUT, future)
        .await
        .unwrap_or_else(|_| panic!("test step timed out after {:?}", TEST_TIMEOUT))
}

/// Polls `check` until it holds or the test timeout elapses
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    within(async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}

/// One shared in-memory store with a hand-driven clock
pub struct TestEnvironment {
    pub store: Arc<LocalStore>,
    pub clock: Arc<ManualClock>,
    pub config: SessionConfig,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self::with_config(SessionConfig {
            rematch_cleanup_delay: Duration::from_millis(200),
            ..SessionConfig::default()
        })
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let _ = tracing_subscriber::fmt::try_init();
        let clock = Arc::new(ManualClock::new(START_MS));
        let store = Arc::new(LocalStore::with_clock(clock.clone()));
        Self { store, clock, config }
    }

    pub fn shared_store(&self) -> Arc<dyn ReplicatedStore> {
        self.store.clone()
    }

    pub fn shared_clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// A client's directory with its own signed-in anonymous identity
    pub fn directory(&self) -> (Arc<SessionDirectory>, UserId) {
        let identity = Arc::new(AnonymousIdentity::new());
        let user = identity.sign_in_anonymously();
        let directory = SessionDirectory::new(self.shared_store(), identity, self.shared_clock(), self.config.clone());
        (Arc::new(directory), user)
    }

    /// A directory whose user never signed in
    pub fn signed_out_directory(&self) -> Arc<SessionDirectory> {
        let identity = Arc::new(AnonymousIdentity::new());
        Arc::new(SessionDirectory::new(
            self.shared_store(),
            identity,
            self.shared_clock(),
            self.config.clone(),
        ))
    }
}

pub fn player(name: &str) -> PlayerState {
    PlayerState::new("", name, Color::rgb(0x2A, 0x9D, 0x8F))
}

pub fn public_options() -> MatchOptions {
    MatchOptions {
        match_duration_ms: 180_000,
        maze_complexity: MazeComplexity::High,
        game_mode: GameMode::Coverage,
        is_private: false,
    }
}

pub fn private_options() -> MatchOptions {
    MatchOptions { is_private: true, ..public_options() }
}
