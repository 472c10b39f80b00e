use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::{
    Color, DEFAULT_MATCH_DURATION_MS, GameMode, MatchOptions, MazeComplexity, MazeViewport, NormalizedPoint,
    PlayerId, PlayerState, ScreenPoint, Viewport,
};
use rand::Rng;
use session::clock::{Clock, SystemClock};
use session::identity::AnonymousIdentity;
use session::lifecycle::{MatchClock, MatchOutcome, MatchPhase};
use session::store::{LocalStore, RedisStore, ReplicatedStore};
use session::{GameplayListener, SessionClient, SessionConfig, SessionDirectory};
use tokio::sync::oneshot;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const PALETTE: [Color; 4] = [
    Color::rgb(0xE6, 0x39, 0x46),
    Color::rgb(0x45, 0x7B, 0x9D),
    Color::rgb(0x2A, 0x9D, 0x8F),
    Color::rgb(0xF4, 0xA2, 0x61),
];

#[derive(Parser, Debug)]
#[command(
    name = "inkmaze-bot",
    about = "Run headless bots that host, join and play inkmaze sessions"
)]
struct Args {
    /// Redis URL of the shared store
    #[arg(long, default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Key prefix inside Redis
    #[arg(long, default_value = "inkmaze")]
    namespace: String,

    /// Run a host and a joining bot in this process against an in-memory store
    #[arg(long)]
    local: bool,

    /// What the bot does first: host | join | random
    #[arg(long, default_value = "random")]
    role: String,

    /// Session code for --role join
    #[arg(long)]
    code: Option<String>,

    /// Match length when hosting
    #[arg(long, default_value_t = DEFAULT_MATCH_DURATION_MS)]
    duration_ms: i64,

    /// Maze complexity when hosting: low | medium | high
    #[arg(long, default_value = "medium")]
    complexity: String,

    /// Game mode when hosting: coverage | zones
    #[arg(long, default_value = "coverage")]
    mode: String,

    /// Host a private session that random discovery skips
    #[arg(long)]
    private: bool,

    /// Display name; generated when omitted
    #[arg(long)]
    name: Option<String>,

    /// Number of matches to play, voting for a rematch between them
    #[arg(long, default_value_t = 1)]
    games: usize,

    /// Simulation tick
    #[arg(long, default_value_t = 100)]
    tick_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Host,
    Join,
    Random,
}

#[derive(Debug, Clone)]
struct BotPlan {
    role: Role,
    code: Option<String>,
    options: MatchOptions,
    name: String,
    games: usize,
    tick: Duration,
}

/// Counts what the other players do
#[derive(Default)]
struct BotListener {
    remote_paint: AtomicU64,
    remote_updates: AtomicU64,
}

impl GameplayListener for BotListener {
    fn on_player_state_changed(&self, player_id: &PlayerId, state: &PlayerState) {
        self.remote_updates.fetch_add(1, Ordering::Relaxed);
        debug!("{} at ({:.3}, {:.3}) ink {:.0}", player_id, state.norm_x, state.norm_y, state.ink);
    }

    fn on_player_removed(&self, player_id: &PlayerId) {
        info!("{} left the match", player_id);
    }

    fn on_paint_event(&self, _color: Color, _point: NormalizedPoint) {
        self.remote_paint.fetch_add(1, Ordering::Relaxed);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = SessionConfig::from_env().context("Failed to load session configuration")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let options = MatchOptions {
        match_duration_ms: args.duration_ms,
        maze_complexity: parse_complexity(&args.complexity)?,
        game_mode: parse_game_mode(&args.mode)?,
        is_private: args.private,
    };
    let name = args
        .name
        .clone()
        .unwrap_or_else(|| format!("bot-{}", &Uuid::new_v4().simple().to_string()[..6]));
    let plan = BotPlan {
        role: parse_role(&args.role)?,
        code: args.code.clone(),
        options,
        name,
        games: args.games.max(1),
        tick: Duration::from_millis(args.tick_ms.max(10)),
    };

    if args.local {
        return run_local_pair(plan, config, clock).await;
    }

    let store: Arc<dyn ReplicatedStore> = Arc::new(
        RedisStore::connect(&args.redis_url, &args.namespace)
            .await
            .with_context(|| format!("Failed to connect to {}", args.redis_url))?,
    );
    info!("Bot {} starting as {:?} against {}", plan.name, plan.role, args.redis_url);
    run_bot(plan, store, clock, config, None).await
}

/// Host and joiner in one process. The host hands its code to the joiner.
async fn run_local_pair(plan: BotPlan, config: SessionConfig, clock: Arc<dyn Clock>) -> Result<()> {
    let store: Arc<dyn ReplicatedStore> = Arc::new(LocalStore::with_clock(clock.clone()));
    let (code_tx, code_rx) = oneshot::channel();

    let host_plan = BotPlan { role: Role::Host, name: format!("{}-host", plan.name), ..plan.clone() };
    let host = tokio::spawn(run_bot(host_plan, store.clone(), clock.clone(), config.clone(), Some(code_tx)));

    let code = code_rx.await.context("Host bot stopped before creating a session")?;
    let joiner_plan = BotPlan {
        role: Role::Join,
        code: Some(code),
        name: format!("{}-guest", plan.name),
        ..plan
    };
    let joiner = tokio::spawn(run_bot(joiner_plan, store, clock, config, None));

    for (label, handle) in [("host", host), ("guest", joiner)] {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("Local {} bot failed: {:#}", label, err),
            Err(err) => error!("Local {} bot panicked: {}", label, err),
        }
    }
    Ok(())
}

async fn run_bot(
    plan: BotPlan,
    store: Arc<dyn ReplicatedStore>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    code_tx: Option<oneshot::Sender<String>>,
) -> Result<()> {
    let identity = Arc::new(AnonymousIdentity::new());
    let uid = identity.sign_in_anonymously();
    let directory = Arc::new(SessionDirectory::new(store, identity, clock.clone(), config));

    let color = PALETTE[rand::thread_rng().gen_range(0..PALETTE.len())];
    let mut state = PlayerState::new(uid.as_str(), plan.name.clone(), color);

    let mut client = match plan.role {
        Role::Host => SessionClient::host(directory, clock.clone(), &state, plan.options)
            .await
            .context("Failed to create a session")?,
        Role::Join => {
            let code = plan.code.as_deref().ok_or_else(|| anyhow!("--role join needs --code"))?;
            SessionClient::join(directory, clock.clone(), Some(code), &state)
                .await
                .with_context(|| format!("Failed to join session {}", code))?
        }
        Role::Random => SessionClient::join(directory, clock.clone(), None, &state)
            .await
            .context("Failed to find an open session")?,
    };
    info!(
        "{} is {} in session {} (seed {})",
        plan.name,
        client.player_id(),
        client.session_id(),
        client.settings().maze_seed
    );
    if let Some(code_tx) = code_tx {
        let _ = code_tx.send(client.session_id().to_string());
    }

    let listener = Arc::new(BotListener::default());
    client
        .attach_listener(listener.clone())
        .await
        .context("Failed to subscribe to session updates")?;

    let viewport = Viewport::new(0.0, 0.0, 1080.0, 1920.0);
    let mut position = ScreenPoint::new(
        rand::thread_rng().gen_range(0.0..viewport.width),
        rand::thread_rng().gen_range(0.0..viewport.height),
    );
    if let Some(spawn) = viewport.screen_to_normalized(position) {
        state.set_position(spawn);
        client.publish_spawn(spawn).await.context("Failed to publish spawn point")?;
    }

    for game_idx in 1..=plan.games {
        let match_clock = client.start_match().await.context("Match never started")?;
        info!(
            "{} match {}/{} starts in {} ms",
            plan.name,
            game_idx,
            plan.games,
            match_clock.countdown_remaining_ms(clock.now_ms())
        );

        let painted = play_match(&client, &clock, match_clock, &viewport, &mut position, &mut state, plan.tick).await;
        let remote = listener.remote_paint.swap(0, Ordering::Relaxed);
        let total = (painted + remote).max(1) as f64;
        let outcome = MatchOutcome::from_coverage(painted as f64 / total, remote as f64 / total);
        info!(
            "{} finished match {}: {:?} ({} own strokes, {} remote, {} remote updates)",
            plan.name,
            game_idx,
            outcome,
            painted,
            remote,
            listener.remote_updates.load(Ordering::Relaxed)
        );

        let want_rematch = game_idx < plan.games;
        let decision = client
            .negotiate_rematch(want_rematch)
            .await
            .context("Rematch vote failed")?;
        if !decision.all_yes {
            info!("{} rematch declined: {:?}", plan.name, decision.votes);
            break;
        }
        info!("{} rematch agreed, new seed {}", plan.name, client.settings().maze_seed);
    }

    if let Err(err) = client.leave().await {
        warn!("{} failed to leave cleanly: {}", plan.name, err);
    }
    Ok(())
}

/// Random-walk painting until the agreed clock runs out. Returns the strokes published.
async fn play_match(
    client: &SessionClient,
    clock: &Arc<dyn Clock>,
    match_clock: MatchClock,
    viewport: &Viewport,
    position: &mut ScreenPoint,
    state: &mut PlayerState,
    tick: Duration,
) -> u64 {
    let countdown = match_clock.countdown_remaining_ms(clock.now_ms());
    tokio::time::sleep(Duration::from_millis(countdown as u64)).await;

    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut painted = 0;
    loop {
        ticker.tick().await;
        if client.lifecycle().tick(&match_clock) == MatchPhase::Ended {
            break;
        }

        let step = 24.0;
        let (dx, dy) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(-step..=step), rng.gen_range(-step..=step))
        };
        *position = ScreenPoint::new(
            (position.x + dx).clamp(viewport.offset_x, viewport.offset_x + viewport.width),
            (position.y + dy).clamp(viewport.offset_y, viewport.offset_y + viewport.height),
        );

        let normalized = viewport.screen_to_normalized(*position);
        if let Some(point) = normalized {
            state.set_position(point);
        }
        client.publish_tick(state).await;
        client.publish_paint(state.color, normalized).await;
        painted += 1;
    }
    painted
}

fn parse_role(role: &str) -> Result<Role> {
    match role.to_ascii_lowercase().as_str() {
        "host" => Ok(Role::Host),
        "join" => Ok(Role::Join),
        "random" | "any" => Ok(Role::Random),
        other => Err(anyhow!("Unknown role '{}'", other)),
    }
}

fn parse_complexity(complexity: &str) -> Result<MazeComplexity> {
    match complexity.to_ascii_lowercase().as_str() {
        "low" => Ok(MazeComplexity::Low),
        "medium" => Ok(MazeComplexity::Medium),
        "high" => Ok(MazeComplexity::High),
        other => Err(anyhow!("Unknown maze complexity '{}'", other)),
    }
}

fn parse_game_mode(mode: &str) -> Result<GameMode> {
    match mode.to_ascii_lowercase().as_str() {
        "coverage" => Ok(GameMode::Coverage),
        "zones" => Ok(GameMode::Zones),
        other => Err(anyhow!("Unknown game mode '{}'", other)),
    }
}
