/// Length of a session code such as `K7Q2ZD`
pub const SESSION_CODE_LENGTH: usize = 6;

/// Characters a session code is drawn from
pub const SESSION_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Player slots a session accepts before joins are rejected as full
pub const MAX_PLAYERS: usize = 2;

/// Live players the host waits for before signalling the start
pub const REQUIRED_PLAYERS: usize = 2;

/// Distance into the future the agreed start time is written, in milliseconds.
/// Matches the 3-2-1-GO countdown every client shows.
pub const START_LEAD_MS: i64 = 4000;

/// Number of newest discovery entries scanned by a random join
pub const DISCOVERY_SCAN_LIMIT: usize = 20;

/// Expected rematch votes when the active-player read fails
pub const FALLBACK_EXPECTED_VOTES: usize = 2;

/// Delay before the host clears the rematch latch, in milliseconds
pub const REMATCH_CLEANUP_DELAY_MS: u64 = 2000;

/// Oldest sessions inspected per reaper sweep
pub const REAPER_SCAN_LIMIT: usize = 50;

/// Sessions idle longer than this are always deleted (3 hours)
pub const STALE_SESSION_TTL_MS: i64 = 3 * 60 * 60 * 1000;

/// Sessions older than this with no active player are deleted (10 minutes)
pub const EMPTY_SESSION_GRACE_MS: i64 = 10 * 60 * 1000;

/// Interval at which a joined client touches `lastActivityAt`
pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Match length used when the host does not pick one (3 minutes)
pub const DEFAULT_MATCH_DURATION_MS: i64 = 180_000;

/// Ink a player starts a match with
pub const FULL_INK: f64 = 100.0;
