use common::{PlayerId, SessionId};

/// Field names inside a session record
pub mod fields {
    pub const PLAYERS: &str = "players";
    pub const PAINT: &str = "paint";
    pub const REMATCH_VOTES: &str = "rematchVotes";
    pub const REMATCH_IN_PROGRESS: &str = "rematchInProgress";
    pub const MAZE_SEED: &str = "mazeSeed";
    pub const CREATED_AT: &str = "createdAt";
    pub const LAST_ACTIVITY_AT: &str = "lastActivityAt";
    pub const STARTED: &str = "started";
    pub const START_TIME: &str = "startTime";
    pub const PLAYER_COUNT: &str = "playerCount";
    pub const ACTIVE: &str = "active";
    pub const TIMESTAMP: &str = "timestamp";
}

pub struct StorePaths;

impl StorePaths {
    pub const SESSIONS: &'static str = "sessions";
    pub const DIRECTORY: &'static str = "sessionDirectory";

    pub fn session(session: &SessionId) -> String {
        format!("{}/{}", Self::SESSIONS, session)
    }

    /// Any top-level field of a session record
    pub fn field(session: &SessionId, field: &str) -> String {
        format!("{}/{}/{}", Self::SESSIONS, session, field)
    }

    pub fn players(session: &SessionId) -> String {
        Self::field(session, fields::PLAYERS)
    }

    pub fn player(session: &SessionId, player: &PlayerId) -> String {
        format!("{}/{}", Self::players(session), player)
    }

    pub fn paint(session: &SessionId) -> String {
        Self::field(session, fields::PAINT)
    }

    pub fn rematch_votes(session: &SessionId) -> String {
        Self::field(session, fields::REMATCH_VOTES)
    }

    pub fn rematch_vote(session: &SessionId, player: &PlayerId) -> String {
        format!("{}/{}", Self::rematch_votes(session), player)
    }

    pub fn rematch_in_progress(session: &SessionId) -> String {
        Self::field(session, fields::REMATCH_IN_PROGRESS)
    }

    pub fn directory_entry(session: &SessionId) -> String {
        format!("{}/{}", Self::DIRECTORY, session)
    }

    pub fn directory_field(session: &SessionId, field: &str) -> String {
        format!("{}/{}", Self::directory_entry(session), field)
    }
}
