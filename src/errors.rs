use schema::BattleStatus;
use thiserror::Error;

/// Main error type returned by the arena services.
///
/// Validation, not-found, authorization and state-conflict variants are
/// expected outcomes of normal play and are returned as values; only
/// `CorruptedBattle` and `Persistence` signal something the caller cannot fix.
#[derive(Debug, Error)]
pub enum ArenaError {
    /// Missing or malformed input
    #[error("invalid request: {0}")]
    Validation(String),

    /// No caller identity was supplied
    #[error("not authenticated")]
    Unauthenticated,

    /// The caller is not a participant of the battle
    #[error("user {0} is not a participant of this battle")]
    Unauthorized(String),

    /// Battle, queue entry or species absent
    #[error("{0} not found")]
    NotFound(String),

    /// Move id not in the acting combatant's list
    #[error("invalid move id {0}")]
    InvalidMove(u8),

    /// The battle no longer accepts actions
    #[error("battle is not active (status: {0})")]
    InvalidState(BattleStatus),

    /// The other side owns the current turn
    #[error("not your turn")]
    NotYourTurn,

    /// A concurrent request changed the battle first
    #[error("battle was modified concurrently, retry the action")]
    Conflict,

    /// The species/move data source failed and no fallback applies
    #[error("species data source unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A stored battle cannot be played on, such as an AI side with no
    /// usable attack
    #[error("battle data is corrupted: {0}")]
    CorruptedBattle(String),

    /// A store write or read failed
    #[error("persistence failure: {0}")]
    Persistence(String),
}

/// Coarse error categories exposed at the service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    NotFound,
    StateConflict,
    UpstreamUnavailable,
    Persistence,
}

impl ArenaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArenaError::Validation(_) | ArenaError::InvalidMove(_) => ErrorKind::Validation,
            ArenaError::Unauthenticated => ErrorKind::Authentication,
            ArenaError::Unauthorized(_) => ErrorKind::Authorization,
            ArenaError::NotFound(_) => ErrorKind::NotFound,
            ArenaError::InvalidState(_) | ArenaError::NotYourTurn | ArenaError::Conflict => {
                ErrorKind::StateConflict
            }
            ArenaError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            ArenaError::CorruptedBattle(_) | ArenaError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// HTTP-style status code for the error.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::Authentication => 401,
            ErrorKind::Authorization => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::StateConflict => 409,
            ErrorKind::UpstreamUnavailable => 502,
            ErrorKind::Persistence => 500,
        }
    }

    /// Only lost conditional writes are worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ArenaError::Conflict)
    }

    pub fn battle_not_found(id: impl std::fmt::Display) -> Self {
        ArenaError::NotFound(format!("battle {}", id))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ArenaError::Validation(message.into())
    }
}

/// Errors surfaced by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The conditional write lost against a concurrent update
    #[error("conditional write lost against a concurrent update")]
    Conflict,

    /// The battle already reached a terminal status
    #[error("battle is closed (status: {0})")]
    Closed(BattleStatus),

    /// The record was not present for an update
    #[error("record not found: {0}")]
    Missing(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupted data: {0}")]
    CorruptedData(String),
}

/// Errors raised by the species/move data source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request timed out")]
    Timeout,

    #[error("http error: {0}")]
    Http(String),

    #[error("unexpected payload: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout
        } else if err.is_decode() {
            SourceError::Decode(err.to_string())
        } else {
            SourceError::Http(err.to_string())
        }
    }
}

impl From<StoreError> for ArenaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => ArenaError::Conflict,
            StoreError::Closed(status) => ArenaError::InvalidState(status),
            StoreError::Missing(what) => ArenaError::NotFound(what),
            other => ArenaError::Persistence(other.to_string()),
        }
    }
}

impl From<SourceError> for ArenaError {
    fn from(err: SourceError) -> Self {
        ArenaError::UpstreamUnavailable(err.to_string())
    }
}

/// Type alias for Results using ArenaError
pub type ArenaResult<T> = Result<T, ArenaError>;

/// Type alias for Results using StoreError
pub type StoreResult<T> = Result<T, StoreError>;

/// Type alias for Results using SourceError
pub type SourceResult<T> = Result<T, SourceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ArenaError::validation("battleId is required"), 400)]
    #[case(ArenaError::InvalidMove(9), 400)]
    #[case(ArenaError::Unauthenticated, 401)]
    #[case(ArenaError::Unauthorized("u3".to_string()), 403)]
    #[case(ArenaError::battle_not_found("abc"), 404)]
    #[case(ArenaError::InvalidState(BattleStatus::Player1Won), 409)]
    #[case(ArenaError::NotYourTurn, 409)]
    #[case(ArenaError::Conflict, 409)]
    #[case(ArenaError::UpstreamUnavailable("timeout".to_string()), 502)]
    #[case(ArenaError::CorruptedBattle("no attacks".to_string()), 500)]
    #[case(ArenaError::Persistence("disk".to_string()), 500)]
    fn test_status_codes(#[case] err: ArenaError, #[case] code: u16) {
        assert_eq!(err.status_code(), code);
    }

    #[test]
    fn test_only_conflict_is_retryable() {
        assert!(ArenaError::Conflict.is_retryable());
        assert!(!ArenaError::NotYourTurn.is_retryable());
        assert!(!ArenaError::InvalidState(BattleStatus::Draw).is_retryable());
    }

    #[test]
    fn test_store_errors_map_to_arena_errors() {
        assert!(matches!(ArenaError::from(StoreError::Conflict), ArenaError::Conflict));
        assert!(matches!(
            ArenaError::from(StoreError::Closed(BattleStatus::Player2Won)),
            ArenaError::InvalidState(BattleStatus::Player2Won)
        ));
        assert!(matches!(
            ArenaError::from(StoreError::CorruptedData("bad json".to_string())),
            ArenaError::Persistence(_)
        ));
    }
}
