use clash_core::PlayerId;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MatchError>;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Clash core error: {0}")]
    Core(#[from] clash_core::ClashError),

    #[error("Invalid match state: {0}")]
    InvalidState(String),

    #[error("Contribution amount must be greater than zero")]
    InvalidAmount,

    #[error("Contribution would overflow the pool")]
    AmountOverflow,

    #[error("Pool is closed while a settlement pays out")]
    PoolClosed,

    #[error("Player not on roster: {0}")]
    NotOnRoster(PlayerId),

    #[error("Session has not started")]
    SessionNotStarted,

    #[error("Player is not signed in")]
    NotSignedIn,

    #[error("Invalid team count: {0} (need at least 2)")]
    InvalidTeamCount(u32),

    #[error("No contributions to settle")]
    NoContributions,

    #[error("Contribution coverage not reached within {0:?}")]
    CoverageTimeout(Duration),

    #[error("Lobby lifecycle failed: {0}")]
    LobbyFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
