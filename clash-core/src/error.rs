use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClashError>;

#[derive(Error, Debug)]
pub enum ClashError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Roster codec error: {0}")]
    Codec(String),

    #[error("Insufficient funds: need {need} tokens, have {available} tokens")]
    InsufficientFunds { need: u64, available: u64 },

    #[error("Lobby not found: {id}")]
    LobbyNotFound { id: String },

    #[error("Lobby is full: {id}")]
    LobbyFull { id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClashError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
