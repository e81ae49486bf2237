//! Clash core - shared types and collaborator contracts for team-stake matches
//!
//! This crate holds the vocabulary every other crate speaks: player, team and
//! token types, the lobby descriptor mirrored from the matchmaking backend,
//! the roster codec carried in lobby data, match configuration, and the
//! service traits for matchmaking, identity and wallets.

pub mod config;
pub mod error;
pub mod roster;
pub mod services;
pub mod types;

pub use config::MatchConfig;
pub use error::{ClashError, Result};
pub use roster::Roster;
pub use services::{
    AnonymousIdentity, IdentityService, MatchmakingService, MemoryMatchmaker, MemoryWallets,
    WalletService,
};
pub use types::{LobbyDescriptor, LobbyId, LobbyMetadata, PlayerId, QuickJoin, TeamId, Tokens};
