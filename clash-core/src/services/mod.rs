//! Contracts for the remote collaborators a match depends on, plus
//! in-memory implementations used by the CLI simulation and tests.

pub mod identity;
pub mod matchmaking;
pub mod wallet;

pub use identity::AnonymousIdentity;
pub use matchmaking::MemoryMatchmaker;
pub use wallet::MemoryWallets;

use crate::error::Result;
use crate::types::{LobbyDescriptor, LobbyId, LobbyMetadata, PlayerId, QuickJoin, Tokens};
use async_trait::async_trait;

/// Remote lobby backend. Every call is fallible and may suspend.
#[async_trait]
pub trait MatchmakingService: Send + Sync {
    /// Join the oldest open lobby, or report that none is open.
    async fn quick_join(&self, player: &PlayerId) -> Result<QuickJoin>;

    async fn create(
        &self,
        host: &PlayerId,
        capacity: usize,
        metadata: LobbyMetadata,
    ) -> Result<LobbyDescriptor>;

    /// Keep the lobby alive on the backend.
    async fn heartbeat(&self, lobby: &LobbyId) -> Result<()>;

    async fn poll(&self, lobby: &LobbyId) -> Result<LobbyDescriptor>;

    async fn update_metadata(&self, lobby: &LobbyId, blob: String) -> Result<()>;

    async fn leave(&self, lobby: &LobbyId, player: &PlayerId) -> Result<()>;
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn sign_in(&self) -> Result<PlayerId>;

    /// Only available once sign-in has completed.
    fn current_player_id(&self) -> Option<PlayerId>;
}

/// Token balances owned by the wallet backend.
#[async_trait]
pub trait WalletService: Send + Sync {
    /// Returns the new balance.
    async fn credit(&self, player: &PlayerId, amount: Tokens) -> Result<Tokens>;

    /// Returns the new balance.
    async fn debit(&self, player: &PlayerId, amount: Tokens) -> Result<Tokens>;

    async fn balance(&self, player: &PlayerId) -> Result<Tokens>;
}
