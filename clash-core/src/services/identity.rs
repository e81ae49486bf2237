use crate::error::Result;
use crate::services::IdentityService;
use crate::types::PlayerId;
use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

/// Anonymous sign-in: the first `sign_in` mints a random player id that stays
/// fixed for the lifetime of the value.
#[derive(Debug, Default)]
pub struct AnonymousIdentity {
    player: RwLock<Option<PlayerId>>,
}

impl AnonymousIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// An identity that is already signed in as `player`.
    pub fn signed_in(player: impl Into<PlayerId>) -> Self {
        Self {
            player: RwLock::new(Some(player.into())),
        }
    }
}

#[async_trait]
impl IdentityService for AnonymousIdentity {
    async fn sign_in(&self) -> Result<PlayerId> {
        let mut player = self.player.write();
        let id = player
            .get_or_insert_with(|| PlayerId::new(format!("player-{}", Uuid::new_v4().simple())))
            .clone();

        tracing::info!("Signed in as {}", id);
        Ok(id)
    }

    fn current_player_id(&self) -> Option<PlayerId> {
        self.player.read().clone()
    }
}
