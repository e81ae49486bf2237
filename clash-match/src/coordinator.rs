use crate::lifecycle::{LifecycleState, LobbyLifecycle};
use crate::session::Session;
use crate::settlement::{SettleOutcome, SettlementEngine, SettlementReport};
use crate::{MatchError, Result};
use clash_core::{
    IdentityService, LobbyDescriptor, MatchConfig, MatchmakingService, PlayerId, Roster, TeamId,
    Tokens, WalletService,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;

/// One team-stake match: a lobby lifecycle, a contribution pool and the
/// settlement that pays it out, all over a single owned [`Session`].
pub struct Match {
    config: MatchConfig,
    session: Arc<Session>,
    lifecycle: LobbyLifecycle,
    settlement: SettlementEngine,
    identity: Arc<dyn IdentityService>,
    wallets: Arc<dyn WalletService>,
    last_report: RwLock<Option<SettlementReport>>,
}

impl Match {
    pub fn new(
        config: MatchConfig,
        matchmaking: Arc<dyn MatchmakingService>,
        identity: Arc<dyn IdentityService>,
        wallets: Arc<dyn WalletService>,
    ) -> Result<Self> {
        config.validate()?;

        let session = Arc::new(Session::new());
        let lifecycle = LobbyLifecycle::new(
            config.clone(),
            session.clone(),
            matchmaking,
            identity.clone(),
        );
        let settlement = SettlementEngine::new(session.clone(), wallets.clone(), &config);

        Ok(Self {
            config,
            session,
            lifecycle,
            settlement,
            identity,
            wallets,
            last_report: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub async fn sign_in(&self) -> Result<PlayerId> {
        Ok(self.identity.sign_in().await?)
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        self.identity.current_player_id()
    }

    pub async fn start_lifecycle(&self) -> Result<LobbyDescriptor> {
        self.lifecycle.start().await
    }

    pub async fn wait_for_session(&self) -> Result<Roster> {
        self.lifecycle.wait_for_session().await
    }

    pub async fn stop(&self) {
        self.lifecycle.stop().await
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// Record `amount` for `player` without moving any tokens.
    pub fn contribute(&self, player: &PlayerId, amount: Tokens) -> Result<Tokens> {
        let total = self.session.contribute(player, amount)?;
        tracing::info!(
            "{} contributed {} (total {}, pool {})",
            player,
            amount,
            total,
            self.session.pool_total()
        );
        Ok(total)
    }

    /// Debit `amount` from the player's wallet, then record it. If recording
    /// fails after the debit, the tokens are credited back.
    pub async fn stake(&self, player: &PlayerId, amount: Tokens) -> Result<Tokens> {
        if amount.is_zero() {
            return Err(MatchError::InvalidAmount);
        }
        let roster = self.session.roster().ok_or(MatchError::SessionNotStarted)?;
        if !roster.contains(player) {
            return Err(MatchError::NotOnRoster(player.clone()));
        }
        if self.session.ledger().is_closed() {
            return Err(MatchError::PoolClosed);
        }

        let balance = self.wallets.debit(player, amount).await?;
        tracing::debug!("Debited {} from {} (balance {})", amount, player, balance);

        match self.contribute(player, amount) {
            Ok(total) => Ok(total),
            Err(e) => {
                if let Err(refund) = self.wallets.credit(player, amount).await {
                    tracing::error!(
                        "Refund of {} to {} failed after rejected stake: {}",
                        amount,
                        player,
                        refund
                    );
                }
                Err(e)
            }
        }
    }

    /// Settle the pool and reset the session for the next round.
    ///
    /// The session is reset whether settlement paid out or aborted, but not
    /// when another settlement was already running.
    pub async fn settle_and_distribute(&self) -> Result<SettleOutcome> {
        let outcome = self.settlement.settle_and_distribute().await;

        match &outcome {
            Ok(SettleOutcome::AlreadyRunning) => return outcome,
            Ok(SettleOutcome::Settled(report)) => {
                *self.last_report.write() = Some(report.clone());
            }
            Err(e) => tracing::warn!("Settlement ended without payout: {}", e),
        }

        if let Err(e) = self.reset() {
            tracing::warn!("Session reset after settlement failed: {}", e);
        }

        outcome
    }

    pub fn current_roster(&self) -> Option<Roster> {
        self.session.roster()
    }

    pub fn current_pool_total(&self) -> Tokens {
        self.session.pool_total()
    }

    pub fn last_report(&self) -> Option<SettlementReport> {
        self.last_report.read().clone()
    }

    pub fn last_winner(&self) -> Option<TeamId> {
        self.last_report
            .read()
            .as_ref()
            .map(|report| report.winning_team)
    }

    pub async fn balance(&self, player: &PlayerId) -> Result<Tokens> {
        Ok(self.wallets.balance(player).await?)
    }

    /// Clear the session and return the lifecycle to `Idle`. Fails while a
    /// settlement is running.
    pub fn reset(&self) -> Result<()> {
        self.session.reset()?;
        self.lifecycle.rearm();
        Ok(())
    }
}
