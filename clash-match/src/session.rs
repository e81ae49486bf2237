use crate::ledger::ContributionLedger;
use crate::{MatchError, Result};
use clash_core::{LobbyId, PlayerId, Roster, TeamId, Tokens};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared prize pool state for one active match.
///
/// One `Session` is owned by one match; the lifecycle and the settlement
/// engine hold it through an `Arc`.
#[derive(Debug, Default)]
pub struct Session {
    lobby: RwLock<Option<LobbyId>>,
    roster: RwLock<Option<Roster>>,
    ledger: ContributionLedger,
    winning_team: RwLock<Option<TeamId>>,
    started: AtomicBool,
    settling: AtomicBool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ledger(&self) -> &ContributionLedger {
        &self.ledger
    }

    pub fn lobby_id(&self) -> Option<LobbyId> {
        self.lobby.read().clone()
    }

    pub(crate) fn set_lobby(&self, lobby: LobbyId) {
        *self.lobby.write() = Some(lobby);
    }

    pub fn roster(&self) -> Option<Roster> {
        self.roster.read().clone()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// One-shot latch for the lobby reaching capacity. Only the first caller
    /// since the last reset gets `true`.
    pub(crate) fn try_mark_full(&self) -> bool {
        self.started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Install the roster for this session. A roster is never replaced
    /// mid-session.
    pub fn publish_roster(&self, roster: Roster) -> Result<()> {
        let mut slot = self.roster.write();
        if slot.is_some() {
            return Err(MatchError::InvalidState(
                "Roster already published for this session".to_string(),
            ));
        }
        *slot = Some(roster);
        Ok(())
    }

    /// Record a contribution from a rostered player.
    ///
    /// The roster read lock is held while the ledger records, so a
    /// concurrent `reset` cannot clear the roster in between.
    pub fn contribute(&self, player: &PlayerId, amount: Tokens) -> Result<Tokens> {
        if amount.is_zero() {
            return Err(MatchError::InvalidAmount);
        }

        let roster = self.roster.read();
        let members = roster.as_ref().ok_or(MatchError::SessionNotStarted)?;
        if !members.contains(player) {
            return Err(MatchError::NotOnRoster(player.clone()));
        }

        self.ledger.record_contribution(player, amount)
    }

    pub fn pool_total(&self) -> Tokens {
        self.ledger.pool_total()
    }

    pub fn winning_team(&self) -> Option<TeamId> {
        *self.winning_team.read()
    }

    pub(crate) fn record_winner(&self, team: Option<TeamId>) {
        *self.winning_team.write() = team;
    }

    pub fn is_settling(&self) -> bool {
        self.settling.load(Ordering::SeqCst)
    }

    /// Claim the single settlement slot. The flag is released when the
    /// returned guard is dropped, whichever way settlement ends.
    pub(crate) fn begin_settlement(&self) -> Option<SettlementGuard<'_>> {
        self.settling
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| SettlementGuard { session: self })
    }

    /// Clear roster, contributions, winner and the capacity latch.
    pub fn reset(&self) -> Result<()> {
        if self.is_settling() {
            return Err(MatchError::InvalidState(
                "Cannot reset while a settlement is running".to_string(),
            ));
        }

        *self.lobby.write() = None;
        *self.winning_team.write() = None;
        {
            let mut roster = self.roster.write();
            *roster = None;
            self.ledger.reset();
        }
        self.started.store(false, Ordering::SeqCst);

        tracing::debug!("Session state reset");
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct SettlementGuard<'a> {
    session: &'a Session,
}

impl Drop for SettlementGuard<'_> {
    fn drop(&mut self) {
        self.session.settling.store(false, Ordering::SeqCst);
    }
}
