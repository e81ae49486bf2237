use crate::{MatchError, Result};
use clash_core::{PlayerId, Tokens};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Notify;

/// Consistent copy of the ledger taken under a single lock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub contributions: BTreeMap<PlayerId, Tokens>,
    pub pool: Tokens,
}

impl LedgerSnapshot {
    pub fn contribution_of(&self, player: &PlayerId) -> Tokens {
        self.contributions
            .get(player)
            .copied()
            .unwrap_or(Tokens::ZERO)
    }
}

/// Outcome of a coverage check against a set of players.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coverage {
    /// Every player had an entry; the ledger was drained into the snapshot.
    Covered(LedgerSnapshot),
    Missing(Vec<PlayerId>),
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: HashMap<PlayerId, Tokens>,
    pool: Tokens,
    /// Set once the pool has been drained for payout; cleared by `reset`.
    closed: bool,
}

impl LedgerState {
    fn close(&mut self) -> LedgerSnapshot {
        let entries = std::mem::take(&mut self.entries);
        let pool = std::mem::replace(&mut self.pool, Tokens::ZERO);
        self.closed = true;
        LedgerSnapshot {
            contributions: entries.into_iter().collect(),
            pool,
        }
    }
}

/// Per-player contributions and the running pool total.
///
/// The pool always equals the sum of all entries: both are updated inside
/// the same critical section, and a rejected contribution touches neither.
/// Once drained the ledger stays closed until `reset`.
#[derive(Debug, Default)]
pub struct ContributionLedger {
    state: RwLock<LedgerState>,
    changed: Notify,
}

impl ContributionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to the player's entry and the pool. Returns the player's
    /// new total.
    pub fn record_contribution(&self, player: &PlayerId, amount: Tokens) -> Result<Tokens> {
        if amount.is_zero() {
            return Err(MatchError::InvalidAmount);
        }

        let total = {
            let mut state = self.state.write();
            if state.closed {
                return Err(MatchError::PoolClosed);
            }
            let current = state.entries.get(player).copied().unwrap_or(Tokens::ZERO);
            let total = current
                .checked_add(amount)
                .ok_or(MatchError::AmountOverflow)?;
            let pool = state
                .pool
                .checked_add(amount)
                .ok_or(MatchError::AmountOverflow)?;

            state.entries.insert(player.clone(), total);
            state.pool = pool;
            total
        };

        tracing::debug!(
            "Recorded contribution of {} from {} (total {})",
            amount,
            player,
            total
        );
        self.changed.notify_waiters();
        Ok(total)
    }

    pub fn contribution_of(&self, player: &PlayerId) -> Tokens {
        self.state
            .read()
            .entries
            .get(player)
            .copied()
            .unwrap_or(Tokens::ZERO)
    }

    pub fn pool_total(&self) -> Tokens {
        self.state.read().pool
    }

    /// The player's share of the pool as a percentage, 0 when unknown or
    /// when the pool is empty.
    pub fn contribution_share(&self, player: &PlayerId) -> f64 {
        let state = self.state.read();
        match state.entries.get(player) {
            Some(amount) if !state.pool.is_zero() => {
                amount.get() as f64 / state.pool.get() as f64 * 100.0
            }
            _ => 0.0,
        }
    }

    pub fn contributor_count(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state.read();
        LedgerSnapshot {
            contributions: state
                .entries
                .iter()
                .map(|(p, a)| (p.clone(), *a))
                .collect(),
            pool: state.pool,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Clear every entry and reopen the ledger for contributions.
    pub fn reset(&self) {
        *self.state.write() = LedgerState::default();
    }

    /// Empty the ledger, close it, and hand back what it held.
    pub fn drain(&self) -> LedgerSnapshot {
        self.state.write().close()
    }

    /// Check that every player has an entry and, if so, drain and close the
    /// ledger in the same critical section.
    pub fn take_if_covered<'a, I>(&self, players: I) -> Coverage
    where
        I: IntoIterator<Item = &'a PlayerId>,
    {
        let mut state = self.state.write();
        let missing: Vec<PlayerId> = players
            .into_iter()
            .filter(|p| !state.entries.contains_key(*p))
            .cloned()
            .collect();

        if !missing.is_empty() {
            return Coverage::Missing(missing);
        }

        Coverage::Covered(state.close())
    }

    /// Suspend until every player has contributed, then drain the ledger.
    ///
    /// Wakes on each recorded contribution and also re-checks every
    /// `recheck` interval.
    pub async fn wait_for_coverage(&self, players: &[PlayerId], recheck: Duration) -> LedgerSnapshot {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.take_if_covered(players) {
                Coverage::Covered(snapshot) => return snapshot,
                Coverage::Missing(missing) => {
                    tracing::debug!(
                        "Waiting for {} player(s) to contribute: {:?}",
                        missing.len(),
                        missing
                    );
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(recheck) => {}
            }
        }
    }
}
