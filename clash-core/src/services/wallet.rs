use crate::error::{ClashError, Result};
use crate::services::WalletService;
use crate::types::{PlayerId, Tokens};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub const DEFAULT_STARTING_BALANCE: Tokens = Tokens::new(100);

/// In-memory token balances. Unknown players start with a fixed balance.
#[derive(Debug)]
pub struct MemoryWallets {
    balances: RwLock<HashMap<PlayerId, Tokens>>,
    starting_balance: Tokens,
    offline: AtomicBool,
    failing: RwLock<HashSet<PlayerId>>,
    credit_calls: AtomicUsize,
    debit_calls: AtomicUsize,
}

impl Default for MemoryWallets {
    fn default() -> Self {
        Self::new(DEFAULT_STARTING_BALANCE)
    }
}

impl MemoryWallets {
    pub fn new(starting_balance: Tokens) -> Self {
        Self {
            balances: RwLock::new(HashMap::new()),
            starting_balance,
            offline: AtomicBool::new(false),
            failing: RwLock::new(HashSet::new()),
            credit_calls: AtomicUsize::new(0),
            debit_calls: AtomicUsize::new(0),
        }
    }

    /// While offline every call fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make every call for `player` fail with a transport error.
    pub fn fail_for(&self, player: impl Into<PlayerId>) {
        self.failing.write().insert(player.into());
    }

    pub fn credit_calls(&self) -> usize {
        self.credit_calls.load(Ordering::SeqCst)
    }

    pub fn debit_calls(&self) -> usize {
        self.debit_calls.load(Ordering::SeqCst)
    }

    pub fn balance_of(&self, player: &PlayerId) -> Tokens {
        self.balances
            .read()
            .get(player)
            .copied()
            .unwrap_or(self.starting_balance)
    }

    fn check_reachable(&self, player: &PlayerId) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ClashError::transport("wallet service unreachable"));
        }
        if self.failing.read().contains(player) {
            return Err(ClashError::transport(format!(
                "wallet update rejected for {}",
                player
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl WalletService for MemoryWallets {
    async fn credit(&self, player: &PlayerId, amount: Tokens) -> Result<Tokens> {
        self.credit_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable(player)?;

        let mut balances = self.balances.write();
        let balance = balances
            .entry(player.clone())
            .or_insert(self.starting_balance);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| ClashError::internal("balance overflow"))?;

        Ok(*balance)
    }

    async fn debit(&self, player: &PlayerId, amount: Tokens) -> Result<Tokens> {
        self.debit_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable(player)?;

        let mut balances = self.balances.write();
        let balance = balances
            .entry(player.clone())
            .or_insert(self.starting_balance);
        *balance = balance
            .checked_sub(amount)
            .ok_or(ClashError::InsufficientFunds {
                need: amount.get(),
                available: balance.get(),
            })?;

        Ok(*balance)
    }

    async fn balance(&self, player: &PlayerId) -> Result<Tokens> {
        self.check_reachable(player)?;
        Ok(self.balance_of(player))
    }
}
