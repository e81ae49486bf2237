//! Winner determination and proportional prize distribution.
//!
//! Settlement waits until every rostered player has contributed, sums
//! contributions per team, and pays the whole pool to the team with the
//! largest total. Each winner receives `contribution * pool / team_total`,
//! floored to whole tokens. Losing contributions are forfeit.
//!
//! Ties go to the lowest team id. An empty pool has no winner and ends the
//! settlement with [`MatchError::NoContributions`].

use crate::ledger::LedgerSnapshot;
use crate::session::Session;
use crate::{MatchError, Result};
use chrono::{DateTime, Utc};
use clash_core::{MatchConfig, PlayerId, Roster, TeamId, Tokens, WalletService};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub player: PlayerId,
    pub contribution: Tokens,
    pub amount: Tokens,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forfeit {
    pub player: PlayerId,
    pub team: Option<TeamId>,
    pub amount: Tokens,
}

/// What a settlement will pay, computed without touching any wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionPlan {
    pub winning_team: TeamId,
    pub pool: Tokens,
    pub team_totals: BTreeMap<TeamId, Tokens>,
    pub shares: Vec<Share>,
    pub forfeited: Vec<Forfeit>,
    /// Remainder left by flooring each share.
    pub dust: Tokens,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub player: PlayerId,
    pub amount: Tokens,
    pub new_balance: Tokens,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPayout {
    pub player: PlayerId,
    pub amount: Tokens,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReport {
    pub winning_team: TeamId,
    pub pool: Tokens,
    pub team_totals: BTreeMap<TeamId, Tokens>,
    pub payouts: Vec<Payout>,
    pub failed_payouts: Vec<FailedPayout>,
    pub forfeited: Vec<Forfeit>,
    pub dust: Tokens,
    pub settled_at: DateTime<Utc>,
}

impl SettlementReport {
    pub fn paid_out(&self) -> Tokens {
        self.payouts.iter().map(|p| p.amount).sum()
    }

    pub fn payout_for(&self, player: &PlayerId) -> Tokens {
        self.payouts
            .iter()
            .find(|p| &p.player == player)
            .map_or(Tokens::ZERO, |p| p.amount)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    Settled(SettlementReport),
    /// Another settlement already holds the session; nothing was done.
    AlreadyRunning,
}

/// Sum of member contributions for every team present in the roster.
pub fn team_totals(roster: &Roster, snapshot: &LedgerSnapshot) -> BTreeMap<TeamId, Tokens> {
    let mut totals = BTreeMap::new();
    for (player, team) in roster.iter() {
        let total = totals.entry(team).or_insert(Tokens::ZERO);
        *total = *total + snapshot.contribution_of(player);
    }
    totals
}

/// Team with the strictly greatest total, lowest id on ties. `None` when no
/// team has a positive total.
pub fn determine_winner(totals: &BTreeMap<TeamId, Tokens>) -> Option<TeamId> {
    let mut best: Option<(TeamId, Tokens)> = None;
    for (team, total) in totals {
        if total.is_zero() {
            continue;
        }
        match best {
            Some((_, best_total)) if *total <= best_total => {}
            _ => best = Some((*team, *total)),
        }
    }
    best.map(|(team, _)| team)
}

pub fn plan_distribution(roster: &Roster, snapshot: &LedgerSnapshot) -> Result<DistributionPlan> {
    if snapshot.pool.is_zero() {
        return Err(MatchError::NoContributions);
    }

    let totals = team_totals(roster, snapshot);
    let winning_team = determine_winner(&totals).ok_or(MatchError::NoContributions)?;
    let winning_total = totals.get(&winning_team).copied().unwrap_or(Tokens::ZERO);

    let mut shares = Vec::new();
    let mut forfeited = Vec::new();

    for (player, contribution) in &snapshot.contributions {
        match roster.team_of(player) {
            Some(team) if team == winning_team => {
                shares.push(Share {
                    player: player.clone(),
                    contribution: *contribution,
                    amount: contribution.mul_div(snapshot.pool, winning_total),
                });
            }
            team => forfeited.push(Forfeit {
                player: player.clone(),
                team,
                amount: *contribution,
            }),
        }
    }

    let distributed: Tokens = shares.iter().map(|s| s.amount).sum();

    Ok(DistributionPlan {
        winning_team,
        pool: snapshot.pool,
        team_totals: totals,
        shares,
        forfeited,
        dust: snapshot.pool.saturating_sub(distributed),
    })
}

/// Runs one settlement at a time over a shared session.
pub struct SettlementEngine {
    session: Arc<Session>,
    wallets: Arc<dyn WalletService>,
    coverage_check_interval: Duration,
    coverage_timeout: Option<Duration>,
}

impl SettlementEngine {
    pub fn new(session: Arc<Session>, wallets: Arc<dyn WalletService>, config: &MatchConfig) -> Self {
        Self {
            session,
            wallets,
            coverage_check_interval: config.coverage_check_interval,
            coverage_timeout: config.coverage_timeout,
        }
    }

    /// Wait for every rostered player to contribute, pick the winning team
    /// and credit its members.
    ///
    /// Returns [`SettleOutcome::AlreadyRunning`] without side effects if a
    /// settlement is in flight. On [`MatchError::NoContributions`] and
    /// [`MatchError::CoverageTimeout`] the pool is emptied and any recorded
    /// contributions are refunded. Individual payout failures are reported
    /// in the returned report and do not stop other payouts.
    pub async fn settle_and_distribute(&self) -> Result<SettleOutcome> {
        let Some(_guard) = self.session.begin_settlement() else {
            tracing::warn!("Prize distribution is already in progress");
            return Ok(SettleOutcome::AlreadyRunning);
        };

        let roster = self.session.roster().ok_or(MatchError::SessionNotStarted)?;
        let players: Vec<PlayerId> = roster.players().cloned().collect();

        let snapshot = match self.await_coverage(&players).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Settlement aborted: {}", e);
                let held = self.session.ledger().drain();
                self.refund(&held).await;
                self.session.record_winner(None);
                return Err(e);
            }
        };

        tracing::info!(
            "All {} players contributed, pool is {} tokens",
            players.len(),
            snapshot.pool
        );

        let plan = match plan_distribution(&roster, &snapshot) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!("Settlement aborted: {}", e);
                self.refund(&snapshot).await;
                self.session.record_winner(None);
                return Err(e);
            }
        };

        for (team, total) in &plan.team_totals {
            tracing::info!("Team {} contributed {} tokens", team, total);
        }
        tracing::info!(
            "Winning team: {} with {} tokens",
            plan.winning_team,
            plan.team_totals
                .get(&plan.winning_team)
                .copied()
                .unwrap_or(Tokens::ZERO)
        );
        for forfeit in &plan.forfeited {
            tracing::info!(
                "Player {} loses their contribution of {}",
                forfeit.player,
                forfeit.amount
            );
        }

        let report = self.distribute(plan).await;
        self.session.record_winner(Some(report.winning_team));

        Ok(SettleOutcome::Settled(report))
    }

    async fn await_coverage(&self, players: &[PlayerId]) -> Result<LedgerSnapshot> {
        let wait = self
            .session
            .ledger()
            .wait_for_coverage(players, self.coverage_check_interval);

        match self.coverage_timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| MatchError::CoverageTimeout(limit)),
            None => Ok(wait.await),
        }
    }

    async fn distribute(&self, plan: DistributionPlan) -> SettlementReport {
        let credits = plan
            .shares
            .iter()
            .filter(|share| !share.amount.is_zero())
            .map(|share| async move {
                let result = self.wallets.credit(&share.player, share.amount).await;
                (share, result)
            });

        let mut payouts = Vec::new();
        let mut failed_payouts = Vec::new();

        for (share, result) in join_all(credits).await {
            match result {
                Ok(new_balance) => {
                    tracing::info!(
                        "Player {} receives {} tokens as their prize. New balance: {}",
                        share.player,
                        share.amount,
                        new_balance
                    );
                    payouts.push(Payout {
                        player: share.player.clone(),
                        amount: share.amount,
                        new_balance,
                    });
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to credit {} tokens to player {}: {}",
                        share.amount,
                        share.player,
                        e
                    );
                    failed_payouts.push(FailedPayout {
                        player: share.player.clone(),
                        amount: share.amount,
                        reason: e.to_string(),
                    });
                }
            }
        }

        SettlementReport {
            winning_team: plan.winning_team,
            pool: plan.pool,
            team_totals: plan.team_totals,
            payouts,
            failed_payouts,
            forfeited: plan.forfeited,
            dust: plan.dust,
            settled_at: Utc::now(),
        }
    }

    async fn refund(&self, held: &LedgerSnapshot) {
        let refunds = held
            .contributions
            .iter()
            .filter(|(_, amount)| !amount.is_zero())
            .map(|(player, amount)| async move {
                (player, *amount, self.wallets.credit(player, *amount).await)
            });

        for (player, amount, result) in join_all(refunds).await {
            match result {
                Ok(_) => tracing::info!("Refunded {} tokens to player {}", amount, player),
                Err(e) => tracing::error!(
                    "Failed to refund {} tokens to player {}: {}",
                    amount,
                    player,
                    e
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clash_core::MemoryWallets;

    fn p(id: &str) -> PlayerId {
        PlayerId::from(id)
    }

    fn roster(pairs: &[(&str, u32)]) -> Roster {
        pairs
            .iter()
            .map(|(id, team)| (p(id), TeamId::new(*team)))
            .collect()
    }

    fn snapshot(pairs: &[(&str, u64)]) -> LedgerSnapshot {
        let contributions: BTreeMap<PlayerId, Tokens> = pairs
            .iter()
            .map(|(id, amount)| (p(id), Tokens::new(*amount)))
            .collect();
        let pool = contributions.values().copied().sum();
        LedgerSnapshot {
            contributions,
            pool,
        }
    }

    fn setup(
        pairs: &[(&str, u32)],
        config: MatchConfig,
    ) -> (Arc<Session>, Arc<MemoryWallets>, SettlementEngine) {
        let session = Arc::new(Session::new());
        session.publish_roster(roster(pairs)).unwrap();
        let wallets = Arc::new(MemoryWallets::new(Tokens::ZERO));
        let engine = SettlementEngine::new(session.clone(), wallets.clone(), &config);
        (session, wallets, engine)
    }

    #[test]
    fn test_team_totals_include_empty_teams() {
        let totals = team_totals(
            &roster(&[("a", 1), ("b", 1), ("c", 2)]),
            &snapshot(&[("a", 6), ("b", 4)]),
        );
        assert_eq!(totals.get(&TeamId::new(1)), Some(&Tokens::new(10)));
        assert_eq!(totals.get(&TeamId::new(2)), Some(&Tokens::ZERO));
    }

    #[test]
    fn test_tie_goes_to_lowest_team_id() {
        let totals: BTreeMap<TeamId, Tokens> = [
            (TeamId::new(2), Tokens::new(10)),
            (TeamId::new(1), Tokens::new(10)),
        ]
        .into_iter()
        .collect();
        assert_eq!(determine_winner(&totals), Some(TeamId::new(1)));

        let totals: BTreeMap<TeamId, Tokens> = [
            (TeamId::new(1), Tokens::new(3)),
            (TeamId::new(2), Tokens::new(7)),
            (TeamId::new(3), Tokens::new(7)),
        ]
        .into_iter()
        .collect();
        assert_eq!(determine_winner(&totals), Some(TeamId::new(2)));
    }

    #[test]
    fn test_all_zero_has_no_winner() {
        let totals: BTreeMap<TeamId, Tokens> = [
            (TeamId::new(1), Tokens::ZERO),
            (TeamId::new(2), Tokens::ZERO),
        ]
        .into_iter()
        .collect();
        assert_eq!(determine_winner(&totals), None);
        assert_eq!(determine_winner(&BTreeMap::new()), None);
    }

    #[test]
    fn test_plan_proportional_shares() {
        let plan = plan_distribution(
            &roster(&[("a", 1), ("b", 1), ("c", 2)]),
            &snapshot(&[("a", 6), ("b", 4), ("c", 5)]),
        )
        .unwrap();

        assert_eq!(plan.winning_team, TeamId::new(1));
        assert_eq!(plan.pool, Tokens::new(15));
        let amounts: Vec<(PlayerId, Tokens)> = plan
            .shares
            .iter()
            .map(|s| (s.player.clone(), s.amount))
            .collect();
        assert_eq!(
            amounts,
            vec![(p("a"), Tokens::new(9)), (p("b"), Tokens::new(6))]
        );
        assert_eq!(plan.forfeited.len(), 1);
        assert_eq!(plan.forfeited[0].player, p("c"));
        assert_eq!(plan.dust, Tokens::ZERO);
    }

    #[test]
    fn test_plan_reports_rounding_dust() {
        let plan = plan_distribution(
            &roster(&[("a", 1), ("b", 1), ("c", 1), ("d", 2)]),
            &snapshot(&[("a", 1), ("b", 1), ("c", 1), ("d", 1)]),
        )
        .unwrap();
        // each winner gets floor(1 * 4 / 3) = 1
        assert!(plan.shares.iter().all(|s| s.amount == Tokens::new(1)));
        assert_eq!(plan.dust, Tokens::new(1));
    }

    #[test]
    fn test_plan_empty_pool() {
        assert!(matches!(
            plan_distribution(&roster(&[("a", 1), ("b", 2)]), &LedgerSnapshot::default()),
            Err(MatchError::NoContributions)
        ));
    }

    #[tokio::test]
    async fn test_settle_three_players() {
        let (session, wallets, engine) =
            setup(&[("A", 1), ("B", 1), ("C", 2)], MatchConfig::default());
        session.contribute(&p("A"), Tokens::new(6)).unwrap();
        session.contribute(&p("B"), Tokens::new(4)).unwrap();
        session.contribute(&p("C"), Tokens::new(5)).unwrap();

        let report = match engine.settle_and_distribute().await.unwrap() {
            SettleOutcome::Settled(report) => report,
            other => panic!("unexpected {:?}", other),
        };

        assert_eq!(report.winning_team, TeamId::new(1));
        assert_eq!(report.pool, Tokens::new(15));
        assert_eq!(report.payout_for(&p("A")), Tokens::new(9));
        assert_eq!(report.payout_for(&p("B")), Tokens::new(6));
        assert_eq!(report.payout_for(&p("C")), Tokens::ZERO);
        assert_eq!(wallets.balance_of(&p("A")), Tokens::new(9));
        assert_eq!(wallets.balance_of(&p("C")), Tokens::ZERO);
        assert_eq!(session.pool_total(), Tokens::ZERO);
        assert_eq!(session.winning_team(), Some(TeamId::new(1)));
        assert!(!session.is_settling());
    }

    #[tokio::test]
    async fn test_settle_tie_pays_team_one() {
        let (session, wallets, engine) = setup(&[("A", 1), ("B", 2)], MatchConfig::default());
        session.contribute(&p("A"), Tokens::new(5)).unwrap();
        session.contribute(&p("B"), Tokens::new(5)).unwrap();

        let outcome = engine.settle_and_distribute().await.unwrap();
        let SettleOutcome::Settled(report) = outcome else {
            panic!("expected settlement");
        };
        assert_eq!(report.winning_team, TeamId::new(1));
        assert_eq!(wallets.balance_of(&p("A")), Tokens::new(10));
        assert_eq!(wallets.balance_of(&p("B")), Tokens::ZERO);
    }

    #[tokio::test]
    async fn test_empty_roster_reports_no_contributions() {
        let (session, wallets, engine) = setup(&[], MatchConfig::default());

        let err = engine.settle_and_distribute().await.unwrap_err();
        assert!(matches!(err, MatchError::NoContributions));
        assert_eq!(wallets.credit_calls(), 0);
        assert!(!session.is_settling());
        assert_eq!(session.winning_team(), None);
    }

    #[tokio::test]
    async fn test_partial_payout_failure_does_not_block_others() {
        let (session, wallets, engine) =
            setup(&[("A", 1), ("B", 1), ("C", 2)], MatchConfig::default());
        wallets.fail_for("A");
        session.contribute(&p("A"), Tokens::new(6)).unwrap();
        session.contribute(&p("B"), Tokens::new(4)).unwrap();
        session.contribute(&p("C"), Tokens::new(5)).unwrap();

        let SettleOutcome::Settled(report) = engine.settle_and_distribute().await.unwrap() else {
            panic!("expected settlement");
        };
        assert_eq!(report.failed_payouts.len(), 1);
        assert_eq!(report.failed_payouts[0].player, p("A"));
        assert_eq!(report.failed_payouts[0].amount, Tokens::new(9));
        assert_eq!(wallets.balance_of(&p("B")), Tokens::new(6));
        assert_eq!(session.pool_total(), Tokens::ZERO);
        assert!(!session.is_settling());
    }

    #[tokio::test]
    async fn test_settle_without_roster() {
        let session = Arc::new(Session::new());
        let wallets = Arc::new(MemoryWallets::default());
        let engine = SettlementEngine::new(session.clone(), wallets, &MatchConfig::default());

        assert!(matches!(
            engine.settle_and_distribute().await,
            Err(MatchError::SessionNotStarted)
        ));
        assert!(!session.is_settling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_settle_runs_once() {
        let (session, wallets, engine) = setup(&[("A", 1), ("B", 2)], MatchConfig::default());
        let engine = Arc::new(engine);
        session.contribute(&p("A"), Tokens::new(3)).unwrap();

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.settle_and_distribute().await })
        };
        while !session.is_settling() {
            tokio::task::yield_now().await;
        }

        let second = engine.settle_and_distribute().await.unwrap();
        assert_eq!(second, SettleOutcome::AlreadyRunning);

        session.contribute(&p("B"), Tokens::new(1)).unwrap();
        let first = first.await.unwrap().unwrap();
        assert!(matches!(first, SettleOutcome::Settled(_)));
        assert_eq!(wallets.credit_calls(), 1);
        assert_eq!(wallets.balance_of(&p("A")), Tokens::new(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_coverage_barrier_waits_for_missing_player() {
        let (session, wallets, engine) =
            setup(&[("A", 1), ("B", 1), ("C", 2)], MatchConfig::default());
        let engine = Arc::new(engine);
        session.contribute(&p("A"), Tokens::new(6)).unwrap();
        session.contribute(&p("C"), Tokens::new(5)).unwrap();

        let settle = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.settle_and_distribute().await })
        };

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!settle.is_finished());
        assert_eq!(wallets.credit_calls(), 0);
        assert_eq!(session.pool_total(), Tokens::new(11));

        session.contribute(&p("B"), Tokens::new(4)).unwrap();
        let SettleOutcome::Settled(report) = settle.await.unwrap().unwrap() else {
            panic!("expected settlement");
        };
        assert_eq!(report.pool, Tokens::new(15));
        assert_eq!(report.payout_for(&p("A")), Tokens::new(9));
    }

    // Coverage wait is bounded: the configured timeout aborts settlement and
    // refunds whatever was recorded.
    #[tokio::test(start_paused = true)]
    async fn test_coverage_timeout_aborts_and_refunds() {
        let config = MatchConfig::default().with_coverage_timeout(Some(Duration::from_secs(10)));
        let (session, wallets, engine) = setup(&[("A", 1), ("B", 2)], config);
        session.contribute(&p("A"), Tokens::new(7)).unwrap();

        let err = engine.settle_and_distribute().await.unwrap_err();
        assert!(matches!(err, MatchError::CoverageTimeout(d) if d == Duration::from_secs(10)));
        assert_eq!(wallets.balance_of(&p("A")), Tokens::new(7));
        assert_eq!(session.pool_total(), Tokens::ZERO);
        assert!(!session.is_settling());
        assert_eq!(session.winning_team(), None);
    }

    // With the timeout disabled the barrier keeps waiting.
    #[tokio::test(start_paused = true)]
    async fn test_coverage_without_timeout_keeps_waiting() {
        let config = MatchConfig::default().with_coverage_timeout(None);
        let (session, _wallets, engine) = setup(&[("A", 1), ("B", 2)], config);
        session.contribute(&p("A"), Tokens::new(7)).unwrap();

        let waited = tokio::time::timeout(
            Duration::from_secs(3600),
            engine.settle_and_distribute(),
        )
        .await;
        assert!(waited.is_err());
        assert!(!session.is_settling());
    }
}
