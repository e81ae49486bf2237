//! Team-stake matches over a shared prize pool
//!
//! Players quick-join a lobby, get split into balanced teams once it fills,
//! and contribute tokens to a common pool. Settlement waits until every
//! rostered player has contributed, then pays the whole pool to the team
//! with the largest total, in proportion to each winner's contribution.

pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod session;
pub mod settlement;
pub mod teams;

pub use coordinator::Match;
pub use error::{MatchError, Result};
pub use ledger::{ContributionLedger, Coverage, LedgerSnapshot};
pub use lifecycle::{LifecycleState, LobbyLifecycle};
pub use session::Session;
pub use settlement::{
    determine_winner, plan_distribution, team_totals, DistributionPlan, FailedPayout, Forfeit,
    Payout, SettleOutcome, SettlementEngine, SettlementReport, Share,
};
pub use teams::assign_teams;

use clash_core::{
    AnonymousIdentity, MatchConfig, MatchmakingService, PlayerId, Roster, TeamId, Tokens,
    WalletService,
};
use std::sync::Arc;

/// Create a match for an anonymous player that signs in straight away.
pub async fn join_anonymously(
    config: MatchConfig,
    matchmaking: Arc<dyn MatchmakingService>,
    wallets: Arc<dyn WalletService>,
) -> Result<(Match, PlayerId)> {
    let game = Match::new(
        config,
        matchmaking,
        Arc::new(AnonymousIdentity::new()),
        wallets,
    )?;
    let player = game.sign_in().await?;
    Ok((game, player))
}

/// Plan a settlement for a fixed roster and contribution set without any
/// lobby or wallet involved.
pub fn preview_settlement<I>(roster: &Roster, contributions: I) -> Result<DistributionPlan>
where
    I: IntoIterator<Item = (PlayerId, Tokens)>,
{
    let ledger = ContributionLedger::new();
    for (player, amount) in contributions {
        ledger.record_contribution(&player, amount)?;
    }
    plan_distribution(roster, &ledger.snapshot())
}

/// Team of every player, grouped by team id.
pub fn teams_of(roster: &Roster) -> Vec<(TeamId, Vec<PlayerId>)> {
    roster
        .team_ids()
        .into_iter()
        .map(|team| (team, roster.members(team).into_iter().cloned().collect()))
        .collect()
}
