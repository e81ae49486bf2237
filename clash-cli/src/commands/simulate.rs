use crate::config::CliConfig;
use anyhow::{bail, Context, Result};
use clash_core::{
    AnonymousIdentity, MatchmakingService, MemoryMatchmaker, MemoryWallets, PlayerId, Tokens,
    WalletService,
};
use clash_match::{Match, SettleOutcome, SettlementReport};
use comfy_table::{presets::UTF8_FULL, Table};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub max_stake: u64,
    /// Keep the configured lobby timers instead of compressing them.
    pub realtime: bool,
    pub json: bool,
}

/// Run one full match in memory: every player joins the same lobby, stakes
/// a random amount, and the pool is settled.
pub async fn simulate(cfg: &CliConfig, options: &SimulateOptions) -> Result<()> {
    if options.max_stake == 0 {
        bail!("--max-stake must be greater than 0");
    }

    let mut match_config = cfg.match_config.clone();
    if !options.realtime {
        match_config.heartbeat_interval = Duration::from_millis(150);
        match_config.poll_interval = Duration::from_millis(50);
        match_config.coverage_check_interval = Duration::from_millis(10);
    }

    let seed = cfg.seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);
    tracing::info!(
        "Simulating {} players on {} teams (seed {})",
        match_config.capacity,
        match_config.team_count,
        seed
    );

    let matchmaker: Arc<dyn MatchmakingService> = Arc::new(MemoryMatchmaker::new());
    let wallets = Arc::new(MemoryWallets::new(cfg.starting_balance));

    let mut players = Vec::with_capacity(match_config.capacity);
    for _ in 0..match_config.capacity {
        let game = Match::new(
            match_config.clone(),
            matchmaker.clone(),
            Arc::new(AnonymousIdentity::new()),
            wallets.clone(),
        )?;
        game.sign_in().await?;
        game.start_lifecycle().await?;
        players.push(game);
    }

    let rosters = join_all(players.iter().map(|game| game.wait_for_session())).await;
    let roster = rosters
        .into_iter()
        .next()
        .context("No players in simulation")??;

    // the first player holds the pool for everyone
    let pool = &players[0];

    let stakes: Vec<(PlayerId, Tokens)> = roster
        .players()
        .map(|player| {
            let amount = rng.gen_range(1..=options.max_stake);
            (player.clone(), Tokens::new(amount))
        })
        .collect();

    let results = join_all(
        stakes
            .iter()
            .map(|(player, amount)| pool.stake(player, *amount)),
    )
    .await;
    for ((player, amount), result) in stakes.iter().zip(results) {
        if let Err(e) = result {
            tracing::warn!("Stake of {} by {} rejected: {}", amount, player, e);
        }
    }

    let outcome = pool.settle_and_distribute().await;

    for game in &players {
        game.stop().await;
    }

    let report = match outcome? {
        SettleOutcome::Settled(report) => report,
        SettleOutcome::AlreadyRunning => bail!("Settlement was already running"),
    };

    if options.json {
        println!("{}", report.to_json()?);
        return Ok(());
    }

    print_report(&report, &roster, &stakes, wallets.as_ref()).await?;
    Ok(())
}

async fn print_report(
    report: &SettlementReport,
    roster: &clash_core::Roster,
    stakes: &[(PlayerId, Tokens)],
    wallets: &dyn WalletService,
) -> Result<()> {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Player", "Team", "Stake", "Payout", "Balance"]);

    for (player, stake) in stakes {
        let team = roster
            .team_of(player)
            .map_or_else(|| "-".to_string(), |t| t.to_string());
        let balance = wallets.balance(player).await?;
        table.add_row(vec![
            player.to_string(),
            team,
            stake.to_string(),
            report.payout_for(player).to_string(),
            balance.to_string(),
        ]);
    }

    println!("{}", table);
    println!(
        "Team {} wins a pool of {} tokens ({} paid out, {} left by rounding)",
        report.winning_team,
        report.pool,
        report.paid_out(),
        report.dust
    );
    for failed in &report.failed_payouts {
        println!(
            "Payout of {} to {} failed: {}",
            failed.amount, failed.player, failed.reason
        );
    }
    Ok(())
}
