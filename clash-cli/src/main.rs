mod commands;
mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "clash")]
#[command(about = "Team-stake matches: split teams, preview settlements, simulate lobbies")]
#[command(version)]
struct Cli {
    /// JSON config file (defaults to $CLASH_CONFIG, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split players into balanced teams in join order
    Split {
        /// Player ids, in the order they joined
        #[arg(required = true)]
        players: Vec<String>,
        /// Number of teams
        #[arg(short, long)]
        teams: Option<u32>,
        /// Print the lobby data wire format
        #[arg(long)]
        wire: bool,
        #[arg(long)]
        json: bool,
    },
    /// Preview how a pool would be settled
    Settle {
        /// Team of each player, e.g. a=1,b=1,c=2
        #[arg(short, long)]
        roster: String,
        /// Contribution of each player, e.g. a=6,b=4,c=5
        #[arg(long)]
        contributions: String,
        #[arg(long)]
        json: bool,
    },
    /// Run a full match in memory with random stakes
    Simulate {
        /// Number of players (lobby capacity)
        #[arg(short, long)]
        players: Option<usize>,
        /// Number of teams
        #[arg(short, long)]
        teams: Option<u32>,
        /// Seed for the random stakes
        #[arg(long)]
        seed: Option<u64>,
        /// Largest random stake per player
        #[arg(long, default_value_t = 20)]
        max_stake: u64,
        /// Starting token balance of every player
        #[arg(long)]
        balance: Option<u64>,
        /// Seconds to wait for every stake before refunding (0 waits forever)
        #[arg(long)]
        coverage_timeout: Option<u64>,
        /// Use the configured lobby timers instead of fast ones
        #[arg(long)]
        realtime: bool,
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "clash={},clash_match={},clash_core={}",
            log_level, log_level, log_level
        )))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let overrides = match &cli.command {
        Commands::Split { players, teams, .. } => config::Overrides {
            capacity: Some(players.len()),
            team_count: *teams,
            ..Default::default()
        },
        Commands::Settle { .. } => config::Overrides::default(),
        Commands::Simulate {
            players,
            teams,
            seed,
            balance,
            coverage_timeout,
            ..
        } => config::Overrides {
            capacity: *players,
            team_count: *teams,
            coverage_timeout_secs: *coverage_timeout,
            starting_balance: *balance,
            seed: *seed,
        },
    };

    let cfg = config::load(cli.config.as_deref(), &overrides)?;

    let result = match cli.command {
        Commands::Split {
            players,
            wire,
            json,
            ..
        } => commands::split(&players, cfg.match_config.team_count, wire, json),
        Commands::Settle {
            roster,
            contributions,
            json,
        } => commands::settle(&roster, &contributions, json),
        Commands::Simulate {
            max_stake,
            realtime,
            json,
            ..
        } => {
            let options = commands::SimulateOptions {
                max_stake,
                realtime,
                json,
            };
            commands::simulate(&cfg, &options).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
