mod settle;
mod simulate;
mod split;

pub use settle::settle;
pub use simulate::{simulate, SimulateOptions};
pub use split::split;

use anyhow::{bail, Context, Result};
use clash_core::{PlayerId, Roster, Tokens};

/// Parse `a=1,b=2` (or one pair per line) into a roster.
pub fn parse_roster(input: &str) -> Result<Roster> {
    let blob = input.replace(',', "\n");
    Roster::decode(&blob).context("Invalid roster")
}

/// Parse `a=6,b=4` into contributions. A player may appear more than once;
/// the ledger adds the amounts up.
pub fn parse_contributions(input: &str) -> Result<Vec<(PlayerId, Tokens)>> {
    let mut out = Vec::new();
    for pair in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((player, amount)) = pair.rsplit_once('=') else {
            bail!("Expected player=amount, got '{}'", pair);
        };
        let player = player.trim();
        if player.is_empty() {
            bail!("Empty player id in '{}'", pair);
        }
        let amount: u64 = amount
            .trim()
            .parse()
            .with_context(|| format!("Invalid amount in '{}'", pair))?;
        out.push((PlayerId::new(player), Tokens::new(amount)));
    }
    Ok(out)
}
