use super::{parse_contributions, parse_roster};
use anyhow::Result;
use clash_match::{preview_settlement, DistributionPlan};
use comfy_table::{presets::UTF8_FULL, Table};

pub fn settle(roster: &str, contributions: &str, json: bool) -> Result<()> {
    let roster = parse_roster(roster)?;
    let contributions = parse_contributions(contributions)?;

    let plan = preview_settlement(&roster, contributions)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&plan);
    }
    Ok(())
}

fn print_plan(plan: &DistributionPlan) {
    let mut totals = Table::new();
    totals.load_preset(UTF8_FULL);
    totals.set_header(vec!["Team", "Total"]);
    for (team, total) in &plan.team_totals {
        let label = if *team == plan.winning_team {
            format!("{} (winner)", team)
        } else {
            team.to_string()
        };
        totals.add_row(vec![label, total.to_string()]);
    }
    println!("{}", totals);

    let mut payouts = Table::new();
    payouts.load_preset(UTF8_FULL);
    payouts.set_header(vec!["Player", "Contribution", "Payout"]);
    for share in &plan.shares {
        payouts.add_row(vec![
            share.player.to_string(),
            share.contribution.to_string(),
            share.amount.to_string(),
        ]);
    }
    for forfeit in &plan.forfeited {
        payouts.add_row(vec![
            forfeit.player.to_string(),
            forfeit.amount.to_string(),
            "forfeit".to_string(),
        ]);
    }
    println!("{}", payouts);

    println!("Pool: {} tokens", plan.pool);
    if !plan.dust.is_zero() {
        println!("Unallocated after rounding: {} tokens", plan.dust);
    }
}
