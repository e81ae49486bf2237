use anyhow::Result;
use clash_core::PlayerId;
use clash_match::{assign_teams, teams_of};
use comfy_table::{presets::UTF8_FULL, Table};

pub fn split(players: &[String], team_count: u32, wire: bool, json: bool) -> Result<()> {
    let players: Vec<PlayerId> = players.iter().map(PlayerId::new).collect();
    let roster = assign_teams(&players, team_count)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&roster)?);
        return Ok(());
    }

    if wire {
        print!("{}", roster.encode()?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Team", "Players", "Size"]);

    for (team, members) in teams_of(&roster) {
        let names: Vec<&str> = members.iter().map(PlayerId::as_str).collect();
        table.add_row(vec![
            team.to_string(),
            names.join(", "),
            members.len().to_string(),
        ]);
    }

    println!("{}", table);
    Ok(())
}
