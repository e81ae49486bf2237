//! Player to team mapping and its plain-text lobby encoding.
//!
//! The encoding is one `player=team` pair per line. Line order carries no
//! meaning, so decoding any permutation yields the same roster.

use crate::error::{ClashError, Result};
use crate::types::{PlayerId, TeamId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    teams: BTreeMap<PlayerId, TeamId>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `player` to `team` unless the player already has a team.
    /// Returns the team the player ends up on.
    pub fn assign(&mut self, player: PlayerId, team: TeamId) -> TeamId {
        *self.teams.entry(player).or_insert(team)
    }

    pub fn team_of(&self, player: &PlayerId) -> Option<TeamId> {
        self.teams.get(player).copied()
    }

    pub fn contains(&self, player: &PlayerId) -> bool {
        self.teams.contains_key(player)
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerId> {
        self.teams.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PlayerId, TeamId)> {
        self.teams.iter().map(|(p, t)| (p, *t))
    }

    /// Team ids with at least one member, ascending.
    pub fn team_ids(&self) -> BTreeSet<TeamId> {
        self.teams.values().copied().collect()
    }

    pub fn members(&self, team: TeamId) -> Vec<&PlayerId> {
        self.teams
            .iter()
            .filter(|(_, t)| **t == team)
            .map(|(p, _)| p)
            .collect()
    }

    pub fn team_size(&self, team: TeamId) -> usize {
        self.teams.values().filter(|t| **t == team).count()
    }

    pub fn encode(&self) -> Result<String> {
        let mut out = String::new();
        for (player, team) in &self.teams {
            let id = player.as_str();
            // decode trims each id, so padded ids would not survive
            if id.is_empty() || id.trim() != id || id.contains(['=', '\n', '\r']) {
                return Err(ClashError::codec(format!(
                    "Player id '{}' cannot be encoded",
                    id.escape_debug()
                )));
            }
            out.push_str(id);
            out.push('=');
            out.push_str(&team.to_string());
            out.push('\n');
        }
        Ok(out)
    }

    pub fn decode(blob: &str) -> Result<Self> {
        let mut roster = Roster::new();

        for (line_no, line) in blob.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (player, team) = line.rsplit_once('=').ok_or_else(|| {
                ClashError::codec(format!("Line {}: expected player=team", line_no + 1))
            })?;

            let player = player.trim();
            if player.is_empty() {
                return Err(ClashError::codec(format!(
                    "Line {}: empty player id",
                    line_no + 1
                )));
            }

            let team: u32 = team.trim().parse().map_err(|_| {
                ClashError::codec(format!("Line {}: invalid team id '{}'", line_no + 1, team))
            })?;
            if team == 0 {
                return Err(ClashError::codec(format!(
                    "Line {}: team ids start at 1",
                    line_no + 1
                )));
            }

            let player = PlayerId::from(player);
            if roster.contains(&player) {
                return Err(ClashError::codec(format!(
                    "Line {}: duplicate player '{}'",
                    line_no + 1,
                    player
                )));
            }
            roster.assign(player, TeamId::new(team));
        }

        Ok(roster)
    }
}

impl FromIterator<(PlayerId, TeamId)> for Roster {
    fn from_iter<I: IntoIterator<Item = (PlayerId, TeamId)>>(iter: I) -> Self {
        let mut roster = Roster::new();
        for (player, team) in iter {
            roster.assign(player, team);
        }
        roster
    }
}
