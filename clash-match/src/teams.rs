use crate::{MatchError, Result};
use clash_core::{PlayerId, Roster, TeamId};

/// Split `players` into `team_count` balanced teams.
///
/// Players are taken in the given order; each goes to the team with the
/// fewest members so far, lowest team id first on ties. With two teams this
/// alternates 1, 2, 1, 2, ... A player listed twice keeps the first team.
pub fn assign_teams(players: &[PlayerId], team_count: u32) -> Result<Roster> {
    if team_count < 2 {
        return Err(MatchError::InvalidTeamCount(team_count));
    }

    let mut counts = vec![0usize; team_count as usize];
    let mut roster = Roster::new();

    for player in players {
        if roster.contains(player) {
            continue;
        }

        let (slot, _) = counts
            .iter()
            .enumerate()
            .min_by_key(|(idx, count)| (**count, *idx))
            .ok_or_else(|| MatchError::InvalidTeamCount(team_count))?;

        counts[slot] += 1;
        roster.assign(player.clone(), TeamId::new(slot as u32 + 1));
    }

    Ok(roster)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn players(n: usize) -> Vec<PlayerId> {
        (0..n).map(|i| PlayerId::new(format!("p{}", i))).collect()
    }

    #[test]
    fn test_two_teams_alternate() {
        let list = players(4);
        let roster = assign_teams(&list, 2).unwrap();

        let teams: Vec<u32> = list
            .iter()
            .map(|p| roster.team_of(p).unwrap().get())
            .collect();
        assert_eq!(teams, vec![1, 2, 1, 2]);
    }

    #[test]
    fn test_balanced_for_any_size() {
        for n in 0..25 {
            let mut list = players(n);
            list.reverse();
            let roster = assign_teams(&list, 2).unwrap();
            let one = roster.team_size(TeamId::new(1)) as i64;
            let two = roster.team_size(TeamId::new(2)) as i64;
            assert!((one - two).abs() <= 1, "n={} one={} two={}", n, one, two);
            assert_eq!(roster.len(), n);
        }
    }

    #[test]
    fn test_three_teams_round_robin() {
        let list = players(7);
        let roster = assign_teams(&list, 3).unwrap();
        assert_eq!(roster.team_size(TeamId::new(1)), 3);
        assert_eq!(roster.team_size(TeamId::new(2)), 2);
        assert_eq!(roster.team_size(TeamId::new(3)), 2);
    }

    #[test]
    fn test_reproducible_for_same_order() {
        let list = players(9);
        assert_eq!(assign_teams(&list, 2).unwrap(), assign_teams(&list, 2).unwrap());
    }

    #[test]
    fn test_duplicates_keep_first_team() {
        let list = vec![
            PlayerId::from("a"),
            PlayerId::from("b"),
            PlayerId::from("a"),
            PlayerId::from("c"),
        ];
        let roster = assign_teams(&list, 2).unwrap();
        assert_eq!(roster.len(), 3);
        assert_eq!(roster.team_of(&"a".into()), Some(TeamId::new(1)));
        assert_eq!(roster.team_of(&"c".into()), Some(TeamId::new(1)));
    }

    #[test]
    fn test_rejects_fewer_than_two_teams() {
        assert!(matches!(
            assign_teams(&players(3), 1),
            Err(MatchError::InvalidTeamCount(1))
        ));
        assert!(matches!(
            assign_teams(&players(3), 0),
            Err(MatchError::InvalidTeamCount(0))
        ));
    }
}
