use std::cmp::Reverse;

use packetfall_core::ids::SessionId;
use packetfall_core::net::messages::{LeaderboardEntry, LeaderboardMsg};

use crate::player::PlayerState;

/// Entries kept in a broadcast ranking.
pub const TOP_N: usize = 10;

/// All-time high score for the life of the process.
#[derive(Debug, Default)]
pub struct Leaderboard {
    high_score: u64,
}

impl Leaderboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn high_score(&self) -> u64 {
        self.high_score
    }

    /// Rank players by score, descending. Ties keep iteration order.
    pub fn compute<'a>(
        &mut self,
        players: impl IntoIterator<Item = (SessionId, &'a PlayerState)>,
        total_players: usize,
    ) -> LeaderboardMsg {
        let mut rankings: Vec<LeaderboardEntry> = players
            .into_iter()
            .map(|(id, p)| LeaderboardEntry {
                player_id: id,
                name: p.name.clone(),
                score: p.score,
                alive: p.alive,
                rank: 0,
            })
            .collect();
        let active_players = rankings.iter().filter(|e| e.alive).count();

        rankings.sort_by_key(|e| Reverse(e.score));
        rankings.truncate(TOP_N);
        for (i, entry) in rankings.iter_mut().enumerate() {
            entry.rank = i + 1;
        }

        if let Some(top) = rankings.first() {
            self.high_score = self.high_score.max(top.score);
        }

        LeaderboardMsg {
            rankings,
            high_score: self.high_score,
            total_players,
            active_players,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorldConfig;

    fn player(name: &str, score: u64, alive: bool) -> PlayerState {
        let mut p = PlayerState::spawn(name.into(), "nyan_cat".into(), &WorldConfig::default());
        p.score = score;
        p.alive = alive;
        p
    }

    #[test]
    fn ranks_by_score_with_stable_ties() {
        let players = [
            (SessionId(1), player("a", 100, true)),
            (SessionId(2), player("b", 300, false)),
            (SessionId(3), player("c", 100, true)),
            (SessionId(4), player("d", 200, true)),
        ];
        let mut board = Leaderboard::new();
        let msg = board.compute(players.iter().map(|(id, p)| (*id, p)), 5);

        let order: Vec<_> = msg.rankings.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(order, vec!["b", "d", "a", "c"]);
        let ranks: Vec<_> = msg.rankings.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
        assert_eq!(msg.high_score, 300);
        assert_eq!(msg.total_players, 5);
        assert_eq!(msg.active_players, 3);
    }

    #[test]
    fn keeps_top_ten() {
        let players: Vec<_> = (0..15)
            .map(|i| (SessionId(i), player(&format!("p{i}"), i * 10, true)))
            .collect();
        let mut board = Leaderboard::new();
        let msg = board.compute(players.iter().map(|(id, p)| (*id, p)), 15);
        assert_eq!(msg.rankings.len(), TOP_N);
        assert_eq!(msg.rankings[0].score, 140);
        assert_eq!(msg.rankings[9].rank, 10);
        assert_eq!(msg.active_players, 15);
    }

    #[test]
    fn high_score_never_lowers() {
        let mut board = Leaderboard::new();
        let high = [(SessionId(1), player("a", 500, false))];
        board.compute(high.iter().map(|(id, p)| (*id, p)), 1);
        let low = [(SessionId(2), player("b", 50, false))];
        let msg = board.compute(low.iter().map(|(id, p)| (*id, p)), 1);
        assert_eq!(msg.high_score, 500);
        assert_eq!(board.high_score(), 500);
    }

    #[test]
    fn empty_board() {
        let mut board = Leaderboard::new();
        let msg = board.compute(std::iter::empty(), 2);
        assert!(msg.rankings.is_empty());
        assert_eq!(msg.high_score, 0);
        assert_eq!(msg.total_players, 2);
    }
}
