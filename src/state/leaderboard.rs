//! Pure leaderboard projection shared by the server and the client view.

use std::{cmp::Ordering, time::SystemTime};

use uuid::Uuid;

use crate::dao::models::ParticipantEntity;

/// Anything that can be ranked on the leaderboard.
pub trait Standing {
    /// Stable participant id, the final tie-break.
    fn participant_id(&self) -> Uuid;
    /// Current score.
    fn score(&self) -> i64;
    /// Join time; earlier joiners rank higher on equal scores.
    fn joined_at(&self) -> SystemTime;
}

impl Standing for ParticipantEntity {
    fn participant_id(&self) -> Uuid {
        self.id
    }

    fn score(&self) -> i64 {
        self.score
    }

    fn joined_at(&self) -> SystemTime {
        self.joined_at
    }
}

/// One ranked row; ranks start at 1 and are unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry<P> {
    /// 1-based position.
    pub rank: usize,
    /// The ranked participant.
    pub participant: P,
}

/// Total order: score descending, then join time ascending, then id.
pub fn standing_order<P: Standing>(a: &P, b: &P) -> Ordering {
    b.score()
        .cmp(&a.score())
        .then_with(|| a.joined_at().cmp(&b.joined_at()))
        .then_with(|| a.participant_id().cmp(&b.participant_id()))
}

/// Rank every participant. Deterministic for a given input set regardless of input order.
pub fn project<P>(participants: &[P]) -> Vec<LeaderboardEntry<P>>
where
    P: Standing + Clone,
{
    let mut ordered = participants.to_vec();
    ordered.sort_by(standing_order);
    ordered
        .into_iter()
        .enumerate()
        .map(|(index, participant)| LeaderboardEntry {
            rank: index + 1,
            participant,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn participant(name: &str, score: i64, joined: u64) -> ParticipantEntity {
        ParticipantEntity {
            id: Uuid::new_v4(),
            display_name: name.into(),
            access_code: "0000".into(),
            score,
            is_admin: false,
            joined_at: SystemTime::UNIX_EPOCH + Duration::from_secs(joined),
            revision: 0,
        }
    }

    fn names(entries: &[LeaderboardEntry<ParticipantEntity>]) -> Vec<&str> {
        entries
            .iter()
            .map(|entry| entry.participant.display_name.as_str())
            .collect()
    }

    #[test]
    fn ties_go_to_earlier_joiner() {
        let participants = vec![
            participant("carol", 10, 30),
            participant("bob", 10, 20),
            participant("dave", -5, 5),
            participant("alice", 25, 40),
        ];

        let board = project(&participants);
        assert_eq!(names(&board), vec!["alice", "bob", "carol", "dave"]);
        assert_eq!(
            board.iter().map(|entry| entry.rank).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
    }

    #[test]
    fn projection_is_idempotent_and_order_independent() {
        let participants = vec![
            participant("a", 3, 1),
            participant("b", 3, 1),
            participant("c", 7, 2),
        ];
        let mut reversed = participants.clone();
        reversed.reverse();

        let first = project(&participants);
        assert_eq!(first, project(&participants));
        assert_eq!(first, project(&reversed));
    }

    #[test]
    fn empty_input_projects_empty_board() {
        let board = project::<ParticipantEntity>(&[]);
        assert!(board.is_empty());
    }
}
