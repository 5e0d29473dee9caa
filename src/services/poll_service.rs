//! Poll sub-ledger: last-write-wins votes, tallies and question close awards.

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{arena_store::ArenaStore, models::VoteEntity},
    dto::{
        admin::{PollAward, PollCloseResponse, PollResetResponse},
        play::{VoteRequest, VoteResponse},
        public::TallyResponse,
    },
    error::ServiceError,
    services::{feed_events, identity_service::ensure_admin, score_service},
    state::{
        SharedState,
        catalog::{PollQuestion, PollScoring},
    },
};

/// Record or replace a participant's vote on a question.
pub async fn vote(
    state: &SharedState,
    question_id: &str,
    request: VoteRequest,
) -> Result<VoteResponse, ServiceError> {
    let question = find_question(state, question_id)?;
    let VoteRequest {
        participant_id,
        option_index,
    } = request;

    if !question.has_option(option_index) {
        return Err(ServiceError::InvalidInput(format!(
            "option {option_index} is out of range for question `{question_id}` ({} options)",
            question.options.len()
        )));
    }

    let store = state.require_store().await?;
    if store.get_participant(participant_id).await?.is_none() {
        return Err(ServiceError::NotFound(format!(
            "participant `{participant_id}` not found"
        )));
    }

    let vote = VoteEntity {
        user_id: participant_id,
        question_id: question_id.to_owned(),
        option_index,
    };
    // Rejected by the store once the question is closed.
    let previous = store.upsert_vote(vote.clone()).await?;
    let previous_option = previous.as_ref().map(|prior| prior.option_index);
    feed_events::publish_vote(state, previous, vote);

    Ok(VoteResponse {
        question_id: question_id.to_owned(),
        option_index,
        previous_option,
    })
}

/// Live vote counts per option; all zeros when nobody voted.
pub async fn tally(state: &SharedState, question_id: &str) -> Result<TallyResponse, ServiceError> {
    let question = find_question(state, question_id)?;
    let store = state.require_store().await?;
    let votes = store.list_votes(question_id.to_owned()).await?;
    let closed = store.is_poll_closed(question_id.to_owned()).await?;

    Ok(TallyResponse {
        question_id: question_id.to_owned(),
        counts: count_votes(question, &votes),
        closed,
    })
}

/// Close a question and hand out winner and participation deltas.
///
/// Closing first fences out new votes, so the awarded set is exactly what the store
/// holds. If reading that set fails the question is reopened with its votes kept.
/// Awards are applied one by one through the score ledger; voters whose award
/// failed are listed in the response instead of failing the whole close.
pub async fn close_question(
    state: &SharedState,
    actor: Uuid,
    question_id: &str,
) -> Result<PollCloseResponse, ServiceError> {
    ensure_admin(state, actor).await?;
    let question = find_question(state, question_id)?.clone();
    let store = state.require_store().await?;

    if !store.close_poll(question_id.to_owned()).await? {
        return Err(ServiceError::InvalidState(format!(
            "question `{question_id}` is already closed"
        )));
    }

    let (votes, live_count) = match read_ballots(store.as_ref(), &question).await {
        Ok(ballots) => ballots,
        Err(err) => {
            if let Err(reopen) = store.reopen_poll(question_id.to_owned()).await {
                warn!(
                    question = question_id,
                    error = %reopen,
                    "failed to reopen question after close error"
                );
            }
            return Err(err);
        }
    };
    let winners = winning_options(&question, &votes, live_count);
    let rewards = state.config().poll_rewards();

    let mut awards = Vec::with_capacity(votes.len());
    let mut failed_awards = Vec::new();
    for vote in &votes {
        let delta = if winners.contains(&vote.option_index) {
            rewards.winner_bonus
        } else {
            rewards.participation
        };
        match score_service::apply_delta(state, vote.user_id, delta, Some(question_id)).await {
            Ok(updated) => awards.push(PollAward {
                participant_id: vote.user_id,
                delta,
                score: updated.score,
            }),
            Err(err) => {
                warn!(
                    participant_id = %vote.user_id,
                    question = question_id,
                    error = %err,
                    "poll award failed"
                );
                failed_awards.push(vote.user_id);
            }
        }
    }

    info!(
        %actor,
        question = question_id,
        votes = votes.len(),
        winners = ?winners,
        failed = failed_awards.len(),
        "poll question closed"
    );

    Ok(PollCloseResponse {
        question_id: question_id.to_owned(),
        winning_options: winners,
        awards,
        failed_awards,
    })
}

/// Delete every vote of a question and reopen it.
pub async fn reset_question(
    state: &SharedState,
    actor: Uuid,
    question_id: &str,
) -> Result<PollResetResponse, ServiceError> {
    ensure_admin(state, actor).await?;
    find_question(state, question_id)?;
    let store = state.require_store().await?;

    let existing = store.list_votes(question_id.to_owned()).await?;
    let removed_votes = store.reset_poll(question_id.to_owned()).await?;
    feed_events::publish_votes_deleted(state, existing);

    info!(%actor, question = question_id, removed_votes, "poll question reset");
    Ok(PollResetResponse {
        question_id: question_id.to_owned(),
        removed_votes,
    })
}

async fn read_ballots(
    store: &dyn ArenaStore,
    question: &PollQuestion,
) -> Result<(Vec<VoteEntity>, usize), ServiceError> {
    let votes = store.list_votes(question.id.clone()).await?;
    let live_count = match &question.scoring {
        PollScoring::Plurality => 0,
        PollScoring::ClosestBucket { .. } => store
            .list_participants(None)
            .await?
            .iter()
            .filter(|participant| !participant.is_admin)
            .count(),
    };
    Ok((votes, live_count))
}

fn find_question<'a>(
    state: &'a SharedState,
    question_id: &str,
) -> Result<&'a PollQuestion, ServiceError> {
    state
        .catalog()
        .question(question_id)
        .ok_or_else(|| ServiceError::NotFound(format!("question `{question_id}` not found")))
}

fn count_votes(question: &PollQuestion, votes: &[VoteEntity]) -> Vec<u64> {
    let mut counts = vec![0; question.options.len()];
    for vote in votes {
        if let Some(slot) = counts.get_mut(vote.option_index as usize) {
            *slot += 1;
        }
    }
    counts
}

/// Options that win when the question closes; empty when nobody voted.
///
/// Plurality picks every option tied for the most votes. Closest-bucket picks the
/// option(s) whose bucket is nearest to `live_count`.
pub fn winning_options(question: &PollQuestion, votes: &[VoteEntity], live_count: usize) -> Vec<u32> {
    if votes.is_empty() {
        return Vec::new();
    }

    match &question.scoring {
        PollScoring::Plurality => {
            let counts = count_votes(question, votes);
            let max = counts.iter().copied().max().unwrap_or(0);
            if max == 0 {
                return Vec::new();
            }
            counts
                .iter()
                .enumerate()
                .filter(|(_, count)| **count == max)
                .map(|(index, _)| index as u32)
                .collect()
        }
        PollScoring::ClosestBucket { buckets } => {
            let live = u32::try_from(live_count).unwrap_or(u32::MAX);
            let best = buckets.iter().map(|bucket| bucket.distance(live)).min();
            match best {
                Some(best) => buckets
                    .iter()
                    .enumerate()
                    .filter(|(_, bucket)| bucket.distance(live) == best)
                    .map(|(index, _)| index as u32)
                    .collect(),
                None => Vec::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::{AppConfig, PollRewards},
        dao::arena_store::MemoryArenaStore,
        dto::auth::CredentialsRequest,
        services::identity_service,
        state::{AppState, catalog::CountBucket},
    };

    fn question(scoring: PollScoring, options: usize) -> PollQuestion {
        PollQuestion {
            id: "q".into(),
            prompt: "?".into(),
            options: (0..options).map(|i| format!("option {i}")).collect(),
            scoring,
        }
    }

    fn votes(options: &[u32]) -> Vec<VoteEntity> {
        options
            .iter()
            .map(|&option_index| VoteEntity {
                user_id: Uuid::new_v4(),
                question_id: "q".into(),
                option_index,
            })
            .collect()
    }

    #[test]
    fn plurality_tie_yields_every_leader() {
        let q = question(PollScoring::Plurality, 3);
        let cast = votes(&[0, 0, 0, 1, 1, 1, 2]);
        assert_eq!(winning_options(&q, &cast, 0), vec![0, 1]);
    }

    #[test]
    fn no_votes_no_winners() {
        let q = question(PollScoring::Plurality, 2);
        assert!(winning_options(&q, &[], 0).is_empty());
    }

    #[test]
    fn closest_bucket_uses_live_count() {
        let buckets = vec![
            CountBucket { min: 0, max: Some(10) },
            CountBucket { min: 11, max: Some(25) },
            CountBucket { min: 26, max: None },
        ];
        let q = question(PollScoring::ClosestBucket { buckets }, 3);
        let cast = votes(&[0, 0, 1]);
        assert_eq!(winning_options(&q, &cast, 14), vec![1]);
        assert_eq!(winning_options(&q, &cast, 400), vec![2]);
    }

    struct Fixture {
        state: SharedState,
        store: MemoryArenaStore,
        admin: Uuid,
        players: Vec<Uuid>,
    }

    async fn fixture(players: usize) -> Fixture {
        let config = AppConfig::default().with_poll_rewards(PollRewards {
            winner_bonus: 5,
            participation: 1,
        });
        let state = AppState::new(config);
        let store = MemoryArenaStore::new();
        state.set_store(Arc::new(store.clone())).await.unwrap();

        let mut ids = Vec::new();
        for name in std::iter::once("admin".to_owned()).chain((0..players).map(|i| format!("p{i}"))) {
            let created = identity_service::signup(
                &state,
                CredentialsRequest {
                    display_name: name,
                    access_code: "0000".into(),
                },
            )
            .await
            .unwrap();
            ids.push(created.participant.id);
        }
        let admin = ids.remove(0);
        Fixture {
            state,
            store,
            admin,
            players: ids,
        }
    }

    async fn cast(fx: &Fixture, player: usize, question_id: &str, option_index: u32) -> VoteResponse {
        vote(
            &fx.state,
            question_id,
            VoteRequest {
                participant_id: fx.players[player],
                option_index,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn revote_moves_single_contribution() {
        let fx = fixture(1).await;
        cast(&fx, 0, "framework", 0).await;
        let second = cast(&fx, 0, "framework", 2).await;
        assert_eq!(second.previous_option, Some(0));

        let counts = tally(&fx.state, "framework").await.unwrap().counts;
        assert_eq!(counts, vec![0, 0, 1, 0]);
    }

    #[tokio::test]
    async fn empty_tally_is_all_zero() {
        let fx = fixture(0).await;
        let response = tally(&fx.state, "backend").await.unwrap();
        assert_eq!(response.counts, vec![0, 0, 0, 0]);
        assert!(!response.closed);
    }

    #[tokio::test]
    async fn out_of_range_and_unknown_question() {
        let fx = fixture(1).await;
        let request = VoteRequest {
            participant_id: fx.players[0],
            option_index: 9,
        };
        assert!(matches!(
            vote(&fx.state, "platform", request.clone()).await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            vote(&fx.state, "favourite-color", request).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn close_awards_winners_and_participants() {
        let fx = fixture(8).await;
        // Options 0 and 1 tie on three votes, option 2 gets one; player 7 abstains.
        for (player, option) in [(0, 0), (1, 0), (2, 0), (3, 1), (4, 1), (5, 1), (6, 2)] {
            cast(&fx, player, "framework", option).await;
        }

        let response = close_question(&fx.state, fx.admin, "framework").await.unwrap();
        assert_eq!(response.winning_options, vec![0, 1]);
        assert_eq!(response.awards.len(), 7);
        assert!(response.failed_awards.is_empty());

        let score = |index: usize| {
            let state = fx.state.clone();
            let id = fx.players[index];
            async move { identity_service::get_participant(&state, id).await.unwrap().score }
        };
        assert_eq!(score(0).await, 5);
        assert_eq!(score(4).await, 5);
        assert_eq!(score(6).await, 1);
        assert_eq!(score(7).await, 0);

        assert!(matches!(
            close_question(&fx.state, fx.admin, "framework").await,
            Err(ServiceError::InvalidState(_))
        ));
        assert!(matches!(
            vote(
                &fx.state,
                "framework",
                VoteRequest {
                    participant_id: fx.players[7],
                    option_index: 0
                }
            )
            .await,
            Err(ServiceError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn failed_close_can_be_retried() {
        let fx = fixture(2).await;
        cast(&fx, 0, "platform", 0).await;
        cast(&fx, 1, "platform", 1).await;
        cast(&fx, 1, "platform", 0).await;

        fx.store.fail_next("list_votes");
        assert!(matches!(
            close_question(&fx.state, fx.admin, "platform").await,
            Err(ServiceError::Unavailable(_))
        ));
        let reopened = tally(&fx.state, "platform").await.unwrap();
        assert!(!reopened.closed);
        assert_eq!(reopened.counts, vec![2, 0]);

        let response = close_question(&fx.state, fx.admin, "platform").await.unwrap();
        assert_eq!(response.winning_options, vec![0]);
        assert_eq!(response.awards.len(), 2);
        let score = identity_service::get_participant(&fx.state, fx.players[0])
            .await
            .unwrap()
            .score;
        assert_eq!(score, 5);
    }

    #[tokio::test]
    async fn vote_racing_a_close_is_counted_or_rejected() {
        let fx = fixture(1).await;
        let late = vote(
            &fx.state,
            "backend",
            VoteRequest {
                participant_id: fx.players[0],
                option_index: 2,
            },
        );
        let (late, closed) = tokio::join!(late, close_question(&fx.state, fx.admin, "backend"));
        let closed = closed.unwrap();
        let stored = fx.store.list_votes("backend".into()).await.unwrap();
        match late {
            Ok(_) => {
                assert_eq!(stored.len(), 1);
                assert_eq!(closed.awards.len(), 1);
            }
            Err(ServiceError::InvalidState(_)) => {
                assert!(stored.is_empty());
                assert!(closed.awards.is_empty());
            }
            Err(other) => panic!("unexpected vote result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn crowd_size_scores_against_player_count() {
        let fx = fixture(12).await;
        cast(&fx, 0, "crowd-size", 0).await;
        cast(&fx, 1, "crowd-size", 1).await;

        let response = close_question(&fx.state, fx.admin, "crowd-size").await.unwrap();
        assert_eq!(response.winning_options, vec![1]);
    }

    #[tokio::test]
    async fn reset_reopens_question() {
        let fx = fixture(2).await;
        cast(&fx, 0, "platform", 0).await;
        cast(&fx, 1, "platform", 1).await;
        close_question(&fx.state, fx.admin, "platform").await.unwrap();

        let reset = reset_question(&fx.state, fx.admin, "platform").await.unwrap();
        assert_eq!(reset.removed_votes, 2);
        let response = tally(&fx.state, "platform").await.unwrap();
        assert_eq!(response.counts, vec![0, 0]);
        assert!(!response.closed);
        cast(&fx, 0, "platform", 1).await;
    }

    #[tokio::test]
    async fn players_cannot_close_or_reset() {
        let fx = fixture(1).await;
        let player = fx.players[0];
        assert!(matches!(
            close_question(&fx.state, player, "platform").await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            reset_question(&fx.state, player, "platform").await,
            Err(ServiceError::Forbidden(_))
        ));
    }
}
