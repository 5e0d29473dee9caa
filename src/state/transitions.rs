use std::time::SystemTime;

use crate::{
    error::ServiceError,
    services::feed_events::{publish_challenge_record, publish_session_state},
    state::{
        Plan, SharedState,
        session::{SessionEvent, SessionView},
    },
};

/// Execute a planned session transition, then publish the rows it changed.
///
/// No-op plans (ending a challenge that is not running) publish nothing.
pub async fn run_transition_with_broadcast<F, Fut, T>(
    state: &SharedState,
    event: SessionEvent,
    work: F,
) -> Result<(T, Plan, SessionView), ServiceError>
where
    F: FnOnce(Plan) -> Fut,
    Fut: std::future::Future<Output = Result<T, ServiceError>>,
{
    let (res, plan, next) = state.run_transition(event, work).await?;
    if !plan.is_noop() {
        let committed_at = SystemTime::now();
        for record in &plan.touched {
            publish_challenge_record(
                state,
                plan.previous(&record.challenge_id),
                record,
                committed_at,
            );
        }
        publish_session_state(state, &plan.from.session, &next.session, committed_at);
    }
    Ok((res, plan, next))
}
