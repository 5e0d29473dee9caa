use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::{
    dto::feed::{ChangeNotification, FeedFilter, Resource},
    error::ServiceError,
    state::SharedState,
};

/// Parse the optional `column=eq.value` query parameter.
pub fn parse_filter(raw: Option<&str>) -> Result<Option<FeedFilter>, ServiceError> {
    raw.filter(|value| !value.is_empty())
        .map(|value| value.parse::<FeedFilter>())
        .transpose()
        .map_err(ServiceError::InvalidInput)
}

/// Subscribe to one resource of the change feed.
pub fn subscribe(state: &SharedState) -> broadcast::Receiver<ChangeNotification> {
    state.feed().subscribe()
}

/// Whether a notification belongs on a stream for `resource` with `filter`.
pub fn accepts(resource: Resource, filter: Option<&FeedFilter>, change: &ChangeNotification) -> bool {
    change.resource == resource && filter.is_none_or(|filter| filter.matches(change))
}

/// Convert a broadcast receiver into an SSE response carrying only the matching
/// notifications, named after the resource.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ChangeNotification>,
    resource: Resource,
    filter: Option<FeedFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(change) => {
                            if !accepts(resource, filter.as_ref(), &change) {
                                continue;
                            }
                            let event = match Event::default().event(resource.as_str()).json_data(&change) {
                                Ok(event) => event,
                                Err(err) => {
                                    warn!(%resource, error = %err, "failed to encode feed event");
                                    continue;
                                }
                            };
                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(%resource, skipped, "feed subscriber lagged");
                            continue;
                        }
                    }
                }
            }
        }

        info!(%resource, "feed stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::dto::feed::EventKind;

    fn change(resource: Resource, row: serde_json::Value) -> ChangeNotification {
        ChangeNotification {
            resource,
            event_kind: EventKind::Insert,
            before: None,
            after: Some(row),
            committed_at: "2025-11-22T10:00:00Z".into(),
        }
    }

    #[test]
    fn filter_parsing() {
        assert_eq!(parse_filter(None).unwrap(), None);
        assert_eq!(parse_filter(Some("")).unwrap(), None);
        assert!(parse_filter(Some("question_id=eq.platform")).unwrap().is_some());
        assert!(matches!(
            parse_filter(Some("question_id")),
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[test]
    fn accepts_matching_resource_and_row() {
        let vote = change(Resource::Votes, json!({ "question_id": "platform" }));
        let filter = FeedFilter::eq("question_id", "platform");
        assert!(accepts(Resource::Votes, None, &vote));
        assert!(accepts(Resource::Votes, Some(&filter), &vote));
        assert!(!accepts(Resource::Users, None, &vote));
        assert!(!accepts(
            Resource::Votes,
            Some(&FeedFilter::eq("question_id", "backend")),
            &vote
        ));
    }
}
