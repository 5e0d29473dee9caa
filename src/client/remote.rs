//! HTTP implementations of the client traits, talking to a running arena server.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use futures::{StreamExt, future::BoxFuture};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    client::{
        api::{ArenaApi, ClientError, ClientResult},
        feed::{ChangeFeed, FeedError, Subscription, SubscriptionHandle},
    },
    dto::{
        admin::{ChallengeActionResponse, PollCloseResponse},
        auth::{AuthResponse, CredentialsRequest},
        feed::{ChangeNotification, FeedFilter, Resource},
        play::{ScoreDeltaRequest, ScoreDeltaResponse, VoteRequest, VoteResponse},
        public::{ParticipantSummary, SnapshotResponse, TallyResponse},
    },
    routes::admin::PARTICIPANT_HEADER,
};

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// [`ArenaApi`] over the REST surface.
#[derive(Clone)]
pub struct RemoteArenaApi {
    client: Client,
    base_url: Arc<str>,
}

impl RemoteArenaApi {
    /// Build a client for the server at `base_url` (for example `http://localhost:8080`).
    pub fn new(base_url: &str) -> ClientResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|err| ClientError::Transient(format!("http client setup failed: {err}")))?;
        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base_url, path))
    }

    fn admin_request(&self, actor: Uuid, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
            .header(PARTICIPANT_HEADER, actor.to_string())
    }

    async fn call<T>(builder: RequestBuilder) -> ClientResult<T>
    where
        T: DeserializeOwned,
    {
        let response = builder
            .send()
            .await
            .map_err(|err| ClientError::Transient(format!("request failed: {err}")))?;
        decode_response(response).await
    }

    async fn post<B, T>(self, path: String, body: B) -> ClientResult<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        Self::call(self.request(Method::POST, &path).json(&body)).await
    }

    async fn get<T>(self, path: String) -> ClientResult<T>
    where
        T: DeserializeOwned,
    {
        Self::call(self.request(Method::GET, &path)).await
    }
}

async fn decode_response<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|err| ClientError::Transient(format!("undecodable response: {err}")));
    }

    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.message,
        Err(_) => status.to_string(),
    };
    Err(status_error(status, message))
}

/// Map an HTTP failure onto the client taxonomy.
fn status_error(status: StatusCode, message: String) -> ClientError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ClientError::Validation(message),
        StatusCode::NOT_FOUND => ClientError::NotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Authorization(message),
        StatusCode::CONFLICT => ClientError::Conflict(message),
        _ => ClientError::Transient(message),
    }
}

impl ArenaApi for RemoteArenaApi {
    fn signup(
        &self,
        display_name: String,
        access_code: String,
    ) -> BoxFuture<'static, ClientResult<ParticipantSummary>> {
        let api = self.clone();
        Box::pin(async move {
            let body = CredentialsRequest {
                display_name,
                access_code,
            };
            let response: AuthResponse = api.post("auth/signup".into(), body).await?;
            Ok(response.participant)
        })
    }

    fn login(
        &self,
        display_name: String,
        access_code: String,
    ) -> BoxFuture<'static, ClientResult<ParticipantSummary>> {
        let api = self.clone();
        Box::pin(async move {
            let body = CredentialsRequest {
                display_name,
                access_code,
            };
            let response: AuthResponse = api.post("auth/login".into(), body).await?;
            Ok(response.participant)
        })
    }

    fn participant(&self, id: Uuid) -> BoxFuture<'static, ClientResult<ParticipantSummary>> {
        Box::pin(self.clone().get(format!("public/participants/{id}")))
    }

    fn apply_delta(
        &self,
        participant_id: Uuid,
        delta: i64,
        challenge_id: Option<String>,
    ) -> BoxFuture<'static, ClientResult<ScoreDeltaResponse>> {
        let body = ScoreDeltaRequest {
            participant_id,
            delta,
            challenge_id,
        };
        Box::pin(self.clone().post("play/score".into(), body))
    }

    fn vote(
        &self,
        participant_id: Uuid,
        question_id: String,
        option_index: u32,
    ) -> BoxFuture<'static, ClientResult<VoteResponse>> {
        let body = VoteRequest {
            participant_id,
            option_index,
        };
        Box::pin(
            self.clone()
                .post(format!("play/polls/{question_id}/vote"), body),
        )
    }

    fn tally(&self, question_id: String) -> BoxFuture<'static, ClientResult<TallyResponse>> {
        Box::pin(self.clone().get(format!("public/polls/{question_id}/tally")))
    }

    fn snapshot(&self) -> BoxFuture<'static, ClientResult<SnapshotResponse>> {
        Box::pin(self.clone().get("public/snapshot".into()))
    }

    fn start_challenge(
        &self,
        actor: Uuid,
        challenge_id: String,
    ) -> BoxFuture<'static, ClientResult<ChallengeActionResponse>> {
        let builder = self.admin_request(actor, &format!("admin/challenges/{challenge_id}/start"));
        Box::pin(Self::call(builder))
    }

    fn end_challenge(
        &self,
        actor: Uuid,
        challenge_id: String,
    ) -> BoxFuture<'static, ClientResult<ChallengeActionResponse>> {
        let builder = self.admin_request(actor, &format!("admin/challenges/{challenge_id}/end"));
        Box::pin(Self::call(builder))
    }

    fn end_all_challenges(
        &self,
        actor: Uuid,
    ) -> BoxFuture<'static, ClientResult<ChallengeActionResponse>> {
        let builder = self.admin_request(actor, "admin/challenges/end-all");
        Box::pin(Self::call(builder))
    }

    fn close_question(
        &self,
        actor: Uuid,
        question_id: String,
    ) -> BoxFuture<'static, ClientResult<PollCloseResponse>> {
        let builder = self.admin_request(actor, &format!("admin/polls/{question_id}/close"));
        Box::pin(Self::call(builder))
    }
}

/// One dispatched Server-Sent Events frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental decoder for a `text/event-stream` body.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed raw bytes, returning every frame completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    frames.push(SseFrame {
                        event: self.event.take(),
                        data: self.data.join("\n"),
                    });
                    self.data.clear();
                } else {
                    self.event = None;
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = line.split_once(':').unwrap_or((line, ""));
            let value = value.strip_prefix(' ').unwrap_or(value);
            match field {
                "event" => self.event = Some(value.to_owned()),
                "data" => self.data.push(value.to_owned()),
                _ => {}
            }
        }

        frames
    }
}

/// [`ChangeFeed`] reading the server's `/feed/{resource}` SSE endpoints.
#[derive(Clone)]
pub struct SseChangeFeed {
    client: Client,
    base_url: Arc<str>,
    open: Arc<DashMap<SubscriptionHandle, oneshot::Sender<FeedError>>>,
    next_handle: Arc<AtomicU64>,
}

impl SseChangeFeed {
    /// Feed reading from the server at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, FeedError> {
        let client = Client::builder()
            .build()
            .map_err(|err| FeedError::Connect(format!("http client setup failed: {err}")))?;
        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            open: Arc::new(DashMap::new()),
            next_handle: Arc::new(AtomicU64::new(1)),
        })
    }
}

impl ChangeFeed for SseChangeFeed {
    fn subscribe(
        &self,
        resource: Resource,
        filter: Option<FeedFilter>,
    ) -> BoxFuture<'static, Result<Subscription, FeedError>> {
        let feed = self.clone();
        Box::pin(async move {
            let mut builder = feed
                .client
                .get(format!("{}/feed/{}", feed.base_url, resource));
            if let Some(filter) = &filter {
                builder = builder.query(&[("filter", filter.to_string())]);
            }
            let response = builder
                .send()
                .await
                .map_err(|err| FeedError::Connect(err.to_string()))?;
            if !response.status().is_success() {
                return Err(FeedError::Connect(format!(
                    "feed {resource} answered {}",
                    response.status()
                )));
            }

            let handle = feed.next_handle.fetch_add(1, Ordering::Relaxed);
            let (cancel_tx, mut cancel_rx) = oneshot::channel();
            feed.open.insert(handle, cancel_tx);
            let open = feed.open.clone();
            let mut body = Box::pin(response.bytes_stream());

            let stream = async_stream::stream! {
                let mut decoder = SseDecoder::default();
                'read: loop {
                    let next = tokio::select! {
                        cancelled = &mut cancel_rx => match cancelled {
                            Ok(err) => Err(err),
                            Err(_) => break 'read,
                        },
                        chunk = body.next() => match chunk {
                            Some(Ok(bytes)) => Ok(decoder.push(&bytes)),
                            Some(Err(err)) => Err(FeedError::Transport(err.to_string())),
                            None => Err(FeedError::Transport("server closed the stream".into())),
                        }
                    };
                    match next {
                        Ok(frames) => {
                            for frame in frames {
                                match serde_json::from_str::<ChangeNotification>(&frame.data) {
                                    Ok(change) => yield Ok(change),
                                    Err(err) => {
                                        warn!(%resource, error = %err, "skipping undecodable feed frame");
                                    }
                                }
                            }
                        }
                        Err(err) => {
                            yield Err(err);
                            break 'read;
                        }
                    }
                }
                open.remove(&handle);
                debug!(handle, %resource, "remote feed subscription closed");
            };

            Ok(Subscription {
                handle,
                stream: Box::pin(stream),
            })
        })
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.open.remove(&handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_handles_split_frames_and_comments() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b": keep-alive\n\nevent: votes\nda").is_empty());
        let frames = decoder.push(b"ta: {\"a\":1}\r\n\r\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: Some("votes".into()),
                data: "{\"a\":1}".into(),
            }]
        );
    }

    #[test]
    fn decoder_joins_multiline_data() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.push(b"data: first\ndata: second\n\ndata: third\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "first\nsecond");
        assert_eq!(frames[0].event, None);
        assert_eq!(frames[1].data, "third");
    }

    #[test]
    fn status_codes_map_to_client_errors() {
        let kind = |status| status_error(status, "x".into());
        assert!(matches!(kind(StatusCode::BAD_REQUEST), ClientError::Validation(_)));
        assert!(matches!(kind(StatusCode::NOT_FOUND), ClientError::NotFound(_)));
        assert!(matches!(kind(StatusCode::FORBIDDEN), ClientError::Authorization(_)));
        assert!(matches!(kind(StatusCode::CONFLICT), ClientError::Conflict(_)));
        assert!(kind(StatusCode::SERVICE_UNAVAILABLE).is_transient());
    }
}
