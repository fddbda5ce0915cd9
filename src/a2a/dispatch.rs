//! Delegation dispatch.
//!
//! One [`DelegationRequest`] runs through
//! `Idle → Resolving → Sending → AwaitingResponse → Completed | Failed`
//! exactly once and always ends in a [`DelegationOutcome`]. The whole
//! resolve/send/await sequence shares a single deadline.
//!
//! Each delegation builds its own HTTP client and carries its own bearer
//! token, so concurrent delegations never share credentials.

use crate::a2a::auth::BearerToken;
use crate::a2a::codec::{self, ResponseBody, ResponseEvent};
use crate::a2a::normalizer;
use crate::a2a::resolver;
use crate::a2a::stream::TextStream;
use crate::a2a::types::*;
use crate::error::DelegationError;
use reqwest::{Client, Response, StatusCode, header};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Resolving,
    Sending,
    AwaitingResponse,
    Completed,
    Failed,
}

impl DispatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchState::Completed | DispatchState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Error,
}

/// The only thing a delegation surfaces to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DelegationOutcome {
    pub status: OutcomeStatus,
    pub content: String,
}

impl DelegationOutcome {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Success,
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            content: content.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// What to delegate, to whom, and with which credential.
#[derive(Debug, Clone)]
pub struct DelegationRequest {
    pub problem: String,
    pub target_name: String,
    pub target_url: Option<String>,
    pub token: Option<BearerToken>,
    pub request_id: Option<RequestId>,
}

impl DelegationRequest {
    pub fn new(
        problem: impl Into<String>,
        target_name: impl Into<String>,
        target_url: Option<String>,
    ) -> Self {
        Self {
            problem: problem.into(),
            target_name: target_name.into(),
            target_url,
            token: None,
            request_id: None,
        }
    }

    pub fn with_token(mut self, token: Option<BearerToken>) -> Self {
        self.token = token;
        self
    }

    pub fn with_request_id(mut self, id: RequestId) -> Self {
        self.request_id = Some(id);
        self
    }
}

/// Retry for transient send failures. The default never retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): doubles, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Upper bound on resolve + send + await.
    pub timeout: Duration,
    /// Use `message/stream` when the remote card advertises streaming.
    pub streaming: bool,
    pub retry: RetryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            streaming: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome plus the states visited and the underlying error, for logs and tests.
#[derive(Debug)]
pub struct DispatchRun {
    pub outcome: DelegationOutcome,
    pub trail: Vec<DispatchState>,
    pub error: Option<DelegationError>,
}

struct Dispatch {
    state: DispatchState,
    trail: Vec<DispatchState>,
}

impl Dispatch {
    fn new() -> Self {
        Self {
            state: DispatchState::Idle,
            trail: vec![DispatchState::Idle],
        }
    }

    fn enter(&mut self, next: DispatchState) {
        tracing::debug!(from = ?self.state, to = ?next, "A2A: dispatch transition");
        self.state = next;
        self.trail.push(next);
    }
}

#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Delegate and return the outcome. Never fails.
    pub async fn delegate(&self, request: DelegationRequest) -> DelegationOutcome {
        self.run(request).await.outcome
    }

    /// Delegate, keeping the state trail and error detail.
    pub async fn run(&self, request: DelegationRequest) -> DispatchRun {
        let mut dispatch = Dispatch::new();
        let started = Instant::now();

        let result = tokio::time::timeout(
            self.config.timeout,
            self.exchange(&request, &mut dispatch),
        )
        .await
        .unwrap_or(Err(DelegationError::Timeout(self.config.timeout)));

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(text) => {
                dispatch.enter(DispatchState::Completed);
                tracing::info!(
                    target_agent = %request.target_name,
                    elapsed_ms,
                    chars = text.len(),
                    "A2A: delegation completed"
                );
                DispatchRun {
                    outcome: DelegationOutcome::success(text),
                    trail: dispatch.trail,
                    error: None,
                }
            }
            Err(err) => {
                dispatch.enter(DispatchState::Failed);
                tracing::warn!(
                    target_agent = %request.target_name,
                    elapsed_ms,
                    kind = %err.kind(),
                    error = %err,
                    "A2A: delegation failed"
                );
                DispatchRun {
                    outcome: DelegationOutcome::error(err.user_message(&request.target_name)),
                    trail: dispatch.trail,
                    error: Some(err),
                }
            }
        }
    }

    /// Delegate from synchronous code.
    ///
    /// The exchange runs on a dedicated thread with its own single-threaded
    /// runtime, created for this call and torn down before returning, so no
    /// task outlives the call. Safe to call from inside another runtime.
    pub fn delegate_blocking(&self, request: DelegationRequest) -> DelegationOutcome {
        let target = request.target_name.clone();
        std::thread::scope(|scope| {
            let worker = scope.spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(self.delegate(request)),
                    Err(e) => {
                        tracing::error!(error = %e, "A2A: failed to start delegation runtime");
                        DelegationOutcome::error(format!(
                            "I couldn't start a connection to the {} agent.",
                            request.target_name
                        ))
                    }
                }
            });
            worker.join().unwrap_or_else(|_| {
                DelegationOutcome::error(format!(
                    "Delegating to the {} agent failed unexpectedly.",
                    target
                ))
            })
        })
    }

    /// Delegate and hand back the reply as a lazy sequence of text increments.
    ///
    /// Resolution and send failures are returned directly. If the remote
    /// card does not advertise streaming, or streaming is disabled, the
    /// atomic reply becomes a single-item stream. The deadline covers the
    /// stream as well.
    pub async fn delegate_streaming(
        &self,
        request: DelegationRequest,
    ) -> Result<TextStream, DelegationError> {
        let deadline = Instant::now() + self.config.timeout;
        let mut dispatch = Dispatch::new();

        let opened = tokio::time::timeout_at(deadline, self.open(&request, &mut dispatch))
            .await
            .unwrap_or(Err(DelegationError::Timeout(self.config.timeout)))?;

        let stream = match opened {
            Opened::Stream(response) => TextStream::from_response(response),
            Opened::Atomic(response, id) => {
                let text = tokio::time::timeout_at(deadline, read_atomic(response, &id))
                    .await
                    .unwrap_or(Err(DelegationError::Timeout(self.config.timeout)))?;
                TextStream::new(futures::stream::once(async move {
                    Ok(ResponseEvent::Message(Message::agent_text(text)))
                }))
            }
        };
        Ok(stream.with_deadline(deadline, self.config.timeout))
    }

    async fn exchange(
        &self,
        request: &DelegationRequest,
        dispatch: &mut Dispatch,
    ) -> Result<String, DelegationError> {
        match self.open(request, dispatch).await? {
            Opened::Stream(response) => TextStream::from_response(response).collect_text().await,
            Opened::Atomic(response, id) => read_atomic(response, &id).await,
        }
    }

    /// Resolve the card and send the envelope; returns the open response.
    async fn open(
        &self,
        request: &DelegationRequest,
        dispatch: &mut Dispatch,
    ) -> Result<Opened, DelegationError> {
        let base_url = request
            .target_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                DelegationError::Configuration(format!(
                    "no address configured for the {} agent",
                    request.target_name
                ))
            })?;

        let client = Client::builder()
            .connect_timeout(self.config.timeout)
            .build()
            .map_err(DelegationError::transport)?;

        dispatch.enter(DispatchState::Resolving);
        let card = resolver::resolve(&client, base_url, request.token.as_ref()).await?;
        resolver::check_transport(&card)?;

        let streaming = self.config.streaming && card.supports_streaming();
        tracing::debug!(agent = %card.name, url = %card.url, streaming, "A2A: agent card resolved");

        dispatch.enter(DispatchState::Sending);
        let envelope = codec::encode_send(
            Message::user_text(request.problem.clone()),
            request.request_id.clone(),
            streaming,
        );
        let response = self
            .send_with_retry(&client, &card.url, &envelope, request.token.as_ref())
            .await?;

        dispatch.enter(DispatchState::AwaitingResponse);
        let is_event_stream = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if streaming && is_event_stream {
            Ok(Opened::Stream(response))
        } else {
            Ok(Opened::Atomic(response, envelope.id))
        }
    }

    async fn send_with_retry(
        &self,
        client: &Client,
        url: &str,
        envelope: &JsonRpcRequest,
        token: Option<&BearerToken>,
    ) -> Result<Response, DelegationError> {
        let mut attempt = 0;
        loop {
            match send_once(client, url, envelope, token).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() && attempt < self.config.retry.max_retries => {
                    let delay = self.config.retry.backoff(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max = self.config.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "A2A: transient send failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

enum Opened {
    Stream(Response),
    Atomic(Response, RequestId),
}

async fn send_once(
    client: &Client,
    url: &str,
    envelope: &JsonRpcRequest,
    token: Option<&BearerToken>,
) -> Result<Response, DelegationError> {
    let accept = if envelope.method == codec::METHOD_STREAM {
        "text/event-stream"
    } else {
        "application/json"
    };

    let mut req = client
        .post(url)
        .header(header::ACCEPT, accept)
        .json(envelope);
    if let Some(token) = token {
        req = req.bearer_auth(token.secret());
    }

    let response = req.send().await.map_err(DelegationError::transport)?;
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(DelegationError::Authorization {
            status: status.as_u16(),
        });
    }
    if !status.is_success() {
        return Err(DelegationError::Transport {
            message: format!("remote agent answered HTTP {}", status),
            retryable: status.is_server_error(),
        });
    }
    Ok(response)
}

/// Read and normalize a single JSON-RPC reply.
async fn read_atomic(response: Response, sent_id: &RequestId) -> Result<String, DelegationError> {
    let body = response.bytes().await.map_err(DelegationError::transport)?;
    let decoded = codec::decode_response(&body)?;

    if !decoded.id.is_null() && decoded.id != *sent_id {
        return Err(DelegationError::Protocol(format!(
            "response id {} does not match request id {}",
            decoded.id, sent_id
        )));
    }

    match decoded.body {
        ResponseBody::Error(err) => Err(DelegationError::Remote {
            code: err.code,
            message: err.message,
        }),
        ResponseBody::Result(ResponseEvent::Task(task)) if task.status.state.is_failure() => {
            Err(DelegationError::Remote {
                code: error_codes::INTERNAL_ERROR,
                message: normalizer::task_text(&task),
            })
        }
        ResponseBody::Result(event) => Ok(normalizer::normalize(&event)),
    }
}
