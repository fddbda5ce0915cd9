//! End-to-end delegation against a live provider.

use super::support::{self, spawn_provider};
use crate::a2a::agent_card::build_coordinator_card;
use crate::a2a::auth::{AuthState, BearerToken};
use crate::a2a::coordinator::CoordinatorContext;
use crate::a2a::dispatch::{
    DelegationOutcome, DelegationRequest, DispatchConfig, DispatchState, Dispatcher, OutcomeStatus,
};
use crate::a2a::handler::ReplyMode;
use crate::a2a::server::{CoordinatorState, coordinator_router};
use crate::error::{DelegationError, ErrorKind};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

fn dispatcher(streaming: bool) -> Dispatcher {
    Dispatcher::new(DispatchConfig {
        timeout: Duration::from_secs(10),
        streaming,
        ..DispatchConfig::default()
    })
}

fn request(problem: &str, url: &str, token: Option<&str>) -> DelegationRequest {
    DelegationRequest::new(problem, "calculator", Some(url.to_string()))
        .with_token(token.map(BearerToken::new))
}

#[tokio::test]
async fn test_delegate_message_reply() {
    let url = spawn_provider(Some("secret"), ReplyMode::Message, false).await;
    let run = dispatcher(true)
        .run(request("What is 384 * 35?", &url, Some("secret")))
        .await;
    assert_eq!(run.outcome, DelegationOutcome::success("13440"));
    assert_eq!(run.trail.last(), Some(&DispatchState::Completed));
}

#[tokio::test]
async fn test_delegate_task_reply() {
    let url = spawn_provider(Some("secret"), ReplyMode::Task, false).await;
    let outcome = dispatcher(true)
        .delegate(request("384 * 35", &url, Some("secret")))
        .await;
    assert_eq!(outcome, DelegationOutcome::success("13440"));
}

#[tokio::test]
async fn test_delegate_over_stream() {
    let url = spawn_provider(None, ReplyMode::Message, true).await;
    let outcome = dispatcher(true)
        .delegate(request("384 * 35", &url, Some("any")))
        .await;
    assert_eq!(outcome, DelegationOutcome::success("13440"));
}

#[tokio::test]
async fn test_delegate_streaming_yields_increments() {
    let url = spawn_provider(None, ReplyMode::Message, true).await;
    let stream = dispatcher(true)
        .delegate_streaming(request("2 ^ 10", &url, Some("any")))
        .await
        .expect("stream");
    let pieces: Vec<String> = stream.map(|r| r.expect("increment")).collect().await;
    assert_eq!(pieces, vec!["1024".to_string()]);
}

#[tokio::test]
async fn test_delegate_streaming_falls_back_to_single_item() {
    let url = spawn_provider(None, ReplyMode::Message, false).await;
    let text = dispatcher(true)
        .delegate_streaming(request("6 * 7", &url, Some("any")))
        .await
        .expect("stream")
        .collect_text()
        .await
        .expect("text");
    assert_eq!(text, "42");
}

#[tokio::test]
async fn test_skill_failure_streamed_is_error_outcome() {
    let url = spawn_provider(None, ReplyMode::Message, true).await;
    let run = dispatcher(true)
        .run(request("1 / 0", &url, Some("any")))
        .await;
    assert_eq!(run.outcome.status, OutcomeStatus::Error);
    assert!(run.outcome.content.contains("division by zero"));
}

#[tokio::test]
async fn test_wrong_token_is_authorization_error() {
    let url = spawn_provider(Some("secret"), ReplyMode::Message, false).await;
    let run = dispatcher(false)
        .run(request("1 + 1", &url, Some("wrong")))
        .await;
    assert_eq!(run.outcome.status, OutcomeStatus::Error);
    assert!(matches!(
        run.error,
        Some(DelegationError::Authorization { status: 403 })
    ));
}

#[tokio::test]
async fn test_unreachable_provider_is_resolution_error() {
    // Bind then drop to get a port with nothing listening.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let run = dispatcher(false)
        .run(request("1 + 1", &format!("http://{}", addr), None))
        .await;
    assert_eq!(
        run.error.as_ref().map(DelegationError::kind),
        Some(ErrorKind::Resolution)
    );
    assert!(!run.trail.contains(&DispatchState::Sending));
}

#[tokio::test]
async fn test_coordinator_relays_provider_answer() {
    let provider_url = spawn_provider(Some("secret"), ReplyMode::Task, false).await;
    let coordinator_url = support::spawn(|base_url| {
        let state = CoordinatorState {
            ctx: CoordinatorContext::new(dispatcher(true), "calculator", Some(provider_url)),
            card: Arc::new(build_coordinator_card(&base_url, "calculator")),
        };
        coordinator_router(state, AuthState::new(Some(BearerToken::new("secret"))))
    })
    .await;

    let reply = support::send_text(&coordinator_url, "What is 384 * 35?", Some("secret")).await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["result"]["parts"][0]["text"], "13440");
    assert_eq!(reply.body["result"]["metadata"]["delegationStatus"], "success");

    let reply = support::send_text(&coordinator_url, "384 * 35", None).await;
    assert_eq!(reply.status, 401);
}

#[test]
fn test_blocking_bridge_inside_runtime() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("runtime");
    let url = runtime.block_on(spawn_provider(None, ReplyMode::Message, false));

    // Called from a runtime thread; the bridge must not nest runtimes.
    let outcome = runtime.block_on(async move {
        tokio::task::block_in_place(|| {
            dispatcher(false).delegate_blocking(request("384 * 35", &url, Some("t")))
        })
    });
    assert_eq!(outcome, DelegationOutcome::success("13440"));
}
