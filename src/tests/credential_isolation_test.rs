//! Concurrent delegations must each present their own caller's token.

use super::support::{self, spawn_token_echo};
use crate::a2a::agent_card::build_coordinator_card;
use crate::a2a::auth::{AuthState, BearerToken};
use crate::a2a::coordinator::CoordinatorContext;
use crate::a2a::dispatch::{DelegationOutcome, DelegationRequest, DispatchConfig, Dispatcher};
use crate::a2a::server::{CoordinatorState, coordinator_router};
use std::sync::Arc;
use std::time::Duration;

fn dispatcher() -> Dispatcher {
    Dispatcher::new(DispatchConfig {
        timeout: Duration::from_secs(10),
        streaming: false,
        ..DispatchConfig::default()
    })
}

#[tokio::test]
async fn test_concurrent_dispatches_keep_their_tokens() {
    let url = spawn_token_echo(Duration::from_millis(100)).await;
    let dispatcher = Arc::new(dispatcher());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let dispatcher = dispatcher.clone();
            let url = url.clone();
            tokio::spawn(async move {
                let token = format!("user-{}", i);
                let request = DelegationRequest::new("1 + 1", "echo", Some(url))
                    .with_token(Some(BearerToken::new(token.clone())));
                (token, dispatcher.delegate(request).await)
            })
        })
        .collect();

    for handle in handles {
        let (token, outcome) = handle.await.expect("join");
        assert_eq!(outcome, DelegationOutcome::success(format!("token:{}", token)));
    }
}

#[tokio::test]
async fn test_missing_token_is_not_borrowed_from_another_dispatch() {
    let url = spawn_token_echo(Duration::from_millis(50)).await;
    let dispatcher = dispatcher();

    let with = DelegationRequest::new("1", "echo", Some(url.clone()))
        .with_token(Some(BearerToken::new("alice")));
    let without = DelegationRequest::new("1", "echo", Some(url));

    let (a, b) = tokio::join!(dispatcher.delegate(with), dispatcher.delegate(without));
    assert_eq!(a, DelegationOutcome::success("token:alice"));
    assert_eq!(b, DelegationOutcome::success("token:none"));
}

#[tokio::test]
async fn test_coordinator_forwards_each_callers_token() {
    let provider_url = spawn_token_echo(Duration::from_millis(100)).await;
    let coordinator_url = support::spawn(|base_url| {
        let state = CoordinatorState {
            ctx: CoordinatorContext::new(dispatcher(), "echo", Some(provider_url)),
            card: Arc::new(build_coordinator_card(&base_url, "echo")),
        };
        coordinator_router(state, AuthState::new(None))
    })
    .await;

    let (a, b) = tokio::join!(
        support::send_text(&coordinator_url, "1 + 1", Some("token-a")),
        support::send_text(&coordinator_url, "1 + 1", Some("token-b")),
    );
    assert_eq!(a.body["result"]["parts"][0]["text"], "token:token-a");
    assert_eq!(b.body["result"]["parts"][0]["text"], "token:token-b");
}
