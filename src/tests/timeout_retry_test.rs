//! Deadline and retry behavior against misbehaving providers.

use super::support::{spawn_flaky, spawn_slow_card, spawn_slow_send};
use crate::a2a::dispatch::{
    DelegationOutcome, DelegationRequest, DispatchConfig, DispatchState, Dispatcher, OutcomeStatus,
    RetryPolicy,
};
use crate::error::DelegationError;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

const LIMIT: Duration = Duration::from_millis(300);
const SLACK: Duration = Duration::from_secs(2);

fn bounded(retry: RetryPolicy) -> Dispatcher {
    Dispatcher::new(DispatchConfig {
        timeout: LIMIT,
        streaming: false,
        retry,
    })
}

#[tokio::test]
async fn test_slow_send_times_out_within_bound() {
    let url = spawn_slow_send(Duration::from_secs(30)).await;
    let started = Instant::now();
    let run = bounded(RetryPolicy::default())
        .run(DelegationRequest::new("1 + 1", "slow", Some(url)))
        .await;

    assert!(started.elapsed() < LIMIT + SLACK);
    assert_eq!(run.outcome.status, OutcomeStatus::Error);
    assert!(matches!(run.error, Some(DelegationError::Timeout(d)) if d == LIMIT));
    assert_eq!(run.trail.last(), Some(&DispatchState::Failed));
    assert!(run.trail.contains(&DispatchState::Sending));
}

#[tokio::test]
async fn test_slow_resolution_counts_toward_bound() {
    let url = spawn_slow_card(Duration::from_secs(30)).await;
    let started = Instant::now();
    let run = bounded(RetryPolicy::default())
        .run(DelegationRequest::new("1 + 1", "slow", Some(url)))
        .await;

    assert!(started.elapsed() < LIMIT + SLACK);
    assert!(matches!(run.error, Some(DelegationError::Timeout(_))));
    assert!(!run.trail.contains(&DispatchState::Sending));
}

#[tokio::test]
async fn test_no_retry_by_default() {
    let (url, hits) = spawn_flaky(1).await;
    let run = Dispatcher::new(DispatchConfig {
        streaming: false,
        ..DispatchConfig::default()
    })
    .run(DelegationRequest::new("1 + 1", "flaky", Some(url)))
    .await;

    assert_eq!(run.outcome.status, OutcomeStatus::Error);
    assert!(matches!(
        run.error,
        Some(DelegationError::Transport { retryable: true, .. })
    ));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_recovers_from_transient_failure() {
    let (url, hits) = spawn_flaky(2).await;
    let dispatcher = Dispatcher::new(DispatchConfig {
        timeout: Duration::from_secs(10),
        streaming: false,
        retry: RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        },
    });

    let outcome = dispatcher
        .delegate(DelegationRequest::new("1 + 1", "flaky", Some(url)))
        .await;
    assert_eq!(outcome, DelegationOutcome::success("ok"));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retries_stay_inside_bound() {
    let (url, _hits) = spawn_flaky(usize::MAX).await;
    let started = Instant::now();
    let run = bounded(RetryPolicy {
        max_retries: 100,
        initial_backoff: Duration::from_millis(50),
        max_backoff: Duration::from_millis(50),
    })
    .run(DelegationRequest::new("1 + 1", "flaky", Some(url)))
    .await;

    assert!(started.elapsed() < LIMIT + SLACK);
    assert!(matches!(run.error, Some(DelegationError::Timeout(_))));
}
