//! Live servers on ephemeral ports for end-to-end tests.

use crate::a2a::agent_card::build_provider_card;
use crate::a2a::auth::{AuthState, BearerToken};
use crate::a2a::calculator::{Calculator, Skill};
use crate::a2a::handler::{ProviderContext, ReplyMode};
use crate::a2a::resolver::AGENT_CARD_PATH;
use crate::a2a::server::{ProviderState, provider_router};
use axum::Router;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use serde_json::{Value, json};
use std::future::IntoFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Bind 127.0.0.1:0, build the router for the bound base URL, serve it in
/// the background. Returns the base URL.
pub async fn spawn(build: impl FnOnce(String) -> Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let base_url = format!("http://{}", listener.local_addr().expect("addr"));
    let router = build(base_url.clone());
    tokio::spawn(axum::serve(listener, router).into_future());
    base_url
}

pub async fn spawn_provider(token: Option<&str>, mode: ReplyMode, streaming: bool) -> String {
    let token = token.map(BearerToken::new);
    spawn(move |base_url| {
        let state = ProviderState {
            ctx: ProviderContext::new(Arc::new(Calculator), mode),
            card: Arc::new(build_provider_card(
                &base_url,
                vec![Calculator.descriptor()],
                streaming,
            )),
        };
        provider_router(state, AuthState::new(token))
    })
    .await
}

pub fn card_json(base_url: &str, streaming: bool) -> Value {
    json!({
        "name": "Scripted Agent",
        "version": "0.0.1",
        "url": format!("{}/", base_url),
        "preferredTransport": "JSONRPC",
        "capabilities": {"streaming": streaming},
        "skills": []
    })
}

fn agent_message(id: Value, text: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {"kind": "message", "role": "agent", "messageId": "m", "parts": [{"kind": "text", "text": text}]}
    })
}

fn request_id(body: &Value) -> Value {
    body.get("id").cloned().unwrap_or(Value::Null)
}

/// Replies with the bearer token it received, after `delay`.
pub async fn spawn_token_echo(delay: Duration) -> String {
    spawn(move |base_url| {
        let card = card_json(&base_url, false);
        Router::new()
            .route(AGENT_CARD_PATH, get(move || async move { Json(card) }))
            .route(
                "/",
                post(move |headers: HeaderMap, Json(body): Json<Value>| async move {
                    tokio::time::sleep(delay).await;
                    let token = headers
                        .get(header::AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .and_then(BearerToken::from_header)
                        .map(|t| t.secret().to_string())
                        .unwrap_or_else(|| "none".to_string());
                    Json(agent_message(request_id(&body), &format!("token:{}", token)))
                }),
            )
    })
    .await
}

/// Serves a valid card but sleeps `delay` before answering the send.
pub async fn spawn_slow_send(delay: Duration) -> String {
    spawn(move |base_url| {
        let card = card_json(&base_url, false);
        Router::new()
            .route(AGENT_CARD_PATH, get(move || async move { Json(card) }))
            .route(
                "/",
                post(move |Json(body): Json<Value>| async move {
                    tokio::time::sleep(delay).await;
                    Json(agent_message(request_id(&body), "too late"))
                }),
            )
    })
    .await
}

/// Sleeps `delay` before serving its card.
pub async fn spawn_slow_card(delay: Duration) -> String {
    spawn(move |base_url| {
        let card = card_json(&base_url, false);
        Router::new().route(
            AGENT_CARD_PATH,
            get(move || async move {
                tokio::time::sleep(delay).await;
                Json(card)
            }),
        )
    })
    .await
}

/// Fails the first `failures` sends with 503, then answers "ok".
/// Returns the base URL and the send counter.
pub async fn spawn_flaky(failures: usize) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let base_url = spawn(move |base_url| {
        let card = card_json(&base_url, false);
        Router::new()
            .route(AGENT_CARD_PATH, get(move || async move { Json(card) }))
            .route(
                "/",
                post(move |Json(body): Json<Value>| {
                    let counter = counter.clone();
                    async move {
                        let seen = counter.fetch_add(1, Ordering::SeqCst);
                        if seen < failures {
                            StatusCode::SERVICE_UNAVAILABLE.into_response()
                        } else {
                            Json(agent_message(request_id(&body), "ok")).into_response()
                        }
                    }
                }),
            )
    })
    .await;
    (base_url, hits)
}

pub struct Reply {
    pub status: u16,
    pub body: Value,
}

/// POST a `message/send` to `base_url` with an optional bearer token.
pub async fn send_text(base_url: &str, text: &str, token: Option<&str>) -> Reply {
    let client = reqwest::Client::new();
    let mut req = client.post(format!("{}/", base_url)).json(&json!({
        "jsonrpc": "2.0",
        "method": "message/send",
        "params": {"message": {"role": "user", "parts": [{"kind": "text", "text": text}]}},
        "id": 1
    }));
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }
    let resp = req.send().await.expect("send");
    let status = resp.status().as_u16();
    let body = resp.json::<Value>().await.unwrap_or(Value::Null);
    Reply { status, body }
}
