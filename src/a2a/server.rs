//! HTTP servers for both roles, powered by axum.
//!
//! Each role serves:
//! - `GET  /.well-known/agent-card.json` — Agent Card discovery
//! - `POST /`                            — JSON-RPC 2.0 endpoint
//! - `GET  /ping`                        — Health check
//!
//! Everything except the card and `/ping` requires a bearer token.

use crate::a2a::auth::{AuthState, BearerToken, require_bearer};
use crate::a2a::codec::METHOD_STREAM;
use crate::a2a::coordinator::{self, CoordinatorContext};
use crate::a2a::handler::{self, ProviderContext};
use crate::a2a::resolver::AGENT_CARD_PATH;
use crate::a2a::types::*;
use axum::{
    Extension, Router,
    body::Bytes,
    extract::State,
    middleware,
    response::{IntoResponse, Json, Response, sse::Event, sse::Sse},
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct ProviderState {
    pub ctx: ProviderContext,
    pub card: Arc<AgentCard>,
}

#[derive(Clone)]
pub struct CoordinatorState {
    pub ctx: CoordinatorContext,
    pub card: Arc<AgentCard>,
}

/// Router for the Capability Provider.
pub fn provider_router(state: ProviderState, auth: AuthState) -> Router {
    Router::new()
        .route(AGENT_CARD_PATH, get(provider_card))
        .route("/", post(provider_jsonrpc))
        .route("/ping", get(ping))
        .layer(middleware::from_fn_with_state(auth, require_bearer))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Router for the Coordinator.
pub fn coordinator_router(state: CoordinatorState, auth: AuthState) -> Router {
    Router::new()
        .route(AGENT_CARD_PATH, get(coordinator_card))
        .route("/", post(coordinator_jsonrpc))
        .route("/ping", get(ping))
        .layer(middleware::from_fn_with_state(auth, require_bearer))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn bind_address(bind: &str, port: u16) -> anyhow::Result<SocketAddr> {
    format!("{}:{}", bind, port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address {}:{}: {}", bind, port, e))
}

/// Serve `router` on `addr` until Ctrl-C.
pub async fn serve(router: Router, addr: SocketAddr, role: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("A2A {} listening on http://{}", role, addr);
    tracing::info!("   Agent Card: http://{}{}", addr, AGENT_CARD_PATH);
    tracing::info!("   JSON-RPC:   http://{}/", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("A2A {} stopped", role);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

async fn provider_card(State(state): State<ProviderState>) -> Json<AgentCard> {
    Json((*state.card).clone())
}

async fn coordinator_card(State(state): State<CoordinatorState>) -> Json<AgentCard> {
    Json((*state.card).clone())
}

/// GET /ping — Health check.
async fn ping() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy"}))
}

/// Parse a JSON-RPC request body, mapping failures to the standard codes.
fn parse_request(body: &[u8]) -> Result<JsonRpcRequest, JsonRpcResponse> {
    let raw: serde_json::Value = serde_json::from_slice(body).map_err(|e| {
        JsonRpcResponse::error(
            serde_json::Value::Null,
            error_codes::PARSE_ERROR,
            format!("Parse error: {}", e),
        )
    })?;
    let id = raw.get("id").cloned().unwrap_or_default();

    let req: JsonRpcRequest = serde_json::from_value(raw).map_err(|e| {
        JsonRpcResponse::error(
            id.clone(),
            error_codes::INVALID_REQUEST,
            format!("Invalid request: {}", e),
        )
    })?;

    if req.jsonrpc != JSONRPC_VERSION {
        return Err(JsonRpcResponse::error(
            id,
            error_codes::INVALID_REQUEST,
            "Invalid JSON-RPC version, expected 2.0",
        ));
    }
    Ok(req)
}

/// POST / on the provider. `message/stream` is answered as SSE.
async fn provider_jsonrpc(State(state): State<ProviderState>, body: Bytes) -> Response {
    let req = match parse_request(&body) {
        Ok(req) => req,
        Err(resp) => return Json(resp).into_response(),
    };

    if req.method == METHOD_STREAM {
        let events = handler::stream_send(req.id, req.params, &state.ctx).await;
        let stream = futures::stream::iter(
            events
                .into_iter()
                .map(|event| Event::default().json_data(event)),
        );
        return Sse::new(stream).into_response();
    }

    Json(handler::dispatch(req, &state.ctx).await).into_response()
}

/// POST / on the coordinator. The caller's token is delegated onward.
async fn coordinator_jsonrpc(
    State(state): State<CoordinatorState>,
    Extension(token): Extension<BearerToken>,
    body: Bytes,
) -> Json<JsonRpcResponse> {
    let req = match parse_request(&body) {
        Ok(req) => req,
        Err(resp) => return Json(resp),
    };
    Json(coordinator::dispatch(req, &state.ctx, Some(token)).await)
}
