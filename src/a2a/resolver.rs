//! Agent Card resolution.
//!
//! Fetches `<base>/.well-known/agent-card.json` with the caller's bearer
//! token (if any) and validates the bits the dispatcher relies on. No
//! caching: every delegation resolves afresh.

use crate::a2a::auth::BearerToken;
use crate::a2a::types::{AgentCard, TRANSPORT_JSONRPC};
use crate::error::DelegationError;
use reqwest::{Client, StatusCode, header};

pub const AGENT_CARD_PATH: &str = "/.well-known/agent-card.json";

/// Well-known descriptor URL for a base address.
pub fn card_url(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), AGENT_CARD_PATH)
}

/// Fetch and parse the remote Agent Card.
pub async fn resolve(
    client: &Client,
    base_url: &str,
    token: Option<&BearerToken>,
) -> Result<AgentCard, DelegationError> {
    let url = card_url(base_url);
    tracing::debug!(%url, "A2A: fetching agent card");

    let resolution = |reason: String| DelegationError::Resolution {
        url: url.clone(),
        reason,
    };

    let mut req = client
        .get(&url)
        .header(header::ACCEPT, "application/json");
    if let Some(token) = token {
        req = req.bearer_auth(token.secret());
    }

    let resp = req
        .send()
        .await
        .map_err(|e| resolution(format!("request failed: {}", e)))?;

    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(resolution(format!(
            "authorization rejected (HTTP {})",
            status.as_u16()
        )));
    }
    if !status.is_success() {
        return Err(resolution(format!("HTTP {}", status)));
    }

    let body = resp
        .bytes()
        .await
        .map_err(|e| resolution(format!("failed to read body: {}", e)))?;

    parse_card(&body).map_err(resolution)
}

/// Parse and validate a descriptor document.
pub fn parse_card(body: &[u8]) -> Result<AgentCard, String> {
    let card: AgentCard =
        serde_json::from_slice(body).map_err(|e| format!("malformed agent card: {}", e))?;

    if card.url.trim().is_empty() {
        return Err("agent card has an empty url".to_string());
    }
    reqwest::Url::parse(&card.url)
        .map_err(|e| format!("agent card url {:?} is invalid: {}", card.url, e))?;

    Ok(card)
}

/// Whether we can talk to this card's preferred transport.
pub fn check_transport(card: &AgentCard) -> Result<(), DelegationError> {
    if card.preferred_transport.eq_ignore_ascii_case(TRANSPORT_JSONRPC) {
        Ok(())
    } else {
        Err(DelegationError::Protocol(format!(
            "agent '{}' prefers unsupported transport {}",
            card.name, card.preferred_transport
        )))
    }
}
