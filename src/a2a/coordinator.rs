//! Coordinator role: accepts `message/send`, delegates the text to the
//! configured provider, and answers with the delegation outcome.
//!
//! The caller's bearer token is forwarded to the provider. It travels with
//! the request value, never through shared state, so concurrent callers
//! each delegate with their own credential.

use crate::a2a::auth::BearerToken;
use crate::a2a::codec::{METHOD_CANCEL_TASK, METHOD_GET_TASK, METHOD_SEND, METHOD_STREAM};
use crate::a2a::dispatch::{DelegationOutcome, DelegationRequest, Dispatcher};
use crate::a2a::types::*;
use serde_json::{Value, json};
use std::sync::Arc;

#[derive(Clone)]
pub struct CoordinatorContext {
    pub dispatcher: Arc<Dispatcher>,
    pub target_name: String,
    pub target_url: Option<String>,
}

impl CoordinatorContext {
    pub fn new(
        dispatcher: Dispatcher,
        target_name: impl Into<String>,
        target_url: Option<String>,
    ) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            target_name: target_name.into(),
            target_url,
        }
    }

    /// Delegate `problem` on behalf of the holder of `token`.
    pub async fn delegate(&self, problem: String, token: Option<BearerToken>) -> DelegationOutcome {
        let request =
            DelegationRequest::new(problem, self.target_name.clone(), self.target_url.clone())
                .with_token(token);
        self.dispatcher.delegate(request).await
    }
}

pub async fn dispatch(
    req: JsonRpcRequest,
    ctx: &CoordinatorContext,
    token: Option<BearerToken>,
) -> JsonRpcResponse {
    match req.method.as_str() {
        METHOD_SEND => handle_send_message(req.id, req.params, ctx, token).await,
        METHOD_STREAM | METHOD_GET_TASK | METHOD_CANCEL_TASK => JsonRpcResponse::error(
            req.id,
            error_codes::UNSUPPORTED_OPERATION,
            format!("{} is not supported by the coordinator", req.method),
        ),
        _ => JsonRpcResponse::error(
            req.id,
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", req.method),
        ),
    }
}

async fn handle_send_message(
    id: RequestId,
    params: Value,
    ctx: &CoordinatorContext,
    token: Option<BearerToken>,
) -> JsonRpcResponse {
    let send_params: SendMessageParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => {
            return JsonRpcResponse::error(
                id,
                error_codes::INVALID_PARAMS,
                format!("Invalid params: {}", e),
            );
        }
    };

    let problem = send_params.message.joined_text();
    if problem.trim().is_empty() {
        return JsonRpcResponse::error(
            id,
            error_codes::INVALID_PARAMS,
            "Invalid params: message has no text parts",
        );
    }

    let outcome = ctx.delegate(problem, token).await;

    let mut reply = Message::agent_text(outcome.content);
    reply.context_id = send_params.message.context_id;
    reply.metadata = Some(json!({
        "delegationStatus": outcome.status,
        "delegatedTo": ctx.target_name,
    }));

    let result = serde_json::to_value(&reply).unwrap_or_else(|_| json!({"error": "serialize"}));
    JsonRpcResponse::success(id, result)
}
