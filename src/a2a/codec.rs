//! JSON-RPC envelope codec for outgoing task requests and incoming replies.
//!
//! Encoding always produces a `jsonrpc: "2.0"` request whose `params.message`
//! is the delegated [`Message`]. Decoding classifies the `result` of a reply
//! by its `kind` discriminator (falling back to shape when `kind` is absent)
//! into a [`ResponseEvent`]. Unrecognised result shapes are not errors: they
//! surface as [`ResponseEvent::Other`] so the normalizer can still render
//! them.

use crate::a2a::types::*;
use crate::error::DelegationError;
use serde_json::Value;
use uuid::Uuid;

pub const METHOD_SEND: &str = "message/send";
pub const METHOD_STREAM: &str = "message/stream";
pub const METHOD_GET_TASK: &str = "tasks/get";
pub const METHOD_CANCEL_TASK: &str = "tasks/cancel";

/// One decoded reply, or one event of a streamed reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEvent {
    Message(Message),
    Task(Task),
    StatusUpdate(TaskStatusUpdateEvent),
    ArtifactUpdate(TaskArtifactUpdateEvent),
    Other(Value),
}

/// A decoded response envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedResponse {
    pub id: RequestId,
    pub body: ResponseBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Result(ResponseEvent),
    Error(JsonRpcError),
}

/// Fresh string request id.
pub fn new_request_id() -> RequestId {
    Value::String(Uuid::new_v4().to_string())
}

/// Build the request envelope for a delegated message.
pub fn encode_send(message: Message, id: Option<RequestId>, streaming: bool) -> JsonRpcRequest {
    let params = SendMessageParams {
        message,
        configuration: None,
        metadata: None,
    };

    JsonRpcRequest {
        jsonrpc: JSONRPC_VERSION.to_string(),
        method: if streaming { METHOD_STREAM } else { METHOD_SEND }.to_string(),
        // SendMessageParams only holds JSON-native fields.
        params: serde_json::to_value(&params).unwrap_or(Value::Null),
        id: id.unwrap_or_else(new_request_id),
    }
}

/// Decode a complete response body.
pub fn decode_response(body: &[u8]) -> Result<DecodedResponse, DelegationError> {
    let raw: Value = serde_json::from_slice(body)
        .map_err(|e| DelegationError::Protocol(format!("response is not valid JSON: {}", e)))?;
    decode_envelope(raw)
}

/// Decode an already-parsed response envelope.
pub fn decode_envelope(raw: Value) -> Result<DecodedResponse, DelegationError> {
    let Value::Object(mut envelope) = raw else {
        return Err(DelegationError::Protocol(
            "response envelope is not a JSON object".to_string(),
        ));
    };

    match envelope.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => {}
        other => {
            return Err(DelegationError::Protocol(format!(
                "unexpected jsonrpc version: {:?}",
                other
            )));
        }
    }

    let id = envelope.remove("id").unwrap_or(Value::Null);

    if let Some(error) = envelope.remove("error").filter(|e| !e.is_null()) {
        let error: JsonRpcError = serde_json::from_value(error)
            .map_err(|e| DelegationError::Protocol(format!("malformed error object: {}", e)))?;
        return Ok(DecodedResponse {
            id,
            body: ResponseBody::Error(error),
        });
    }

    match envelope.remove("result") {
        Some(result) if !result.is_null() => Ok(DecodedResponse {
            id,
            body: ResponseBody::Result(decode_result(result)?),
        }),
        _ => Err(DelegationError::Protocol(
            "response carries neither result nor error".to_string(),
        )),
    }
}

/// Classify a `result` value.
pub fn decode_result(result: Value) -> Result<ResponseEvent, DelegationError> {
    let kind = result
        .get("kind")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| infer_kind(&result).map(str::to_string));

    let event = match kind.as_deref() {
        Some("message") => ResponseEvent::Message(parse(result, "message")?),
        Some("task") => ResponseEvent::Task(parse(result, "task")?),
        Some("status-update") => ResponseEvent::StatusUpdate(parse(result, "status-update")?),
        Some("artifact-update") => ResponseEvent::ArtifactUpdate(parse(result, "artifact-update")?),
        _ => ResponseEvent::Other(result),
    };
    Ok(event)
}

fn infer_kind(result: &Value) -> Option<&'static str> {
    let has = |field: &str| result.get(field).is_some();
    if has("artifact") && has("taskId") {
        Some("artifact-update")
    } else if has("status") && has("taskId") {
        Some("status-update")
    } else if has("status") && has("id") {
        Some("task")
    } else if has("role") && has("parts") {
        Some("message")
    } else {
        None
    }
}

fn parse<T: serde::de::DeserializeOwned>(value: Value, kind: &str) -> Result<T, DelegationError> {
    serde_json::from_value(value)
        .map_err(|e| DelegationError::Protocol(format!("malformed {} result: {}", kind, e)))
}
