//! JSON-RPC 2.0 handler for the Capability Provider.
//!
//! Dispatches JSON-RPC methods:
//! - `message/send`   → run the skill, reply with a Message or a completed Task
//! - `message/stream` → same work, emitted as status/artifact update events
//! - `tasks/get`      → retrieve task by ID
//! - `tasks/cancel`   → cancel a non-terminal task

use crate::a2a::calculator::Skill;
use crate::a2a::codec::{METHOD_CANCEL_TASK, METHOD_GET_TASK, METHOD_SEND, METHOD_STREAM};
use crate::a2a::types::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const DEFAULT_TASK_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct Tasks {
    by_id: HashMap<String, Task>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
}

/// In-memory task store. Holds at most `capacity` tasks and evicts the
/// oldest when full.
#[derive(Debug, Clone)]
pub struct TaskStore {
    inner: Arc<RwLock<Tasks>>,
    capacity: usize,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new(DEFAULT_TASK_CAPACITY)
    }
}

impl TaskStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Tasks::default())),
            capacity: capacity.max(1),
        }
    }

    pub async fn insert(&self, task: Task) {
        let id = task.id.clone();
        let mut tasks = self.inner.write().await;
        if tasks.by_id.insert(id.clone(), task).is_none() {
            tasks.order.push_back(id);
        }
        while tasks.by_id.len() > self.capacity {
            let Some(oldest) = tasks.order.pop_front() else {
                break;
            };
            tasks.by_id.remove(&oldest);
            tracing::debug!(task_id = %oldest, "A2A: evicted task from store");
        }
    }

    pub async fn get(&self, id: &str) -> Option<Task> {
        self.inner.read().await.by_id.get(id).cloned()
    }

    /// Task ids, oldest first.
    pub async fn ids(&self) -> Vec<String> {
        self.inner.read().await.order.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Cancel a task. `None` if unknown, `Err(state)` if already terminal.
    pub async fn cancel(&self, id: &str) -> Option<Result<Task, TaskState>> {
        let mut tasks = self.inner.write().await;
        let task = tasks.by_id.get_mut(id)?;
        if task.status.state.is_terminal() {
            return Some(Err(task.status.state));
        }
        task.status = TaskStatus::now(TaskState::Canceled, None);
        Some(Ok(task.clone()))
    }

    /// Record a skill result on a running task. A task canceled meanwhile
    /// keeps its canceled status. `None` if the task was evicted.
    pub async fn complete(&self, id: &str, result: Result<String, String>) -> Option<Task> {
        let mut tasks = self.inner.write().await;
        let task = tasks.by_id.get_mut(id)?;
        if !task.status.state.is_terminal() {
            apply_result(task, result);
        }
        Some(task.clone())
    }
}

/// Shape of a `message/send` result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyMode {
    /// A single agent Message carrying the answer.
    #[default]
    Message,
    /// A completed Task with the answer as an artifact.
    Task,
}

#[derive(Clone)]
pub struct ProviderContext {
    pub skill: Arc<dyn Skill>,
    pub store: TaskStore,
    pub reply_mode: ReplyMode,
}

impl ProviderContext {
    pub fn new(skill: Arc<dyn Skill>, reply_mode: ReplyMode) -> Self {
        Self {
            skill,
            store: TaskStore::default(),
            reply_mode,
        }
    }

    pub fn with_task_capacity(mut self, capacity: usize) -> Self {
        self.store = TaskStore::new(capacity);
        self
    }
}

/// Dispatch a JSON-RPC request to the appropriate handler.
///
/// `message/stream` is answered over SSE by the server; see [`stream_send`].
pub async fn dispatch(req: JsonRpcRequest, ctx: &ProviderContext) -> JsonRpcResponse {
    match req.method.as_str() {
        METHOD_SEND => handle_send_message(req.id, req.params, ctx).await,
        METHOD_GET_TASK => handle_get_task(req.id, req.params, &ctx.store).await,
        METHOD_CANCEL_TASK => handle_cancel_task(req.id, req.params, &ctx.store).await,
        METHOD_STREAM => JsonRpcResponse::error(
            req.id,
            error_codes::UNSUPPORTED_OPERATION,
            "message/stream must be requested with Accept: text/event-stream",
        ),
        _ => JsonRpcResponse::error(
            req.id,
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", req.method),
        ),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(
    id: &RequestId,
    params: Value,
) -> Result<T, JsonRpcResponse> {
    serde_json::from_value(params).map_err(|e| {
        JsonRpcResponse::error(
            id.clone(),
            error_codes::INVALID_PARAMS,
            format!("Invalid params: {}", e),
        )
    })
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|_| serde_json::json!({"error": "serialize"}))
}

/// Pull the request text out of `message/send` params.
fn request_text(id: &RequestId, params: Value) -> Result<(Message, String), JsonRpcResponse> {
    let send_params: SendMessageParams = parse_params(id, params)?;
    let text = send_params.message.joined_text();
    if text.trim().is_empty() {
        return Err(JsonRpcResponse::error(
            id.clone(),
            error_codes::INVALID_PARAMS,
            "Invalid params: message has no text parts",
        ));
    }
    Ok((send_params.message, text))
}

async fn handle_send_message(
    id: RequestId,
    params: Value,
    ctx: &ProviderContext,
) -> JsonRpcResponse {
    let (message, text) = match request_text(&id, params) {
        Ok(parsed) => parsed,
        Err(resp) => return resp,
    };

    match ctx.reply_mode {
        ReplyMode::Message => match execute(ctx, &message, &text).await {
            Ok(answer) => {
                let mut reply = Message::agent_text(answer);
                reply.context_id = message.context_id.clone();
                JsonRpcResponse::success(id, to_json(&reply))
            }
            Err(e) => JsonRpcResponse::error(id, error_codes::INVALID_PARAMS, e.to_string()),
        },
        ReplyMode::Task => {
            let task = run_task(ctx, message, &text).await;
            JsonRpcResponse::success(id, to_json(&task))
        }
    }
}

async fn execute(ctx: &ProviderContext, message: &Message, text: &str) -> Result<String, String> {
    let result = ctx.skill.execute(text).await.map_err(|e| e.to_string());
    tracing::info!(
        skill = %ctx.skill.descriptor().id,
        ok = result.is_ok(),
        "A2A: executed skill for message {}",
        message.message_id
    );
    result
}

/// Store a `working` task, run the skill, and record its result.
async fn run_task(ctx: &ProviderContext, request: Message, text: &str) -> Task {
    let mut task = working_task(request.clone());
    ctx.store.insert(task.clone()).await;

    let result = execute(ctx, &request, text).await;
    match ctx.store.complete(&task.id, result.clone()).await {
        Some(stored) => stored,
        None => {
            apply_result(&mut task, result);
            task
        }
    }
}

fn working_task(request: Message) -> Task {
    let context_id = request
        .context_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    Task {
        kind: "task".to_string(),
        id: Uuid::new_v4().to_string(),
        context_id: Some(context_id),
        status: TaskStatus::now(TaskState::Working, None),
        history: vec![request],
        artifacts: vec![],
        metadata: None,
    }
}

/// Completed with a `result` artifact, or failed with the error as its
/// status message.
fn apply_result(task: &mut Task, result: Result<String, String>) {
    match result {
        Ok(answer) => {
            task.status = TaskStatus::now(TaskState::Completed, None);
            task.artifacts = vec![Artifact {
                artifact_id: Uuid::new_v4().to_string(),
                name: Some("result".to_string()),
                description: None,
                parts: vec![Part::text(answer)],
                metadata: None,
            }];
        }
        Err(reason) => {
            let mut msg = Message::agent_text(reason);
            msg.task_id = Some(task.id.clone());
            msg.context_id = task.context_id.clone();
            task.status = TaskStatus::now(TaskState::Failed, Some(msg));
        }
    }
}

/// Handle `message/stream`: the sequence of responses to emit as SSE events.
///
/// `working` status, then the answer as an artifact update, then a final
/// `completed` status. A skill failure ends with a final `failed` status.
/// Malformed params yield a single error response.
pub async fn stream_send(
    id: RequestId,
    params: Value,
    ctx: &ProviderContext,
) -> Vec<JsonRpcResponse> {
    let (message, text) = match request_text(&id, params) {
        Ok(parsed) => parsed,
        Err(resp) => return vec![resp],
    };

    let task = run_task(ctx, message, &text).await;
    tracing::info!(task_id = %task.id, state = ?task.status.state, "A2A: streamed task");

    let status_event = |status: TaskStatus, is_final: bool| TaskStatusUpdateEvent {
        task_id: task.id.clone(),
        context_id: task.context_id.clone(),
        status,
        is_final,
    };

    let mut events = vec![with_kind(
        "status-update",
        &status_event(TaskStatus::now(TaskState::Working, None), false),
    )];
    for artifact in &task.artifacts {
        let update = TaskArtifactUpdateEvent {
            task_id: task.id.clone(),
            context_id: task.context_id.clone(),
            artifact: artifact.clone(),
            append: None,
            last_chunk: Some(true),
        };
        events.push(with_kind("artifact-update", &update));
    }
    events.push(with_kind(
        "status-update",
        &status_event(task.status.clone(), true),
    ));

    events
        .into_iter()
        .map(|event| JsonRpcResponse::success(id.clone(), event))
        .collect()
}

fn with_kind<T: Serialize>(kind: &str, event: &T) -> Value {
    let mut value = to_json(event);
    if let Some(obj) = value.as_object_mut() {
        obj.insert("kind".to_string(), Value::String(kind.to_string()));
    }
    value
}

async fn handle_get_task(id: RequestId, params: Value, store: &TaskStore) -> JsonRpcResponse {
    let get_params: GetTaskParams = match parse_params(&id, params) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match store.get(&get_params.id).await {
        Some(mut task) => {
            if let Some(len) = get_params.history_length {
                let skip = task.history.len().saturating_sub(len);
                task.history.drain(..skip);
            }
            JsonRpcResponse::success(id, to_json(&task))
        }
        None => JsonRpcResponse::error(
            id,
            error_codes::TASK_NOT_FOUND,
            format!("Task not found: {}", get_params.id),
        ),
    }
}

async fn handle_cancel_task(id: RequestId, params: Value, store: &TaskStore) -> JsonRpcResponse {
    let cancel_params: CancelTaskParams = match parse_params(&id, params) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match store.cancel(&cancel_params.id).await {
        Some(Ok(task)) => {
            tracing::info!("A2A: Canceled task {}", cancel_params.id);
            JsonRpcResponse::success(id, to_json(&task))
        }
        Some(Err(state)) => JsonRpcResponse::error(
            id,
            error_codes::TASK_NOT_CANCELABLE,
            format!("Cannot cancel task in {:?} state", state),
        ),
        None => JsonRpcResponse::error(
            id,
            error_codes::TASK_NOT_FOUND,
            format!("Task not found: {}", cancel_params.id),
        ),
    }
}
