//! Collapse whatever the remote agent sent back into plain text.
//!
//! - Message → its text parts, in order
//! - Task → every artifact's text parts, artifact order then part order;
//!   if the artifacts carry no text, the terminal status message, then the
//!   last agent message in history
//! - Streaming updates → the text they carry
//! - Anything else → the raw JSON, rendered as a string
//!
//! Non-text parts are skipped without complaint.

use crate::a2a::codec::ResponseEvent;
use crate::a2a::types::*;

/// Concatenate the text parts of a part list, in order.
pub fn parts_text(parts: &[Part]) -> String {
    parts.iter().filter_map(Part::as_text).collect()
}

pub fn message_text(message: &Message) -> String {
    parts_text(&message.parts)
}

pub fn artifacts_text(artifacts: &[Artifact]) -> String {
    artifacts.iter().map(|a| parts_text(&a.parts)).collect()
}

pub fn task_text(task: &Task) -> String {
    let text = artifacts_text(&task.artifacts);
    if !text.is_empty() {
        return text;
    }

    if let Some(text) = task
        .status
        .message
        .as_ref()
        .map(message_text)
        .filter(|t| !t.is_empty())
    {
        return text;
    }

    task.history
        .iter()
        .rev()
        .find(|m| m.role == Role::Agent)
        .map(message_text)
        .unwrap_or_default()
}

/// Normalize a single atomic reply.
pub fn normalize(event: &ResponseEvent) -> String {
    match event {
        ResponseEvent::Message(message) => message_text(message),
        ResponseEvent::Task(task) => task_text(task),
        ResponseEvent::StatusUpdate(update) => update
            .status
            .message
            .as_ref()
            .map(message_text)
            .unwrap_or_default(),
        ResponseEvent::ArtifactUpdate(update) => parts_text(&update.artifact.parts),
        ResponseEvent::Other(raw) => raw.to_string(),
    }
}

/// What a streamed event contributes, and whether the stream is done.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamStep {
    /// Text to emit (possibly none) and keep reading.
    Continue(Option<String>),
    /// Text to emit (possibly none); no further events matter.
    Finish(Option<String>),
    /// The remote reported a failed or rejected task.
    Failed(String),
}

/// Folds streamed events into text increments.
///
/// Artifact updates and messages produce text. Status updates are progress
/// only, except that a terminal failure ends the stream as an error. A
/// final Task snapshot contributes its text only if nothing was emitted
/// before it, so a stream that already delivered its artifacts does not
/// repeat them.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    emitted_any: bool,
    text: String,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&mut self, event: &ResponseEvent) -> StreamStep {
        let step = match event {
            ResponseEvent::ArtifactUpdate(update) => {
                let text = parts_text(&update.artifact.parts);
                StreamStep::Continue(non_empty(text))
            }
            ResponseEvent::Message(message) => StreamStep::Finish(non_empty(message_text(message))),
            ResponseEvent::StatusUpdate(update) => {
                if update.status.state.is_failure() {
                    StreamStep::Failed(status_failure_text(update.status.message.as_ref()))
                } else if update.is_final || update.status.state.is_terminal() {
                    StreamStep::Finish(None)
                } else {
                    StreamStep::Continue(None)
                }
            }
            ResponseEvent::Task(task) => {
                if task.status.state.is_failure() {
                    StreamStep::Failed(status_failure_text(task.status.message.as_ref()))
                } else {
                    let text = if self.emitted_any {
                        None
                    } else {
                        non_empty(task_text(task))
                    };
                    if task.status.state.is_terminal() {
                        StreamStep::Finish(text)
                    } else {
                        StreamStep::Continue(text)
                    }
                }
            }
            ResponseEvent::Other(raw) => StreamStep::Continue(non_empty(raw.to_string())),
        };

        if let StreamStep::Continue(Some(text)) | StreamStep::Finish(Some(text)) = &step {
            self.emitted_any = true;
            self.text.push_str(text);
        }
        step
    }

    /// Everything emitted so far, concatenated.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() { None } else { Some(text) }
}

fn status_failure_text(message: Option<&Message>) -> String {
    message
        .map(message_text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "task failed without a message".to_string())
}
