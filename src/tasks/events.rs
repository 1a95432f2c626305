//! Typed task events and the stream they travel on.
//!
//! The stream is a lazy, finite, non-restartable sequence backed by a
//! bounded channel: the engine owns the sender, the caller the receiver.
//! Back-pressure comes from the channel capacity; dropping the receiver
//! cancels nothing by itself (cancellation is a separate signal) but stops
//! delivery.

use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use super::models::{Part, TaskState};
use crate::visibility::VisibilityLevel;

/// Default channel capacity for task event streams.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Kind-specific payload of a task event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskEventKind {
    /// State change, with an optional human-readable note.
    Status {
        state: TaskState,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Output content; `is_partial` marks split messages.
    Message { parts: Vec<Part>, is_partial: bool },
    /// An artifact produced by the task.
    Artifact { artifact: Value },
    /// Terminal event; exactly one per stream, always last.
    Done { final_state: TaskState },
    /// Failure details.
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
}

/// An event on a task's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    pub visibility: VisibilityLevel,
    #[serde(flatten)]
    pub kind: TaskEventKind,
}

impl TaskEvent {
    fn new(task_id: impl Into<String>, kind: TaskEventKind) -> Self {
        Self {
            task_id: task_id.into(),
            timestamp: Utc::now(),
            visibility: VisibilityLevel::Summary,
            kind,
        }
    }

    pub fn status(task_id: impl Into<String>, state: TaskState) -> Self {
        Self::new(task_id, TaskEventKind::Status { state, message: None })
    }

    pub fn status_with_message(
        task_id: impl Into<String>,
        state: TaskState,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            task_id,
            TaskEventKind::Status {
                state,
                message: Some(message.into()),
            },
        )
    }

    pub fn message(task_id: impl Into<String>, parts: Vec<Part>, is_partial: bool) -> Self {
        Self::new(task_id, TaskEventKind::Message { parts, is_partial })
    }

    pub fn text_message(task_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::message(task_id, vec![Part::text(text)], false)
    }

    pub fn artifact(task_id: impl Into<String>, artifact: Value) -> Self {
        Self::new(task_id, TaskEventKind::Artifact { artifact })
    }

    pub fn done(task_id: impl Into<String>, final_state: TaskState) -> Self {
        Self::new(task_id, TaskEventKind::Done { final_state })
    }

    pub fn error(
        task_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        Self::new(
            task_id,
            TaskEventKind::Error {
                code: code.into(),
                message: message.into(),
                details,
            },
        )
    }

    /// Builder: override visibility.
    pub fn with_visibility(mut self, visibility: VisibilityLevel) -> Self {
        self.visibility = visibility;
        self
    }

    /// Re-label this event with another task id (used when surfacing child
    /// events under the parent).
    pub fn relabel(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    /// Whether this is the terminal event.
    pub fn is_done(&self) -> bool {
        matches!(self.kind, TaskEventKind::Done { .. })
    }

    /// Concatenated text of a message event, empty otherwise.
    pub fn message_text(&self) -> String {
        match &self.kind {
            TaskEventKind::Message { parts, .. } => parts
                .iter()
                .filter_map(Part::as_text)
                .collect::<Vec<_>>()
                .join(""),
            _ => String::new(),
        }
    }
}

/// Receiver half of a task's event stream.
#[derive(Debug)]
pub struct TaskEventStream {
    receiver: mpsc::Receiver<TaskEvent>,
}

impl TaskEventStream {
    /// Create a stream pair with the default capacity.
    pub fn channel() -> (mpsc::Sender<TaskEvent>, TaskEventStream) {
        let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (sender, TaskEventStream { receiver })
    }

    /// Next event, or `None` once the stream is exhausted.
    pub async fn next(&mut self) -> Option<TaskEvent> {
        self.receiver.recv().await
    }

    /// Drain the remaining events into a vector.
    pub async fn collect(mut self) -> Vec<TaskEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

impl Stream for TaskEventStream {
    type Item = TaskEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_shape() {
        let event = TaskEvent::status("task-1", TaskState::Working);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "status");
        assert_eq!(json["state"], "working");
        assert_eq!(json["task_id"], "task-1");
        assert_eq!(json["visibility"], "summary");

        let done = TaskEvent::done("task-1", TaskState::Completed);
        let json = serde_json::to_value(&done).unwrap();
        assert_eq!(json["kind"], "done");
        assert_eq!(json["final_state"], "completed");
    }

    #[test]
    fn test_relabel() {
        let event = TaskEvent::text_message("child-task", "hello").relabel("parent-task");
        assert_eq!(event.task_id, "parent-task");
        assert_eq!(event.message_text(), "hello");
    }

    #[tokio::test]
    async fn test_stream_delivers_in_order() {
        let (sender, mut stream) = TaskEventStream::channel();
        tokio::spawn(async move {
            sender
                .send(TaskEvent::status("t", TaskState::Working))
                .await
                .unwrap();
            sender.send(TaskEvent::text_message("t", "hi")).await.unwrap();
            sender
                .send(TaskEvent::done("t", TaskState::Completed))
                .await
                .unwrap();
        });

        let first = stream.next().await.unwrap();
        assert!(matches!(first.kind, TaskEventKind::Status { .. }));
        let second = stream.next().await.unwrap();
        assert_eq!(second.message_text(), "hi");
        let third = stream.next().await.unwrap();
        assert!(third.is_done());
        assert!(stream.next().await.is_none());
    }
}
