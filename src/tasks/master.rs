//! Master-agent delegation routing.
//!
//! A stateful router in front of the task engine. While a delegation is
//! active, incoming user messages are forwarded into the delegated
//! sub-agent's task; a configurable set of cancel words clears the
//! delegation and confirms to the user. Delegation clears itself when the
//! delegated task completes, and survives `input_required` pauses.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use super::engine::{CancellationSignal, TaskEngine};
use super::events::{TaskEvent, TaskEventKind, TaskEventStream};
use super::models::{Task, TaskState};
use crate::agents::models::{Agent, AgentIdentity};

/// Words that clear an active delegation.
pub const DEFAULT_CANCEL_WORDS: [&str; 5] = ["cancel", "exit", "quit", "stop", "reset"];

const CANCEL_CONFIRMATION: &str =
    "Delegation cancelled. You are back with the main agent.";

/// Stateful master agent that can hand its conversation to a sub-agent.
pub struct MasterAgent {
    identity: AgentIdentity,
    engine: Arc<TaskEngine>,
    /// Agent handling messages when no delegation is active.
    primary: Arc<dyn Agent>,
    delegated_agent: Arc<Mutex<Option<Arc<dyn Agent>>>>,
    cancel_words: Vec<String>,
}

impl MasterAgent {
    pub fn new(identity: AgentIdentity, engine: Arc<TaskEngine>, primary: Arc<dyn Agent>) -> Self {
        Self {
            identity,
            engine,
            primary,
            delegated_agent: Arc::new(Mutex::new(None)),
            cancel_words: DEFAULT_CANCEL_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }

    /// Builder: replace the cancel-word list.
    pub fn with_cancel_words(mut self, words: Vec<String>) -> Self {
        self.cancel_words = words;
        self
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Begin routing messages to `agent`.
    pub fn set_delegated_agent(&self, agent: Arc<dyn Agent>) {
        info!(master = %self.identity.id, delegate = %agent.identity().id, "delegation started");
        *self.delegated_agent.lock() = Some(agent);
    }

    /// The currently delegated agent id, if any.
    pub fn delegated_agent_id(&self) -> Option<String> {
        self.delegated_agent
            .lock()
            .as_ref()
            .map(|agent| agent.identity().id.clone())
    }

    /// Clear any active delegation.
    pub fn clear_delegation(&self) {
        *self.delegated_agent.lock() = None;
    }

    /// Route an incoming task: to the delegated agent while delegation is
    /// active, otherwise to the primary agent.
    pub fn handle_task(&self, task: Task, cancellation: CancellationSignal) -> TaskEventStream {
        let delegated = self.delegated_agent.lock().clone();
        let Some(delegate) = delegated else {
            return self.engine.process_task(self.primary.clone(), task, cancellation);
        };

        let message = task.latest_user_message().unwrap_or_default();
        let normalized = message.trim().to_lowercase();
        if self.cancel_words.iter().any(|word| word == &normalized) {
            info!(master = %self.identity.id, "delegation cleared by cancel word");
            self.clear_delegation();
            return confirmation_stream(task.id.clone());
        }

        // Forward into the delegated sub-agent's task; watch the stream to
        // clear delegation on completion while leaving it in place across
        // input_required pauses.
        let mut forwarded =
            self.engine
                .process_child_task(delegate, &task, message, &cancellation);

        let (sender, stream) = TaskEventStream::channel();
        let delegation_slot = self.delegated_agent.clone();
        tokio::spawn(async move {
            while let Some(event) = forwarded.next().await {
                match &event.kind {
                    TaskEventKind::Done {
                        final_state: TaskState::Completed,
                    } => {
                        *delegation_slot.lock() = None;
                    }
                    TaskEventKind::Status {
                        state: TaskState::InputRequired,
                        ..
                    } => {
                        // Delegation stays active while the sub-agent waits.
                    }
                    _ => {}
                }
                if sender.send(event).await.is_err() {
                    break;
                }
            }
        });

        stream
    }
}

fn confirmation_stream(task_id: String) -> TaskEventStream {
    let (sender, stream) = TaskEventStream::channel();
    tokio::spawn(async move {
        let _ = sender
            .send(TaskEvent::text_message(&task_id, CANCEL_CONFIRMATION))
            .await;
        let _ = sender
            .send(TaskEvent::done(&task_id, TaskState::Completed))
            .await;
    });
    stream
}
