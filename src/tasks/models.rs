//! Task and message data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a task. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Submitted,
    Working,
    InputRequired,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Whether the state machine permits moving to `next`. Transitions are
    /// monotonic; terminal states absorb everything.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (TaskState::Submitted, TaskState::Working) => true,
            (TaskState::Working, TaskState::InputRequired) => true,
            (TaskState::InputRequired, TaskState::Working) => true,
            (TaskState::Working | TaskState::InputRequired | TaskState::Submitted, state)
                if state.is_terminal() =>
            {
                true
            }
            _ => false,
        }
    }
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
    System,
}

/// One part of a message. Text is the core representation; binary and file
/// parts are opaque pass-through.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    Binary { media_type: String, data: Vec<u8> },
    File { name: String, uri: String },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    /// Text content, if this is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A message within a task. Ordering is insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub parts: Vec<Part>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![Part::text(text)],
            timestamp: Utc::now(),
        }
    }

    pub fn agent_text(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Agent,
            parts: vec![Part::text(text)],
            timestamp: Utc::now(),
        }
    }

    /// All text parts joined with spaces.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A unit of work assigned to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub tenant_id: Option<String>,
    pub user_id: String,
    /// Parent task identity, for sub-tasks. Identity only, never a pointer.
    pub parent_task_id: Option<String>,
    pub messages: Vec<Message>,
    pub state: TaskState,
    pub conversation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// New submitted task carrying a single user message.
    pub fn new(message: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: None,
            user_id: user_id.into(),
            parent_task_id: None,
            messages: vec![Message::user_text(message)],
            state: TaskState::Submitted,
            conversation_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: set tenant.
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Builder: set conversation.
    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Move to `next` if the state machine allows it.
    pub fn transition(&mut self, next: TaskState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            self.updated_at = Utc::now();
            true
        } else {
            false
        }
    }

    /// Latest user message text, if any.
    pub fn latest_user_message(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(Message::text)
    }

    /// Derive a child task for a sub-agent: carries this task's tenant,
    /// user, and conversation, points back via `parent_task_id`, and seeds
    /// up to the five most recent prior messages as context.
    pub fn derive_child(&self, message: impl Into<String>) -> Task {
        let now = Utc::now();
        let history_start = self.messages.len().saturating_sub(5);
        let mut messages: Vec<Message> = self.messages[history_start..].to_vec();
        messages.push(Message::user_text(message));

        Task {
            id: Uuid::new_v4().to_string(),
            tenant_id: self.tenant_id.clone(),
            user_id: self.user_id.clone(),
            parent_task_id: Some(self.id.clone()),
            messages,
            state: TaskState::Submitted,
            conversation_id: self.conversation_id.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_transitions() {
        assert!(TaskState::Submitted.can_transition_to(TaskState::Working));
        assert!(TaskState::Working.can_transition_to(TaskState::InputRequired));
        assert!(TaskState::InputRequired.can_transition_to(TaskState::Working));
        assert!(TaskState::Working.can_transition_to(TaskState::Completed));
        assert!(TaskState::Working.can_transition_to(TaskState::Cancelled));
        assert!(!TaskState::Submitted.can_transition_to(TaskState::InputRequired));
    }

    #[test]
    fn test_terminal_states_absorbing() {
        for terminal in [TaskState::Completed, TaskState::Failed, TaskState::Cancelled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(TaskState::Working));
            assert!(!terminal.can_transition_to(TaskState::Completed));
        }
    }

    #[test]
    fn test_transition_updates_timestamp() {
        let mut task = Task::new("do a thing", "user-1");
        let before = task.updated_at;
        assert!(task.transition(TaskState::Working));
        assert!(task.updated_at >= before);
        assert!(!task.transition(TaskState::Submitted));
    }

    #[test]
    fn test_latest_user_message() {
        let mut task = Task::new("first", "user-1");
        task.messages.push(Message::agent_text("reply"));
        task.messages.push(Message::user_text("second"));
        assert_eq!(task.latest_user_message().as_deref(), Some("second"));
    }

    #[test]
    fn test_derive_child_carries_lineage_and_history() {
        let mut task = Task::new("m1", "user-1")
            .with_tenant("tenant-a")
            .with_conversation("conv-1");
        for i in 2..=8 {
            task.messages.push(Message::user_text(format!("m{}", i)));
        }

        let child = task.derive_child("sub request");
        assert_eq!(child.parent_task_id.as_deref(), Some(task.id.as_str()));
        assert_eq!(child.tenant_id.as_deref(), Some("tenant-a"));
        assert_eq!(child.user_id, "user-1");
        assert_eq!(child.conversation_id.as_deref(), Some("conv-1"));
        // Five inherited messages plus the new request.
        assert_eq!(child.messages.len(), 6);
        assert_eq!(child.messages[0].text(), "m4");
        assert_eq!(child.messages.last().unwrap().text(), "sub request");
    }
}
