//! Skill orchestrator.
//!
//! Resolves a skill by name, merges its metadata over the platform
//! defaults, activates its tool whitelist on the executor for the duration
//! of the run, and drives the autonomous loop. Forked skills run as
//! bounded sub-agents with reduced iteration budgets.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use super::config::{AutonomousConfig, ExecutionContext};
use super::models::{ContextMode, Skill};
use crate::agents::models::AgentIdentity;
use crate::agents::AutonomousAgent;
use crate::errors::{PlatformError, Result};
use crate::tasks::{CancellationSignal, Task, TaskEngine, TaskEvent, TaskEventStream, TaskState};

/// Routes skill execution to the autonomous executor.
pub struct SkillOrchestrator {
    skills: RwLock<HashMap<String, Skill>>,
    engine: Arc<TaskEngine>,
    default_config: AutonomousConfig,
}

impl SkillOrchestrator {
    pub fn new(engine: Arc<TaskEngine>) -> Self {
        Self::with_defaults(engine, AutonomousConfig::default())
    }

    pub fn with_defaults(engine: Arc<TaskEngine>, default_config: AutonomousConfig) -> Self {
        Self {
            skills: RwLock::new(HashMap::new()),
            engine,
            default_config,
        }
    }

    /// Add a skill to the index. Re-registration replaces.
    pub fn register_skill(&self, skill: Skill) {
        self.skills.write().insert(skill.metadata.name.clone(), skill);
    }

    /// Resolve a skill by name.
    pub fn get_skill(&self, name: &str) -> Result<Skill> {
        self.skills
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PlatformError::SkillNotFound {
                name: name.to_string(),
            })
    }

    /// Execute a skill against a user request, yielding the task's event
    /// stream. Legacy execution modes are rejected with a deprecation note
    /// and run autonomously anyway.
    pub fn execute(
        &self,
        skill_name: &str,
        user_request: &str,
        user_id: &str,
        tenant_id: Option<String>,
        context: Option<ExecutionContext>,
        cancellation: CancellationSignal,
    ) -> Result<TaskEventStream> {
        let skill = self.get_skill(skill_name)?;
        let context = context.unwrap_or_default();

        if let Some(mode) = &skill.metadata.execution_mode {
            if mode.to_lowercase() != "autonomous" {
                warn!(
                    skill = skill_name,
                    mode, "execution mode is deprecated; running autonomous"
                );
            }
        }

        let mut config = AutonomousConfig::for_skill(&self.default_config, &skill);

        let effective_context = if skill.metadata.context == Some(ContextMode::Fork) {
            if !context.can_spawn_sub_agent() {
                warn!(
                    skill = skill_name,
                    depth = context.depth,
                    "sub-agent depth limit reached"
                );
                return Ok(depth_exceeded_stream(
                    user_id,
                    tenant_id,
                    user_request,
                    &context,
                ));
            }
            let child = context.create_child("", skill_name);
            config.max_iterations = context.child_iteration_budget(config.max_iterations);
            child
        } else {
            context
        };

        info!(
            skill = skill_name,
            depth = effective_context.depth,
            max_iterations = config.max_iterations,
            "executing skill"
        );

        let mut task = Task::new(user_request, user_id);
        if let Some(tenant) = tenant_id {
            task = task.with_tenant(tenant);
        }

        let identity = AgentIdentity::new(
            format!("skill-{}", skill.metadata.name),
            skill.metadata.name.clone(),
            skill.metadata.description.clone(),
        );
        let agent = AutonomousAgent::new(identity, config.model.clone())
            .with_system_prompt(skill.instructions.clone())
            .with_max_iterations(config.max_iterations)
            .with_temperature(config.temperature);

        // Install the whitelist for the duration of the run; the relay
        // below deactivates it once the stream is exhausted, whatever the
        // outcome.
        let executor = self.engine.executor().clone();
        executor.activate_skill(&skill.metadata.name, skill.metadata.allowed_tools.clone());

        let mut inner = self
            .engine
            .process_task(Arc::new(agent), task, cancellation);

        let (sender, stream) = TaskEventStream::channel();
        let skill_name = skill.metadata.name.clone();
        tokio::spawn(async move {
            while let Some(event) = inner.next().await {
                // Keep draining even if the receiver is gone so the scope
                // deactivates only after the run actually ends.
                let _ = sender.send(event).await;
            }
            executor.deactivate_skill(&skill_name);
        });

        Ok(stream)
    }
}

fn depth_exceeded_stream(
    user_id: &str,
    tenant_id: Option<String>,
    user_request: &str,
    context: &ExecutionContext,
) -> TaskEventStream {
    let mut task = Task::new(user_request, user_id);
    if let Some(tenant) = tenant_id {
        task = task.with_tenant(tenant);
    }
    let task_id = task.id;
    let message = format!(
        "Cannot spawn sub-agent: maximum depth ({}) reached at depth {}.",
        context.max_depth, context.depth
    );

    let (sender, stream) = TaskEventStream::channel();
    tokio::spawn(async move {
        let _ = sender
            .send(TaskEvent::text_message(&task_id, message))
            .await;
        let _ = sender
            .send(TaskEvent::done(&task_id, TaskState::Failed))
            .await;
    });
    stream
}
