//! Task engine: wraps an agent's reasoning run in the streaming task
//! protocol.
//!
//! `process_task` returns the receiver half of a bounded event channel;
//! the producer runs on its own tokio task. Every stream carries exactly
//! one `Done` event, and it is always the last event. Cancellation is
//! cooperative: the signal is polled at loop boundaries, and a cancelled
//! task ends with `done(cancelled)` rather than an error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::events::{TaskEvent, TaskEventStream};
use super::models::{Task, TaskState};
use crate::agents::models::Agent;
use crate::cost::TaskBudget;
use crate::errors::PlatformError;
use crate::reasoning::{ReasoningChain, ReasoningEngine};
use crate::tools::ToolExecutor;

/// Cooperative cancellation signal with parent/child linkage: cancelling a
/// parent cancels every child derived from it, never the reverse.
#[derive(Clone, Default)]
pub struct CancellationSignal {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<CancellationSignal>>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether this signal, or any ancestor, has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        self.parent
            .as_ref()
            .map(|parent| parent.is_cancelled())
            .unwrap_or(false)
    }

    /// Derive a child signal linked to this one.
    pub fn child(&self) -> CancellationSignal {
        CancellationSignal {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::new(self.clone())),
        }
    }
}

/// Durable destination for finished reasoning chains.
pub trait ChainSink: Send + Sync {
    /// Persist a chain. Failures are logged and swallowed by the engine.
    fn save_chain(&self, chain: &ReasoningChain) -> anyhow::Result<()>;
}

/// Runs agents as streaming tasks.
pub struct TaskEngine {
    executor: Arc<ToolExecutor>,
    default_budget: TaskBudget,
    chain_sink: Option<Arc<dyn ChainSink>>,
}

impl TaskEngine {
    pub fn new(executor: Arc<ToolExecutor>) -> Self {
        Self {
            executor,
            default_budget: TaskBudget::unlimited(),
            chain_sink: None,
        }
    }

    /// Builder: budget applied to every task run by this engine.
    pub fn with_budget(mut self, budget: TaskBudget) -> Self {
        self.default_budget = budget;
        self
    }

    /// Builder: persist finished chains to the given sink.
    pub fn with_chain_sink(mut self, sink: Arc<dyn ChainSink>) -> Self {
        self.chain_sink = Some(sink);
        self
    }

    /// The executor tasks dispatch tools through.
    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    /// Run a task to completion, streaming its events.
    pub fn process_task(
        &self,
        agent: Arc<dyn Agent>,
        task: Task,
        cancellation: CancellationSignal,
    ) -> TaskEventStream {
        self.process_task_with_budget(agent, task, cancellation, self.default_budget)
    }

    /// Run a task with an explicit budget.
    pub fn process_task_with_budget(
        &self,
        agent: Arc<dyn Agent>,
        task: Task,
        cancellation: CancellationSignal,
        budget: TaskBudget,
    ) -> TaskEventStream {
        let (sender, stream) = TaskEventStream::channel();
        let executor = self.executor.clone();
        let chain_sink = self.chain_sink.clone();

        tokio::spawn(async move {
            run_task(agent, task, cancellation, executor, budget, chain_sink, sender).await;
        });

        stream
    }

    /// Spawn a sub-task for `agent` derived from `parent`: the child
    /// carries the parent's tenant, user, conversation, and recent message
    /// context, and every event it emits is relabelled with the parent's
    /// task id before surfacing.
    pub fn process_child_task(
        &self,
        agent: Arc<dyn Agent>,
        parent: &Task,
        message: impl Into<String>,
        parent_cancellation: &CancellationSignal,
    ) -> TaskEventStream {
        let child = parent.derive_child(message);
        let mut child_stream =
            self.process_task(agent, child, parent_cancellation.child());

        let (sender, stream) = TaskEventStream::channel();
        let parent_id = parent.id.clone();
        tokio::spawn(async move {
            while let Some(event) = child_stream.next().await {
                if sender.send(event.relabel(parent_id.clone())).await.is_err() {
                    break;
                }
            }
        });

        stream
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_task(
    agent: Arc<dyn Agent>,
    mut task: Task,
    cancellation: CancellationSignal,
    executor: Arc<ToolExecutor>,
    budget: TaskBudget,
    chain_sink: Option<Arc<dyn ChainSink>>,
    sender: mpsc::Sender<TaskEvent>,
) {
    let task_id = task.id.clone();
    task.transition(TaskState::Working);
    let _ = sender
        .send(TaskEvent::status(&task_id, TaskState::Working))
        .await;

    if cancellation.is_cancelled() {
        task.transition(TaskState::Cancelled);
        let _ = sender
            .send(TaskEvent::done(&task_id, TaskState::Cancelled))
            .await;
        return;
    }

    let mut engine = ReasoningEngine::new(
        &task_id,
        &agent.identity().id,
        task.tenant_id.clone(),
        executor,
        budget,
    )
    .with_cancellation(cancellation.clone());

    let outcome = agent.reason(&task, &mut engine).await;

    match outcome {
        Ok(answer) => {
            let chain = engine.finish_completed();
            persist_chain(&chain_sink, &chain);
            task.transition(TaskState::Completed);
            let _ = sender.send(TaskEvent::text_message(&task_id, answer)).await;
            let _ = sender
                .send(TaskEvent::done(&task_id, TaskState::Completed))
                .await;
        }
        Err(error) => {
            let chain = engine.finish_failed();
            persist_chain(&chain_sink, &chain);
            if cancellation.is_cancelled() {
                debug!(task_id = %task_id, "task cancelled");
                task.transition(TaskState::Cancelled);
                let _ = sender
                    .send(TaskEvent::done(&task_id, TaskState::Cancelled))
                    .await;
            } else {
                task.transition(TaskState::Failed);
                let _ = sender
                    .send(error_event(&task_id, &error))
                    .await;
                let _ = sender
                    .send(TaskEvent::done(&task_id, TaskState::Failed))
                    .await;
            }
        }
    }
}

fn error_event(task_id: &str, error: &PlatformError) -> TaskEvent {
    TaskEvent::error(task_id, error.code(), error.to_string(), None)
}

fn persist_chain(sink: &Option<Arc<dyn ChainSink>>, chain: &ReasoningChain) {
    if let Some(sink) = sink {
        if let Err(error) = sink.save_chain(chain) {
            warn!(chain_id = %chain.id, %error, "chain persistence failed");
        }
    }
}
