//! Multi-agent dispatch strategies and response synthesis.
//!
//! Sends a single message to each target agent, collects its message-event
//! text until the stream ends or the per-call deadline elapses, and
//! synthesizes the results. Failures never abort a strategy; they are
//! captured as failed [`SubAgentResult`] records.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agents::AgentRegistry;
use crate::errors::{PlatformError, Result};
use crate::tasks::{CancellationSignal, Task, TaskEngine, TaskEventKind};

/// Default per-call deadline for sub-agent dispatch.
pub const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 30_000;

/// How a set of target agents is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStrategy {
    /// All agents concurrently; gather every result.
    Parallel,
    /// One at a time in the given order; always runs all of them.
    Sequential,
    /// Concurrently; first success wins and the rest are cancelled.
    FirstSuccess,
}

/// Outcome of one sub-agent dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentResult {
    pub agent_id: String,
    pub success: bool,
    pub response: Option<String>,
    pub error: Option<String>,
    pub latency_ms: u64,
}

impl SubAgentResult {
    fn success(agent_id: &str, response: String, latency_ms: u64) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            success: true,
            response: Some(response),
            error: None,
            latency_ms,
        }
    }

    fn failure(agent_id: &str, error: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            success: false,
            response: None,
            error: Some(error.into()),
            latency_ms,
        }
    }
}

/// Coordinates delegation to peer agents and synthesizes their responses.
pub struct OrchestrationManager {
    engine: Arc<TaskEngine>,
    registry: Arc<AgentRegistry>,
}

impl OrchestrationManager {
    pub fn new(engine: Arc<TaskEngine>, registry: Arc<AgentRegistry>) -> Self {
        Self { engine, registry }
    }

    /// Delegate a message to the target agents under the given strategy.
    pub async fn delegate_to_agents(
        &self,
        tenant_id: Option<String>,
        user_id: &str,
        message: &str,
        target_agent_ids: &[String],
        strategy: DelegationStrategy,
        timeout_ms: u64,
    ) -> Result<Vec<SubAgentResult>> {
        if target_agent_ids.is_empty() {
            return Err(PlatformError::AgentProcessing {
                message: "must provide at least one target agent".into(),
            });
        }

        info!(
            strategy = ?strategy,
            total_agents = target_agent_ids.len(),
            "delegation started"
        );
        let started = Instant::now();

        let results = match strategy {
            DelegationStrategy::Parallel => {
                self.delegate_parallel(&tenant_id, user_id, message, target_agent_ids, timeout_ms)
                    .await
            }
            DelegationStrategy::Sequential => {
                self.delegate_sequential(&tenant_id, user_id, message, target_agent_ids, timeout_ms)
                    .await
            }
            DelegationStrategy::FirstSuccess => {
                self.delegate_first_success(
                    &tenant_id,
                    user_id,
                    message,
                    target_agent_ids,
                    timeout_ms,
                )
                .await
            }
        };

        let successful = results.iter().filter(|r| r.success).count();
        info!(
            total_agents = results.len(),
            successful,
            total_latency_ms = started.elapsed().as_millis() as u64,
            "delegation completed"
        );
        for result in &results {
            debug!(
                agent_id = %result.agent_id,
                success = result.success,
                latency_ms = result.latency_ms,
                error = result.error.as_deref().unwrap_or(""),
                "agent result"
            );
        }

        Ok(results)
    }

    async fn delegate_parallel(
        &self,
        tenant_id: &Option<String>,
        user_id: &str,
        message: &str,
        agent_ids: &[String],
        timeout_ms: u64,
    ) -> Vec<SubAgentResult> {
        let dispatches = agent_ids.iter().map(|agent_id| {
            self.execute_agent(
                agent_id,
                tenant_id.clone(),
                user_id,
                message,
                timeout_ms,
                CancellationSignal::new(),
            )
        });
        futures::future::join_all(dispatches).await
    }

    async fn delegate_sequential(
        &self,
        tenant_id: &Option<String>,
        user_id: &str,
        message: &str,
        agent_ids: &[String],
        timeout_ms: u64,
    ) -> Vec<SubAgentResult> {
        let mut results = Vec::with_capacity(agent_ids.len());
        for agent_id in agent_ids {
            let result = self
                .execute_agent(
                    agent_id,
                    tenant_id.clone(),
                    user_id,
                    message,
                    timeout_ms,
                    CancellationSignal::new(),
                )
                .await;
            results.push(result);
        }
        results
    }

    async fn delegate_first_success(
        &self,
        tenant_id: &Option<String>,
        user_id: &str,
        message: &str,
        agent_ids: &[String],
        timeout_ms: u64,
    ) -> Vec<SubAgentResult> {
        let signals: Vec<CancellationSignal> =
            agent_ids.iter().map(|_| CancellationSignal::new()).collect();

        let mut in_flight: FuturesUnordered<_> = agent_ids
            .iter()
            .zip(signals.iter())
            .enumerate()
            .map(|(index, (agent_id, signal))| {
                let dispatch = self.execute_agent(
                    agent_id,
                    tenant_id.clone(),
                    user_id,
                    message,
                    timeout_ms,
                    signal.clone(),
                );
                async move { (index, dispatch.await) }
            })
            .collect();

        let mut failures: Vec<(usize, SubAgentResult)> = Vec::new();
        while let Some((index, result)) = in_flight.next().await {
            if result.success {
                for signal in &signals {
                    signal.cancel();
                }
                return vec![result];
            }
            failures.push((index, result));
        }

        // All failed: return the failures in dispatch order.
        failures.sort_by_key(|(index, _)| *index);
        failures.into_iter().map(|(_, result)| result).collect()
    }

    /// Dispatch one agent and collect its message text until done.
    async fn execute_agent(
        &self,
        agent_id: &str,
        tenant_id: Option<String>,
        user_id: &str,
        message: &str,
        timeout_ms: u64,
        cancellation: CancellationSignal,
    ) -> SubAgentResult {
        let started = Instant::now();

        let agent = match self.registry.get(agent_id) {
            Ok(agent) => agent,
            Err(error) => {
                return SubAgentResult::failure(
                    agent_id,
                    error.to_string(),
                    started.elapsed().as_millis() as u64,
                );
            }
        };

        let mut task = Task::new(message, user_id);
        if let Some(tenant) = tenant_id {
            task = task.with_tenant(tenant);
        }

        let mut stream = self.engine.process_task(agent, task, cancellation.clone());
        let collect = async {
            let mut parts: Vec<String> = Vec::new();
            while let Some(event) = stream.next().await {
                match &event.kind {
                    TaskEventKind::Message { .. } => parts.push(event.message_text()),
                    TaskEventKind::Done { .. } => break,
                    _ => {}
                }
            }
            parts.join("")
        };

        match tokio::time::timeout(Duration::from_millis(timeout_ms), collect).await {
            Ok(response) if !response.is_empty() => SubAgentResult::success(
                agent_id,
                response,
                started.elapsed().as_millis() as u64,
            ),
            Ok(_) => SubAgentResult::failure(
                agent_id,
                "No response received from agent",
                started.elapsed().as_millis() as u64,
            ),
            Err(_) => {
                cancellation.cancel();
                SubAgentResult::failure(
                    agent_id,
                    format!("Agent timed out after {}ms", timeout_ms),
                    started.elapsed().as_millis() as u64,
                )
            }
        }
    }

    /// Combine sub-agent responses into one reply.
    pub fn synthesize_responses(&self, results: &[SubAgentResult]) -> String {
        if results.is_empty() {
            return "No responses received from sub-agents.".to_string();
        }

        let successful: Vec<&SubAgentResult> = results
            .iter()
            .filter(|r| r.success && r.response.is_some())
            .collect();

        if successful.is_empty() {
            return "All sub-agents failed to provide responses.".to_string();
        }

        if successful.len() == 1 {
            return successful[0].response.clone().unwrap_or_default();
        }

        successful
            .iter()
            .map(|result| {
                format!(
                    "From {}:\n{}",
                    result.agent_id,
                    result.response.as_deref().unwrap_or("")
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
