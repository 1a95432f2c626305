//! Append-only reasoning chain.
//!
//! A chain records every step of a single reasoning run: thinking, tool
//! calls paired with their results by correlation id, and syntheses. Steps
//! are densely numbered, never modified after append, and refused once the
//! chain reaches a terminal status.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{PlatformError, Result};
use crate::visibility::VisibilityLevel;

/// Lifecycle status of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainStatus {
    Running,
    Completed,
    Failed,
}

/// Kind of a reasoning step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Thinking,
    ToolCall,
    ToolResult,
    Synthesis,
}

/// Kind-specific payload of a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepPayload {
    Thinking {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
    },
    ToolCall {
        tool_name: String,
        arguments: HashMap<String, Value>,
        correlation_id: String,
    },
    ToolResult {
        correlation_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<HashMap<String, Value>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Synthesis {
        conclusion: String,
        /// Ids of the steps this synthesis draws from.
        sources: Vec<String>,
    },
}

impl StepPayload {
    fn kind(&self) -> StepKind {
        match self {
            StepPayload::Thinking { .. } => StepKind::Thinking,
            StepPayload::ToolCall { .. } => StepKind::ToolCall,
            StepPayload::ToolResult { .. } => StepKind::ToolResult,
            StepPayload::Synthesis { .. } => StepKind::Synthesis,
        }
    }
}

/// A single record in a reasoning chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// Step id.
    pub id: String,
    /// Dense 0-based position within the chain.
    pub step_number: u64,
    /// Step kind (redundant with the payload tag; kept for queries).
    pub kind: StepKind,
    /// When the step was appended.
    pub timestamp: DateTime<Utc>,
    /// Optional parent step for nested operations.
    pub parent_step_id: Option<String>,
    /// Visibility of this step.
    pub visibility: VisibilityLevel,
    /// Kind-specific data.
    pub payload: StepPayload,
    /// Tokens consumed by this step.
    pub tokens_used: u64,
    /// Cost of this step in USD.
    pub cost_usd: f64,
}

/// Aggregate metrics maintained incrementally on append.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainMetrics {
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub thinking_steps: u64,
    pub tool_calls: u64,
    pub tool_results: u64,
    pub synthesis_steps: u64,
}

impl ChainMetrics {
    fn absorb(&mut self, step: &ReasoningStep) {
        self.total_tokens += step.tokens_used;
        self.total_cost_usd += step.cost_usd;
        match step.kind {
            StepKind::Thinking => self.thinking_steps += 1,
            StepKind::ToolCall => self.tool_calls += 1,
            StepKind::ToolResult => self.tool_results += 1,
            StepKind::Synthesis => self.synthesis_steps += 1,
        }
    }
}

/// Ordered log of reasoning steps for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningChain {
    pub id: String,
    pub task_id: String,
    pub agent_id: String,
    pub tenant_id: Option<String>,
    pub status: ChainStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metrics: ChainMetrics,
    /// Chains spawned by sub-agents of this run, linked by id only.
    pub child_chain_ids: Vec<String>,
    steps: Vec<ReasoningStep>,
}

impl ReasoningChain {
    pub fn new(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        tenant_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            tenant_id,
            status: ChainStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            metrics: ChainMetrics::default(),
            child_chain_ids: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// Rebuild a chain from stored parts. Used by the chain store.
    pub fn from_parts(
        id: String,
        task_id: String,
        agent_id: String,
        tenant_id: Option<String>,
        status: ChainStatus,
        started_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
        metrics: ChainMetrics,
        child_chain_ids: Vec<String>,
        steps: Vec<ReasoningStep>,
    ) -> Self {
        Self {
            id,
            task_id,
            agent_id,
            tenant_id,
            status,
            started_at,
            completed_at,
            metrics,
            child_chain_ids,
            steps,
        }
    }

    /// Ordered view of the steps.
    pub fn steps(&self) -> &[ReasoningStep] {
        &self.steps
    }

    fn ensure_running(&self) -> Result<()> {
        if self.status != ChainStatus::Running {
            return Err(PlatformError::internal(format!(
                "chain {} is {:?} and rejects further steps",
                self.id, self.status
            )));
        }
        Ok(())
    }

    fn append(
        &mut self,
        payload: StepPayload,
        visibility: VisibilityLevel,
        tokens_used: u64,
        cost_usd: f64,
    ) -> Result<&ReasoningStep> {
        self.ensure_running()?;
        let step = ReasoningStep {
            id: Uuid::new_v4().to_string(),
            step_number: self.steps.len() as u64,
            kind: payload.kind(),
            timestamp: Utc::now(),
            parent_step_id: None,
            visibility,
            payload,
            tokens_used,
            cost_usd,
        };
        self.metrics.absorb(&step);
        self.steps.push(step);
        Ok(self.steps.last().expect("step just pushed"))
    }

    /// Append a thinking step; returns its id.
    pub fn add_thinking(
        &mut self,
        text: impl Into<String>,
        confidence: Option<f64>,
        visibility: VisibilityLevel,
    ) -> Result<String> {
        let step = self.append(
            StepPayload::Thinking {
                text: text.into(),
                confidence,
            },
            visibility,
            0,
            0.0,
        )?;
        Ok(step.id.clone())
    }

    /// Append a tool-call step; returns (step id, correlation id) for
    /// pairing with the eventual result.
    pub fn add_tool_call(
        &mut self,
        tool_name: impl Into<String>,
        arguments: HashMap<String, Value>,
        visibility: VisibilityLevel,
    ) -> Result<(String, String)> {
        let correlation_id = Uuid::new_v4().to_string();
        let step = self.append(
            StepPayload::ToolCall {
                tool_name: tool_name.into(),
                arguments,
                correlation_id: correlation_id.clone(),
            },
            visibility,
            0,
            0.0,
        )?;
        Ok((step.id.clone(), correlation_id))
    }

    /// Append a tool-result step. The correlation id must match a prior
    /// tool call in this chain that has no result yet.
    #[allow(clippy::too_many_arguments)]
    pub fn add_tool_result(
        &mut self,
        correlation_id: &str,
        success: bool,
        value: Option<HashMap<String, Value>>,
        error: Option<String>,
        tokens_used: u64,
        cost_usd: f64,
        visibility: VisibilityLevel,
    ) -> Result<String> {
        self.ensure_running()?;

        let has_call = self.steps.iter().any(|step| {
            matches!(&step.payload, StepPayload::ToolCall { correlation_id: cid, .. } if cid == correlation_id)
        });
        if !has_call {
            return Err(PlatformError::internal(format!(
                "no open tool call with correlation id {}",
                correlation_id
            )));
        }
        let already_resolved = self.steps.iter().any(|step| {
            matches!(&step.payload, StepPayload::ToolResult { correlation_id: cid, .. } if cid == correlation_id)
        });
        if already_resolved {
            return Err(PlatformError::internal(format!(
                "tool call {} already has a result",
                correlation_id
            )));
        }

        let step = self.append(
            StepPayload::ToolResult {
                correlation_id: correlation_id.to_string(),
                success,
                value,
                error,
            },
            visibility,
            tokens_used,
            cost_usd,
        )?;
        Ok(step.id.clone())
    }

    /// Append a synthesis step; returns its id.
    pub fn add_synthesis(
        &mut self,
        conclusion: impl Into<String>,
        sources: Vec<String>,
        visibility: VisibilityLevel,
    ) -> Result<String> {
        let step = self.append(
            StepPayload::Synthesis {
                conclusion: conclusion.into(),
                sources,
            },
            visibility,
            0,
            0.0,
        )?;
        Ok(step.id.clone())
    }

    /// Link a child chain by id.
    pub fn add_child_chain(&mut self, chain_id: impl Into<String>) {
        self.child_chain_ids.push(chain_id.into());
    }

    /// Mark the chain completed.
    pub fn mark_completed(&mut self) {
        self.status = ChainStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark the chain failed.
    pub fn mark_failed(&mut self) {
        self.status = ChainStatus::Failed;
        self.completed_at = Some(Utc::now());
    }
}
