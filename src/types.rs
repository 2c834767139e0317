use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CycleError;

/// Per-run configuration. Supplied once with each cycle request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Hard cap on tasks emitted by one cycle
    pub max_tasks: usize,
    /// Memory pressure above which consolidation runs
    pub consolidation_threshold: f64,
}

impl CycleConfig {
    pub fn new(max_tasks: usize, consolidation_threshold: f64) -> Self {
        Self {
            max_tasks,
            consolidation_threshold,
        }
    }

    /// Reject thresholds outside [0, 1]
    pub fn validate(&self) -> Result<(), CycleError> {
        let t = self.consolidation_threshold;
        if !t.is_finite() || !(0.0..=1.0).contains(&t) {
            return Err(CycleError::InvalidConfig(format!(
                "consolidation_threshold must be within [0, 1], got {}",
                t
            )));
        }
        Ok(())
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self::new(5, 0.7)
    }
}

/// One cycle execution, correlated by `cycle_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRequest {
    pub cycle_id: String,
    pub config: CycleConfig,
}

impl CycleRequest {
    pub fn new(cycle_id: impl Into<String>, config: CycleConfig) -> Self {
        Self {
            cycle_id: cycle_id.into(),
            config,
        }
    }
}

/// Terminal payload of a successful cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleResult {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub tasks_completed: usize,
    pub memory_consolidated: bool,
    pub insight_contents: Vec<String>,
    /// Non-fatal warnings collected while the cycle ran
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub content: String,
    pub confidence: f64,
}

impl Insight {
    pub fn new(content: impl Into<String>, confidence: f64) -> Self {
        Self {
            content: content.into(),
            confidence,
        }
    }
}

/// Task as proposed by a strategy, before the orchestrator assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedTask {
    pub description: String,
    pub parent_goal: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    /// Weak reference to an external goal; never validated here
    pub parent_goal: String,
}

impl Task {
    /// Build the `seq`-th task of a cycle. Ids are unique within the cycle.
    pub fn from_proposal(cycle_id: &str, seq: usize, proposal: ProposedTask) -> Self {
        Self {
            id: format!("task-{}-{}", cycle_id, seq),
            description: proposal.description,
            parent_goal: proposal.parent_goal,
        }
    }
}

/// Snapshot of memory state consulted during the review phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryState {
    pub working_items: usize,
    pub working_capacity: usize,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub recent: Vec<String>,
}

impl MemoryState {
    /// Fill level of working memory in [0, 1]
    pub fn pressure(&self) -> f64 {
        if self.working_capacity == 0 {
            return if self.working_items > 0 { 1.0 } else { 0.0 };
        }
        (self.working_items as f64 / self.working_capacity as f64).min(1.0)
    }
}
