use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::StrategyError;
use crate::types::{Insight, MemoryState, ProposedTask};

/// Decides whether consolidation runs this cycle
pub trait ConsolidationGate: Send + Sync {
    /// Should consolidation run at this pressure level?
    fn decide(&self, threshold: f64, pressure: f64) -> bool;

    /// Items consolidated once `decide` said yes. Always at least 1.
    fn consolidated_count(&self, state: &MemoryState) -> u32;

    fn name(&self) -> &str;
}

/// Derives scored observations from memory state
pub trait InsightStrategy: Send + Sync {
    fn generate(&self, state: &MemoryState) -> Result<Vec<Insight>, StrategyError>;

    fn name(&self) -> &str;
}

/// Proposes follow-up work for a set of goals
pub trait TaskStrategy: Send + Sync {
    /// Propose at most `max_tasks` tasks. The orchestrator enforces the cap again.
    fn propose(
        &self,
        goals: &[String],
        max_tasks: usize,
    ) -> Result<Vec<ProposedTask>, StrategyError>;

    fn name(&self) -> &str;
}

/// Consolidate once pressure strictly exceeds the threshold
#[derive(Debug, Clone, Default)]
pub struct ThresholdGate;

impl ConsolidationGate for ThresholdGate {
    fn decide(&self, threshold: f64, pressure: f64) -> bool {
        pressure > threshold
    }

    fn consolidated_count(&self, state: &MemoryState) -> u32 {
        // Compact everything above half capacity
        let keep = state.working_capacity / 2;
        let excess = state.working_items.saturating_sub(keep);
        u32::try_from(excess).unwrap_or(u32::MAX).max(1)
    }

    fn name(&self) -> &str {
        "threshold"
    }
}

/// Observations about memory pressure and recent activity
#[derive(Debug, Clone)]
pub struct PressureInsights {
    pub max_insights: usize,
}

impl PressureInsights {
    pub fn new(max_insights: usize) -> Self {
        Self { max_insights }
    }
}

impl InsightStrategy for PressureInsights {
    fn generate(&self, state: &MemoryState) -> Result<Vec<Insight>, StrategyError> {
        let pressure = state.pressure();
        let mut insights = Vec::new();

        if pressure >= 0.5 {
            insights.push(Insight::new(
                format!(
                    "Working memory at {:.0}% capacity ({} of {} items)",
                    pressure * 100.0,
                    state.working_items,
                    state.working_capacity
                ),
                pressure,
            ));
        }

        // Later entries are fresher; favour them slightly
        let total = state.recent.len().max(1) as f64;
        for (i, item) in state.recent.iter().enumerate() {
            let confidence = 0.5 + 0.4 * (i + 1) as f64 / total;
            insights.push(Insight::new(format!("Recurring theme: {}", item), confidence));
        }

        insights.truncate(self.max_insights);
        Ok(insights)
    }

    fn name(&self) -> &str {
        "pressure"
    }
}

/// One task per goal, round-robin until the cap
#[derive(Debug, Clone, Default)]
pub struct GoalTasks;

impl TaskStrategy for GoalTasks {
    fn propose(
        &self,
        goals: &[String],
        max_tasks: usize,
    ) -> Result<Vec<ProposedTask>, StrategyError> {
        Ok(goals
            .iter()
            .cycle()
            .take(if goals.is_empty() { 0 } else { max_tasks })
            .enumerate()
            .map(|(i, goal)| ProposedTask {
                description: format!("Advance goal '{}' (step {})", goal, i / goals.len() + 1),
                parent_goal: goal.clone(),
            })
            .collect())
    }

    fn name(&self) -> &str {
        "goals"
    }
}

/// Coin-flip consolidation, weighted by threshold
#[derive(Debug, Clone, Default)]
pub struct RandomGate;

impl ConsolidationGate for RandomGate {
    fn decide(&self, threshold: f64, _pressure: f64) -> bool {
        rand::thread_rng().gen::<f64>() > threshold
    }

    fn consolidated_count(&self, _state: &MemoryState) -> u32 {
        rand::thread_rng().gen_range(1..=10)
    }

    fn name(&self) -> &str {
        "random"
    }
}

#[derive(Debug, Clone)]
pub struct RandomInsights {
    pub max_insights: usize,
}

impl InsightStrategy for RandomInsights {
    fn generate(&self, state: &MemoryState) -> Result<Vec<Insight>, StrategyError> {
        let mut rng = rand::thread_rng();
        let count = rng.gen_range(0..=self.max_insights);
        Ok((0..count)
            .map(|i| {
                let subject = state
                    .recent
                    .get(i % state.recent.len().max(1))
                    .map(String::as_str)
                    .unwrap_or("working memory");
                Insight::new(
                    format!("Pattern detected around {}", subject),
                    rng.gen_range(0.0..=1.0),
                )
            })
            .collect())
    }

    fn name(&self) -> &str {
        "random"
    }
}

#[derive(Debug, Clone, Default)]
pub struct RandomTasks;

impl TaskStrategy for RandomTasks {
    fn propose(
        &self,
        goals: &[String],
        max_tasks: usize,
    ) -> Result<Vec<ProposedTask>, StrategyError> {
        if goals.is_empty() {
            return Ok(Vec::new());
        }
        let mut rng = rand::thread_rng();
        let count = rng.gen_range(0..=max_tasks);
        Ok((0..count)
            .map(|i| {
                let goal = &goals[rng.gen_range(0..goals.len())];
                ProposedTask {
                    description: format!("Explore follow-up #{} for '{}'", i + 1, goal),
                    parent_goal: goal.clone(),
                }
            })
            .collect())
    }

    fn name(&self) -> &str {
        "random"
    }
}

/// Which strategy family to load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Deterministic,
    Random,
}

/// The three policies a cycle consults
#[derive(Clone)]
pub struct StrategySet {
    pub gate: Arc<dyn ConsolidationGate>,
    pub insights: Arc<dyn InsightStrategy>,
    pub tasks: Arc<dyn TaskStrategy>,
}

impl StrategySet {
    pub fn new(kind: StrategyKind, max_insights: usize) -> Self {
        match kind {
            StrategyKind::Deterministic => Self {
                gate: Arc::new(ThresholdGate),
                insights: Arc::new(PressureInsights::new(max_insights)),
                tasks: Arc::new(GoalTasks),
            },
            StrategyKind::Random => Self {
                gate: Arc::new(RandomGate),
                insights: Arc::new(RandomInsights { max_insights }),
                tasks: Arc::new(RandomTasks),
            },
        }
    }
}

impl std::fmt::Debug for StrategySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategySet")
            .field("gate", &self.gate.name())
            .field("insights", &self.insights.name())
            .field("tasks", &self.tasks.name())
            .finish()
    }
}
