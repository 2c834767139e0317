//! Cycle orchestration.
//!
//! A cycle runs announce → review → consolidation → insights → tasks →
//! finalize, narrating progress as events. Each accepted request ends in
//! exactly one terminal event: `CycleComplete`, `Error` or `Cancelled`.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::EventSender;
use crate::error::CycleError;
use crate::memory::MemoryStore;
use crate::metrics::CycleMetrics;
use crate::protocol::Event;
use crate::strategy::StrategySet;
use crate::types::{CycleRequest, CycleResult, Task};

/// Runs cognitive cycles and tracks the ones still outstanding.
///
/// Cloning is cheap; clones share the outstanding table and metrics.
#[derive(Clone)]
pub struct CycleOrchestrator {
    memory: Arc<dyn MemoryStore>,
    strategies: StrategySet,
    events: EventSender,
    outstanding: Arc<Mutex<HashMap<String, CancellationToken>>>,
    metrics: Arc<Mutex<CycleMetrics>>,
    shutdown: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking cycle never holds these locks, but don't let poison spread
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "cycle task aborted".to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl CycleOrchestrator {
    pub fn new(memory: Arc<dyn MemoryStore>, strategies: StrategySet, events: EventSender) -> Self {
        Self {
            memory,
            strategies,
            events,
            outstanding: Arc::new(Mutex::new(HashMap::new())),
            metrics: Arc::new(Mutex::new(CycleMetrics::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Accept a request and run it on its own task.
    ///
    /// Rejects invalid configs and ids that are still outstanding without
    /// running anything.
    pub fn submit(&self, request: CycleRequest) -> Result<JoinHandle<()>, CycleError> {
        request.config.validate()?;

        let token = self.shutdown.child_token();
        {
            let mut table = lock(&self.outstanding);
            if table.contains_key(&request.cycle_id) {
                warn!(cycle_id = %request.cycle_id, "rejecting duplicate cycle id");
                return Err(CycleError::DuplicateCycle(request.cycle_id));
            }
            table.insert(request.cycle_id.clone(), token.clone());
        }
        lock(&self.metrics).record_started();

        let this = self.clone();
        Ok(tokio::spawn(async move { this.supervise(request, token).await }))
    }

    /// Run the cycle on an inner task and turn its outcome into one terminal event
    async fn supervise(self, request: CycleRequest, token: CancellationToken) {
        let cycle_id = request.cycle_id.clone();
        let runner = self.clone();
        let outcome = tokio::spawn(async move { runner.run_cycle(request, token).await })
            .await
            .unwrap_or_else(|e| Err(CycleError::Panicked(panic_message(e))));

        // Free the id before the host can observe the terminal event
        lock(&self.outstanding).remove(&cycle_id);

        let terminal = match outcome {
            Ok(result) => {
                lock(&self.metrics).record_completed(
                    result.duration_ms,
                    result.tasks_completed,
                    result.insight_contents.len(),
                    result.memory_consolidated,
                );
                info!(
                    cycle_id = %cycle_id,
                    duration_ms = result.duration_ms,
                    tasks = result.tasks_completed,
                    insights = result.insight_contents.len(),
                    consolidated = result.memory_consolidated,
                    "cycle complete"
                );
                Event::CycleComplete { result }
            }
            Err(CycleError::Cancelled) => {
                lock(&self.metrics).record_cancelled();
                info!(cycle_id = %cycle_id, "cycle cancelled");
                Event::Cancelled { cycle_id }
            }
            Err(e) => {
                lock(&self.metrics).record_failed();
                error!(cycle_id = %cycle_id, error = %e, "cycle failed");
                Event::error(Some(cycle_id.as_str()), e)
            }
        };
        self.events.send(terminal);
    }

    /// Execute one cycle's phases, emitting progress events along the way.
    ///
    /// Does not emit the terminal event; `supervise` does that from the result.
    pub async fn run_cycle(
        &self,
        request: CycleRequest,
        token: CancellationToken,
    ) -> Result<CycleResult, CycleError> {
        let id = request.cycle_id.as_str();
        let config = request.config;
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut warnings = Vec::new();

        // Announce
        info!(
            cycle_id = %id,
            max_tasks = config.max_tasks,
            threshold = config.consolidation_threshold,
            "cycle started"
        );
        self.events.send(Event::status(id, "Cognitive cycle started"));

        // Review
        let state = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(CycleError::Cancelled),
            state = self.memory.snapshot() => state?,
        };
        let pressure = state.pressure();
        debug!(cycle_id = %id, pressure, goals = state.goals.len(), "memory reviewed");
        self.events.send(Event::status(
            id,
            format!(
                "Reviewed memory: {} of {} working items, {} goals",
                state.working_items,
                state.working_capacity,
                state.goals.len()
            ),
        ));
        checkpoint(&token)?;

        // Consolidation
        let gate = &self.strategies.gate;
        let memory_consolidated = gate.decide(config.consolidation_threshold, pressure);
        if memory_consolidated {
            let items = gate.consolidated_count(&state).max(1);
            info!(cycle_id = %id, items, "memory consolidated");
            self.events.send(Event::MemoryConsolidated {
                cycle_id: id.to_string(),
                items_consolidated: items,
                timestamp: Utc::now(),
            });
        } else {
            self.events.send(Event::status(
                id,
                format!(
                    "Consolidation skipped (pressure {:.2}, threshold {:.2})",
                    pressure, config.consolidation_threshold
                ),
            ));
        }
        checkpoint(&token)?;

        // Insights
        let insights = self.strategies.insights.generate(&state)?;
        let mut insight_contents = Vec::with_capacity(insights.len());
        for mut insight in insights {
            if !(0.0..=1.0).contains(&insight.confidence) {
                warnings.push(format!(
                    "insight confidence {} out of range, clamped",
                    insight.confidence
                ));
                insight.confidence = if insight.confidence.is_nan() {
                    0.0
                } else {
                    insight.confidence.clamp(0.0, 1.0)
                };
            }
            self.events.send(Event::insight(id, &insight));
            insight_contents.push(insight.content);
        }
        checkpoint(&token)?;

        // Tasks
        if state.goals.is_empty() {
            warnings.push("no goals available for task generation".to_string());
        }
        let proposals = self
            .strategies
            .tasks
            .propose(&state.goals, config.max_tasks)?;
        if proposals.len() > config.max_tasks {
            warn!(
                cycle_id = %id,
                proposed = proposals.len(),
                cap = config.max_tasks,
                "task strategy exceeded cap"
            );
            warnings.push(format!(
                "task strategy proposed {} tasks, capped at {}",
                proposals.len(),
                config.max_tasks
            ));
        }
        let mut tasks_completed = 0;
        for (seq, proposal) in proposals.into_iter().take(config.max_tasks).enumerate() {
            let task = Task::from_proposal(id, seq, proposal);
            debug!(cycle_id = %id, task_id = %task.id, "task created");
            self.events.send(Event::TaskCreated {
                cycle_id: id.to_string(),
                task,
            });
            tasks_completed += 1;
        }

        // Finalize, rounding up so the duration never under-reports
        let elapsed = clock.elapsed();
        let duration_ms =
            elapsed.as_millis() as u64 + u64::from(elapsed.subsec_nanos() % 1_000_000 != 0);

        Ok(CycleResult {
            id: id.to_string(),
            started_at,
            duration_ms,
            tasks_completed,
            memory_consolidated,
            insight_contents,
            errors: warnings,
        })
    }

    /// Request early termination. Returns false if the id is not outstanding.
    pub fn cancel(&self, cycle_id: &str) -> bool {
        match lock(&self.outstanding).get(cycle_id) {
            Some(token) => {
                info!(cycle_id = %cycle_id, "cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every outstanding cycle
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Ids of cycles accepted but not yet finished
    pub fn outstanding(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.outstanding).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn metrics(&self) -> CycleMetrics {
        lock(&self.metrics).clone()
    }

    /// Refresh uptime and RSS, then return a snapshot
    pub fn heartbeat(&self, elapsed_secs: u64) -> CycleMetrics {
        let mut metrics = lock(&self.metrics);
        metrics.increment_uptime(elapsed_secs);
        metrics.update_memory();
        metrics.clone()
    }
}

fn checkpoint(token: &CancellationToken) -> Result<(), CycleError> {
    if token.is_cancelled() {
        return Err(CycleError::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StrategyError;
    use crate::memory::SimulatedMemory;
    use crate::strategy::{ConsolidationGate, InsightStrategy, StrategyKind, TaskStrategy};
    use crate::types::{CycleConfig, Insight, MemoryState, ProposedTask};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn state() -> MemoryState {
        MemoryState {
            working_items: 12,
            working_capacity: 16,
            goals: vec!["g1".to_string()],
            recent: vec!["r1".to_string()],
        }
    }

    fn orchestrator(
        strategies: StrategySet,
    ) -> (CycleOrchestrator, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let memory = Arc::new(SimulatedMemory::new(state(), Duration::ZERO));
        (
            CycleOrchestrator::new(memory, strategies, EventSender::new(tx)),
            rx,
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    struct OutOfRangeInsights;

    impl InsightStrategy for OutOfRangeInsights {
        fn generate(&self, _state: &MemoryState) -> Result<Vec<Insight>, StrategyError> {
            Ok(vec![Insight::new("overconfident", 1.7), Insight::new("nan", f64::NAN)])
        }

        fn name(&self) -> &str {
            "out_of_range"
        }
    }

    struct GreedyTasks;

    impl TaskStrategy for GreedyTasks {
        fn propose(&self, _goals: &[String], _max: usize) -> Result<Vec<ProposedTask>, StrategyError> {
            Ok((0..10)
                .map(|i| ProposedTask {
                    description: format!("t{}", i),
                    parent_goal: "g1".to_string(),
                })
                .collect())
        }

        fn name(&self) -> &str {
            "greedy"
        }
    }

    struct NeverGate;

    impl ConsolidationGate for NeverGate {
        fn decide(&self, _threshold: f64, _pressure: f64) -> bool {
            false
        }

        fn consolidated_count(&self, _state: &MemoryState) -> u32 {
            1
        }

        fn name(&self) -> &str {
            "never"
        }
    }

    struct SlowMemory;

    #[async_trait]
    impl MemoryStore for SlowMemory {
        async fn snapshot(&self) -> Result<MemoryState, CycleError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(MemoryState::default())
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_run_cycle_phases_in_order() {
        let (orch, mut rx) = orchestrator(StrategySet::new(StrategyKind::Deterministic, 5));
        let request = CycleRequest::new("c1", CycleConfig::new(3, 0.5));
        let result = orch.run_cycle(request, CancellationToken::new()).await.unwrap();

        let kinds: Vec<&str> = drain(&mut rx).iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec![
                "status_update",
                "status_update",
                "memory_consolidated",
                "insight_generated",
                "insight_generated",
                "task_created",
                "task_created",
                "task_created",
            ]
        );
        assert_eq!(result.id, "c1");
        assert!(result.memory_consolidated);
        assert_eq!(result.tasks_completed, 3);
        assert_eq!(result.insight_contents.len(), 2);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_run_cycle_clamps_confidence() {
        let mut strategies = StrategySet::new(StrategyKind::Deterministic, 5);
        strategies.insights = Arc::new(OutOfRangeInsights);
        let (orch, mut rx) = orchestrator(strategies);

        let result = orch
            .run_cycle(CycleRequest::new("c2", CycleConfig::new(0, 0.5)), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.errors.len(), 2);
        let confidences: Vec<f64> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                Event::InsightGenerated { confidence, .. } => Some(confidence),
                _ => None,
            })
            .collect();
        assert_eq!(confidences, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_run_cycle_enforces_task_cap() {
        let mut strategies = StrategySet::new(StrategyKind::Deterministic, 5);
        strategies.tasks = Arc::new(GreedyTasks);
        let (orch, _rx) = orchestrator(strategies);

        let result = orch
            .run_cycle(CycleRequest::new("c3", CycleConfig::new(4, 0.5)), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.tasks_completed, 4);
        assert!(result.errors.iter().any(|w| w.contains("capped at 4")));
    }

    #[tokio::test]
    async fn test_run_cycle_skips_consolidation() {
        let mut strategies = StrategySet::new(StrategyKind::Deterministic, 5);
        strategies.gate = Arc::new(NeverGate);
        let (orch, mut rx) = orchestrator(strategies);

        let result = orch
            .run_cycle(CycleRequest::new("c4", CycleConfig::new(1, 0.0)), CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.memory_consolidated);
        assert!(!drain(&mut rx)
            .iter()
            .any(|e| matches!(e, Event::MemoryConsolidated { .. })));
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_config() {
        let (orch, _rx) = orchestrator(StrategySet::new(StrategyKind::Deterministic, 5));
        let err = orch
            .submit(CycleRequest::new("bad", CycleConfig::new(1, 2.0)))
            .unwrap_err();
        assert!(matches!(err, CycleError::InvalidConfig(_)));
        assert!(orch.outstanding().is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_duplicate_outstanding_id() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let orch = CycleOrchestrator::new(
            Arc::new(SlowMemory),
            StrategySet::new(StrategyKind::Deterministic, 5),
            EventSender::new(tx),
        );
        let config = CycleConfig::new(1, 0.5);
        let handle = orch.submit(CycleRequest::new("dup", config)).unwrap();
        let err = orch.submit(CycleRequest::new("dup", config)).unwrap_err();
        assert_eq!(err, CycleError::DuplicateCycle("dup".to_string()));
        assert_eq!(orch.outstanding(), vec!["dup".to_string()]);

        assert!(orch.cancel("dup"));
        handle.await.unwrap();
        assert!(orch.outstanding().is_empty());
        assert_eq!(orch.metrics().cycles_cancelled, 1);
    }

    #[tokio::test]
    async fn test_cancel_unknown_cycle() {
        let (orch, _rx) = orchestrator(StrategySet::new(StrategyKind::Deterministic, 5));
        assert!(!orch.cancel("missing"));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_outstanding() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let orch = CycleOrchestrator::new(
            Arc::new(SlowMemory),
            StrategySet::new(StrategyKind::Deterministic, 5),
            EventSender::new(tx),
        );
        let handle = orch.submit(CycleRequest::new("s1", CycleConfig::default())).unwrap();
        orch.shutdown();
        handle.await.unwrap();

        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some(Event::Cancelled { cycle_id }) if cycle_id == "s1"));
    }

    #[tokio::test]
    async fn test_heartbeat_accumulates_uptime() {
        let (orch, _rx) = orchestrator(StrategySet::new(StrategyKind::Deterministic, 5));
        orch.heartbeat(30);
        let snapshot = orch.heartbeat(30);
        assert_eq!(snapshot.uptime_sec, 60);
    }
}
