use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::channel::{channel, EventSender, HostEndpoint, Inbound};
use crate::config::Config;
use crate::memory::{MemoryStore, SimulatedMemory};
use crate::orchestrator::CycleOrchestrator;
use crate::protocol::{parse_command, Command, Event};
use crate::strategy::{ConsolidationGate, InsightStrategy, StrategySet, TaskStrategy};

/// Drains host commands and hands cycles to the orchestrator
pub struct CycleWorker {
    orchestrator: CycleOrchestrator,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    events: EventSender,
}

impl CycleWorker {
    pub fn orchestrator(&self) -> &CycleOrchestrator {
        &self.orchestrator
    }

    /// Main loop. Returns once the host endpoint is dropped.
    pub async fn run(mut self) {
        info!("cycle worker ready");
        while let Some(inbound) = self.inbound.recv().await {
            self.dispatch(inbound);
        }
        info!("host disconnected, cycle worker stopping");
        self.orchestrator.shutdown();
    }

    /// Handle one inbound message without waiting on any cycle
    pub fn dispatch(&self, inbound: Inbound) {
        let command = match inbound {
            Inbound::Command(command) => command,
            Inbound::Raw(bytes) => match parse_command(&bytes) {
                Ok(command) => command,
                Err(e) => {
                    warn!(error = %e, cycle_id = ?e.cycle_id(), "failed to parse command");
                    self.events.send(Event::error(e.cycle_id(), &e));
                    return;
                }
            },
        };

        match command {
            Command::Ping => {
                self.events.send(Event::Pong);
            }
            Command::RunCycle(request) => {
                let cycle_id = request.cycle_id.clone();
                if let Err(e) = self.orchestrator.submit(request) {
                    self.events.send(Event::error(Some(cycle_id.as_str()), e));
                }
            }
            Command::Cancel { cycle_id } => {
                if !self.orchestrator.cancel(&cycle_id) {
                    self.events.send(Event::error(
                        Some(cycle_id.as_str()),
                        format!("no outstanding cycle {}", cycle_id),
                    ));
                }
            }
        }
    }
}

/// Assembles a worker from config, with overridable collaborators
pub struct WorkerBuilder {
    memory: Arc<dyn MemoryStore>,
    strategies: StrategySet,
}

impl WorkerBuilder {
    pub fn new(config: &Config) -> Self {
        let memory = SimulatedMemory::new(
            config.memory.initial_state(),
            Duration::from_millis(config.memory.review_latency_ms),
        );
        Self {
            memory: Arc::new(memory),
            strategies: StrategySet::new(config.strategy.kind, config.strategy.max_insights),
        }
    }

    pub fn with_memory(mut self, memory: impl MemoryStore + 'static) -> Self {
        self.memory = Arc::new(memory);
        self
    }

    pub fn with_gate(mut self, gate: impl ConsolidationGate + 'static) -> Self {
        self.strategies.gate = Arc::new(gate);
        self
    }

    pub fn with_insights(mut self, insights: impl InsightStrategy + 'static) -> Self {
        self.strategies.insights = Arc::new(insights);
        self
    }

    pub fn with_tasks(mut self, tasks: impl TaskStrategy + 'static) -> Self {
        self.strategies.tasks = Arc::new(tasks);
        self
    }

    /// Build the worker and the host endpoint that drives it
    pub fn build(self) -> (CycleWorker, HostEndpoint) {
        let (host, endpoint) = channel();
        let events = endpoint.event_sender();
        let orchestrator = CycleOrchestrator::new(self.memory, self.strategies, events.clone());
        let worker = CycleWorker {
            orchestrator,
            inbound: endpoint.inbound,
            events,
        };
        (worker, host)
    }

    /// Build and run the worker on its own task
    pub fn spawn(self) -> (HostEndpoint, CycleOrchestrator, JoinHandle<()>) {
        let (worker, host) = self.build();
        let orchestrator = worker.orchestrator().clone();
        let handle = tokio::spawn(worker.run());
        (host, orchestrator, handle)
    }
}
