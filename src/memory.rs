use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::error::CycleError;
use crate::types::MemoryState;

/// Source of the memory state reviewed at the start of each cycle
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Fetch the current state. May suspend on I/O.
    async fn snapshot(&self) -> Result<MemoryState, CycleError>;

    fn name(&self) -> &str;
}

/// Stand-in store that returns a fixed state after a simulated delay
#[derive(Debug, Clone)]
pub struct SimulatedMemory {
    state: MemoryState,
    latency: Duration,
}

impl SimulatedMemory {
    pub fn new(state: MemoryState, latency: Duration) -> Self {
        Self { state, latency }
    }
}

#[async_trait]
impl MemoryStore for SimulatedMemory {
    async fn snapshot(&self) -> Result<MemoryState, CycleError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        debug!(
            items = self.state.working_items,
            capacity = self.state.working_capacity,
            "memory snapshot taken"
        );
        Ok(self.state.clone())
    }

    fn name(&self) -> &str {
        "simulated"
    }
}
