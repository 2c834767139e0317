use serde::{Deserialize, Serialize};

/// Cycle counters reported with every heartbeat
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CycleMetrics {
    pub uptime_sec: u64,
    pub cycles_started: u64,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub cycles_cancelled: u64,
    pub tasks_created: u64,
    pub insights_generated: u64,
    pub consolidations: u64,
    pub last_duration_ms: u64,
    pub memory_bytes: u64,
}

impl CycleMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update memory usage from system
    pub fn update_memory(&mut self) {
        #[cfg(target_os = "linux")]
        {
            if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
                let rss_kb = status
                    .lines()
                    .find(|line| line.starts_with("VmRSS:"))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok());
                if let Some(kb) = rss_kb {
                    self.memory_bytes = kb * 1024;
                }
            }
        }
    }

    pub fn record_started(&mut self) {
        self.cycles_started += 1;
    }

    pub fn record_completed(&mut self, duration_ms: u64, tasks: usize, insights: usize, consolidated: bool) {
        self.cycles_completed += 1;
        self.last_duration_ms = duration_ms;
        self.tasks_created += tasks as u64;
        self.insights_generated += insights as u64;
        if consolidated {
            self.consolidations += 1;
        }
    }

    pub fn record_failed(&mut self) {
        self.cycles_failed += 1;
    }

    pub fn record_cancelled(&mut self) {
        self.cycles_cancelled += 1;
    }

    /// Share of finished cycles that completed, as a percentage
    pub fn success_rate(&self) -> f64 {
        let finished = self.cycles_completed + self.cycles_failed + self.cycles_cancelled;
        if finished == 0 {
            return 100.0;
        }
        (self.cycles_completed as f64 / finished as f64) * 100.0
    }

    /// Cycles started but not yet finished
    pub fn in_flight(&self) -> u64 {
        self.cycles_started
            .saturating_sub(self.cycles_completed + self.cycles_failed + self.cycles_cancelled)
    }

    /// Increment uptime (typically called every heartbeat interval)
    pub fn increment_uptime(&mut self, seconds: u64) {
        self.uptime_sec += seconds;
    }
}
