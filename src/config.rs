use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::render::RenderConfig;
use crate::strategy::StrategyKind;
use crate::types::{CycleConfig, MemoryState};

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Unique agent identifier
    pub agent_id: String,

    /// Periodic cycle settings
    #[serde(default)]
    pub cycle: CycleSettings,

    /// Simulated memory store
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Strategy selection
    #[serde(default)]
    pub strategy: StrategyConfig,

    /// Text rendering for published insights
    #[serde(default)]
    pub render: RenderConfig,

    /// MQTT broker configuration (optional; events are only logged without it)
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSettings {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
    #[serde(default = "default_threshold")]
    pub consolidation_threshold: f64,
    /// Silence on the event channel longer than this is a transport fault
    #[serde(default = "default_liveness")]
    pub liveness_secs: u64,
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_capacity")]
    pub working_capacity: usize,
    #[serde(default)]
    pub working_items: usize,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub recent: Vec<String>,
    #[serde(default = "default_review_latency")]
    pub review_latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default)]
    pub kind: StrategyKind,
    #[serde(default = "default_max_insights")]
    pub max_insights: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_interval() -> u64 {
    300
}

fn default_max_tasks() -> usize {
    5
}

fn default_threshold() -> f64 {
    0.7
}

fn default_liveness() -> u64 {
    60
}

fn default_heartbeat() -> u64 {
    30
}

fn default_capacity() -> usize {
    32
}

fn default_review_latency() -> u64 {
    100
}

fn default_max_insights() -> usize {
    3
}

fn default_keep_alive() -> u64 {
    30
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            max_tasks: default_max_tasks(),
            consolidation_threshold: default_threshold(),
            liveness_secs: default_liveness(),
            heartbeat_secs: default_heartbeat(),
        }
    }
}

impl CycleSettings {
    /// Per-run config handed to each periodic cycle
    pub fn cycle_config(&self) -> CycleConfig {
        CycleConfig::new(self.max_tasks, self.consolidation_threshold)
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            working_capacity: default_capacity(),
            working_items: 0,
            goals: Vec::new(),
            recent: Vec::new(),
            review_latency_ms: default_review_latency(),
        }
    }
}

impl MemoryConfig {
    pub fn initial_state(&self) -> MemoryState {
        MemoryState {
            working_items: self.working_items,
            working_capacity: self.working_capacity,
            goals: self.goals.clone(),
            recent: self.recent.clone(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            kind: StrategyKind::default(),
            max_insights: default_max_insights(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.cycle.cycle_config().validate()?;
        info!(
            agent_id = %config.agent_id,
            strategy = ?config.strategy.kind,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Create default configuration
    pub fn default_for_agent(agent_id: String) -> Self {
        Self {
            agent_id,
            cycle: CycleSettings::default(),
            memory: MemoryConfig::default(),
            strategy: StrategyConfig::default(),
            render: RenderConfig::default(),
            mqtt: None,
        }
    }
}
