pub mod channel;
pub mod config;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod mqtt;
pub mod orchestrator;
pub mod protocol;
pub mod render;
pub mod strategy;
pub mod types;
pub mod worker;
