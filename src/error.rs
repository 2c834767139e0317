//! Error types shared across the cognition worker.

/// Faults that end a cycle or prevent it from starting.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CycleError {
    #[error("invalid cycle config: {0}")]
    InvalidConfig(String),
    #[error("cycle {0} is already outstanding")]
    DuplicateCycle(String),
    #[error("memory review failed: {0}")]
    Review(String),
    #[error(transparent)]
    Strategy(#[from] StrategyError),
    #[error("cycle panicked: {0}")]
    Panicked(String),
    #[error("cycle cancelled")]
    Cancelled,
}

/// Faults raised by a pluggable insight or task strategy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StrategyError {
    #[error("insight strategy failed: {0}")]
    Insight(String),
    #[error("task strategy failed: {0}")]
    Task(String),
}

/// Faults decoding inbound wire commands.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown command type: {0}")]
    UnknownType(String),
    #[error("missing command type")]
    MissingType,
    #[error("malformed command: {reason}")]
    Malformed {
        /// Read from the raw payload when present, so the host can correlate
        cycle_id: Option<String>,
        reason: String,
    },
}

impl ProtocolError {
    pub fn cycle_id(&self) -> Option<&str> {
        match self {
            ProtocolError::Malformed { cycle_id, .. } => cycle_id.as_deref(),
            _ => None,
        }
    }
}

/// Transport-level faults between host and worker.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ChannelError {
    #[error("worker channel closed")]
    Closed,
    #[error("no event within {0} ms")]
    Silent(u64),
}

/// Internal renderer faults. Never escapes `TextRenderer::render`.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("input of {size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("unterminated code fence opened on line {0}")]
    UnterminatedFence(usize),
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}
