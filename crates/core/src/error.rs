use thiserror::Error;

/// Failures that abort a whole tick.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TickError {
    /// Snapshot could not be taken. Never retried within the tick.
    #[error("observe failed: {0}")]
    Observe(String),

    /// Planner failed on an otherwise valid snapshot.
    #[error("plan failed: {0}")]
    Plan(String),

    /// The failsafe has latched; no further capital movement is allowed.
    #[error("failsafe active: {0}")]
    FailsafeActive(String),
}

/// Configuration rejected during load or validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid allocation weights: {0}")]
    InvalidWeights(String),

    #[error("invalid risk thresholds: partial_trim={partial_trim}, full_rebalance={full_rebalance}")]
    InvalidRiskThresholds {
        partial_trim: String,
        full_rebalance: String,
    },

    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        field: &'static str,
        min: String,
        value: String,
    },

    #[error("failed to extract configuration: {0}")]
    Extract(#[from] figment::Error),
}
