use thiserror::Error;

/// Result type alias for behavior tree operations.
pub type BtResult<T> = Result<T, BtError>;

#[derive(Error, Debug)]
pub enum BtError {
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("setup failed for node '{node}': {reason}")]
    SetupFailed { node: String, reason: String },

    #[error("tick error in node '{node}': {reason}")]
    TickError { node: String, reason: String },

    #[error("timeout exceeded after {elapsed_secs:.2}s (budget {budget_secs:.2}s)")]
    Timeout {
        elapsed_secs: f64,
        budget_secs: f64,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("key '{key}' not found in namespace '{namespace}'")]
    KeyNotFound { namespace: String, key: String },

    #[error("access denied for actor '{actor}' on '{namespace}:{key}'")]
    AccessDenied {
        actor: String,
        namespace: String,
        key: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
