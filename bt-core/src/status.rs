use serde::{Deserialize, Serialize};

/// Result of ticking a node.
///
/// `Running` means the node has not yet produced a terminal result and
/// wishes to be re-ticked on the next scheduler pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Success,
    Failure,
    Running,
    Error,
    /// Initial status before the first tick, and the status after `reset()`.
    Invalid,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Success | Status::Failure | Status::Error)
    }

    pub fn is_running(self) -> bool {
        matches!(self, Status::Running)
    }

    /// Treats `Error` as `Failure` for threshold counting, per the open
    /// question in the Parallel composite's design notes.
    pub fn as_failure_equivalent(self) -> Status {
        match self {
            Status::Error => Status::Failure,
            other => other,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Success => "SUCCESS",
            Status::Failure => "FAILURE",
            Status::Running => "RUNNING",
            Status::Error => "ERROR",
            Status::Invalid => "INVALID",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_counts_as_failure_for_thresholds() {
        assert_eq!(Status::Error.as_failure_equivalent(), Status::Failure);
        assert_eq!(Status::Success.as_failure_equivalent(), Status::Success);
    }

    #[test]
    fn terminal_classification() {
        assert!(Status::Success.is_terminal());
        assert!(Status::Failure.is_terminal());
        assert!(Status::Error.is_terminal());
        assert!(!Status::Running.is_terminal());
        assert!(!Status::Invalid.is_terminal());
    }
}
