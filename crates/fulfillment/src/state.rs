//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The state of a saga in its lifecycle.
///
/// ```text
/// NotStarted ──► Running ──┬──► Completed
///                          ├──► Declined
///                          └──► Failed
/// ```
///
/// A saga left in `Running` by a crash or a failed intermediate step is
/// finished by `resume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    #[default]
    NotStarted,

    Running,

    /// Every step succeeded.
    Completed,

    /// The gateway declined the charge. The order is marked failed and the
    /// cart is untouched.
    Declined,

    /// Stopped before reaching an outcome; nothing was charged.
    Failed,
}

impl SagaState {
    pub fn can_run(&self) -> bool {
        matches!(self, SagaState::NotStarted)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Completed | SagaState::Declined | SagaState::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::NotStarted => "NotStarted",
            SagaState::Running => "Running",
            SagaState::Completed => "Completed",
            SagaState::Declined => "Declined",
            SagaState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
