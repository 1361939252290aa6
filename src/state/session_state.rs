/// Session lifecycle states
///
/// A session moves `Idle → Running → (Checkpointing ↔ Running)* →
/// Completed | Aborted`. Every other move is rejected.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current state of a crawl session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, nothing started yet
    Idle,

    /// Listing traversal and enrichment are under way
    Running,

    /// Writing a checkpoint; returns to Running afterwards
    Checkpointing,

    // ===== Terminal States =====
    /// Every category finished and the work queue drained
    Completed,

    /// Stopped early by a stop signal or an unrecoverable error
    Aborted,
}

impl SessionState {
    /// Returns true if the session can no longer change state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Returns true if moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (Idle, Running)
                | (Idle, Aborted)
                | (Running, Checkpointing)
                | (Running, Completed)
                | (Running, Aborted)
                | (Checkpointing, Running)
                | (Checkpointing, Completed)
                | (Checkpointing, Aborted)
        )
    }

    /// Converts the state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Checkpointing => "checkpointing",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }

    /// Parses a state from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "checkpointing" => Some(Self::Checkpointing),
            "completed" => Some(Self::Completed),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }

    /// Returns all possible session states
    pub fn all_states() -> [Self; 5] {
        [
            Self::Idle,
            Self::Running,
            Self::Checkpointing,
            Self::Completed,
            Self::Aborted,
        ]
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
