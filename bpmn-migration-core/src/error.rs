use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionType {
    /// The command itself is malformed.
    InvalidArgument,
    /// The current runtime state does not allow the command.
    InvalidState,
    /// A key referenced by the command does not exist.
    NotFound,
}

impl fmt::Display for RejectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RejectionType::InvalidArgument => "INVALID_ARGUMENT",
            RejectionType::InvalidState => "INVALID_STATE",
            RejectionType::NotFound => "NOT_FOUND",
        })
    }
}

/// A user-visible command rejection. Produced before any state is mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{reason}")]
pub struct Rejection {
    pub rejection_type: RejectionType,
    pub reason: String,
}

impl Rejection {
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self {
            rejection_type: RejectionType::InvalidArgument,
            reason: reason.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self {
            rejection_type: RejectionType::InvalidState,
            reason: reason.into(),
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self {
            rejection_type: RejectionType::NotFound,
            reason: reason.into(),
        }
    }
}

/// Failure of a single command.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Rejected(#[from] Rejection),
    /// Store or invariant failure; not reported to the client as a rejection.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
