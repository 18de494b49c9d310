//! Terminal policy table
//!
//! Every way a monitor can stop is named here together with its side
//! effects, so the asymmetries between failure paths are explicit:
//!
//! | cause               | error recorded | cleanup              |
//! |---------------------|----------------|----------------------|
//! | QueryFailure        | yes            | full, immediate      |
//! | PersistFailure      | yes            | none                 |
//! | ValidationViolation | yes            | deferred (by cancel) |
//! | EngineFailure       | yes            | full, immediate      |
//! | JobCreationFailure  | yes            | none                 |
//! | Completed           | no             | none                 |
//! | Removed             | no             | none                 |
//! | UnknownStatus       | no             | none                 |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Temp-storage cleanup performed when a monitor stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupAction {
    /// Leave temp storage alone
    None,
    /// Recursively remove the temp directory right away
    Full,
    /// Temp directory is removed after the cancel grace period; the cancel
    /// routine schedules it
    Deferred,
}

/// Why a monitor stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalCause {
    /// Engine status query failed
    QueryFailure,
    /// Saving the reconciled record failed under the propagate policy
    PersistFailure,
    /// Size, name or quota constraint violated
    ValidationViolation,
    /// Engine reported the download as failed
    EngineFailure,
    /// Transfer job could not be created
    JobCreationFailure,
    /// Download finished and the transfer job was submitted
    Completed,
    /// Engine removed the task
    Removed,
    /// Engine reported a status outside its known vocabulary
    UnknownStatus(String),
}

impl TerminalCause {
    /// Whether the failure is written to the task's error fields
    pub fn records_error(&self) -> bool {
        matches!(
            self,
            Self::QueryFailure
                | Self::PersistFailure
                | Self::ValidationViolation
                | Self::EngineFailure
                | Self::JobCreationFailure
        )
    }

    /// Cleanup performed for this cause
    pub fn cleanup(&self) -> CleanupAction {
        match self {
            Self::QueryFailure | Self::EngineFailure => CleanupAction::Full,
            Self::ValidationViolation => CleanupAction::Deferred,
            Self::PersistFailure
            | Self::JobCreationFailure
            | Self::Completed
            | Self::Removed
            | Self::UnknownStatus(_) => CleanupAction::None,
        }
    }

    /// Whether the download ended successfully
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for TerminalCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueryFailure => write!(f, "engine query failed"),
            Self::PersistFailure => write!(f, "task record could not be saved"),
            Self::ValidationViolation => write!(f, "file constraint violated"),
            Self::EngineFailure => write!(f, "engine reported an error"),
            Self::JobCreationFailure => write!(f, "transfer job could not be created"),
            Self::Completed => write!(f, "completed"),
            Self::Removed => write!(f, "removed by engine"),
            Self::UnknownStatus(raw) => write!(f, "unknown engine status '{}'", raw),
        }
    }
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Keep monitoring
    Continue,
    /// Stop monitoring and release the subscription
    Stop(TerminalCause),
}

impl PassOutcome {
    pub fn should_stop(&self) -> bool {
        matches!(self, Self::Stop(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_paths_with_immediate_cleanup() {
        assert_eq!(TerminalCause::QueryFailure.cleanup(), CleanupAction::Full);
        assert_eq!(TerminalCause::EngineFailure.cleanup(), CleanupAction::Full);
        assert!(TerminalCause::QueryFailure.records_error());
        assert!(TerminalCause::EngineFailure.records_error());
    }

    #[test]
    fn validation_cleanup_is_deferred_to_cancel() {
        let cause = TerminalCause::ValidationViolation;
        assert!(cause.records_error());
        assert_eq!(cause.cleanup(), CleanupAction::Deferred);
    }

    #[test]
    fn job_creation_failure_keeps_temp_storage() {
        let cause = TerminalCause::JobCreationFailure;
        assert!(cause.records_error());
        assert_eq!(cause.cleanup(), CleanupAction::None);
    }

    #[test]
    fn silent_stops() {
        for cause in [
            TerminalCause::Removed,
            TerminalCause::UnknownStatus("seeding".to_string()),
            TerminalCause::Completed,
        ] {
            assert!(!cause.records_error(), "{cause} should not record an error");
            assert_eq!(cause.cleanup(), CleanupAction::None);
        }
        assert!(TerminalCause::Completed.is_success());
    }
}
