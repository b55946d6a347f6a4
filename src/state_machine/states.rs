use serde::{Deserialize, Serialize};
use std::fmt;

/// Batch coordinator phase definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    /// Initial phase before the first execute-batch request arrives.
    AwaitingFirstRequest,
    /// Dry-run dispatches are out; awaiting one validation outcome per command.
    ValidatingDryRun,
    /// `BatchStarted` is durable; awaiting one real outcome per command.
    Committed,
    /// Batch is finished or aborted; the self-shutdown timer is running.
    AwaitingShutdown,
}

impl BatchPhase {
    /// Check if this phase is terminal-pending (only the timer is accepted).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AwaitingShutdown)
    }

    /// Check if the batch has passed its durable commit point.
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }

    /// Check if an execute-batch request for this identity is already
    /// mid-flight (duplicates are rejected in these phases).
    pub fn is_executing(&self) -> bool {
        matches!(self, Self::ValidatingDryRun | Self::Committed)
    }
}

impl fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingFirstRequest => write!(f, "awaiting_first_request"),
            Self::ValidatingDryRun => write!(f, "validating_dry_run"),
            Self::Committed => write!(f, "committed"),
            Self::AwaitingShutdown => write!(f, "awaiting_shutdown"),
        }
    }
}

impl std::str::FromStr for BatchPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awaiting_first_request" => Ok(Self::AwaitingFirstRequest),
            "validating_dry_run" => Ok(Self::ValidatingDryRun),
            "committed" => Ok(Self::Committed),
            "awaiting_shutdown" => Ok(Self::AwaitingShutdown),
            _ => Err(format!("Invalid batch phase: {s}")),
        }
    }
}
