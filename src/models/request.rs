use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a single analysis request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RequestState {
    Building,
    Dispatched { attempt: u32 },
    Retrying { attempt: u32, delay_ms: u64 },
    Succeeded,
    Failed,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Succeeded | RequestState::Failed)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestState::Building => write!(f, "building"),
            RequestState::Dispatched { attempt } => write!(f, "dispatched(attempt {})", attempt),
            RequestState::Retrying { attempt, delay_ms } => {
                write!(f, "retrying(after attempt {}, in {}ms)", attempt, delay_ms)
            }
            RequestState::Succeeded => write!(f, "succeeded"),
            RequestState::Failed => write!(f, "failed"),
        }
    }
}
