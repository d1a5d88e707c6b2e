use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::intent::{AnalysisIntent, ChartKind};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Role name expected by chat-completion APIs
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Pointer to a chart rendered for a turn; the SVG itself lives in the session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartReference {
    pub id: Uuid,
    pub kind: ChartKind,
    pub title: String,
    pub columns: Vec<String>,
}

/// One message in the chat log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
    /// When this turn occurred
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<AnalysisIntent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartReference>,
    /// True when the assistant turn reports a failure instead of an answer
    #[serde(default)]
    pub is_error: bool,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
            intent: None,
            chart: None,
            is_error: false,
        }
    }

    pub fn assistant(text: impl Into<String>, intent: AnalysisIntent, chart: Option<ChartReference>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
            intent: Some(intent),
            chart,
            is_error: false,
        }
    }

    pub fn assistant_error(text: impl Into<String>, intent: AnalysisIntent) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
            intent: Some(intent),
            chart: None,
            is_error: true,
        }
    }
}

/// Request body for posting a chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRequest {
    pub message: String,
}

/// Response to a chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub session_id: Uuid,
    pub turn: ChatTurn,
    /// Number of model calls made for this answer
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub session_id: Uuid,
    pub turns: Vec<ChatTurn>,
}
