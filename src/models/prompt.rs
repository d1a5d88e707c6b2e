use serde::{Deserialize, Serialize};

use crate::models::chat::Role;
use crate::models::intent::AnalysisIntent;

pub const SYSTEM_PROMPT: &str = "You are a professional data analyst. Answer questions about the user's dataset \
using only the dataset summary and computed values provided. When computed values are given, \
quote them rather than inventing numbers. Be concise and explain key findings, trends and caveats.";

/// A prior chat turn as it appears in a prompt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptTurn {
    pub role: Role,
    pub text: String,
}

/// Message in the shape chat-completion endpoints expect
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMessage {
    pub role: String,
    pub content: String,
}

impl ModelMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Bounded input assembled for one model call. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptContext {
    pub dataset_summary: String,
    /// Prior turns, oldest first
    pub history: Vec<PromptTurn>,
    pub intent: AnalysisIntent,
    pub question: String,
    /// Values computed locally for the model to narrate
    pub grounding: Option<String>,
    pub notes: Vec<String>,
    /// Turns left out of `history` by the window and size caps
    pub dropped_turns: usize,
}

impl PromptContext {
    /// Final user message: dataset summary, computed values, and the question.
    pub fn render_request(&self) -> String {
        let mut out = String::new();
        out.push_str("Dataset summary:\n");
        out.push_str(&self.dataset_summary);
        out.push_str("\n\nAnalysis type: ");
        out.push_str(&self.intent.to_string());
        out.push('\n');

        if let Some(grounding) = &self.grounding {
            out.push_str("\nComputed values:\n");
            out.push_str(grounding);
            out.push('\n');
        }

        for note in &self.notes {
            out.push_str("\nNote: ");
            out.push_str(note);
            out.push('\n');
        }

        out.push_str("\nQuestion:\n");
        out.push_str(&self.question);
        out
    }

    pub fn to_messages(&self) -> Vec<ModelMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ModelMessage::new("system", SYSTEM_PROMPT));
        for turn in &self.history {
            messages.push(ModelMessage::new(turn.role.as_str(), turn.text.clone()));
        }
        messages.push(ModelMessage::new("user", self.render_request()));
        messages
    }

    /// Character count of everything sent to the model
    pub fn rendered_len(&self) -> usize {
        self.to_messages()
            .iter()
            .map(|m| m.content.chars().count())
            .sum()
    }
}
