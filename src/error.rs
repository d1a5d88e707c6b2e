use thiserror::Error;

/// Failure categories surfaced to the chat user.
///
/// `RateLimit` and `Network` are transient and retried by the dispatcher;
/// everything else propagates on the first occurrence.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    /// The uploaded file could not be turned into a dataset
    #[error("Failed to parse file: {0}")]
    Parse(String),

    /// Missing or rejected API key
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The model endpoint asked us to slow down
    #[error("Rate limited by model API: {0}")]
    RateLimit(String),

    /// Timeouts, connection failures and 5xx responses
    #[error("Network error: {0}")]
    Network(String),

    /// Malformed or unexpected model response
    #[error("Model error: {0}")]
    Model(String),
}

impl AnalysisError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AnalysisError::RateLimit(_) | AnalysisError::Network(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::Parse(_) => "parse_error",
            AnalysisError::Auth(_) => "auth_error",
            AnalysisError::RateLimit(_) => "rate_limit_error",
            AnalysisError::Network(_) => "network_error",
            AnalysisError::Model(_) => "model_error",
        }
    }

    /// Text for the assistant error turn.
    pub fn user_message(&self) -> String {
        match self {
            AnalysisError::Parse(detail) => {
                format!("I couldn't read that file: {}", detail)
            }
            AnalysisError::Auth(_) => {
                "The model API rejected the API key. Please provide a valid key and ask again.".to_string()
            }
            AnalysisError::RateLimit(_) => {
                "The model API is rate limiting requests and retries were exhausted. Please try again shortly.".to_string()
            }
            AnalysisError::Network(_) => {
                "I couldn't reach the model API after several attempts. Please check the connection and try again.".to_string()
            }
            AnalysisError::Model(_) => {
                "The model returned an unexpected response, so I couldn't complete the analysis.".to_string()
            }
        }
    }
}
