use anyhow::{Context, Result};
use dotenv::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Settings for the chat-completion endpoint
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            timeout_secs: 30,
        }
    }
}

/// Bounded retry with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(8000),
        }
    }
}

/// Caps applied when a prompt is assembled
#[derive(Debug, Clone)]
pub struct ContextLimits {
    pub max_history_turns: usize,
    pub max_turn_chars: usize,
    pub max_prompt_chars: usize,
    pub max_summary_columns: usize,
    pub max_correlations: usize,
    /// Longest column name or category value quoted in the summary
    pub max_value_chars: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            max_history_turns: 10,
            max_turn_chars: 2000,
            max_prompt_chars: 12000,
            max_summary_columns: 30,
            max_correlations: 10,
            max_value_chars: 80,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForecastConfig {
    pub default_horizon: usize,
    pub max_horizon: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            default_horizon: 3,
            max_horizon: 24,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    /// Used for sessions created without their own key
    pub default_api_key: Option<String>,
    pub model: ModelConfig,
    pub retry: RetryPolicy,
    pub context: ContextLimits,
    pub forecast: ForecastConfig,
    pub preview_rows: usize,
    pub max_upload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8080,
            default_api_key: None,
            model: ModelConfig::default(),
            retry: RetryPolicy::default(),
            context: ContextLimits::default(),
            forecast: ForecastConfig::default(),
            preview_rows: 5,
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let defaults = Config::default();

        Ok(Self {
            server_host: env::var("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: parse_var("SERVER_PORT", defaults.server_port)?,
            default_api_key: env::var("OPENAI_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            model: ModelConfig {
                base_url: env::var("MODEL_BASE_URL").unwrap_or(defaults.model.base_url),
                model: env::var("MODEL_NAME").unwrap_or(defaults.model.model),
                temperature: parse_var("MODEL_TEMPERATURE", defaults.model.temperature)?,
                timeout_secs: parse_var("MODEL_TIMEOUT_SECS", defaults.model.timeout_secs)?,
            },
            retry: RetryPolicy {
                max_attempts: parse_var("RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?.max(1),
                base_delay: Duration::from_millis(parse_var("RETRY_BASE_DELAY_MS", 500u64)?),
                max_delay: Duration::from_millis(parse_var("RETRY_MAX_DELAY_MS", 8000u64)?),
            },
            context: ContextLimits {
                max_history_turns: parse_var(
                    "CONTEXT_MAX_HISTORY_TURNS",
                    defaults.context.max_history_turns,
                )?,
                max_turn_chars: parse_var("CONTEXT_MAX_TURN_CHARS", defaults.context.max_turn_chars)?,
                max_prompt_chars: parse_var(
                    "CONTEXT_MAX_PROMPT_CHARS",
                    defaults.context.max_prompt_chars,
                )?,
                max_summary_columns: parse_var(
                    "CONTEXT_MAX_SUMMARY_COLUMNS",
                    defaults.context.max_summary_columns,
                )?,
                max_correlations: parse_var(
                    "CONTEXT_MAX_CORRELATIONS",
                    defaults.context.max_correlations,
                )?,
                max_value_chars: parse_var(
                    "CONTEXT_MAX_VALUE_CHARS",
                    defaults.context.max_value_chars,
                )?,
            },
            forecast: ForecastConfig {
                default_horizon: parse_var(
                    "FORECAST_DEFAULT_HORIZON",
                    defaults.forecast.default_horizon,
                )?,
                max_horizon: parse_var("FORECAST_MAX_HORIZON", defaults.forecast.max_horizon)?,
            },
            preview_rows: parse_var("PREVIEW_ROWS", defaults.preview_rows)?,
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} must be a valid value, got '{}'", name, raw)),
        _ => Ok(default),
    }
}
