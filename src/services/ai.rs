use std::time::Duration;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use crate::config::ModelConfig;
use crate::error::AnalysisError;
use crate::models::prompt::ModelMessage;

/// A chat-completion backend. One call is one attempt; retries belong to the caller.
#[async_trait]
pub trait ModelClient: Send + Sync + 'static {
    async fn complete(&self, api_key: &str, messages: &[ModelMessage]) -> Result<String, AnalysisError>;
}

/// Client for OpenAI-compatible `/chat/completions` endpoints
#[derive(Clone, Debug)]
pub struct OpenAiClient {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        info!("Model client targeting {} with model {}", endpoint, config.model);

        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn complete(&self, api_key: &str, messages: &[ModelMessage]) -> Result<String, AnalysisError> {
        if api_key.trim().is_empty() {
            return Err(AnalysisError::Auth("no API key configured for this session".to_string()));
        }

        let request_body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages,
        });

        debug!("Sending {} messages to {}", messages.len(), self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key.trim())
            .json(&request_body)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let details = response
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error response".to_string());
            error!("Model API error: Status {}, Details: {}", status, details);
            return Err(classify_status(status, details));
        }

        let response_json: Value = response.json().await.map_err(|e| {
            error!("Failed to parse model API response as JSON: {}", e);
            AnalysisError::Model(format!("response was not valid JSON: {}", e))
        })?;

        match response_json["choices"][0]["message"]["content"].as_str() {
            Some(content) => Ok(content.to_string()),
            None => {
                error!("Could not extract content from model response: {:?}", response_json);
                Err(AnalysisError::Model("response had no message content".to_string()))
            }
        }
    }
}

fn classify_send_error(e: reqwest::Error) -> AnalysisError {
    if e.is_timeout() {
        warn!("Model API request timed out: {}", e);
        AnalysisError::Network(format!("request timed out: {}", e))
    } else if e.is_connect() {
        warn!("Failed to connect to model API: {}", e);
        AnalysisError::Network(format!("connection failed: {}", e))
    } else if e.is_request() || e.is_body() {
        AnalysisError::Network(format!("request failed: {}", e))
    } else {
        AnalysisError::Model(format!("failed to send request: {}", e))
    }
}

fn classify_status(status: StatusCode, details: String) -> AnalysisError {
    let summary = format!("status {}: {}", status.as_u16(), details);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AnalysisError::Auth(summary),
        StatusCode::TOO_MANY_REQUESTS => AnalysisError::RateLimit(summary),
        s if s.is_server_error() => AnalysisError::Network(summary),
        _ => AnalysisError::Model(summary),
    }
}
