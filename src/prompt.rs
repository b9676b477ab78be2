use std::time::Duration;

use rand::seq::SliceRandom;
use reqwest::blocking::Client;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::PromptOptions;

/// Offered when there is nothing written yet to build on.
pub const FALLBACK_PROMPTS: &[&str] = &[
    "What made you smile today?",
    "Describe a moment today when you felt completely present.",
    "What is something you are looking forward to this week?",
    "Write about a small win you had recently.",
    "What is weighing on your mind, and what would lighten it?",
    "Who did you think about today, and why?",
    "What would you tell yourself from a year ago?",
    "Describe the place you feel most at ease.",
    "What did you learn today that surprised you?",
    "Which habit would you like to start, and what is the first step?",
];

const MAX_CONTEXT_CHARS: usize = 4_000;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("no API key found in ${0}")]
    MissingApiKey(String),
    #[error("prompt request failed: {0}")]
    Transport(String),
    #[error("prompt service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("prompt service response did not include readable text")]
    EmptyResponse,
}

pub struct PromptGenerator {
    client: Client,
    endpoint: String,
    model: String,
    api_key_env: String,
    api_key: Option<String>,
}

impl PromptGenerator {
    pub fn new(options: &PromptOptions) -> Result<Self, PromptError> {
        Self::with_timeout(options, options.timeout())
    }

    fn with_timeout(options: &PromptOptions, timeout: Duration) -> Result<Self, PromptError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| PromptError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: options.endpoint.clone(),
            model: options.model.clone(),
            api_key_env: options.api_key_env.clone(),
            api_key: options.api_key(),
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Suggests a writing prompt. Empty context never reaches the network.
    pub fn generate(&self, context: &str) -> Result<String, PromptError> {
        let context = context.trim();
        if context.is_empty() {
            return Ok(fallback_prompt().to_string());
        }
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| PromptError::MissingApiKey(self.api_key_env.clone()))?;

        let payload = json!({
            "model": self.model,
            "input": [{
                "role": "user",
                "content": [{
                    "type": "input_text",
                    "text": build_instruction(context),
                }],
            }],
        });

        tracing::debug!(endpoint = %self.endpoint, model = %self.model, "requesting writing prompt");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .map_err(|err| PromptError::Transport(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|err| PromptError::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(PromptError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value =
            serde_json::from_str(&body).map_err(|_| PromptError::EmptyResponse)?;
        let text = extract_output_text(&value);
        if text.is_empty() {
            return Err(PromptError::EmptyResponse);
        }
        Ok(text)
    }
}

pub fn fallback_prompt() -> &'static str {
    FALLBACK_PROMPTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("What is on your mind today?")
}

fn build_instruction(context: &str) -> String {
    let clipped: String = context.chars().take(MAX_CONTEXT_CHARS).collect();
    format!(
        "You help someone keep a personal diary. Based on their recent entries below, \
         suggest one short, open-ended writing prompt for today's entry. \
         Reply with the prompt only.\n\nRecent entries:\n{clipped}"
    )
}

/// Pulls text out of either the `output_text` shortcut or the nested
/// `output[].content[].text` items of a responses payload.
fn extract_output_text(value: &Value) -> String {
    if let Some(text) = value.get("output_text").and_then(Value::as_str) {
        return clean(text);
    }
    let mut parts = Vec::new();
    if let Some(items) = value.get("output").and_then(Value::as_array) {
        for item in items {
            let Some(content) = item.get("content").and_then(Value::as_array) else {
                continue;
            };
            for piece in content {
                if let Some(text) = piece.get("text").and_then(Value::as_str) {
                    parts.push(text);
                }
            }
        }
    }
    clean(&parts.join("\n"))
}

fn clean(text: &str) -> String {
    text.trim().trim_matches('"').trim().to_string()
}
