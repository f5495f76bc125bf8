use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

/// Key value shipped in sample configs; treated as "no key".
pub const API_KEY_PLACEHOLDER: &str = "your_api_key_here";
pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_MODEL: &str = "deepseek-chat";
pub const COMPLETION_TEMPERATURE: f32 = 0.2;
pub const COMPLETION_MAX_TOKENS: u32 = 2000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdapterFailureKind {
    Unconfigured,
    Timeout,
    Transport,
    ProviderStatus,
    InvalidResponse,
}

impl AdapterFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::ProviderStatus => "provider_status",
            Self::InvalidResponse => "invalid_response",
        }
    }
}

impl std::fmt::Display for AdapterFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct AdapterError {
    pub kind: AdapterFailureKind,
    pub message: String,
}

impl AdapterError {
    pub fn new(kind: AdapterFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
}

/// Turns a prompt into raw completion text. Implementations block.
pub trait CompletionAdapter: Send + Sync {
    fn complete(&self, request: &CompletionRequest) -> Result<String, AdapterError>;

    fn model_id(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub request_timeout: Duration,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(180),
        }
    }
}

impl ModelSettings {
    pub fn is_configured(&self) -> bool {
        self.usable_key().is_some()
    }

    pub fn usable_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty() && *key != API_KEY_PLACEHOLDER)
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// OpenAI-compatible `/chat/completions` client.
#[derive(Debug, Clone)]
pub struct ChatCompletionsAdapter {
    settings: ModelSettings,
}

impl ChatCompletionsAdapter {
    pub fn new(settings: ModelSettings) -> Self {
        Self { settings }
    }

    pub fn request_body(&self, request: &CompletionRequest) -> Value {
        json!({
            "model": self.settings.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt}
            ],
            "temperature": COMPLETION_TEMPERATURE,
            "max_tokens": COMPLETION_MAX_TOKENS
        })
    }
}

impl CompletionAdapter for ChatCompletionsAdapter {
    fn complete(&self, request: &CompletionRequest) -> Result<String, AdapterError> {
        let Some(api_key) = self.settings.usable_key() else {
            return Err(AdapterError::new(
                AdapterFailureKind::Unconfigured,
                "model api key is not configured",
            ));
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(self.settings.request_timeout)
            .build()
            .map_err(|err| AdapterError::new(AdapterFailureKind::Transport, err.to_string()))?;
        let response = client
            .post(self.settings.completions_url())
            .bearer_auth(api_key)
            .json(&self.request_body(request))
            .send()
            .map_err(|err| {
                let kind = if err.is_timeout() {
                    AdapterFailureKind::Timeout
                } else {
                    AdapterFailureKind::Transport
                };
                AdapterError::new(kind, err.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::new(
                AdapterFailureKind::ProviderStatus,
                format!("provider returned {status}: {}", body.trim()),
            ));
        }

        let json: Value = response.json().map_err(|err| {
            AdapterError::new(AdapterFailureKind::InvalidResponse, err.to_string())
        })?;
        completion_text(&json).ok_or_else(|| {
            AdapterError::new(
                AdapterFailureKind::InvalidResponse,
                "response missing choices[0].message.content",
            )
        })
    }

    fn model_id(&self) -> Option<String> {
        Some(self.settings.model.clone())
    }
}

pub fn completion_text(json: &Value) -> Option<String> {
    json.get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_and_blank_keys_are_unconfigured() {
        let mut settings = ModelSettings::default();
        assert!(!settings.is_configured());
        settings.api_key = Some(API_KEY_PLACEHOLDER.to_string());
        assert!(!settings.is_configured());
        settings.api_key = Some("   ".to_string());
        assert!(!settings.is_configured());
        settings.api_key = Some("sk-live".to_string());
        assert!(settings.is_configured());
    }

    #[test]
    fn request_body_uses_low_temperature_and_bounded_output() {
        let adapter = ChatCompletionsAdapter::new(ModelSettings {
            base_url: "https://models.example/".to_string(),
            ..ModelSettings::default()
        });
        let body = adapter.request_body(&CompletionRequest {
            system: "sys".to_string(),
            prompt: "hello".to_string(),
        });
        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["max_tokens"], 2000);
        assert_eq!(body["messages"][1]["content"], "hello");
        let temperature = body["temperature"].as_f64().expect("temperature");
        assert!((temperature - 0.2).abs() < 1e-6);
        assert_eq!(
            adapter.settings.completions_url(),
            "https://models.example/chat/completions"
        );
    }

    #[test]
    fn unconfigured_adapter_fails_without_network() {
        let adapter = ChatCompletionsAdapter::new(ModelSettings::default());
        let err = adapter
            .complete(&CompletionRequest {
                system: String::new(),
                prompt: "x".to_string(),
            })
            .expect_err("must fail");
        assert_eq!(err.kind, AdapterFailureKind::Unconfigured);
    }

    #[test]
    fn completion_text_reads_first_choice() {
        let json = serde_json::json!({"choices": [{"message": {"content": "### Cause\nx"}}]});
        assert_eq!(completion_text(&json).as_deref(), Some("### Cause\nx"));
        assert_eq!(completion_text(&serde_json::json!({"choices": []})), None);
    }
}
