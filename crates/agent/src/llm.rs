//! Model client seam and the OpenAI-compatible HTTP implementation.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use frontdesk_core::config::ModelConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// A tool surfaced to the model, JSON schema and all.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool invocation the model asked for. Arguments are raw JSON; the
/// executor validates them against the registered schema.
#[derive(Clone, Debug, PartialEq)]
pub struct ProposedCall {
    pub name: String,
    pub arguments: Value,
}

/// One model exchange either finishes the turn with a reply or asks for
/// tool calls.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelTurn {
    Reply(String),
    ToolCalls(Vec<ProposedCall>),
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("model endpoint answered {status}: {body}")]
    Http { status: u16, body: String },
    #[error("model response could not be interpreted: {0}")]
    MalformedResponse(String),
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn next_turn(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        tools: &[ToolDescriptor],
    ) -> Result<ModelTurn, ModelError>;
}

/// Chat-completions client speaking the OpenAI-compatible dialect that
/// OpenAI, Anthropic's compatibility endpoint, and Ollama all accept.
pub struct HttpModelClient {
    http: reqwest::Client,
    config: ModelConfig,
}

impl HttpModelClient {
    pub fn new(config: ModelConfig) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self { http, config })
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
            .trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    fn request_body(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        tools: &[ToolDescriptor],
    ) -> Value {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(json!({"role": "system", "content": system_prompt}));
        for message in history {
            messages.push(json!({"role": message.role.as_str(), "content": message.content}));
        }

        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
        });
        if !tools.is_empty() {
            let descriptors: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(descriptors);
        }
        body
    }

    fn parse_response(payload: &Value) -> Result<ModelTurn, ModelError> {
        let message = payload
            .pointer("/choices/0/message")
            .ok_or_else(|| ModelError::MalformedResponse("missing choices[0].message".into()))?;

        if let Some(raw_calls) = message.get("tool_calls").and_then(Value::as_array) {
            if !raw_calls.is_empty() {
                let mut calls = Vec::with_capacity(raw_calls.len());
                for raw in raw_calls {
                    let name = raw
                        .pointer("/function/name")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            ModelError::MalformedResponse("tool call without a name".into())
                        })?
                        .to_owned();
                    let arguments = match raw.pointer("/function/arguments") {
                        Some(Value::String(raw_args)) => serde_json::from_str(raw_args)
                            .unwrap_or(Value::Object(Default::default())),
                        Some(value) => value.clone(),
                        None => Value::Object(Default::default()),
                    };
                    calls.push(ProposedCall { name, arguments });
                }
                return Ok(ModelTurn::ToolCalls(calls));
            }
        }

        match message.get("content").and_then(Value::as_str) {
            Some(content) if !content.trim().is_empty() => {
                Ok(ModelTurn::Reply(content.trim().to_owned()))
            }
            _ => Err(ModelError::MalformedResponse(
                "message carried neither content nor tool calls".into(),
            )),
        }
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn next_turn(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        tools: &[ToolDescriptor],
    ) -> Result<ModelTurn, ModelError> {
        let body = self.request_body(system_prompt, history, tools);
        let mut last_error: Option<ModelError> = None;

        for attempt in 0..=self.config.max_retries {
            let mut request = self.http.post(self.endpoint()).json(&body);
            if let Some(api_key) = &self.config.api_key {
                request = request.bearer_auth(api_key.expose_secret());
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() {
                        let body = response.text().await.unwrap_or_default();
                        last_error = Some(ModelError::Http { status: status.as_u16(), body });
                        continue;
                    }
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(ModelError::Http { status: status.as_u16(), body });
                    }
                    let payload: Value = response.json().await?;
                    return Self::parse_response(&payload);
                }
                Err(error) => {
                    tracing::warn!(
                        event_name = "model.request_retry",
                        attempt,
                        error = %error,
                    );
                    last_error = Some(ModelError::Transport(error));
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ModelError::MalformedResponse("no attempts were made".into())))
    }
}
