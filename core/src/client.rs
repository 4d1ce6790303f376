//! Generative chat-completion client.
//!
//! One blocking POST to an OpenAI-compatible `/chat/completions`
//! endpoint. The credential is passed per call; this type never stores or
//! logs it.

use crate::config::GenerativeConfig;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("client build failed: {message}")]
    BuildClient { message: String },

    #[error("http request failed: {message}")]
    Http { message: String },

    #[error("request timed out")]
    Timeout,

    #[error("credential rejected (HTTP {status})")]
    Auth { status: u16 },

    #[error("http status {code}: {message}")]
    HttpStatus { code: u16, message: String },

    #[error("API error: {message}")]
    Api { message: String },

    #[error("decode response failed: {message}")]
    DecodeResponse { message: String },

    #[error("empty completion choice")]
    EmptyChoice,

    #[error("no API credential configured")]
    MissingCredential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role:    PromptRole,
    pub content: String,
}

/// Request body, serialized as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model:       String,
    pub messages:    Vec<PromptMessage>,
    pub temperature: f32,
    pub max_tokens:  u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResult {
    pub content: String,
    pub model:   Option<String>,
}

/// Anything that can answer a completion request.
pub trait CompletionClient: Send + Sync {
    fn complete(
        &self,
        credential: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, ClientError>;
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model:   Option<String>,
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    error:   Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    base_url: String,
    client:   Client,
}

impl OpenAiChatClient {
    pub fn from_config(config: &GenerativeConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()
            .map_err(|err| ClientError::BuildClient { message: err.to_string() })?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

fn transport_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout
    } else {
        ClientError::Http { message: err.to_string() }
    }
}

impl CompletionClient for OpenAiChatClient {
    fn complete(
        &self,
        credential: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, ClientError> {
        if credential.trim().is_empty() {
            return Err(ClientError::MissingCredential);
        }

        log::debug!("POST {} model={}", self.endpoint(), request.model);
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(credential)
            .json(request)
            .send()
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().map_err(transport_error)?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ClientError::Auth { status: status.as_u16() });
        }
        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .ok()
                .and_then(|e| e.error.message)
                .unwrap_or(body);
            return Err(ClientError::HttpStatus { code: status.as_u16(), message });
        }

        parse_completion(&body)
    }
}

/// Decode a success-status body: either choices or an `error` object.
pub fn parse_completion(body: &str) -> Result<CompletionResult, ClientError> {
    let response: CompletionResponse = serde_json::from_str(body)
        .map_err(|err| ClientError::DecodeResponse { message: err.to_string() })?;

    if let Some(error) = response.error {
        return Err(ClientError::Api {
            message: error.message.unwrap_or_else(|| "Unknown API error".to_string()),
        });
    }

    let first = response
        .choices
        .into_iter()
        .next()
        .ok_or(ClientError::EmptyChoice)?;
    Ok(CompletionResult {
        content: first.message.content,
        model:   response.model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_to_wire_shape() {
        let request = CompletionRequest {
            model: "llama3-70b-8192".into(),
            messages: vec![PromptMessage { role: PromptRole::System, content: "ctx".into() }],
            temperature: 0.0,
            max_tokens: 1024,
        };
        let v = serde_json::to_value(&request).unwrap();
        assert_eq!(v["model"], "llama3-70b-8192");
        assert_eq!(v["messages"][0]["role"], "system");
        assert_eq!(v["max_tokens"], 1024);
    }

    #[test]
    fn parses_choices() {
        let result =
            parse_completion(r#"{"model":"m","choices":[{"message":{"content":"hi"}}]}"#).unwrap();
        assert_eq!(result.content, "hi");
        assert_eq!(result.model.as_deref(), Some("m"));
    }

    #[test]
    fn error_body_becomes_api_error() {
        let err = parse_completion(r#"{"error":{"message":"model overloaded"}}"#).unwrap_err();
        assert_eq!(err, ClientError::Api { message: "model overloaded".into() });
    }

    #[test]
    fn empty_choices_is_an_error() {
        assert_eq!(parse_completion(r#"{"choices":[]}"#).unwrap_err(), ClientError::EmptyChoice);
    }
}
