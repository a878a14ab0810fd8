//! External content generator.
//!
//! `ContentGenerator` is the seam the adapter talks to. The shipped implementation
//! is a minimal OpenAI-compatible chat.completions client that requests a strict
//! JSON object and returns the raw text; parsing and validation live in the adapter.
//!
//! NOTE: We never log the API key or the generated contents, only sizes and usage.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::credential::CredentialStore;
use crate::domain::{Difficulty, PreviousAttempt};

/// Substrings that identify a rejected or unknown API key in an error message.
const CREDENTIAL_MARKERS: &[&str] = &[
  "Requested entity was not found",
  "Incorrect API key",
  "invalid_api_key",
];

/// One request to the generator: the logical inputs plus the composed prompts.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
  pub topic: String,
  pub difficulty: Difficulty,
  pub previous_attempt: Option<PreviousAttempt>,
  pub system: String,
  pub user: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
  /// The key is missing, rejected, or refers to an entity that does not exist.
  #[error("credential rejected: {0}")]
  Credential(String),
  #[error("generator HTTP {status}: {message}")]
  Http { status: u16, message: String },
  #[error("transport error: {0}")]
  Transport(String),
  #[error("generator returned an empty response")]
  Empty,
}

impl GeneratorError {
  pub fn is_credential(&self) -> bool {
    matches!(self, GeneratorError::Credential(_))
  }

  /// Map a non-success HTTP reply into the right error class.
  pub fn from_status(status: u16, message: String) -> Self {
    let unauthorized = status == StatusCode::UNAUTHORIZED.as_u16() || status == StatusCode::FORBIDDEN.as_u16();
    if unauthorized || mentions_credential(&message) {
      GeneratorError::Credential(message)
    } else {
      GeneratorError::Http { status, message }
    }
  }
}

pub fn mentions_credential(message: &str) -> bool {
  CREDENTIAL_MARKERS.iter().any(|m| message.contains(m))
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
  /// Returns the raw JSON text produced by the generator.
  async fn generate(&self, request: &GenerationRequest) -> Result<String, GeneratorError>;
}

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub credentials: CredentialStore,
  pub base_url: String,
  pub model: String,
  pub temperature: f32,
}

impl OpenAI {
  /// Build the client from OPENAI_BASE_URL / OPENAI_MODEL. The key itself comes
  /// from the credential store on every call.
  pub fn from_env(credentials: CredentialStore) -> Result<Self, GeneratorError> {
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    Self::new(credentials, base_url, model)
  }

  pub fn new(credentials: CredentialStore, base_url: String, model: String) -> Result<Self, GeneratorError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(20))
      .build()
      .map_err(|e| GeneratorError::Transport(e.to_string()))?;
    Ok(Self { client, credentials, base_url: base_url.trim_end_matches('/').to_string(), model, temperature: 0.8 })
  }

  /// JSON-object chat completion; returns the message content untouched.
  #[instrument(level = "info", skip(self, system, user), fields(model = %self.model))]
  async fn chat_json_text(&self, system: &str, user: &str) -> Result<String, GeneratorError> {
    let api_key = self
      .credentials
      .current()
      .ok_or_else(|| GeneratorError::Credential("no API key selected".into()))?;

    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature: self.temperature,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
    };

    let res = self.client.post(&url)
      .header(USER_AGENT, "quiz-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", api_key))
      .json(&req).send().await
      .map_err(|e| GeneratorError::Transport(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status().as_u16();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or(body);
      return Err(GeneratorError::from_status(status, msg));
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| GeneratorError::Transport(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(target: "activity", prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "Generator usage");
    }
    let text = body.choices.first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default().trim().to_string();

    if text.is_empty() {
      return Err(GeneratorError::Empty);
    }
    Ok(text)
  }
}

#[async_trait]
impl ContentGenerator for OpenAI {
  #[instrument(
    level = "info",
    skip(self, request),
    fields(topic = %request.topic, difficulty = %request.difficulty, remedial = request.previous_attempt.is_some())
  )]
  async fn generate(&self, request: &GenerationRequest) -> Result<String, GeneratorError> {
    let start = std::time::Instant::now();
    let result = self.chat_json_text(&request.system, &request.user).await;
    let elapsed = start.elapsed();
    match &result {
      Ok(text) => info!(target: "activity", ?elapsed, bytes = text.len(), "Model response received"),
      Err(e) => error!(target: "activity", ?elapsed, error = %e, "Model call failed during activity generation"),
    }
    result
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from an OpenAI-style error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unauthorized_statuses_are_credential_errors() {
    assert!(GeneratorError::from_status(401, "nope".into()).is_credential());
    assert!(GeneratorError::from_status(403, "nope".into()).is_credential());
    assert!(!GeneratorError::from_status(500, "boom".into()).is_credential());
    assert!(!GeneratorError::from_status(429, "slow down".into()).is_credential());
  }

  #[test]
  fn entity_not_found_message_is_a_credential_error() {
    let e = GeneratorError::from_status(404, "Requested entity was not found.".into());
    assert!(e.is_credential());
  }

  #[test]
  fn error_body_message_is_extracted() {
    let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
    assert_eq!(extract_openai_error(body).as_deref(), Some("Incorrect API key provided"));
    assert_eq!(extract_openai_error("<html>"), None);
  }

  #[tokio::test]
  async fn missing_key_fails_before_any_request() {
    let oa = OpenAI::new(CredentialStore::default(), "http://127.0.0.1:9".into(), "m".into()).unwrap();
    let req = GenerationRequest {
      topic: "Animals".into(),
      difficulty: Difficulty::Easy,
      previous_attempt: None,
      system: "s".into(),
      user: "u".into(),
    };
    let err = oa.generate(&req).await.unwrap_err();
    assert!(err.is_credential());
  }
}
