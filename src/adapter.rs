//! Content request adapter: turns `(topic, difficulty, previous attempt)` into one
//! generator call and always hands back a usable `Activity`.
//!
//! - Malformed, empty, or failed generations are replaced by the fallback activity.
//! - Credential failures are the one thing surfaced to the caller, as `CredentialError`.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info, instrument, warn};

use crate::config::Prompts;
use crate::domain::{Activity, ActivitySource, ActivityType, Difficulty, PreviousAttempt, BLANK_MARKER, OPTION_COUNT};
use crate::generator::{ContentGenerator, GenerationRequest};
use crate::seeds::fallback_activity;
use crate::util::{fill_template, strip_code_fence, trunc_for_log};

/// The generator rejected our credential; the session cannot continue.
#[derive(Debug, Clone, thiserror::Error)]
#[error("content generator credential failure: {message}")]
pub struct CredentialError {
  pub message: String,
}

/// Why a generated payload was not accepted.
#[derive(Debug, thiserror::Error)]
pub enum ActivityError {
  #[error("empty payload")]
  Empty,
  #[error("payload is not a valid activity object: {0}")]
  Parse(#[from] serde_json::Error),
  #[error("expected 4 options, got {0}")]
  OptionCount(usize),
  #[error("options must be non-empty and distinct")]
  InvalidOptions,
  #[error("correctAnswer {0:?} is not one of the options")]
  AnswerNotInOptions(String),
  #[error("missing required field `{0}` for this activity type")]
  MissingField(&'static str),
  #[error("sentence must contain exactly one `__` blank, found {0}")]
  BlankMarker(usize),
}

/// Wire shape of a generated activity, before validation.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityPayload {
  activity_type: ActivityType,
  #[serde(default)] story: Option<String>,
  #[serde(default)] question: Option<String>,
  #[serde(default)] sentence: Option<String>,
  options: Vec<String>,
  correct_answer: String,
}

/// Parse and validate generator output into an `Activity`.
pub fn parse_activity(text: &str) -> Result<Activity, ActivityError> {
  let body = strip_code_fence(text);
  if body.is_empty() {
    return Err(ActivityError::Empty);
  }
  let payload: ActivityPayload = serde_json::from_str(body)?;
  validate_activity(payload)
}

fn non_blank(field: Option<String>, name: &'static str) -> Result<String, ActivityError> {
  match field.map(|s| s.trim().to_string()) {
    Some(s) if !s.is_empty() => Ok(s),
    _ => Err(ActivityError::MissingField(name)),
  }
}

fn validate_activity(p: ActivityPayload) -> Result<Activity, ActivityError> {
  if p.options.len() != OPTION_COUNT {
    return Err(ActivityError::OptionCount(p.options.len()));
  }
  let options: Vec<String> = p.options.iter().map(|o| o.trim().to_string()).collect();
  let distinct: HashSet<&str> = options.iter().map(String::as_str).collect();
  if distinct.len() != options.len() || options.iter().any(|o| o.is_empty()) {
    return Err(ActivityError::InvalidOptions);
  }
  let correct_answer = p.correct_answer.trim().to_string();
  if !options.contains(&correct_answer) {
    return Err(ActivityError::AnswerNotInOptions(correct_answer));
  }

  // Only the fields relevant to the chosen type are kept.
  let (story, question, sentence) = match p.activity_type {
    ActivityType::StoryQuestion => {
      (Some(non_blank(p.story, "story")?), Some(non_blank(p.question, "question")?), None)
    }
    ActivityType::FillInTheBlank => {
      let sentence = non_blank(p.sentence, "sentence")?;
      let blanks = sentence.matches(BLANK_MARKER).count();
      if blanks != 1 {
        return Err(ActivityError::BlankMarker(blanks));
      }
      (None, None, Some(sentence))
    }
  };

  Ok(Activity {
    activity_type: p.activity_type,
    story,
    question,
    sentence,
    options,
    correct_answer,
    source: ActivitySource::Generated,
  })
}

pub struct ContentAdapter {
  generator: Arc<dyn ContentGenerator>,
  prompts: Prompts,
}

impl ContentAdapter {
  pub fn new(generator: Arc<dyn ContentGenerator>, prompts: Prompts) -> Self {
    Self { generator, prompts }
  }

  /// Build the prompts for one request. A previous wrong attempt switches the
  /// closing instruction to the remedial one.
  pub fn compose_request(
    &self,
    topic: &str,
    difficulty: Difficulty,
    previous_attempt: Option<PreviousAttempt>,
  ) -> GenerationRequest {
    let base = fill_template(
      &self.prompts.activity_user_template,
      &[("topic", topic), ("difficulty", difficulty.as_str())],
    );
    let tail = match &previous_attempt {
      Some(prev) => fill_template(
        &self.prompts.remedial_template,
        &[
          ("prompt_text", &prev.prompt_text),
          ("user_answer", &prev.user_answer),
          ("correct_answer", &prev.correct_answer),
        ],
      ),
      None => self.prompts.fresh_instruction.clone(),
    };
    let system = fill_template(&self.prompts.activity_system, &[("topic", topic), ("difficulty", difficulty.as_str())]);
    GenerationRequest {
      topic: topic.to_string(),
      difficulty,
      previous_attempt,
      system,
      user: format!("{base}\n\n{tail}"),
    }
  }

  /// Produce exactly one activity. Only a credential failure is returned as an error.
  #[instrument(level = "info", skip(self, previous_attempt), fields(%topic, %difficulty, remedial = previous_attempt.is_some()))]
  pub async fn request_activity(
    &self,
    topic: &str,
    difficulty: Difficulty,
    previous_attempt: Option<PreviousAttempt>,
  ) -> Result<Activity, CredentialError> {
    let request = self.compose_request(topic, difficulty, previous_attempt);
    match self.generator.generate(&request).await {
      Ok(text) => match parse_activity(&text) {
        Ok(activity) => {
          info!(
            target: "activity",
            activity_type = ?activity.activity_type,
            prompt_preview = %activity.prompt_text().chars().take(40).collect::<String>(),
            "Activity generated"
          );
          Ok(activity)
        }
        Err(e) => {
          warn!(target: "activity", error = %e, payload = %trunc_for_log(&text, 200), "Rejected generated payload; serving fallback");
          Ok(fallback_activity())
        }
      },
      Err(e) if e.is_credential() => {
        error!(target: "activity", error = %e, "Generator rejected credential");
        Err(CredentialError { message: e.to_string() })
      }
      Err(e) => {
        error!(target: "activity", error = %e, "Generation failed; serving fallback");
        Ok(fallback_activity())
      }
    }
  }
}
