//! Loading agent configuration (prompts, session rules, topic list) from TOML.
//!
//! See `AgentConfig`, `Prompts` and `SessionRules` for the expected schema.
//! Every section is optional; missing keys fall back to the defaults below.

use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

/// Questions per session.
pub const TOTAL_QUESTIONS: u32 = 5;
/// Consecutive correct answers needed before the difficulty may rise.
pub const STREAK_TO_LEVEL_UP: u32 = 2;
/// An answer is "quick" when strictly faster than this.
pub const RESPONSE_TIME_THRESHOLD_MS: u64 = 10_000;
/// Cosmetic pause before a freshly fetched activity is shown.
pub const PRE_DISPLAY_DELAY_MS: u64 = 500;
/// Time the learner gets to see correctness feedback.
pub const POST_ANSWER_DELAY_MS: u64 = 2_000;
/// How long a finished, ended or credential-blocked session stays readable.
pub const SETTLED_RETENTION_MS: u64 = 300_000;

#[derive(Clone, Debug, Deserialize)]
pub struct AgentConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub session: SessionRules,
  #[serde(default = "default_topics")]
  pub topics: Vec<String>,
}

impl Default for AgentConfig {
  fn default() -> Self {
    Self { prompts: Prompts::default(), session: SessionRules::default(), topics: default_topics() }
  }
}

fn default_topics() -> Vec<String> {
  ["Animals", "Space", "Oceans", "Dinosaurs", "History", "Science", "Art"]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Prompts used by the content generator. Placeholders: `{topic}`,
/// `{difficulty}`, and for the remedial template `{prompt_text}`,
/// `{user_answer}`, `{correct_answer}`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub activity_system: String,
  pub activity_user_template: String,
  pub fresh_instruction: String,
  pub remedial_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      activity_system: "You create content for an adaptive learning app for a 6-year-old. Respond ONLY with strict JSON.".into(),
      activity_user_template: "The current topic is '{topic}'.\n\
You can generate one of two types of learning activities:\n\
1. 'STORY_QUESTION': a short story snippet followed by a multiple-choice question about it. You MUST provide the 'story' and 'question' fields.\n\
2. 'FILL_IN_THE_BLANK': a sentence with a blank space ('__') for the child to fill in. You MUST provide the 'sentence' field.\n\
Randomly choose one of the activity types. The activity difficulty should be {difficulty}.\n\
Return JSON with fields: activityType, story, question, sentence, options (exactly 4 distinct strings), correctAnswer (one of options). ONLY include fields relevant to the chosen activityType.".into(),
      fresh_instruction: "Generate a learning activity. Return the JSON.".into(),
      remedial_template: "The child just answered the following question incorrectly:\n\
Previous Prompt: \"{prompt_text}\"\n\
Their Answer: \"{user_answer}\"\n\
Correct Answer: \"{correct_answer}\"\n\
Generate a new, simpler learning activity to help them understand the concept better. The new activity should be easier. Return the JSON.".into(),
    }
  }
}

/// Tunables of the adaptive session. Defaults are the canonical values.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionRules {
  pub total_questions: u32,
  pub streak_to_level_up: u32,
  pub response_time_threshold_ms: u64,
  pub pre_display_delay_ms: u64,
  pub post_answer_delay_ms: u64,
  pub settled_retention_ms: u64,
}

impl Default for SessionRules {
  fn default() -> Self {
    Self {
      total_questions: TOTAL_QUESTIONS,
      streak_to_level_up: STREAK_TO_LEVEL_UP,
      response_time_threshold_ms: RESPONSE_TIME_THRESHOLD_MS,
      pre_display_delay_ms: PRE_DISPLAY_DELAY_MS,
      post_answer_delay_ms: POST_ANSWER_DELAY_MS,
      settled_retention_ms: SETTLED_RETENTION_MS,
    }
  }
}

impl SessionRules {
  pub fn response_time_threshold(&self) -> Duration {
    Duration::from_millis(self.response_time_threshold_ms)
  }
  pub fn pre_display_delay(&self) -> Duration {
    Duration::from_millis(self.pre_display_delay_ms)
  }
  pub fn post_answer_delay(&self) -> Duration {
    Duration::from_millis(self.post_answer_delay_ms)
  }
  pub fn settled_retention(&self) -> Duration {
    Duration::from_millis(self.settled_retention_ms)
  }

  /// Zero questions or a zero streak would make the session meaningless.
  fn sanitized(mut self) -> Self {
    if self.total_questions == 0 {
      self.total_questions = TOTAL_QUESTIONS;
    }
    if self.streak_to_level_up == 0 {
      self.streak_to_level_up = STREAK_TO_LEVEL_UP;
    }
    self
  }
}

/// Parse a TOML document into `AgentConfig`.
pub fn parse_agent_config(s: &str) -> Result<AgentConfig, toml::de::Error> {
  let mut cfg = toml::from_str::<AgentConfig>(s)?;
  cfg.session = cfg.session.sanitized();
  cfg.topics.retain(|t| !t.trim().is_empty());
  if cfg.topics.is_empty() {
    cfg.topics = default_topics();
  }
  Ok(cfg)
}

/// Attempt to load `AgentConfig` from AGENT_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_agent_config_from_env() -> Option<AgentConfig> {
  let path = std::env::var("AGENT_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_agent_config(&s) {
      Ok(cfg) => {
        info!(target: "quiz_backend", %path, total_questions = cfg.session.total_questions, topics = cfg.topics.len(), "Loaded agent config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "quiz_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "quiz_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
