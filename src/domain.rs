//! Domain models: difficulty ladder, activities, answer status and the record of a
//! previous wrong attempt.

use serde::{Deserialize, Serialize};

/// Blank marker expected inside a fill-in-the-blank sentence.
pub const BLANK_MARKER: &str = "__";

/// Number of options every activity carries.
pub const OPTION_COUNT: usize = 4;

/// Difficulty ladder. Moves one step at a time and clamps at both ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Difficulty {
  #[default]
  Easy,
  Medium,
  Hard,
}

impl Difficulty {
  pub fn promote(self) -> Self {
    match self {
      Difficulty::Easy => Difficulty::Medium,
      Difficulty::Medium | Difficulty::Hard => Difficulty::Hard,
    }
  }

  pub fn demote(self) -> Self {
    match self {
      Difficulty::Hard => Difficulty::Medium,
      Difficulty::Medium | Difficulty::Easy => Difficulty::Easy,
    }
  }

  /// "Challenge level" shown to the learner (1..=3 stars).
  pub fn stars(self) -> u8 {
    match self {
      Difficulty::Easy => 1,
      Difficulty::Medium => 2,
      Difficulty::Hard => 3,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Difficulty::Easy => "EASY",
      Difficulty::Medium => "MEDIUM",
      Difficulty::Hard => "HARD",
    }
  }
}

impl std::fmt::Display for Difficulty {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityType {
  /// Short story followed by a multiple-choice question about it.
  StoryQuestion,
  /// A sentence with one `__` blank to fill.
  FillInTheBlank,
}

/// Where did the activity come from?
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySource {
  Generated,
  Fallback,
}

/// One question unit. Only built through `adapter::validate_activity` or the
/// built-in fallback, so `correct_answer` is always one of `options`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
  pub activity_type: ActivityType,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub story: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub question: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub sentence: Option<String>,
  pub options: Vec<String>,
  pub correct_answer: String,
  pub source: ActivitySource,
}

impl Activity {
  /// Text the learner answered: the question for stories, the sentence for blanks.
  pub fn prompt_text(&self) -> &str {
    let text = match self.activity_type {
      ActivityType::StoryQuestion => self.question.as_deref(),
      ActivityType::FillInTheBlank => self.sentence.as_deref(),
    };
    text.unwrap_or_default()
  }

  pub fn is_correct(&self, option: &str) -> bool {
    self.correct_answer == option
  }

  /// Whether `option` is one of the offered choices.
  pub fn has_option(&self, option: &str) -> bool {
    self.options.iter().any(|o| o == option)
  }
}

/// Carried into the next generation request after a wrong answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviousAttempt {
  pub prompt_text: String,
  pub user_answer: String,
  pub correct_answer: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
  #[default]
  Unanswered,
  Correct,
  Incorrect,
}

/// Mood of the companion character shown next to the question.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Companion {
  #[default]
  Idle,
  Thinking,
  Happy,
  Sad,
  Celebrating,
}
