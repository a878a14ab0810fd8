//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and views independently.

use serde::{Deserialize, Serialize};

use crate::domain::{Activity, ActivitySource, ActivityType, AnswerStatus, Companion, Difficulty};
use crate::session::{AnswerOutcome, Phase, SessionView};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
  Ping,
  StartSession {
    topic: String,
  },
  SelectAnswer {
    option: String,
  },
  EndSession,
  SelectCredential {
    #[serde(rename = "apiKey")]
    api_key: String,
  },
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
  Pong,
  /// Pushed on every session transition.
  Session {
    session: SessionOut,
  },
  AnswerResult {
    #[serde(flatten)]
    result: AnswerOut,
  },
  CredentialNeeded,
  Credential {
    #[serde(rename = "hasCredential")]
    has_credential: bool,
  },
  Error {
    message: String,
  },
}

/// Activity as shown to the learner. `correctAnswer` stays hidden until the
/// activity has been answered.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityOut {
  pub activity_type: ActivityType,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub story: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub question: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub sentence: Option<String>,
  pub options: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub correct_answer: Option<String>,
  pub source: ActivitySource,
}

fn activity_out(a: &Activity, reveal: bool) -> ActivityOut {
  ActivityOut {
    activity_type: a.activity_type,
    story: a.story.clone(),
    question: a.question.clone(),
    sentence: a.sentence.clone(),
    options: a.options.clone(),
    correct_answer: reveal.then(|| a.correct_answer.clone()),
    source: a.source,
  }
}

/// DTO used by both WS and HTTP for session delivery.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOut {
  pub id: String,
  pub topic: String,
  pub phase: Phase,
  pub difficulty: Difficulty,
  pub stars: u8,
  pub score: u32,
  pub streak: u32,
  pub question_index: u32,
  pub total_questions: u32,
  pub answer_status: AnswerStatus,
  pub selected_answer: Option<String>,
  pub companion: Companion,
  pub activity: Option<ActivityOut>,
}

/// Convert the internal view into the public DTO.
pub fn to_out(id: &str, v: &SessionView) -> SessionOut {
  let reveal = v.answer_status != AnswerStatus::Unanswered;
  SessionOut {
    id: id.to_string(),
    topic: v.topic.clone(),
    phase: v.phase,
    difficulty: v.difficulty,
    stars: v.difficulty.stars(),
    score: v.score,
    streak: v.streak,
    question_index: v.question_index,
    total_questions: v.total_questions,
    answer_status: v.answer_status,
    selected_answer: v.selected_answer.clone(),
    companion: v.companion,
    activity: v.activity.as_ref().map(|a| activity_out(a, reveal)),
  }
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct StartSessionIn {
  pub topic: String,
}

#[derive(Debug, Deserialize)]
pub struct AnswerIn {
  pub option: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOut {
  pub accepted: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub correct: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub response_time_ms: Option<u64>,
  pub difficulty: Difficulty,
  pub score: u32,
  pub question_index: u32,
}

impl AnswerOut {
  pub fn accepted(o: &AnswerOutcome) -> Self {
    Self {
      accepted: true,
      correct: Some(o.correct),
      response_time_ms: Some(u64::try_from(o.response_time.as_millis()).unwrap_or(u64::MAX)),
      difficulty: o.difficulty_after,
      score: o.score,
      question_index: o.question_index,
    }
  }

  /// The answer was a no-op; report the unchanged state.
  pub fn rejected(v: &SessionView) -> Self {
    Self {
      accepted: false,
      correct: None,
      response_time_ms: None,
      difficulty: v.difficulty,
      score: v.score,
      question_index: v.question_index,
    }
  }
}

#[derive(Deserialize)]
pub struct CredentialIn {
  #[serde(rename = "apiKey")]
  pub api_key: String,
}
#[derive(Serialize)]
pub struct CredentialOut {
  #[serde(rename = "hasCredential")]
  pub has_credential: bool,
}

#[derive(Serialize)]
pub struct TopicsOut {
  pub topics: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorOut {
  pub error: String,
  pub message: String,
}

#[derive(Serialize)]
pub struct HealthOut {
  pub ok: bool,
}
