//! Built-in content that keeps a session going when generation fails.

use crate::domain::{Activity, ActivitySource, ActivityType};

/// Absolute last-resort activity, served whenever the generator fails for any
/// reason other than a credential problem.
pub fn fallback_activity() -> Activity {
  Activity {
    activity_type: ActivityType::StoryQuestion,
    story: Some("Oh no! Sparky seems to have lost his signal. Let's try a default question.".into()),
    question: Some("What color is the sky on a sunny day?".into()),
    sentence: None,
    options: vec!["Blue".into(), "Green".into(), "Red".into(), "Purple".into()],
    correct_answer: "Blue".into(),
    source: ActivitySource::Fallback,
  }
}
