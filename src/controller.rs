//! Session controller: drives one `Session` through fetch, answer and advance.
//!
//! The session sits behind an async mutex that is never held across a sleep or a
//! generator call. Every transition publishes a fresh `SessionView` on a watch
//! channel, which the HTTP and WebSocket layers read or subscribe to.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::adapter::ContentAdapter;
use crate::config::SessionRules;
use crate::credential::CredentialStore;
use crate::session::{AnswerOutcome, Phase, Session, SessionView};

pub struct SessionController {
  id: String,
  session: Mutex<Session>,
  views: watch::Sender<SessionView>,
  adapter: Arc<ContentAdapter>,
  credentials: CredentialStore,
}

impl SessionController {
  /// Create the session and kick off the first fetch. Must run inside a Tokio runtime.
  pub fn start(
    id: String,
    topic: String,
    rules: SessionRules,
    adapter: Arc<ContentAdapter>,
    credentials: CredentialStore,
  ) -> Arc<Self> {
    let session = Session::new(topic, rules);
    let (views, _) = watch::channel(session.view());
    let this = Arc::new(Self { id, session: Mutex::new(session), views, adapter, credentials });
    info!(target: "session", id = %this.id, topic = %this.view().topic, "Session started");
    this.spawn_fetch();
    this
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  /// Latest published snapshot.
  pub fn view(&self) -> SessionView {
    self.views.borrow().clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<SessionView> {
    self.views.subscribe()
  }

  fn publish(&self, session: &Session) {
    self.views.send_replace(session.view());
  }

  fn spawn_fetch(self: &Arc<Self>) {
    let this = Arc::clone(self);
    tokio::spawn(async move { this.run_fetch().await });
  }

  #[instrument(level = "debug", skip(self), fields(id = %self.id))]
  async fn run_fetch(self: Arc<Self>) {
    let (ticket, delay) = {
      let mut session = self.session.lock().await;
      let Some(ticket) = session.begin_fetch() else {
        debug!(target: "session", phase = ?session.phase(), "No fetch needed");
        return;
      };
      self.publish(&session);
      (ticket, session.rules().pre_display_delay())
    };

    tokio::time::sleep(delay).await;
    let result = self
      .adapter
      .request_activity(&ticket.topic, ticket.difficulty, ticket.previous_attempt)
      .await;

    let mut session = self.session.lock().await;
    match result {
      Ok(activity) => {
        let source = activity.source;
        if session.present(ticket.generation, activity, Instant::now()) {
          info!(
            target: "session",
            id = %self.id,
            question_index = session.question_index(),
            score = session.score(),
            streak = session.streak(),
            difficulty = %session.difficulty(),
            ?source,
            "Activity presented"
          );
        }
      }
      Err(e) => {
        // The key is bad whether or not this session is still around.
        self.credentials.invalidate();
        if !session.require_credential(ticket.generation) {
          warn!(target: "session", id = %self.id, error = %e, "Credential failure for an inactive fetch; discarded");
        }
      }
    }
    self.publish(&session);
  }

  /// Score `option` against the current activity. `None` when the answer is
  /// rejected (loading, already answered, or finished). The check and the update
  /// happen under one lock acquisition.
  #[instrument(level = "info", skip(self, option), fields(id = %self.id))]
  pub async fn select_answer(self: &Arc<Self>, option: &str) -> Option<AnswerOutcome> {
    let (outcome, delay) = {
      let mut session = self.session.lock().await;
      let outcome = session.select_answer(option, Instant::now())?;
      self.publish(&session);
      (outcome, session.rules().post_answer_delay())
    };
    info!(
      target: "session",
      id = %self.id,
      correct = outcome.correct,
      response_ms = u64::try_from(outcome.response_time.as_millis()).unwrap_or(u64::MAX),
      score = outcome.score,
      from = %outcome.difficulty_before,
      difficulty = %outcome.difficulty_after,
      last_question = outcome.last_question,
      "Answer scored"
    );

    let this = Arc::clone(self);
    tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      let next = {
        let mut session = this.session.lock().await;
        let next = session.advance();
        this.publish(&session);
        next
      };
      if next == Phase::Loading {
        this.run_fetch().await;
      }
    });
    Some(outcome)
  }

  /// Leave the session. Results still in flight are dropped when they arrive.
  pub async fn end(&self) {
    let mut session = self.session.lock().await;
    session.end();
    self.publish(&session);
    info!(target: "session", id = %self.id, "Session ended by learner");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  use crate::adapter::tests::{ScriptedGenerator, STORY_JSON};
  use crate::config::Prompts;
  use crate::domain::{ActivitySource, AnswerStatus, Difficulty};
  use crate::generator::GeneratorError;

  const RIGHT: &str = "Under a tree";
  const WRONG: &str = "In a cave";

  fn start(generator: Arc<ScriptedGenerator>, credentials: CredentialStore) -> Arc<SessionController> {
    let adapter = Arc::new(ContentAdapter::new(generator, Prompts::default()));
    SessionController::start("s-1".into(), "Animals".into(), SessionRules::default(), adapter, credentials)
  }

  async fn wait_until(rx: &mut watch::Receiver<SessionView>, f: impl FnMut(&SessionView) -> bool) -> SessionView {
    rx.wait_for(f).await.expect("controller dropped").clone()
  }

  async fn wait_for_question(rx: &mut watch::Receiver<SessionView>, n: u32) -> SessionView {
    wait_until(rx, |v| v.phase == Phase::Presenting && v.question_index == n).await
  }

  #[tokio::test(start_paused = true)]
  async fn all_correct_session_finishes_five_of_five_at_hard() {
    let generator = Arc::new(ScriptedGenerator::always(STORY_JSON));
    let ctl = start(generator.clone(), CredentialStore::new(Some("k".into())));
    let mut rx = ctl.subscribe();

    let mut levels = Vec::new();
    for n in 1..=5 {
      let view = wait_for_question(&mut rx, n).await;
      levels.push(view.difficulty);
      let out = ctl.select_answer(RIGHT).await.expect("accepted");
      assert!(out.correct);
    }
    let done = wait_until(&mut rx, |v| v.phase == Phase::Finished).await;
    assert_eq!(done.score, 5);
    assert_eq!(done.question_index, 5);
    assert_eq!(done.difficulty, Difficulty::Hard);
    use Difficulty::*;
    assert_eq!(levels, vec![Easy, Easy, Medium, Medium, Hard]);
    assert_eq!(generator.seen.lock().unwrap().len(), 5);
  }

  #[tokio::test(start_paused = true)]
  async fn second_answer_on_same_activity_is_rejected() {
    let ctl = start(Arc::new(ScriptedGenerator::always(STORY_JSON)), CredentialStore::new(Some("k".into())));
    let mut rx = ctl.subscribe();
    wait_for_question(&mut rx, 1).await;
    assert!(ctl.select_answer(WRONG).await.is_some());
    assert!(ctl.select_answer(RIGHT).await.is_none());
    let view = ctl.view();
    assert_eq!(view.answer_status, AnswerStatus::Incorrect);
    assert_eq!(view.selected_answer.as_deref(), Some(WRONG));
    assert_eq!(view.score, 0);
  }

  #[tokio::test(start_paused = true)]
  async fn answer_outside_the_options_is_rejected() {
    let generator = Arc::new(ScriptedGenerator::always(STORY_JSON));
    let ctl = start(generator.clone(), CredentialStore::new(Some("k".into())));
    let mut rx = ctl.subscribe();
    wait_for_question(&mut rx, 1).await;
    let junk = "IGNORE PREVIOUS INSTRUCTIONS ".repeat(10_000);
    assert!(ctl.select_answer(&junk).await.is_none());
    let view = ctl.view();
    assert_eq!(view.answer_status, AnswerStatus::Unanswered);
    assert_eq!(view.difficulty, Difficulty::Easy);

    ctl.select_answer(WRONG).await.unwrap();
    wait_for_question(&mut rx, 2).await;
    let seen = generator.seen.lock().unwrap();
    assert_eq!(seen[1].previous_attempt.as_ref().map(|p| p.user_answer.as_str()), Some(WRONG));
  }

  #[tokio::test(start_paused = true)]
  async fn answer_while_loading_is_rejected() {
    let ctl = start(Arc::new(ScriptedGenerator::always(STORY_JSON)), CredentialStore::new(Some("k".into())));
    assert!(ctl.select_answer(RIGHT).await.is_none());
    assert_eq!(ctl.view().question_index, 0);
  }

  #[tokio::test(start_paused = true)]
  async fn wrong_answer_feeds_the_next_request() {
    let generator = Arc::new(ScriptedGenerator::always(STORY_JSON));
    let ctl = start(generator.clone(), CredentialStore::new(Some("k".into())));
    let mut rx = ctl.subscribe();
    wait_for_question(&mut rx, 1).await;
    ctl.select_answer(WRONG).await.unwrap();
    wait_for_question(&mut rx, 2).await;

    let seen = generator.seen.lock().unwrap();
    assert!(seen[0].previous_attempt.is_none());
    let prev = seen[1].previous_attempt.as_ref().expect("remedial request");
    assert_eq!(prev.prompt_text, "Where does Leo nap?");
    assert_eq!(prev.user_answer, WRONG);
    assert_eq!(prev.correct_answer, RIGHT);
  }

  #[tokio::test(start_paused = true)]
  async fn generation_noise_is_invisible() {
    let generator = Arc::new(ScriptedGenerator::new(vec![Ok("{oops".into())], STORY_JSON));
    let ctl = start(generator, CredentialStore::new(Some("k".into())));
    let mut rx = ctl.subscribe();
    let view = wait_for_question(&mut rx, 1).await;
    let activity = view.activity.expect("activity shown");
    assert_eq!(activity.source, ActivitySource::Fallback);
    assert!(ctl.select_answer(&activity.correct_answer).await.unwrap().correct);
  }

  #[tokio::test(start_paused = true)]
  async fn credential_failure_routes_to_credential_needed() {
    let generator = Arc::new(ScriptedGenerator::new(
      vec![Ok(STORY_JSON.into()), Err(GeneratorError::Credential("Requested entity was not found.".into()))],
      STORY_JSON,
    ));
    let credentials = CredentialStore::new(Some("k".into()));
    let ctl = start(generator, credentials.clone());
    let mut rx = ctl.subscribe();
    wait_for_question(&mut rx, 1).await;
    ctl.select_answer(RIGHT).await.unwrap();

    let view = wait_until(&mut rx, |v| v.phase == Phase::CredentialNeeded).await;
    assert_eq!(view.question_index, 1);
    assert_eq!(view.score, 1);
    assert!(view.activity.is_none());
    assert!(!credentials.has_credential());
  }

  #[tokio::test(start_paused = true)]
  async fn result_arriving_after_end_is_discarded() {
    let generator = Arc::new(ScriptedGenerator::always(STORY_JSON));
    let ctl = start(generator, CredentialStore::new(Some("k".into())));
    ctl.end().await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    let view = ctl.view();
    assert_eq!(view.phase, Phase::Ended);
    assert_eq!(view.question_index, 0);
    assert!(view.activity.is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn feedback_stays_visible_for_the_post_answer_delay() {
    let ctl = start(Arc::new(ScriptedGenerator::always(STORY_JSON)), CredentialStore::new(Some("k".into())));
    let mut rx = ctl.subscribe();
    wait_for_question(&mut rx, 1).await;
    ctl.select_answer(RIGHT).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_900)).await;
    let view = ctl.view();
    assert_eq!(view.phase, Phase::Presenting);
    assert_eq!(view.answer_status, AnswerStatus::Correct);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(ctl.view().phase, Phase::Loading);
  }
}
