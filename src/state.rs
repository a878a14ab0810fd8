//! Application state: configuration, credential gate, content adapter and the
//! registry of live sessions.
//!
//! Sessions are independent entries keyed by id; nothing mutable is shared
//! between them apart from the credential store. A session that reaches a
//! terminal phase is dropped from the registry once `settled_retention` passes.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::adapter::ContentAdapter;
use crate::config::{load_agent_config_from_env, AgentConfig};
use crate::controller::SessionController;
use crate::credential::CredentialStore;
use crate::error::ApiError;
use crate::generator::{ContentGenerator, GeneratorError, OpenAI};

/// Longest accepted topic, in characters.
const MAX_TOPIC_CHARS: usize = 64;

pub struct AppState {
  pub config: AgentConfig,
  pub credentials: CredentialStore,
  pub adapter: Arc<ContentAdapter>,
  pub sessions: Arc<RwLock<HashMap<String, Arc<SessionController>>>>,
}

impl AppState {
  /// Build state from env: load config, seed the credential, init the generator client.
  #[instrument(level = "info", skip_all)]
  pub fn from_env() -> Result<Self, GeneratorError> {
    let config = load_agent_config_from_env().unwrap_or_default();
    let credentials = CredentialStore::from_env();
    let openai = OpenAI::from_env(credentials.clone())?;
    info!(
      target: "quiz_backend",
      base_url = %openai.base_url,
      model = %openai.model,
      has_credential = credentials.has_credential(),
      "Content generator configured"
    );
    Ok(Self::new(config, credentials, Arc::new(openai)))
  }

  pub fn new(config: AgentConfig, credentials: CredentialStore, generator: Arc<dyn ContentGenerator>) -> Self {
    let adapter = Arc::new(ContentAdapter::new(generator, config.prompts.clone()));
    Self { config, credentials, adapter, sessions: Arc::new(RwLock::new(HashMap::new())) }
  }

  /// Validate the topic, check the credential gate, and start a new session.
  #[instrument(level = "info", skip(self))]
  pub async fn start_session(&self, topic: &str) -> Result<Arc<SessionController>, ApiError> {
    let topic = topic.trim();
    if topic.is_empty() || topic.chars().count() > MAX_TOPIC_CHARS {
      return Err(ApiError::InvalidTopic);
    }
    if !self.credentials.has_credential() {
      return Err(ApiError::CredentialNeeded);
    }
    let id = Uuid::new_v4().to_string();
    let ctl = SessionController::start(
      id.clone(),
      topic.to_string(),
      self.config.session.clone(),
      Arc::clone(&self.adapter),
      self.credentials.clone(),
    );
    self.sessions.write().await.insert(id, Arc::clone(&ctl));
    self.spawn_reaper(&ctl);
    Ok(ctl)
  }

  /// Forget the session some time after it settles, so the registry only holds
  /// sessions that can still change or were settled recently.
  fn spawn_reaper(&self, ctl: &SessionController) {
    let sessions = Arc::clone(&self.sessions);
    let id = ctl.id().to_string();
    let mut updates = ctl.subscribe();
    let retention = self.config.session.settled_retention();
    tokio::spawn(async move {
      // An error means the controller is gone, which only happens after removal.
      let _ = updates.wait_for(|v| v.phase.is_terminal()).await;
      tokio::time::sleep(retention).await;
      if sessions.write().await.remove(&id).is_some() {
        debug!(target: "session", %id, "Settled session removed from registry");
      }
    });
  }

  pub async fn get_session(&self, id: &str) -> Result<Arc<SessionController>, ApiError> {
    self.sessions.read().await.get(id).cloned().ok_or(ApiError::SessionNotFound)
  }

  /// End and forget a session.
  pub async fn end_session(&self, id: &str) -> Result<(), ApiError> {
    let ctl = self.sessions.write().await.remove(id).ok_or(ApiError::SessionNotFound)?;
    ctl.end().await;
    Ok(())
  }
}
