//! Credential gate for the content generator.
//!
//! The enclosing application asks `has_credential()` before starting any session,
//! and `select_credential()` stores a new key after a credential failure. The
//! generator reads the key at call time, so a freshly selected key takes effect on
//! the next request without rebuilding the client.

use std::sync::{Arc, RwLock};

use tracing::{info, warn};

/// Shared, swappable API key.
#[derive(Clone, Default)]
pub struct CredentialStore {
  key: Arc<RwLock<Option<String>>>,
}

impl CredentialStore {
  pub fn new(key: Option<String>) -> Self {
    let key = key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty());
    Self { key: Arc::new(RwLock::new(key)) }
  }

  /// Seed from OPENAI_API_KEY.
  pub fn from_env() -> Self {
    Self::new(std::env::var("OPENAI_API_KEY").ok())
  }

  pub fn has_credential(&self) -> bool {
    self.current().is_some()
  }

  pub fn current(&self) -> Option<String> {
    match self.key.read() {
      Ok(guard) => guard.clone(),
      Err(poisoned) => poisoned.into_inner().clone(),
    }
  }

  /// Store a new key. Blank keys clear the credential.
  pub fn select_credential(&self, key: &str) {
    let key = key.trim();
    let next = if key.is_empty() { None } else { Some(key.to_string()) };
    let has = next.is_some();
    match self.key.write() {
      Ok(mut guard) => *guard = next,
      Err(poisoned) => *poisoned.into_inner() = next,
    }
    info!(target: "quiz_backend", has_credential = has, "Credential selected");
  }

  /// Forget the key after the generator rejected it.
  pub fn invalidate(&self) {
    match self.key.write() {
      Ok(mut guard) => *guard = None,
      Err(poisoned) => *poisoned.into_inner() = None,
    }
    warn!(target: "quiz_backend", "Credential invalidated; a new key must be selected");
  }
}

impl std::fmt::Debug for CredentialStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    // Never print the key itself.
    f.debug_struct("CredentialStore").field("has_credential", &self.has_credential()).finish()
  }
}
