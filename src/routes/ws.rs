//! WebSocket upgrade + message loop. One socket drives at most one session at a
//! time: client messages are parsed as JSON and dispatched, and every session
//! transition is pushed back as a `session` message.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

use crate::controller::SessionController;
use crate::protocol::{to_out, AnswerOut, ClientWsMessage, ServerWsMessage};
use crate::session::{Phase, SessionView};
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "quiz_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Session bound to this socket plus its update feed.
#[derive(Default)]
struct Binding {
  session: Option<Arc<SessionController>>,
  updates: Option<watch::Receiver<SessionView>>,
}

impl Binding {
  fn bind(&mut self, ctl: Arc<SessionController>) {
    self.updates = Some(ctl.subscribe());
    self.session = Some(ctl);
  }

  async fn release(&mut self, state: &AppState) {
    self.updates = None;
    if let Some(ctl) = self.session.take() {
      // Already gone from the registry is fine.
      let _ = state.end_session(ctl.id()).await;
    }
  }

  /// Resolve on the next session transition; pend forever when unbound.
  async fn changed(updates: &mut Option<watch::Receiver<SessionView>>) -> Option<SessionView> {
    match updates {
      Some(rx) => match rx.changed().await {
        Ok(()) => Some(rx.borrow_and_update().clone()),
        Err(_) => None,
      },
      None => std::future::pending().await,
    }
  }
}

async fn send(socket: &mut WebSocket, msg: &ServerWsMessage) -> bool {
  let out = serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
  });
  match socket.send(Message::Text(out)).await {
    Ok(()) => true,
    Err(e) => {
      error!(target: "quiz_backend", error = %e, "WS send error");
      false
    }
  }
}

fn session_messages(id: &str, view: &SessionView) -> Vec<ServerWsMessage> {
  let mut out = vec![ServerWsMessage::Session { session: to_out(id, view) }];
  if view.phase == Phase::CredentialNeeded {
    out.push(ServerWsMessage::CredentialNeeded);
  }
  out
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "quiz_backend", "WebSocket connected");
  let mut binding = Binding::default();

  'conn: loop {
    tokio::select! {
      msg = socket.recv() => {
        let txt = match msg {
          Some(Ok(Message::Text(txt))) => txt,
          Some(Ok(Message::Ping(payload))) => { let _ = socket.send(Message::Pong(payload)).await; continue; }
          Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break 'conn,
          Some(Ok(_)) => continue,
        };
        let replies = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "quiz_backend", "WS received: {:?}", &incoming);
            handle_client_ws(incoming, &state, &mut binding).await
          }
          Err(e) => vec![ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) }],
        };
        for reply in &replies {
          if !send(&mut socket, reply).await { break 'conn; }
        }
      }
      update = Binding::changed(&mut binding.updates) => {
        let (Some(view), Some(ctl)) = (update, binding.session.as_ref()) else {
          binding.updates = None;
          continue;
        };
        for reply in session_messages(ctl.id(), &view) {
          if !send(&mut socket, &reply).await { break 'conn; }
        }
      }
    }
  }

  binding.release(&state).await;
  info!(target: "quiz_backend", "WebSocket disconnected");
}

#[instrument(level = "info", skip(state, binding))]
async fn handle_client_ws(msg: ClientWsMessage, state: &AppState, binding: &mut Binding) -> Vec<ServerWsMessage> {
  match msg {
    ClientWsMessage::Ping => vec![ServerWsMessage::Pong],

    ClientWsMessage::StartSession { topic } => {
      binding.release(state).await;
      match state.start_session(&topic).await {
        Ok(ctl) => {
          info!(target: "session", id = %ctl.id(), %topic, "WS session started");
          let id = ctl.id().to_string();
          binding.bind(ctl);
          // Send the current snapshot now and only push later transitions.
          match binding.updates.as_mut() {
            Some(rx) => {
              let view = rx.borrow_and_update().clone();
              session_messages(&id, &view)
            }
            None => vec![],
          }
        }
        Err(crate::error::ApiError::CredentialNeeded) => vec![ServerWsMessage::CredentialNeeded],
        Err(e) => vec![ServerWsMessage::Error { message: e.to_string() }],
      }
    }

    ClientWsMessage::SelectAnswer { option } => {
      let Some(ctl) = binding.session.clone() else {
        return vec![ServerWsMessage::Error { message: "No active session.".into() }];
      };
      let result = match ctl.select_answer(&option).await {
        Some(outcome) => AnswerOut::accepted(&outcome),
        None => AnswerOut::rejected(&ctl.view()),
      };
      vec![ServerWsMessage::AnswerResult { result }]
    }

    ClientWsMessage::EndSession => {
      binding.release(state).await;
      vec![]
    }

    ClientWsMessage::SelectCredential { api_key } => {
      state.credentials.select_credential(&api_key);
      vec![ServerWsMessage::Credential { has_credential: state.credentials.has_credential() }]
    }
  }
}
