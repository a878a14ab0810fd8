//! HTTP endpoint handlers. These are thin wrappers that forward to state and the
//! session controller. Each handler is instrumented.

use std::sync::Arc;
use axum::{extract::{Path, State}, http::StatusCode, response::IntoResponse, Json};
use tracing::{info, instrument};

use crate::error::ApiError;
use crate::protocol::*;
use crate::state::AppState;

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state))]
pub async fn http_get_topics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(TopicsOut { topics: state.config.topics.clone() })
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_credential(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(CredentialOut { has_credential: state.credentials.has_credential() })
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_post_credential(
  State(state): State<Arc<AppState>>,
  Json(body): Json<CredentialIn>,
) -> impl IntoResponse {
  state.credentials.select_credential(&body.api_key);
  Json(CredentialOut { has_credential: state.credentials.has_credential() })
}

#[instrument(level = "info", skip(state, body), fields(topic = %body.topic))]
pub async fn http_post_session(
  State(state): State<Arc<AppState>>,
  Json(body): Json<StartSessionIn>,
) -> Result<impl IntoResponse, ApiError> {
  let ctl = state.start_session(&body.topic).await?;
  info!(target: "session", id = %ctl.id(), "HTTP session started");
  Ok((StatusCode::CREATED, Json(to_out(ctl.id(), &ctl.view()))))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_session(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
  let ctl = state.get_session(&id).await?;
  Ok(Json(to_out(ctl.id(), &ctl.view())))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_post_answer(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<AnswerIn>,
) -> Result<impl IntoResponse, ApiError> {
  let ctl = state.get_session(&id).await?;
  let out = match ctl.select_answer(&body.option).await {
    Some(outcome) => AnswerOut::accepted(&outcome),
    None => {
      info!(target: "session", %id, "HTTP answer ignored (not awaiting an answer)");
      AnswerOut::rejected(&ctl.view())
    }
  };
  Ok(Json(out))
}

#[instrument(level = "info", skip(state))]
pub async fn http_delete_session(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
  state.end_session(&id).await?;
  Ok(StatusCode::NO_CONTENT)
}
