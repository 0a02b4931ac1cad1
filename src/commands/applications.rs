use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::commands::auth::Caller;
use crate::db::models::{Application, ApplyInput, RejectInput};
use crate::engine::workflow::{self, AcceptOutcome};
use crate::error::AppError;
use crate::AppState;

pub async fn apply(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(work_item_id): Path<String>,
    Json(input): Json<ApplyInput>,
) -> Result<(StatusCode, Json<Application>), AppError> {
    let application = workflow::apply(&state.db, &state.notifier, &caller, &work_item_id, input)?;
    Ok((StatusCode::CREATED, Json(application)))
}

pub async fn shortlist(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path((work_item_id, application_id)): Path<(String, String)>,
) -> Result<Json<Application>, AppError> {
    workflow::shortlist(&state.db, &state.notifier, &caller, &work_item_id, &application_id).map(Json)
}

/// The body is optional; an empty POST rejects without feedback.
pub async fn reject(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path((work_item_id, application_id)): Path<(String, String)>,
    input: Option<Json<RejectInput>>,
) -> Result<Json<Application>, AppError> {
    let input = input.map(|Json(i)| i).unwrap_or_default();
    workflow::reject(&state.db, &state.notifier, &caller, &work_item_id, &application_id, input).map(Json)
}

pub async fn accept(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path((work_item_id, application_id)): Path<(String, String)>,
) -> Result<Json<AcceptOutcome>, AppError> {
    workflow::accept(&state.db, &state.notifier, &caller, &work_item_id, &application_id).map(Json)
}
