use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use crate::commands::auth::Caller;
use crate::db::models::{ReviewInput, Submission, SubmitInput};
use crate::engine::workflow;
use crate::error::AppError;
use crate::AppState;

pub async fn submit(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(work_item_id): Path<String>,
    Json(input): Json<SubmitInput>,
) -> Result<Json<Submission>, AppError> {
    workflow::submit(&state.db, &state.notifier, &caller, &work_item_id, input).map(Json)
}

pub async fn review(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path((work_item_id, submission_id)): Path<(String, String)>,
    Json(input): Json<ReviewInput>,
) -> Result<Json<Submission>, AppError> {
    workflow::review_submission(&state.db, &state.notifier, &caller, &work_item_id, &submission_id, input)
        .map(Json)
}
