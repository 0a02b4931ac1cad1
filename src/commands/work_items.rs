use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::commands::auth::Caller;
use crate::db::models::{CreateWorkItemInput, RateInput, Rating, Submission, UpdateWorkItemInput, WorkItem};
use crate::engine::workflow::{self, StatusAction};
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub action: StatusAction,
}

pub async fn create_work_item(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Json(input): Json<CreateWorkItemInput>,
) -> Result<(StatusCode, Json<WorkItem>), AppError> {
    let item = workflow::create_work_item(&state.db, &caller, input)?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn get_work_item(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Json<WorkItem>, AppError> {
    workflow::get_work_item(&state.db, &caller, &id).map(Json)
}

pub async fn update_work_item(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    Json(input): Json<UpdateWorkItemInput>,
) -> Result<Json<WorkItem>, AppError> {
    workflow::update_work_item(&state.db, &caller, &id, input).map(Json)
}

pub async fn change_status(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    Json(body): Json<StatusChange>,
) -> Result<Json<WorkItem>, AppError> {
    workflow::change_status(&state.db, &caller, &id, body.action).map(Json)
}

pub async fn approve(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Json<Submission>, AppError> {
    workflow::approve(&state.db, &state.notifier, &caller, &id).map(Json)
}

pub async fn rate(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    Json(input): Json<RateInput>,
) -> Result<Json<Rating>, AppError> {
    workflow::rate(&state.db, &state.notifier, &caller, &id, input).map(Json)
}
