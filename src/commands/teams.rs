use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::commands::auth::Caller;
use crate::db::models::{Message, MessagePage, SendMessageInput, TeamView};
use crate::engine::{chat, workflow};
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct EditBody {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ReactionBody {
    pub emoji: String,
}

pub async fn get_team(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(team_id): Path<String>,
) -> Result<Json<TeamView>, AppError> {
    workflow::get_team(&state.db, &caller, &team_id).map(Json)
}

/// Also drops the removed principal's sockets from the room.
pub async fn remove_member(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path((team_id, principal_id)): Path<(String, String)>,
) -> Result<Json<TeamView>, AppError> {
    let team = workflow::remove_member(&state.db, &caller, &team_id, &principal_id)?;
    state.hub.evict(&team_id, &principal_id);
    Ok(Json(team))
}

pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(team_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<MessagePage>, AppError> {
    chat::list_messages(&state.db, &state.limits, &caller, &team_id, query.page, query.limit).map(Json)
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(team_id): Path<String>,
    Json(input): Json<SendMessageInput>,
) -> Result<(StatusCode, Json<Message>), AppError> {
    let message = chat::send_message(&state.db, &state.hub, &state.limits, &caller, &team_id, input)?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn edit_message(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path((team_id, message_id)): Path<(String, String)>,
    Json(body): Json<EditBody>,
) -> Result<Json<Message>, AppError> {
    chat::edit_message(
        &state.db,
        &state.hub,
        &state.limits,
        &caller,
        &team_id,
        &message_id,
        &body.content,
    )
    .map(Json)
}

pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path((team_id, message_id)): Path<(String, String)>,
) -> Result<Json<Message>, AppError> {
    chat::delete_message(&state.db, &state.hub, &caller, &team_id, &message_id).map(Json)
}

pub async fn toggle_reaction(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path((team_id, message_id)): Path<(String, String)>,
    Json(body): Json<ReactionBody>,
) -> Result<Json<Message>, AppError> {
    chat::toggle_reaction(&state.db, &state.hub, &caller, &team_id, &message_id, &body.emoji).map(Json)
}
