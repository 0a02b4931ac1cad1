pub mod applications;
pub mod auth;
pub mod blobs;
pub mod socket;
pub mod submissions;
pub mod teams;
pub mod work_items;

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::engine::hub::HubStats;
use crate::AppState;

#[derive(Debug, serde::Serialize)]
struct Health {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    hub: HubStats,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        service: "teamwork-hub",
        version: env!("CARGO_PKG_VERSION"),
        hub: state.hub.stats().await,
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .route("/health", get(health))
        .route("/api/work-items", post(work_items::create_work_item))
        .route(
            "/api/work-items/{id}",
            get(work_items::get_work_item).patch(work_items::update_work_item),
        )
        .route("/api/work-items/{id}/status", post(work_items::change_status))
        .route("/api/work-items/{id}/approve", post(work_items::approve))
        .route("/api/work-items/{id}/ratings", post(work_items::rate))
        .route("/api/work-items/{id}/applications", post(applications::apply))
        .route(
            "/api/work-items/{id}/applications/{app}/shortlist",
            post(applications::shortlist),
        )
        .route("/api/work-items/{id}/applications/{app}/reject", post(applications::reject))
        .route("/api/work-items/{id}/applications/{app}/accept", post(applications::accept))
        .route("/api/work-items/{id}/submissions", post(submissions::submit))
        .route("/api/work-items/{id}/submissions/{sub}/review", post(submissions::review))
        .route("/api/teams/{id}", get(teams::get_team))
        .route("/api/teams/{id}/members/{principal}", delete(teams::remove_member))
        .route(
            "/api/teams/{id}/messages",
            get(teams::list_messages).post(teams::send_message),
        )
        .route(
            "/api/teams/{id}/messages/{msg}",
            patch(teams::edit_message).delete(teams::delete_message),
        )
        .route("/api/teams/{id}/messages/{msg}/reactions", post(teams::toggle_reaction))
        .route("/api/blobs", put(blobs::upload).layer(upload_limit))
        .route("/api/blobs/{locator}", get(blobs::download))
        .route("/ws", get(socket::upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
