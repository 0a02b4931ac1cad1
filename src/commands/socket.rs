use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::db::models::SendMessageInput;
use crate::engine::chat;
use crate::engine::hub::ConnId;
use crate::engine::identity::{bearer_token, Identity};
use crate::engine::protocol::{ClientEvent, ServerEvent};
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SocketQuery {
    pub token: Option<String>,
}

/// `GET /ws`. The credential is checked once, before the upgrade; it may come
/// from `?token=` (browsers cannot set headers on sockets) or a bearer header.
pub async fn upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SocketQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let header_token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token);
    let token = query
        .token
        .as_deref()
        .or(header_token)
        .ok_or_else(|| AppError::AuthFailed("missing credential".into()))?;
    let caller = state.identity.validate(token).await?;
    Ok(ws.on_upgrade(move |socket| serve_socket(state, caller, socket)))
}

async fn serve_socket(state: Arc<AppState>, caller: Identity, socket: WebSocket) {
    let conn_id = state.hub.next_conn_id();
    let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<ServerEvent>();
    state.hub.register(conn_id, &caller.principal_id, outbox.clone());
    tracing::info!(conn_id, principal_id = %caller.principal_id, "Socket connected");

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(event) = outbox_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(conn_id, event = event.name(), error = %e, "Failed to encode frame");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.send(WsMessage::Close(None)).await;
    });

    loop {
        let frame = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            frame = stream.next() => frame,
        };
        let text = match frame {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
            Some(Ok(_)) => continue,
        };
        let result = match serde_json::from_str::<ClientEvent>(text.as_str()) {
            Ok(event) => dispatch(&state, conn_id, &caller, event).await,
            Err(e) => Err(AppError::Validation(format!("malformed frame: {e}"))),
        };
        if let Err(e) = result {
            tracing::debug!(conn_id, kind = e.kind(), error = %e, "Socket request rejected");
            let _ = outbox.send(ServerEvent::error(&e));
        }
    }

    state.hub.unregister(conn_id);
    drop(outbox);
    let _ = writer.await;
    tracing::info!(conn_id, principal_id = %caller.principal_id, "Socket disconnected");
}

/// Results reach the caller through the room broadcast (or `joined`/`left`);
/// only failures are answered directly.
async fn dispatch(state: &AppState, conn_id: ConnId, caller: &Identity, event: ClientEvent) -> Result<(), AppError> {
    match event {
        ClientEvent::Join { team_id } => chat::join_room(&state.db, &state.hub, conn_id, caller, &team_id).await,
        ClientEvent::Leave { team_id } => {
            state.hub.leave(conn_id, &team_id);
            Ok(())
        }
        ClientEvent::SendMessage {
            team_id,
            content,
            attachment,
            reply_to,
        } => {
            let input = SendMessageInput {
                content,
                attachment,
                reply_to,
            };
            chat::send_message(&state.db, &state.hub, &state.limits, caller, &team_id, input).map(|_| ())
        }
        ClientEvent::EditMessage {
            team_id,
            message_id,
            content,
        } => chat::edit_message(
            &state.db,
            &state.hub,
            &state.limits,
            caller,
            &team_id,
            &message_id,
            &content,
        )
        .map(|_| ()),
        ClientEvent::DeleteMessage { team_id, message_id } => {
            chat::delete_message(&state.db, &state.hub, caller, &team_id, &message_id).map(|_| ())
        }
        ClientEvent::ToggleReaction {
            team_id,
            message_id,
            emoji,
        } => chat::toggle_reaction(&state.db, &state.hub, caller, &team_id, &message_id, &emoji).map(|_| ()),
        ClientEvent::TypingStart { team_id } => {
            chat::typing(&state.hub, conn_id, caller, &team_id, true);
            Ok(())
        }
        ClientEvent::TypingStop { team_id } => {
            chat::typing(&state.hub, conn_id, caller, &team_id, false);
            Ok(())
        }
    }
}
