//! Room protocol frames. Every frame is `{"event": "<name>", "data": {...}}`.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::db::models::{Attachment, Message};
use crate::error::AppError;

/// Frames a client sends on the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "event", content = "data")]
#[ts(export)]
pub enum ClientEvent {
    #[serde(rename = "join")]
    Join { team_id: String },
    #[serde(rename = "leave")]
    Leave { team_id: String },
    #[serde(rename = "message.send")]
    SendMessage {
        team_id: String,
        content: Option<String>,
        attachment: Option<Attachment>,
        reply_to: Option<String>,
    },
    #[serde(rename = "message.edit")]
    EditMessage {
        team_id: String,
        message_id: String,
        content: String,
    },
    #[serde(rename = "message.delete")]
    DeleteMessage { team_id: String, message_id: String },
    #[serde(rename = "reaction.toggle")]
    ToggleReaction {
        team_id: String,
        message_id: String,
        emoji: String,
    },
    #[serde(rename = "typing.start")]
    TypingStart { team_id: String },
    #[serde(rename = "typing.stop")]
    TypingStop { team_id: String },
}

/// Frames the server pushes to a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "event", content = "data")]
#[ts(export)]
pub enum ServerEvent {
    #[serde(rename = "joined")]
    Joined { team_id: String },
    #[serde(rename = "left")]
    Left { team_id: String },
    #[serde(rename = "message.new")]
    MessageNew(Message),
    #[serde(rename = "message.edited")]
    MessageEdited(Message),
    #[serde(rename = "message.deleted")]
    MessageDeleted(Message),
    #[serde(rename = "reaction.changed")]
    ReactionChanged(Message),
    #[serde(rename = "typing.start")]
    TypingStart { team_id: String, principal_id: String },
    #[serde(rename = "typing.stop")]
    TypingStop { team_id: String, principal_id: String },
    #[serde(rename = "error")]
    Error { kind: String, message: String },
}

impl ServerEvent {
    pub fn error(err: &AppError) -> Self {
        ServerEvent::Error {
            kind: err.kind().to_string(),
            message: err.public_message(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Joined { .. } => "joined",
            ServerEvent::Left { .. } => "left",
            ServerEvent::MessageNew(_) => "message.new",
            ServerEvent::MessageEdited(_) => "message.edited",
            ServerEvent::MessageDeleted(_) => "message.deleted",
            ServerEvent::ReactionChanged(_) => "reaction.changed",
            ServerEvent::TypingStart { .. } => "typing.start",
            ServerEvent::TypingStop { .. } => "typing.stop",
            ServerEvent::Error { .. } => "error",
        }
    }
}
