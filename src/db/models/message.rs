use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::AppError;
use crate::validation;

// ============================================================================
// Attachments
// ============================================================================

/// Reference to a stored blob. All four fields travel together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Attachment {
    pub filename: String,
    pub locator: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

impl Attachment {
    pub fn validate(&self) -> Result<(), AppError> {
        validation::require_non_empty("attachment.filename", &self.filename)?;
        validation::require_max_len("attachment.filename", &self.filename, 255)?;
        validation::require_non_empty("attachment.locator", &self.locator)?;
        validation::require_mime_type("attachment.mime_type", &self.mime_type)?;
        if self.size_bytes == 0 {
            return Err(AppError::Validation("attachment.size_bytes must be positive".into()));
        }
        Ok(())
    }

    pub fn kind(&self) -> MessageKind {
        let top = self
            .mime_type
            .split('/')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match top.as_str() {
            "image" => MessageKind::Image,
            "video" => MessageKind::Video,
            _ => MessageKind::File,
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum MessageKind {
    Text,
    Image,
    Video,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Reaction {
    pub principal_id: String,
    pub emoji: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Message {
    pub id: String,
    pub team_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub attachments: Vec<Attachment>,
    pub reactions: Vec<Reaction>,
    pub reply_to: Option<String>,
    pub edited: bool,
    pub edited_at: Option<String>,
    pub deleted: bool,
    pub deleted_at: Option<String>,
    pub created_at: String,
}

impl Message {
    /// Add the reaction if absent, remove it if present. Returns whether the
    /// reaction is present afterwards.
    pub fn toggle_reaction(&mut self, principal_id: &str, emoji: &str) -> bool {
        let before = self.reactions.len();
        self.reactions
            .retain(|r| !(r.principal_id == principal_id && r.emoji == emoji));
        if self.reactions.len() != before {
            return false;
        }
        self.reactions.push(Reaction {
            principal_id: principal_id.to_string(),
            emoji: emoji.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        });
        true
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SendMessageInput {
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub has_next: bool,
}
