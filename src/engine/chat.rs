use crate::config::MessageConfig;
use crate::db::models::{Message, MessageKind, MessagePage, SendMessageInput, Team};
use crate::db::repos::teams as team_repo;
use crate::db::{with_tx, DbPool};
use crate::engine::hub::{ConnId, HubHandle};
use crate::engine::identity::Identity;
use crate::engine::protocol::ServerEvent;
use crate::error::AppError;
use crate::validation;

/// Message content bounds and page sizing.
#[derive(Debug, Clone)]
pub struct ChatLimits {
    pub max_content_len: usize,
    pub page_size: usize,
    pub max_page_size: usize,
}

impl From<&MessageConfig> for ChatLimits {
    fn from(config: &MessageConfig) -> Self {
        Self {
            max_content_len: config.max_content_len,
            page_size: config.page_size,
            max_page_size: config.max_page_size,
        }
    }
}

impl Default for ChatLimits {
    fn default() -> Self {
        Self::from(&MessageConfig::default())
    }
}

fn clean_content(raw: &str, limits: &ChatLimits) -> Result<String, AppError> {
    let trimmed = raw.trim();
    validation::require_max_len("content", trimmed, limits.max_content_len)?;
    Ok(validation::sanitize_text(trimmed))
}

/// Load the team, apply `mutate` and save, all in one transaction.
fn mutate_team<T>(
    pool: &DbPool,
    team_id: &str,
    mutate: impl FnOnce(&mut Team) -> Result<T, AppError>,
) -> Result<T, AppError> {
    with_tx(pool, |tx| {
        let mut team = team_repo::load(tx, team_id)?;
        let out = mutate(&mut team)?;
        team.touch();
        team_repo::save(tx, &mut team)?;
        Ok(out)
    })
}

// ============================================================================
// Rooms
// ============================================================================

/// Join a room. Membership is re-read from storage on every join.
pub async fn join_room(
    pool: &DbPool,
    hub: &HubHandle,
    conn_id: ConnId,
    caller: &Identity,
    team_id: &str,
) -> Result<(), AppError> {
    let team = team_repo::get_by_id(pool, team_id)?;
    team.require_active_member(&caller.principal_id)?;
    if !hub.join(conn_id, team_id).await {
        return Err(AppError::Transient("connection is closing".into()));
    }
    tracing::debug!(conn_id, team_id, principal_id = %caller.principal_id, "Joined room");
    Ok(())
}

pub fn typing(hub: &HubHandle, conn_id: ConnId, caller: &Identity, team_id: &str, started: bool) {
    let event = if started {
        ServerEvent::TypingStart {
            team_id: team_id.to_string(),
            principal_id: caller.principal_id.clone(),
        }
    } else {
        ServerEvent::TypingStop {
            team_id: team_id.to_string(),
            principal_id: caller.principal_id.clone(),
        }
    };
    hub.broadcast_except(team_id, event, conn_id);
}

// ============================================================================
// Messages
// ============================================================================

pub fn send_message(
    pool: &DbPool,
    hub: &HubHandle,
    limits: &ChatLimits,
    caller: &Identity,
    team_id: &str,
    input: SendMessageInput,
) -> Result<Message, AppError> {
    let content = match input.content.as_deref() {
        Some(raw) => clean_content(raw, limits)?,
        None => String::new(),
    };
    if let Some(attachment) = &input.attachment {
        attachment.validate()?;
    }
    if content.is_empty() && input.attachment.is_none() {
        return Err(AppError::Validation("a message needs content or an attachment".into()));
    }
    let kind = input
        .attachment
        .as_ref()
        .map(|a| a.kind())
        .unwrap_or(MessageKind::Text);

    let message = mutate_team(pool, team_id, |team| {
        team.require_active_member(&caller.principal_id)?;
        if let Some(reply_to) = &input.reply_to {
            if !team.has_live_message(reply_to) {
                return Err(AppError::NotFound(format!("Message {reply_to} in team {team_id}")));
            }
        }
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            team_id: team.id.clone(),
            sender_id: caller.principal_id.clone(),
            content,
            kind,
            attachments: input.attachment.into_iter().collect(),
            reactions: Vec::new(),
            reply_to: input.reply_to,
            edited: false,
            edited_at: None,
            deleted: false,
            deleted_at: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        team.messages.push(message.clone());
        Ok(message)
    })?;

    tracing::debug!(team_id, message_id = %message.id, sender = %caller.principal_id, "Message sent");
    hub.broadcast(team_id, ServerEvent::MessageNew(message.clone()));
    Ok(message)
}

pub fn edit_message(
    pool: &DbPool,
    hub: &HubHandle,
    limits: &ChatLimits,
    caller: &Identity,
    team_id: &str,
    message_id: &str,
    content: &str,
) -> Result<Message, AppError> {
    let content = clean_content(content, limits)?;

    let message = mutate_team(pool, team_id, |team| {
        team.require_active_member(&caller.principal_id)?;
        let message = team.message_mut(message_id)?;
        if message.sender_id != caller.principal_id {
            return Err(AppError::Unauthorized("only the sender can edit a message".into()));
        }
        if content.is_empty() && message.attachments.is_empty() {
            return Err(AppError::Validation("a message needs content or an attachment".into()));
        }
        message.content = content;
        message.edited = true;
        message.edited_at = Some(chrono::Utc::now().to_rfc3339());
        Ok(message.clone())
    })?;

    hub.broadcast(team_id, ServerEvent::MessageEdited(message.clone()));
    Ok(message)
}

/// Soft delete. Allowed for the sender and the team leader.
pub fn delete_message(
    pool: &DbPool,
    hub: &HubHandle,
    caller: &Identity,
    team_id: &str,
    message_id: &str,
) -> Result<Message, AppError> {
    let message = mutate_team(pool, team_id, |team| {
        team.require_active_member(&caller.principal_id)?;
        let is_leader = team.leader_id == caller.principal_id;
        let message = team.message_mut(message_id)?;
        if message.sender_id != caller.principal_id && !is_leader {
            return Err(AppError::Unauthorized(
                "only the sender or the team leader can delete a message".into(),
            ));
        }
        message.deleted = true;
        message.deleted_at = Some(chrono::Utc::now().to_rfc3339());
        Ok(message.clone())
    })?;

    tracing::debug!(team_id, message_id, by = %caller.principal_id, "Message deleted");
    hub.broadcast(team_id, ServerEvent::MessageDeleted(message.clone()));
    Ok(message)
}

pub fn toggle_reaction(
    pool: &DbPool,
    hub: &HubHandle,
    caller: &Identity,
    team_id: &str,
    message_id: &str,
    emoji: &str,
) -> Result<Message, AppError> {
    validation::require_emoji(emoji)?;
    let emoji = emoji.trim();

    let message = mutate_team(pool, team_id, |team| {
        team.require_active_member(&caller.principal_id)?;
        let message = team.message_mut(message_id)?;
        message.toggle_reaction(&caller.principal_id, emoji);
        Ok(message.clone())
    })?;

    hub.broadcast(team_id, ServerEvent::ReactionChanged(message.clone()));
    Ok(message)
}

/// Oldest-first page of live messages. Admins may read without membership.
pub fn list_messages(
    pool: &DbPool,
    limits: &ChatLimits,
    caller: &Identity,
    team_id: &str,
    page: Option<usize>,
    limit: Option<usize>,
) -> Result<MessagePage, AppError> {
    let page = page.unwrap_or(1);
    let limit = limit.unwrap_or(limits.page_size);
    if page == 0 {
        return Err(AppError::Validation("page starts at 1".into()));
    }
    if limit == 0 || limit > limits.max_page_size {
        return Err(AppError::Validation(format!(
            "limit must be between 1 and {}",
            limits.max_page_size
        )));
    }

    let team = team_repo::get_by_id(pool, team_id)?;
    if !caller.is_admin() {
        team.require_active_member(&caller.principal_id)?;
    }
    Ok(team.messages_page(page, limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;
    use crate::db::models::{Attachment, CreateWorkItemInput, MemberRole};
    use crate::db::repos::work_items;
    use crate::engine::identity::Role;
    use tokio::sync::mpsc;

    struct Fixture {
        pool: DbPool,
        hub: HubHandle,
        team_id: String,
        owner: Identity,
        member: Identity,
        outsider: Identity,
    }

    fn fixture() -> Fixture {
        let pool = init_test_db().unwrap();
        let item = work_items::create(
            &pool,
            "owner",
            CreateWorkItemInput {
                title: "Chat".into(),
                description: None,
                deadline: None,
            },
        )
        .unwrap();
        let mut team = Team::new(&item.id, "owner");
        team.ensure_member("member", MemberRole::Member);
        let conn = pool.get().unwrap();
        team_repo::insert(&conn, &team).unwrap();
        drop(conn);

        let (hub, _task) = HubHandle::spawn();
        Fixture {
            pool,
            hub,
            team_id: team.id,
            owner: Identity::new("owner", Role::Requester),
            member: Identity::new("member", Role::Responder),
            outsider: Identity::new("outsider", Role::Responder),
        }
    }

    fn text(content: &str) -> SendMessageInput {
        SendMessageInput {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_send_persists_and_broadcasts() {
        let f = fixture();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn_id = f.hub.next_conn_id();
        f.hub.register(conn_id, "owner", tx);
        join_room(&f.pool, &f.hub, conn_id, &f.owner, &f.team_id).await.unwrap();
        assert!(matches!(rx.recv().await, Some(ServerEvent::Joined { .. })));

        let sent = send_message(&f.pool, &f.hub, &ChatLimits::default(), &f.member, &f.team_id, text("hi"))
            .unwrap();
        assert_eq!(sent.kind, MessageKind::Text);
        assert_eq!(rx.recv().await, Some(ServerEvent::MessageNew(sent.clone())));

        let page = list_messages(&f.pool, &ChatLimits::default(), &f.owner, &f.team_id, None, None).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.messages[0].id, sent.id);
    }

    #[tokio::test]
    async fn test_outsider_cannot_join_or_send() {
        let f = fixture();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn_id = f.hub.next_conn_id();
        f.hub.register(conn_id, "outsider", tx);

        let err = join_room(&f.pool, &f.hub, conn_id, &f.outsider, &f.team_id).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
        assert_eq!(f.hub.stats().await.rooms, 0);

        let err = send_message(&f.pool, &f.hub, &ChatLimits::default(), &f.outsider, &f.team_id, text("hi"))
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let f = fixture();
        let err = send_message(
            &f.pool,
            &f.hub,
            &ChatLimits::default(),
            &f.member,
            &f.team_id,
            SendMessageInput::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // Markup that sanitizes to nothing counts as empty
        let err = send_message(&f.pool, &f.hub, &ChatLimits::default(), &f.member, &f.team_id, text("<b></b>"))
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_attachment_sets_type() {
        let f = fixture();
        let input = SendMessageInput {
            content: None,
            attachment: Some(Attachment {
                filename: "clip.mp4".into(),
                locator: "abc".into(),
                mime_type: "video/mp4".into(),
                size_bytes: 1024,
            }),
            reply_to: None,
        };
        let sent = send_message(&f.pool, &f.hub, &ChatLimits::default(), &f.member, &f.team_id, input).unwrap();
        assert_eq!(sent.kind, MessageKind::Video);
        assert_eq!(sent.attachments.len(), 1);
    }

    #[tokio::test]
    async fn test_content_length_bound() {
        let f = fixture();
        let limits = ChatLimits {
            max_content_len: 5,
            ..ChatLimits::default()
        };
        let err = send_message(&f.pool, &f.hub, &limits, &f.member, &f.team_id, text("too long")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_comparison_operators_stored_verbatim() {
        let f = fixture();
        let limits = ChatLimits::default();
        let sent = send_message(&f.pool, &f.hub, &limits, &f.member, &f.team_id, text("if a < b && c > d")).unwrap();
        assert_eq!(sent.content, "if a < b && c > d");

        let page = list_messages(&f.pool, &limits, &f.member, &f.team_id, None, None).unwrap();
        assert_eq!(page.messages[0].content, "if a < b && c > d");

        let edited = edit_message(&f.pool, &f.hub, &limits, &f.member, &f.team_id, &sent.id, "x > 1 & <b>y</b>").unwrap();
        assert_eq!(edited.content, "x > 1 & y");
    }

    #[tokio::test]
    async fn test_length_counts_raw_characters() {
        let f = fixture();
        let limits = ChatLimits::default();
        let ampersands = "&".repeat(1000);
        let sent = send_message(&f.pool, &f.hub, &limits, &f.member, &f.team_id, text(&ampersands)).unwrap();
        assert_eq!(sent.content, ampersands);

        let at_limit = "<".repeat(limits.max_content_len);
        assert!(send_message(&f.pool, &f.hub, &limits, &f.member, &f.team_id, text(&at_limit)).is_ok());
    }

    #[tokio::test]
    async fn test_edit_by_sender_only() {
        let f = fixture();
        let limits = ChatLimits::default();
        let sent = send_message(&f.pool, &f.hub, &limits, &f.member, &f.team_id, text("draft")).unwrap();

        let err = edit_message(&f.pool, &f.hub, &limits, &f.owner, &f.team_id, &sent.id, "x").unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        let edited = edit_message(&f.pool, &f.hub, &limits, &f.member, &f.team_id, &sent.id, "final").unwrap();
        assert!(edited.edited);
        assert!(edited.edited_at.is_some());
        assert_eq!(edited.content, "final");
    }

    #[tokio::test]
    async fn test_leader_can_delete_and_deleted_is_hidden() {
        let f = fixture();
        let limits = ChatLimits::default();
        let sent = send_message(&f.pool, &f.hub, &limits, &f.member, &f.team_id, text("oops")).unwrap();

        let deleted = delete_message(&f.pool, &f.hub, &f.owner, &f.team_id, &sent.id).unwrap();
        assert!(deleted.deleted);
        assert!(deleted.deleted_at.is_some());

        let page = list_messages(&f.pool, &limits, &f.member, &f.team_id, None, None).unwrap();
        assert_eq!(page.total, 0);

        let err = delete_message(&f.pool, &f.hub, &f.member, &f.team_id, &sent.id).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reply_must_exist() {
        let f = fixture();
        let limits = ChatLimits::default();
        let input = SendMessageInput {
            content: Some("re".into()),
            attachment: None,
            reply_to: Some("missing".into()),
        };
        let err = send_message(&f.pool, &f.hub, &limits, &f.member, &f.team_id, input).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reaction_toggle_round_trip() {
        let f = fixture();
        let limits = ChatLimits::default();
        let sent = send_message(&f.pool, &f.hub, &limits, &f.member, &f.team_id, text("ship it")).unwrap();

        let once = toggle_reaction(&f.pool, &f.hub, &f.owner, &f.team_id, &sent.id, "🚀").unwrap();
        assert_eq!(once.reactions.len(), 1);
        let twice = toggle_reaction(&f.pool, &f.hub, &f.owner, &f.team_id, &sent.id, "🚀").unwrap();
        assert!(twice.reactions.is_empty());
    }

    #[tokio::test]
    async fn test_page_bounds() {
        let f = fixture();
        let limits = ChatLimits::default();
        assert!(list_messages(&f.pool, &limits, &f.owner, &f.team_id, Some(0), None).is_err());
        assert!(list_messages(&f.pool, &limits, &f.owner, &f.team_id, None, Some(10_000)).is_err());
        let admin = Identity::new("root", Role::Admin);
        assert!(list_messages(&f.pool, &limits, &admin, &f.team_id, None, None).is_ok());
    }
}
