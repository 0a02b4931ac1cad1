use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::message::{Message, MessagePage};
use crate::error::AppError;

// ============================================================================
// Members
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum MemberRole {
    Leader,
    Member,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum MemberStatus {
    Active,
    Inactive,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TeamMember {
    pub principal_id: String,
    pub role: MemberRole,
    pub status: MemberStatus,
    pub joined_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "kebab-case")]
#[ts(export)]
pub enum MembershipChange {
    Added,
    Reactivated,
    AlreadyActive,
}

// ============================================================================
// Teams
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Team {
    pub id: String,
    pub work_item_id: String,
    pub leader_id: String,
    pub members: Vec<TeamMember>,
    pub messages: Vec<Message>,
    pub version: i64,
    pub last_activity: String,
    pub created_at: String,
}

/// Team as returned to clients. The message log is paged separately.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TeamView {
    pub id: String,
    pub work_item_id: String,
    pub leader_id: String,
    pub members: Vec<TeamMember>,
    pub message_count: usize,
    pub last_activity: String,
    pub created_at: String,
}

impl Team {
    /// New team with the leader as its first active member.
    pub fn new(work_item_id: &str, leader_id: &str) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            work_item_id: work_item_id.to_string(),
            leader_id: leader_id.to_string(),
            members: vec![TeamMember {
                principal_id: leader_id.to_string(),
                role: MemberRole::Leader,
                status: MemberStatus::Active,
                joined_at: now.clone(),
            }],
            messages: Vec::new(),
            version: 0,
            last_activity: now.clone(),
            created_at: now,
        }
    }

    pub fn view(&self) -> TeamView {
        TeamView {
            id: self.id.clone(),
            work_item_id: self.work_item_id.clone(),
            leader_id: self.leader_id.clone(),
            members: self.members.clone(),
            message_count: self.visible_messages().count(),
            last_activity: self.last_activity.clone(),
            created_at: self.created_at.clone(),
        }
    }

    pub fn member(&self, principal_id: &str) -> Option<&TeamMember> {
        self.members.iter().find(|m| m.principal_id == principal_id)
    }

    pub fn is_active_member(&self, principal_id: &str) -> bool {
        self.member(principal_id)
            .is_some_and(|m| m.status == MemberStatus::Active)
    }

    pub fn require_active_member(&self, principal_id: &str) -> Result<&TeamMember, AppError> {
        self.member(principal_id)
            .filter(|m| m.status == MemberStatus::Active)
            .ok_or_else(|| {
                AppError::Unauthorized(format!(
                    "{principal_id} is not an active member of team {}",
                    self.id
                ))
            })
    }

    /// Find-or-create: adds the principal, reactivates a lapsed entry, or
    /// leaves an active one alone. Never produces a second entry.
    pub fn ensure_member(&mut self, principal_id: &str, role: MemberRole) -> MembershipChange {
        if let Some(existing) = self.members.iter_mut().find(|m| m.principal_id == principal_id) {
            if existing.status == MemberStatus::Active {
                return MembershipChange::AlreadyActive;
            }
            existing.status = MemberStatus::Active;
            return MembershipChange::Reactivated;
        }
        self.members.push(TeamMember {
            principal_id: principal_id.to_string(),
            role,
            status: MemberStatus::Active,
            joined_at: chrono::Utc::now().to_rfc3339(),
        });
        MembershipChange::Added
    }

    pub fn remove_member(&mut self, principal_id: &str) -> Result<(), AppError> {
        if principal_id == self.leader_id {
            return Err(AppError::Validation("the team leader cannot be removed".into()));
        }
        let team_id = &self.id;
        let member = self
            .members
            .iter_mut()
            .find(|m| m.principal_id == principal_id)
            .ok_or_else(|| AppError::NotFound(format!("Member {principal_id} of team {team_id}")))?;
        member.status = MemberStatus::Removed;
        Ok(())
    }

    pub fn touch(&mut self) {
        self.last_activity = chrono::Utc::now().to_rfc3339();
    }

    pub fn visible_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| !m.deleted)
    }

    /// Live message by id. Soft-deleted messages are not addressable.
    pub fn message_mut(&mut self, message_id: &str) -> Result<&mut Message, AppError> {
        let team_id = &self.id;
        self.messages
            .iter_mut()
            .find(|m| m.id == message_id && !m.deleted)
            .ok_or_else(|| AppError::NotFound(format!("Message {message_id} in team {team_id}")))
    }

    pub fn has_live_message(&self, message_id: &str) -> bool {
        self.visible_messages().any(|m| m.id == message_id)
    }

    /// One page of non-deleted messages in append order. `page` is 1-based.
    pub fn messages_page(&self, page: usize, limit: usize) -> MessagePage {
        let page = page.max(1);
        let limit = limit.max(1);
        let offset = (page - 1).saturating_mul(limit);
        let total = self.visible_messages().count();
        let messages = self
            .visible_messages()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        MessagePage {
            messages,
            page,
            limit,
            total,
            has_next: offset.saturating_add(limit) < total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::MessageKind;

    fn push_message(team: &mut Team, id: &str, deleted: bool) {
        team.messages.push(Message {
            id: id.into(),
            team_id: team.id.clone(),
            sender_id: "owner".into(),
            content: id.into(),
            kind: MessageKind::Text,
            attachments: vec![],
            reactions: vec![],
            reply_to: None,
            edited: false,
            edited_at: None,
            deleted,
            deleted_at: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        });
    }

    #[test]
    fn test_new_team_has_leader() {
        let team = Team::new("w-1", "owner");
        assert_eq!(team.members.len(), 1);
        assert_eq!(team.members[0].role, MemberRole::Leader);
        assert!(team.is_active_member("owner"));
    }

    #[test]
    fn test_ensure_member_is_find_or_create() {
        let mut team = Team::new("w-1", "owner");
        assert_eq!(team.ensure_member("u-1", MemberRole::Member), MembershipChange::Added);
        assert_eq!(
            team.ensure_member("u-1", MemberRole::Member),
            MembershipChange::AlreadyActive
        );
        team.remove_member("u-1").unwrap();
        assert!(!team.is_active_member("u-1"));
        assert_eq!(
            team.ensure_member("u-1", MemberRole::Member),
            MembershipChange::Reactivated
        );
        assert_eq!(team.members.iter().filter(|m| m.principal_id == "u-1").count(), 1);
    }

    #[test]
    fn test_leader_cannot_be_removed() {
        let mut team = Team::new("w-1", "owner");
        assert!(matches!(team.remove_member("owner"), Err(AppError::Validation(_))));
        assert!(matches!(team.remove_member("ghost"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_page_skips_deleted() {
        let mut team = Team::new("w-1", "owner");
        for i in 0..5 {
            push_message(&mut team, &format!("m{i}"), i == 1);
        }
        let first = team.messages_page(1, 2);
        assert_eq!(first.total, 4);
        assert!(first.has_next);
        let ids: Vec<_> = first.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m0", "m2"]);

        let last = team.messages_page(2, 2);
        assert!(!last.has_next);
        assert_eq!(last.messages.len(), 2);

        let beyond = team.messages_page(5, 2);
        assert!(beyond.messages.is_empty());
        assert!(!beyond.has_next);
    }

    #[test]
    fn test_deleted_message_not_addressable() {
        let mut team = Team::new("w-1", "owner");
        push_message(&mut team, "m0", true);
        assert!(team.message_mut("m0").is_err());
        assert!(!team.has_live_message("m0"));
    }
}
