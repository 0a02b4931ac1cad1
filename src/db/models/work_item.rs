use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::message::Attachment;
use crate::error::AppError;

// ============================================================================
// Statuses
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "kebab-case")]
#[ts(export)]
pub enum WorkItemStatus {
    Open,
    Closed,
    Assigned,
    InProgress,
    Modify,
    Completed,
    Cancelled,
}

impl WorkItemStatus {
    pub const ALL: [WorkItemStatus; 7] = [
        WorkItemStatus::Open,
        WorkItemStatus::Closed,
        WorkItemStatus::Assigned,
        WorkItemStatus::InProgress,
        WorkItemStatus::Modify,
        WorkItemStatus::Completed,
        WorkItemStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemStatus::Open => "open",
            WorkItemStatus::Closed => "closed",
            WorkItemStatus::Assigned => "assigned",
            WorkItemStatus::InProgress => "in-progress",
            WorkItemStatus::Modify => "modify",
            WorkItemStatus::Completed => "completed",
            WorkItemStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkItemStatus::Completed | WorkItemStatus::Cancelled)
    }
}

impl std::fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for WorkItemStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for WorkItemStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        WorkItemStatus::parse(raw)
            .ok_or_else(|| FromSqlError::Other(format!("unknown work item status '{raw}'").into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ApplicationStatus {
    Applied,
    Shortlisted,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "kebab-case")]
#[ts(export)]
pub enum SubmissionStatus {
    Submitted,
    UnderReview,
    ChangesRequested,
    Approved,
    Modify,
}

// ============================================================================
// Applications
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ApplicationFeedback {
    pub rating: Option<u8>,
    pub comment: Option<String>,
    pub reviewer_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Application {
    pub id: String,
    pub applicant_id: String,
    pub status: ApplicationStatus,
    pub cover_letter: String,
    pub resume: Option<Attachment>,
    pub feedback: Option<ApplicationFeedback>,
    pub applied_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ApplyInput {
    pub cover_letter: String,
    pub resume: Option<Attachment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RejectInput {
    pub rating: Option<u8>,
    pub comment: Option<String>,
}

// ============================================================================
// Submissions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Submission {
    pub id: String,
    pub submitted_by: String,
    pub repo_link: Option<String>,
    pub demo_link: Option<String>,
    pub archive: Option<Attachment>,
    pub notes: Option<String>,
    pub status: SubmissionStatus,
    pub feedback: Option<String>,
    pub feedback_at: Option<String>,
    pub revision: u32,
    pub submitted_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SubmitInput {
    pub repo_link: Option<String>,
    pub demo_link: Option<String>,
    pub archive: Option<Attachment>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReviewInput {
    pub status: SubmissionStatus,
    pub feedback: Option<String>,
}

// ============================================================================
// Ratings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MemberRating {
    pub principal_id: String,
    pub rating: u8,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Rating {
    pub rater_id: String,
    pub rating: u8,
    pub comment: Option<String>,
    pub member_ratings: Vec<MemberRating>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RateInput {
    pub rating: u8,
    pub comment: Option<String>,
    #[serde(default)]
    pub member_ratings: Vec<MemberRating>,
}

// ============================================================================
// Work Item
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct WorkItem {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub description: String,
    pub deadline: Option<String>,
    pub status: WorkItemStatus,
    pub team_id: Option<String>,
    /// Principals whose applications were accepted, in acceptance order.
    pub selected: Vec<String>,
    pub applications: Vec<Application>,
    pub submissions: Vec<Submission>,
    pub ratings: Vec<Rating>,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Embedded children, persisted as one JSON column next to the scalar fields.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WorkItemChildren {
    #[serde(default)]
    pub selected: Vec<String>,
    #[serde(default)]
    pub applications: Vec<Application>,
    #[serde(default)]
    pub submissions: Vec<Submission>,
    #[serde(default)]
    pub ratings: Vec<Rating>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CreateWorkItemInput {
    pub title: String,
    pub description: Option<String>,
    pub deadline: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct UpdateWorkItemInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub deadline: Option<Option<String>>,
}

impl WorkItem {
    pub fn children(&self) -> WorkItemChildren {
        WorkItemChildren {
            selected: self.selected.clone(),
            applications: self.applications.clone(),
            submissions: self.submissions.clone(),
            ratings: self.ratings.clone(),
        }
    }

    /// The applicant's non-rejected application, if any. At most one exists.
    pub fn active_application_of(&self, applicant_id: &str) -> Option<&Application> {
        self.applications
            .iter()
            .find(|a| a.applicant_id == applicant_id && a.status != ApplicationStatus::Rejected)
    }

    pub fn has_applied(&self, principal_id: &str) -> bool {
        self.applications.iter().any(|a| a.applicant_id == principal_id)
    }

    pub fn application_mut(&mut self, application_id: &str) -> Result<&mut Application, AppError> {
        let work_item_id = &self.id;
        self.applications
            .iter_mut()
            .find(|a| a.id == application_id)
            .ok_or_else(|| {
                AppError::NotFound(format!("Application {application_id} on work item {work_item_id}"))
            })
    }

    /// Append to the roster unless already present. Returns whether it was added.
    pub fn select(&mut self, principal_id: &str) -> bool {
        if self.selected.iter().any(|p| p == principal_id) {
            return false;
        }
        self.selected.push(principal_id.to_string());
        true
    }

    pub fn submission_of_mut(&mut self, submitter_id: &str) -> Option<&mut Submission> {
        self.submissions.iter_mut().find(|s| s.submitted_by == submitter_id)
    }

    pub fn submission_mut(&mut self, submission_id: &str) -> Result<&mut Submission, AppError> {
        let work_item_id = &self.id;
        self.submissions
            .iter_mut()
            .find(|s| s.id == submission_id)
            .ok_or_else(|| {
                AppError::NotFound(format!("Submission {submission_id} on work item {work_item_id}"))
            })
    }

    /// Index of the most recently updated submission. Ties go to the later entry.
    pub fn latest_submission_index(&self) -> Option<usize> {
        self.submissions
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| a.updated_at.cmp(&b.updated_at).then(ia.cmp(ib)))
            .map(|(i, _)| i)
    }

    pub fn rating_of_mut(&mut self, rater_id: &str) -> Option<&mut Rating> {
        self.ratings.iter_mut().find(|r| r.rater_id == rater_id)
    }
}
