//! Lifecycle tables for work items and applications.
//!
//! Every status change in the workflow goes through one of the lookups here;
//! a pair missing from a table is an invalid transition.

use crate::db::models::{ApplicationStatus, WorkItemStatus};
use crate::error::AppError;

use ApplicationStatus as A;
use WorkItemStatus as W;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItemTransition {
    Close,
    Assign,
    Cancel,
    Submit,
    /// Review outcome that records feedback without moving the item.
    ReviewNote,
    RequestModify,
    Complete,
}

impl WorkItemTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemTransition::Close => "close",
            WorkItemTransition::Assign => "assign",
            WorkItemTransition::Cancel => "cancel",
            WorkItemTransition::Submit => "submit",
            WorkItemTransition::ReviewNote => "review",
            WorkItemTransition::RequestModify => "request-modify",
            WorkItemTransition::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationTransition {
    Shortlist,
    Reject,
    Accept,
}

impl ApplicationTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationTransition::Shortlist => "shortlist",
            ApplicationTransition::Reject => "reject",
            ApplicationTransition::Accept => "accept",
        }
    }
}

const WORK_ITEM_TABLE: &[(WorkItemStatus, WorkItemTransition, WorkItemStatus)] = &[
    (W::Open, WorkItemTransition::Close, W::Closed),
    (W::Open, WorkItemTransition::Assign, W::Assigned),
    (W::Open, WorkItemTransition::Cancel, W::Cancelled),
    (W::Open, WorkItemTransition::Submit, W::InProgress),
    (W::Closed, WorkItemTransition::Submit, W::InProgress),
    (W::Assigned, WorkItemTransition::Submit, W::InProgress),
    (W::InProgress, WorkItemTransition::Submit, W::InProgress),
    (W::Modify, WorkItemTransition::Submit, W::InProgress),
    (W::InProgress, WorkItemTransition::ReviewNote, W::InProgress),
    (W::Modify, WorkItemTransition::ReviewNote, W::Modify),
    (W::InProgress, WorkItemTransition::RequestModify, W::Modify),
    (W::InProgress, WorkItemTransition::Complete, W::Completed),
];

const APPLICATION_TABLE: &[(ApplicationStatus, ApplicationTransition, ApplicationStatus)] = &[
    (A::Applied, ApplicationTransition::Shortlist, A::Shortlisted),
    (A::Applied, ApplicationTransition::Reject, A::Rejected),
    (A::Applied, ApplicationTransition::Accept, A::Accepted),
    (A::Shortlisted, ApplicationTransition::Accept, A::Accepted),
    (A::Accepted, ApplicationTransition::Accept, A::Accepted),
];

pub fn next_work_item_status(
    from: WorkItemStatus,
    transition: WorkItemTransition,
) -> Result<WorkItemStatus, AppError> {
    WORK_ITEM_TABLE
        .iter()
        .find(|(s, t, _)| *s == from && *t == transition)
        .map(|(_, _, to)| *to)
        .ok_or_else(|| {
            AppError::InvalidTransition(format!(
                "cannot {} a work item that is {}",
                transition.as_str(),
                from
            ))
        })
}

pub fn next_application_status(
    from: ApplicationStatus,
    transition: ApplicationTransition,
) -> Result<ApplicationStatus, AppError> {
    APPLICATION_TABLE
        .iter()
        .find(|(s, t, _)| *s == from && *t == transition)
        .map(|(_, _, to)| *to)
        .ok_or_else(|| {
            AppError::InvalidTransition(format!(
                "cannot {} an application that is {:?}",
                transition.as_str(),
                from
            ))
        })
}
