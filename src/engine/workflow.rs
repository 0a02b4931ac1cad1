//! Work item lifecycle: applications, team formation, submissions, review
//! and ratings.
//!
//! Every mutating operation loads the aggregates it needs, checks the caller
//! and the transition table, mutates in memory and saves, all inside one
//! transaction. Notifications go out only after the commit.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::db::models::{
    Application, ApplicationFeedback, ApplicationStatus, ApplyInput, CreateWorkItemInput,
    MemberRole, MembershipChange, RateInput, Rating, RejectInput, ReviewInput, Submission,
    SubmissionStatus, SubmitInput, Team, TeamView, UpdateWorkItemInput, WorkItem, WorkItemStatus,
};
use crate::db::repos::{teams as team_repo, work_items as work_repo};
use crate::db::{with_tx, DbPool};
use crate::engine::identity::{Identity, Role};
use crate::engine::transitions::{
    next_application_status, next_work_item_status, ApplicationTransition, WorkItemTransition,
};
use crate::error::AppError;
use crate::notifications::{self, Notifier};
use crate::validation;

const MAX_TITLE_LEN: usize = 200;
const MAX_DESCRIPTION_LEN: usize = 20_000;
const MAX_COVER_LETTER_LEN: usize = 5_000;
const MAX_FEEDBACK_LEN: usize = 5_000;
const MAX_NOTES_LEN: usize = 5_000;

// ============================================================================
// Authorization helpers
// ============================================================================

fn require_owner(item: &WorkItem, caller: &Identity) -> Result<(), AppError> {
    if caller.is_admin() || item.owner_id == caller.principal_id {
        return Ok(());
    }
    Err(AppError::Unauthorized(format!(
        "{} does not own work item {}",
        caller.principal_id, item.id
    )))
}

fn require_role(caller: &Identity, allowed: &[Role]) -> Result<(), AppError> {
    if allowed.contains(&caller.role) {
        return Ok(());
    }
    Err(AppError::Unauthorized(format!(
        "role {} cannot perform this operation",
        caller.role
    )))
}

fn require_not_terminal(item: &WorkItem) -> Result<(), AppError> {
    if item.status.is_terminal() {
        return Err(AppError::InvalidTransition(format!(
            "work item {} is {}",
            item.id, item.status
        )));
    }
    Ok(())
}

fn optional_text(field: &str, value: Option<String>, max: usize) -> Result<Option<String>, AppError> {
    match value {
        Some(raw) => {
            let trimmed = raw.trim();
            validation::require_max_len(field, trimmed, max)?;
            let cleaned = validation::sanitize_text(trimmed);
            Ok((!cleaned.is_empty()).then_some(cleaned))
        }
        None => Ok(None),
    }
}

fn validate_deadline(deadline: Option<&str>) -> Result<(), AppError> {
    if let Some(d) = deadline {
        chrono::DateTime::parse_from_rfc3339(d)
            .map_err(|_| AppError::Validation(format!("deadline is not an RFC 3339 timestamp: {d}")))?;
    }
    Ok(())
}

// ============================================================================
// Work items
// ============================================================================

pub fn create_work_item(
    pool: &DbPool,
    caller: &Identity,
    mut input: CreateWorkItemInput,
) -> Result<WorkItem, AppError> {
    require_role(caller, &[Role::Requester, Role::Admin])?;
    validation::require_non_empty("title", &input.title)?;
    validation::require_max_len("title", input.title.trim(), MAX_TITLE_LEN)?;
    input.title = validation::sanitize_text(input.title.trim());
    input.description = optional_text("description", input.description, MAX_DESCRIPTION_LEN)?;
    validate_deadline(input.deadline.as_deref())?;

    let item = work_repo::create(pool, &caller.principal_id, input)?;
    tracing::info!(work_item_id = %item.id, owner = %item.owner_id, "Work item created");
    Ok(item)
}

/// Visible to the owner, admins, applicants and team members. Applicants who
/// are not owners see only their own applications.
pub fn get_work_item(pool: &DbPool, caller: &Identity, id: &str) -> Result<WorkItem, AppError> {
    let mut item = work_repo::get_by_id(pool, id)?;
    if caller.is_admin() || item.owner_id == caller.principal_id {
        return Ok(item);
    }

    let is_member = match &item.team_id {
        Some(team_id) => team_repo::get_by_id(pool, team_id)?.is_active_member(&caller.principal_id),
        None => false,
    };
    if !is_member && !item.has_applied(&caller.principal_id) {
        return Err(AppError::Unauthorized(format!(
            "{} cannot view work item {id}",
            caller.principal_id
        )));
    }

    item.applications.retain(|a| a.applicant_id == caller.principal_id);
    if !is_member {
        item.submissions.clear();
    }
    Ok(item)
}

pub fn update_work_item(
    pool: &DbPool,
    caller: &Identity,
    id: &str,
    input: UpdateWorkItemInput,
) -> Result<WorkItem, AppError> {
    let title = match input.title {
        Some(t) => {
            validation::require_non_empty("title", &t)?;
            validation::require_max_len("title", t.trim(), MAX_TITLE_LEN)?;
            Some(validation::sanitize_text(t.trim()))
        }
        None => None,
    };
    let description = match input.description {
        Some(d) => Some(optional_text("description", Some(d), MAX_DESCRIPTION_LEN)?.unwrap_or_default()),
        None => None,
    };
    if let Some(deadline) = &input.deadline {
        validate_deadline(deadline.as_deref())?;
    }

    with_tx(pool, |tx| {
        let mut item = work_repo::load(tx, id)?;
        require_owner(&item, caller)?;
        if item.status != WorkItemStatus::Open {
            return Err(AppError::InvalidTransition(format!(
                "work item {id} can only be edited while open (status: {})",
                item.status
            )));
        }
        if let Some(t) = title {
            item.title = t;
        }
        if let Some(d) = description {
            item.description = d;
        }
        if let Some(deadline) = input.deadline {
            item.deadline = deadline;
        }
        work_repo::save(tx, &mut item)?;
        Ok(item)
    })
}

/// Owner-driven status changes outside the application/submission flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum StatusAction {
    Close,
    Assign,
    Cancel,
}

impl StatusAction {
    fn transition(self) -> WorkItemTransition {
        match self {
            StatusAction::Close => WorkItemTransition::Close,
            StatusAction::Assign => WorkItemTransition::Assign,
            StatusAction::Cancel => WorkItemTransition::Cancel,
        }
    }
}

pub fn change_status(
    pool: &DbPool,
    caller: &Identity,
    id: &str,
    action: StatusAction,
) -> Result<WorkItem, AppError> {
    let item = with_tx(pool, |tx| {
        let mut item = work_repo::load(tx, id)?;
        require_owner(&item, caller)?;
        item.status = next_work_item_status(item.status, action.transition())?;
        work_repo::save(tx, &mut item)?;
        Ok(item)
    })?;
    tracing::info!(work_item_id = %id, status = %item.status, "Work item status changed");
    Ok(item)
}

// ============================================================================
// Applications
// ============================================================================

pub fn apply(
    pool: &DbPool,
    notifier: &Notifier,
    caller: &Identity,
    work_item_id: &str,
    input: ApplyInput,
) -> Result<Application, AppError> {
    require_role(caller, &[Role::Responder])?;
    validation::require_non_empty("cover_letter", &input.cover_letter)?;
    validation::require_max_len("cover_letter", input.cover_letter.trim(), MAX_COVER_LETTER_LEN)?;
    let cover_letter = validation::sanitize_text(input.cover_letter.trim());
    if let Some(resume) = &input.resume {
        resume.validate()?;
    }

    let (item, application) = with_tx(pool, |tx| {
        let mut item = work_repo::load(tx, work_item_id)?;
        if item.status != WorkItemStatus::Open {
            return Err(AppError::InvalidTransition(format!(
                "work item {work_item_id} is not open (status: {})",
                item.status
            )));
        }
        if item.owner_id == caller.principal_id {
            return Err(AppError::Unauthorized("owners cannot apply to their own work item".into()));
        }
        if let Some(existing) = item.active_application_of(&caller.principal_id) {
            return Err(AppError::DuplicateApplication(format!(
                "{} already applied to work item {work_item_id} ({})",
                caller.principal_id, existing.id
            )));
        }

        let now = chrono::Utc::now().to_rfc3339();
        let application = Application {
            id: uuid::Uuid::new_v4().to_string(),
            applicant_id: caller.principal_id.clone(),
            status: ApplicationStatus::Applied,
            cover_letter,
            resume: input.resume,
            feedback: None,
            applied_at: now.clone(),
            updated_at: now,
        };
        item.applications.push(application.clone());
        work_repo::save(tx, &mut item)?;
        Ok((item, application))
    })?;

    tracing::info!(
        work_item_id,
        application_id = %application.id,
        applicant = %application.applicant_id,
        "Application received",
    );
    notifier.application_received(&item, &application);
    Ok(application)
}

/// Shared body of shortlist/reject: owner check, table lookup, status write.
fn decide_application(
    pool: &DbPool,
    caller: &Identity,
    work_item_id: &str,
    application_id: &str,
    transition: ApplicationTransition,
    feedback: Option<ApplicationFeedback>,
) -> Result<(WorkItem, Application), AppError> {
    with_tx(pool, |tx| {
        let mut item = work_repo::load(tx, work_item_id)?;
        require_owner(&item, caller)?;
        require_not_terminal(&item)?;
        let application = item.application_mut(application_id)?;
        application.status = next_application_status(application.status, transition)?;
        application.updated_at = chrono::Utc::now().to_rfc3339();
        if feedback.is_some() {
            application.feedback = feedback;
        }
        let application = application.clone();
        work_repo::save(tx, &mut item)?;
        Ok((item, application))
    })
}

pub fn shortlist(
    pool: &DbPool,
    notifier: &Notifier,
    caller: &Identity,
    work_item_id: &str,
    application_id: &str,
) -> Result<Application, AppError> {
    let (item, application) = decide_application(
        pool,
        caller,
        work_item_id,
        application_id,
        ApplicationTransition::Shortlist,
        None,
    )?;
    tracing::info!(work_item_id, application_id, "Application shortlisted");
    notifier.application_decided(notifications::APPLICATION_SHORTLISTED, &item, &application);
    Ok(application)
}

pub fn reject(
    pool: &DbPool,
    notifier: &Notifier,
    caller: &Identity,
    work_item_id: &str,
    application_id: &str,
    input: RejectInput,
) -> Result<Application, AppError> {
    if let Some(rating) = input.rating {
        validation::require_rating("rating", rating)?;
    }
    let comment = optional_text("comment", input.comment, MAX_FEEDBACK_LEN)?;
    let feedback = (input.rating.is_some() || comment.is_some()).then(|| ApplicationFeedback {
        rating: input.rating,
        comment,
        reviewer_id: caller.principal_id.clone(),
        created_at: chrono::Utc::now().to_rfc3339(),
    });

    let (item, application) = decide_application(
        pool,
        caller,
        work_item_id,
        application_id,
        ApplicationTransition::Reject,
        feedback,
    )?;
    tracing::info!(work_item_id, application_id, "Application rejected");
    notifier.application_decided(notifications::APPLICATION_REJECTED, &item, &application);
    Ok(application)
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AcceptOutcome {
    pub application: Application,
    pub team: TeamView,
    pub membership: MembershipChange,
}

/// Accept an application and make sure the applicant is on the work item's
/// team. Team and membership are both find-or-create, so repeating the call
/// or racing another Accept never produces a second team or member entry.
pub fn accept(
    pool: &DbPool,
    notifier: &Notifier,
    caller: &Identity,
    work_item_id: &str,
    application_id: &str,
) -> Result<AcceptOutcome, AppError> {
    let (item, application, team, membership, changed) = with_tx(pool, |tx| {
        let mut item = work_repo::load(tx, work_item_id)?;
        require_owner(&item, caller)?;
        require_not_terminal(&item)?;

        let application = item.application_mut(application_id)?;
        let previous = application.status;
        application.status = next_application_status(previous, ApplicationTransition::Accept)?;
        let changed = previous != application.status;
        if changed {
            application.updated_at = chrono::Utc::now().to_rfc3339();
        }
        let application = application.clone();

        let mut team = match team_repo::find_by_work_item(tx, &item.id)? {
            Some(team) => team,
            None => {
                let team = Team::new(&item.id, &item.owner_id);
                team_repo::insert(tx, &team)?;
                tracing::info!(work_item_id = %item.id, team_id = %team.id, "Team created");
                team
            }
        };
        let membership = team.ensure_member(&application.applicant_id, MemberRole::Member);
        if membership != MembershipChange::AlreadyActive {
            team.touch();
            team_repo::save(tx, &mut team)?;
        }

        let added = item.select(&application.applicant_id);
        let linked = item.team_id.as_deref() != Some(team.id.as_str());
        if changed || added || linked {
            item.team_id = Some(team.id.clone());
            work_repo::save(tx, &mut item)?;
        }
        Ok((item, application, team, membership, changed))
    })?;

    tracing::info!(
        work_item_id,
        application_id,
        team_id = %team.id,
        membership = ?membership,
        "Application accepted",
    );
    if changed {
        notifier.application_decided(notifications::APPLICATION_ACCEPTED, &item, &application);
    }
    Ok(AcceptOutcome {
        application,
        team: team.view(),
        membership,
    })
}

// ============================================================================
// Submissions
// ============================================================================

fn validate_submission(input: SubmitInput) -> Result<SubmitInput, AppError> {
    let repo_link = input.repo_link.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let demo_link = input.demo_link.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    if let Some(link) = &repo_link {
        validation::require_http_url("repo_link", link)?;
    }
    if let Some(link) = &demo_link {
        validation::require_http_url("demo_link", link)?;
    }
    if let Some(archive) = &input.archive {
        archive.validate()?;
    }
    if repo_link.is_none() && demo_link.is_none() && input.archive.is_none() {
        return Err(AppError::Validation(
            "a submission needs a repository link, a demo link or an archive".into(),
        ));
    }
    Ok(SubmitInput {
        repo_link,
        demo_link,
        archive: input.archive,
        notes: optional_text("notes", input.notes, MAX_NOTES_LEN)?,
    })
}

/// Create or update the caller's submission and move the work item to
/// in-progress. The team leader reviews work rather than submitting it.
pub fn submit(
    pool: &DbPool,
    notifier: &Notifier,
    caller: &Identity,
    work_item_id: &str,
    input: SubmitInput,
) -> Result<Submission, AppError> {
    let input = validate_submission(input)?;

    let (item, submission) = with_tx(pool, |tx| {
        let mut item = work_repo::load(tx, work_item_id)?;
        require_not_terminal(&item)?;

        let team = match &item.team_id {
            Some(team_id) => team_repo::load(tx, team_id)?,
            None => {
                return Err(AppError::Unauthorized(format!(
                    "work item {work_item_id} has no team yet"
                )))
            }
        };
        let member = team.require_active_member(&caller.principal_id)?;
        if member.role == MemberRole::Leader {
            return Err(AppError::Unauthorized("the team leader cannot submit work".into()));
        }

        item.status = next_work_item_status(item.status, WorkItemTransition::Submit)?;
        let now = chrono::Utc::now().to_rfc3339();
        let submission = match item.submission_of_mut(&caller.principal_id) {
            Some(existing) => {
                existing.repo_link = input.repo_link;
                existing.demo_link = input.demo_link;
                existing.archive = input.archive;
                existing.notes = input.notes;
                existing.status = SubmissionStatus::Submitted;
                existing.feedback = None;
                existing.feedback_at = None;
                existing.revision += 1;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let submission = Submission {
                    id: uuid::Uuid::new_v4().to_string(),
                    submitted_by: caller.principal_id.clone(),
                    repo_link: input.repo_link,
                    demo_link: input.demo_link,
                    archive: input.archive,
                    notes: input.notes,
                    status: SubmissionStatus::Submitted,
                    feedback: None,
                    feedback_at: None,
                    revision: 1,
                    submitted_at: now.clone(),
                    updated_at: now,
                };
                item.submissions.push(submission.clone());
                submission
            }
        };
        work_repo::save(tx, &mut item)?;
        Ok((item, submission))
    })?;

    tracing::info!(
        work_item_id,
        submission_id = %submission.id,
        revision = submission.revision,
        "Submission received",
    );
    notifier.submission_received(&item, &submission);
    Ok(submission)
}

pub fn review_submission(
    pool: &DbPool,
    notifier: &Notifier,
    caller: &Identity,
    work_item_id: &str,
    submission_id: &str,
    input: ReviewInput,
) -> Result<Submission, AppError> {
    let transition = match input.status {
        SubmissionStatus::Approved => WorkItemTransition::Complete,
        SubmissionStatus::Modify => WorkItemTransition::RequestModify,
        SubmissionStatus::UnderReview | SubmissionStatus::ChangesRequested => WorkItemTransition::ReviewNote,
        SubmissionStatus::Submitted => {
            return Err(AppError::Validation("submitted is not a review outcome".into()));
        }
    };
    let feedback = optional_text("feedback", input.feedback, MAX_FEEDBACK_LEN)?;

    let (item, submission) = with_tx(pool, |tx| {
        let mut item = work_repo::load(tx, work_item_id)?;
        require_owner(&item, caller)?;
        let next = next_work_item_status(item.status, transition)?;
        let submission = item.submission_mut(submission_id)?;
        submission.status = input.status;
        submission.feedback = feedback;
        submission.feedback_at = Some(chrono::Utc::now().to_rfc3339());
        let submission = submission.clone();
        item.status = next;
        work_repo::save(tx, &mut item)?;
        Ok((item, submission))
    })?;

    tracing::info!(
        work_item_id,
        submission_id,
        outcome = ?submission.status,
        status = %item.status,
        "Submission reviewed",
    );
    notifier.submission_reviewed(&item, &submission);
    if item.status == WorkItemStatus::Completed {
        notifier.work_item_completed(&item);
    }
    Ok(submission)
}

/// Approve the most recently updated submission and complete the work item.
pub fn approve(
    pool: &DbPool,
    notifier: &Notifier,
    caller: &Identity,
    work_item_id: &str,
) -> Result<Submission, AppError> {
    let (item, submission) = with_tx(pool, |tx| {
        let mut item = work_repo::load(tx, work_item_id)?;
        require_owner(&item, caller)?;
        let index = item
            .latest_submission_index()
            .ok_or_else(|| AppError::NoSubmissions(work_item_id.to_string()))?;
        item.status = next_work_item_status(item.status, WorkItemTransition::Complete)?;

        let submission = &mut item.submissions[index];
        submission.status = SubmissionStatus::Approved;
        submission.feedback_at = Some(chrono::Utc::now().to_rfc3339());
        let submission = submission.clone();
        work_repo::save(tx, &mut item)?;
        Ok((item, submission))
    })?;

    tracing::info!(work_item_id, submission_id = %submission.id, "Work item approved");
    notifier.submission_reviewed(&item, &submission);
    notifier.work_item_completed(&item);
    Ok(submission)
}

// ============================================================================
// Ratings
// ============================================================================

/// Upsert the caller's rating. Member ratings must target non-leader team
/// members, each at most once.
pub fn rate(
    pool: &DbPool,
    notifier: &Notifier,
    caller: &Identity,
    work_item_id: &str,
    input: RateInput,
) -> Result<Rating, AppError> {
    validation::require_rating("rating", input.rating)?;
    let comment = optional_text("comment", input.comment, MAX_FEEDBACK_LEN)?;
    let mut member_ratings = input.member_ratings;
    let mut seen = HashSet::new();
    for mr in member_ratings.iter_mut() {
        validation::require_valid_id("member_ratings.principal_id", &mr.principal_id)?;
        validation::require_rating("member_ratings.rating", mr.rating)?;
        mr.comment = optional_text("member_ratings.comment", mr.comment.take(), MAX_FEEDBACK_LEN)?;
        if !seen.insert(mr.principal_id.clone()) {
            return Err(AppError::Validation(format!(
                "{} is rated more than once",
                mr.principal_id
            )));
        }
    }

    let (item, rating) = with_tx(pool, |tx| {
        let mut item = work_repo::load(tx, work_item_id)?;
        require_owner(&item, caller)?;

        if !member_ratings.is_empty() {
            let team = match &item.team_id {
                Some(team_id) => team_repo::load(tx, team_id)?,
                None => {
                    return Err(AppError::Validation(format!(
                        "work item {work_item_id} has no team to rate"
                    )))
                }
            };
            for mr in &member_ratings {
                match team.member(&mr.principal_id) {
                    Some(m) if m.role != MemberRole::Leader => {}
                    _ => {
                        return Err(AppError::Validation(format!(
                            "{} is not a rateable member of team {}",
                            mr.principal_id, team.id
                        )))
                    }
                }
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        let rating = match item.rating_of_mut(&caller.principal_id) {
            Some(existing) => {
                existing.rating = input.rating;
                existing.comment = comment;
                existing.member_ratings = member_ratings;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let rating = Rating {
                    rater_id: caller.principal_id.clone(),
                    rating: input.rating,
                    comment,
                    member_ratings,
                    created_at: now.clone(),
                    updated_at: now,
                };
                item.ratings.push(rating.clone());
                rating
            }
        };
        work_repo::save(tx, &mut item)?;
        Ok((item, rating))
    })?;

    tracing::info!(work_item_id, rater = %rating.rater_id, rating = rating.rating, "Work item rated");
    notifier.work_item_rated(&item, rating.rating);
    Ok(rating)
}

// ============================================================================
// Teams
// ============================================================================

pub fn get_team(pool: &DbPool, caller: &Identity, team_id: &str) -> Result<TeamView, AppError> {
    let team = team_repo::get_by_id(pool, team_id)?;
    if !caller.is_admin() {
        team.require_active_member(&caller.principal_id)?;
    }
    Ok(team.view())
}

/// Leader-only. The removed principal keeps their entry with status
/// `removed`; accepting them again reactivates it.
pub fn remove_member(
    pool: &DbPool,
    caller: &Identity,
    team_id: &str,
    principal_id: &str,
) -> Result<TeamView, AppError> {
    let team = with_tx(pool, |tx| {
        let mut team = team_repo::load(tx, team_id)?;
        if !caller.is_admin() && team.leader_id != caller.principal_id {
            return Err(AppError::Unauthorized("only the team leader can remove members".into()));
        }
        team.remove_member(principal_id)?;
        team.touch();
        team_repo::save(tx, &mut team)?;
        Ok(team)
    })?;
    tracing::info!(team_id, principal_id, "Team member removed");
    Ok(team.view())
}
