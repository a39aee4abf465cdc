use log::info;

use crate::errors::TaskError;
use crate::models::task::TaskStatus;
use crate::store::{TaskMutation, TaskStore};

/// What the accept path hands back on success, enough for the response body
/// and the requester notification without a second read.
#[derive(Debug, Clone)]
pub struct AcceptOutcome {
    pub task_id: String,
    pub title: String,
    pub requester_id: String,
    pub expert_id: String,
    pub expert_name: String,
}

/// Resolve a claim attempt on an open task. Any number of experts may call
/// this concurrently for the same task; the store's transaction primitive
/// guarantees exactly one commits the assignment and the rest observe the
/// updated document and fail.
///
/// The check order matters: an already-set expert wins over the status check
/// so the race-loss path surfaces as [`TaskError::AlreadyAssigned`] (with its
/// "Sorry! Another expert just accepted this task." message) rather than the
/// generic unavailable error. The status check still stands on its own as a
/// guard against a status/assignment desync.
pub async fn accept_task(
    store: &dyn TaskStore,
    task_id: &str,
    expert_id: &str,
    expert_name: &str,
) -> Result<AcceptOutcome, TaskError> {
    let task = store
        .transact(task_id, &|current| {
            let task = current.ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;
            if task.assigned_expert_id.is_some() {
                return Err(TaskError::AlreadyAssigned);
            }
            if task.status != TaskStatus::AwaitingExpert {
                return Err(TaskError::Unavailable);
            }
            if task.expert_applications.iter().any(|id| id == expert_id) {
                return Err(TaskError::DuplicateApplication);
            }
            Ok(TaskMutation {
                status: Some(TaskStatus::InProgress),
                assignment: Some((expert_id.to_string(), expert_name.to_string())),
                ..Default::default()
            })
        })
        .await?;

    info!(
        "Task {} assigned to expert {} ({})",
        task.id, expert_id, expert_name
    );

    Ok(AcceptOutcome {
        task_id: task.id,
        title: task.title,
        requester_id: task.requester_id,
        expert_id: expert_id.to_string(),
        expert_name: expert_name.to_string(),
    })
}

/// Record an expert's interest in an auto-match task without assigning it.
/// Appends to the application list and bumps the applicant counter in one
/// atomic write; a repeat application is rejected. Manual-match tasks are
/// claimed through [`accept_task`] and never take applications.
pub async fn apply_to_task(
    store: &dyn TaskStore,
    task_id: &str,
    expert_id: &str,
) -> Result<i64, TaskError> {
    let task = store
        .transact(task_id, &|current| {
            let task = current.ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;
            if !task.auto_match {
                return Err(TaskError::Validation(
                    "This task does not take applications".to_string(),
                ));
            }
            if task.assigned_expert_id.is_some() {
                return Err(TaskError::AlreadyAssigned);
            }
            if task.status != TaskStatus::AwaitingExpert {
                return Err(TaskError::Unavailable);
            }
            if task.expert_applications.iter().any(|id| id == expert_id) {
                return Err(TaskError::DuplicateApplication);
            }
            Ok(TaskMutation {
                push_application: Some(expert_id.to_string()),
                ..Default::default()
            })
        })
        .await?;

    Ok(task.applicant_count)
}
