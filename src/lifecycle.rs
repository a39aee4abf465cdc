use log::info;
use serde::{Deserialize, Serialize};

use crate::errors::TaskError;
use crate::models::task::{Task, TaskEdit, TaskStatus};
use crate::models::user::Role;
use crate::store::{TaskMutation, TaskStore};

/// User-triggered lifecycle actions. `accept` appears in the action table so
/// the UI can offer it, but its submission goes through the assignment
/// coordinator, never through [`submit_task_action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskAction {
    Accept,
    Edit,
    Cancel,
    Upload,
    Review,
    Revision,
    Dispute,
}

/// The single (role, status) → actions table every surface consults.
/// Adding a status or role means touching exactly this function.
pub fn allowed_actions(role: Role, status: TaskStatus) -> &'static [TaskAction] {
    use TaskAction::*;
    match (role, status) {
        (Role::Requester, TaskStatus::AwaitingExpert) => &[Edit, Cancel],
        (Role::Requester, TaskStatus::InProgress) => &[Cancel],
        (Role::Requester, TaskStatus::PendingReview) => &[Review, Revision, Dispute],
        (Role::Expert, TaskStatus::AwaitingExpert) => &[Accept],
        (Role::Expert, TaskStatus::InProgress) => &[Upload],
        (Role::Expert, TaskStatus::RevisionRequested) => &[Upload],
        _ => &[],
    }
}

/// Legal next status for an action, or `None` when the table does not allow
/// the action for this (role, status) pair. `Edit` keeps the status.
pub fn transition(status: TaskStatus, role: Role, action: TaskAction) -> Option<TaskStatus> {
    if !allowed_actions(role, status).contains(&action) {
        return None;
    }
    Some(match action {
        TaskAction::Accept => TaskStatus::InProgress,
        TaskAction::Edit => status,
        TaskAction::Cancel => TaskStatus::Cancelled,
        TaskAction::Upload => TaskStatus::PendingReview,
        TaskAction::Review => TaskStatus::Completed,
        TaskAction::Revision => TaskStatus::RevisionRequested,
        TaskAction::Dispute => TaskStatus::Disputed,
    })
}

/// Action-specific payload fields. A single shape keeps the endpoint body
/// uniform; validation picks out what each action needs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionPayload {
    pub rating: Option<i32>,
    pub feedback: Option<String>,
    pub reason: Option<String>,
    pub files: Option<Vec<String>>,
    pub message: Option<String>,
    pub edit: Option<TaskEdit>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Validate the payload for an action and translate it into the fields the
/// transition will persist. Runs before any store call so a bad payload
/// never reaches the document.
fn build_mutation(action: TaskAction, payload: &ActionPayload) -> Result<TaskMutation, TaskError> {
    let mut mutation = TaskMutation::default();
    match action {
        TaskAction::Review => {
            let feedback = non_empty(&payload.feedback)
                .ok_or_else(|| TaskError::Validation("Please provide feedback".to_string()))?;
            let rating = payload.rating.ok_or_else(|| {
                TaskError::Validation("Rating must be between 1 and 5".to_string())
            })?;
            if !(1..=5).contains(&rating) {
                return Err(TaskError::Validation(
                    "Rating must be between 1 and 5".to_string(),
                ));
            }
            mutation.rating = Some(rating);
            mutation.feedback = Some(feedback.to_string());
        }
        TaskAction::Dispute => {
            let reason = non_empty(&payload.reason).ok_or_else(|| {
                TaskError::Validation("Please provide a dispute reason".to_string())
            })?;
            mutation.dispute_reason = Some(reason.to_string());
        }
        TaskAction::Revision => {
            let notes = non_empty(&payload.reason).ok_or_else(|| {
                TaskError::Validation("Please describe the changes you need".to_string())
            })?;
            mutation.revision_notes = Some(notes.to_string());
        }
        TaskAction::Upload => {
            let files = payload
                .files
                .as_ref()
                .filter(|files| !files.is_empty())
                .ok_or_else(|| {
                    TaskError::Validation("Please select files to upload".to_string())
                })?;
            mutation.delivered_files = Some(files.clone());
            if let Some(message) = non_empty(&payload.message) {
                mutation.delivery_message = Some(message.to_string());
            }
        }
        TaskAction::Edit => {
            let edit = payload
                .edit
                .clone()
                .ok_or_else(|| TaskError::Validation("Nothing to update".to_string()))?;
            if let Some(price) = edit.price {
                if !price.is_finite() || price <= 0.0 {
                    return Err(TaskError::Validation(
                        "Price must be a positive amount".to_string(),
                    ));
                }
            }
            mutation.edit = Some(edit);
        }
        TaskAction::Cancel => {}
        TaskAction::Accept => {
            return Err(TaskError::Validation(
                "Accepting a task goes through the accept endpoint".to_string(),
            ));
        }
    }
    Ok(mutation)
}

fn check_actor(task: &Task, role: Role, actor_id: &str) -> Result<(), TaskError> {
    let authorized = match role {
        Role::Requester => task.requester_id == actor_id,
        Role::Expert => task.assigned_expert_id.as_deref() == Some(actor_id),
    };
    if authorized {
        Ok(())
    } else {
        Err(TaskError::Validation(
            "You are not a party to this task".to_string(),
        ))
    }
}

/// Returned so dependent views can update without a full reload.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub task_id: String,
    pub new_status: TaskStatus,
    /// The status label as the acting role sees it.
    pub status_label: &'static str,
    pub progress_percent: u8,
    /// The counterparty to inform about the change, when there is one.
    pub counterparty_id: Option<String>,
}

/// Apply a lifecycle action: validate the payload, check the action table
/// for the task's current status, and persist the transition plus payload
/// fields in one atomic write. On any failure the document is untouched.
pub async fn submit_task_action(
    store: &dyn TaskStore,
    task_id: &str,
    action: TaskAction,
    role: Role,
    actor_id: &str,
    payload: ActionPayload,
) -> Result<ActionOutcome, TaskError> {
    let template = build_mutation(action, &payload)?;

    let task = store
        .transact(task_id, &|current| {
            let task = current.ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;
            check_actor(task, role, actor_id)?;
            let new_status =
                transition(task.status, role, action).ok_or(TaskError::Unavailable)?;
            let mut mutation = template.clone();
            mutation.status = Some(new_status);
            // Applications never outlive the awaiting state.
            if task.status == TaskStatus::AwaitingExpert
                && new_status != TaskStatus::AwaitingExpert
            {
                mutation.clear_applications = true;
            }
            Ok(mutation)
        })
        .await?;

    info!(
        "Task {} action {:?} by {} {} -> {}",
        task.id,
        action,
        role.as_str(),
        actor_id,
        task.status.as_str()
    );

    let counterparty_id = match role {
        Role::Requester => task.assigned_expert_id.clone(),
        Role::Expert => Some(task.requester_id.clone()),
    };

    Ok(ActionOutcome {
        task_id: task.id,
        new_status: task.status,
        status_label: task.status.label_for(role),
        progress_percent: task.status.progress_percent(),
        counterparty_id,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::task::{AiAssistance, NewTask, Urgency};
    use crate::store::memory::MemoryTaskStore;

    fn task_with_status(status: TaskStatus) -> Task {
        let mut task = Task::create(NewTask {
            title: "Solve linear algebra set".to_string(),
            description: "10 exercises".to_string(),
            subject: "math".to_string(),
            price: 30.0,
            deadline: Utc::now() + Duration::days(2),
            urgency: Urgency::Low,
            estimated_effort: None,
            ai_assistance: AiAssistance::default(),
            special_instructions: None,
            tags: vec![],
            attachments: vec![],
            requester_id: "req-1".to_string(),
            requester_name: "Dana".to_string(),
            auto_match: false,
        });
        if status != TaskStatus::AwaitingExpert {
            task.assigned_expert_id = Some("exp-1".to_string());
            task.assigned_expert_name = Some("Alice".to_string());
            task.assigned_at = Some(Utc::now());
        }
        task.status = status;
        task
    }

    #[test]
    fn action_table_is_pure_and_role_scoped() {
        use TaskAction::*;
        assert_eq!(
            allowed_actions(Role::Requester, TaskStatus::AwaitingExpert),
            &[Edit, Cancel]
        );
        assert_eq!(
            allowed_actions(Role::Expert, TaskStatus::AwaitingExpert),
            &[Accept]
        );
        assert_eq!(
            allowed_actions(Role::Requester, TaskStatus::PendingReview),
            &[Review, Revision, Dispute]
        );
        assert_eq!(
            allowed_actions(Role::Expert, TaskStatus::RevisionRequested),
            &[Upload]
        );
        assert!(allowed_actions(Role::Expert, TaskStatus::Completed).is_empty());
        assert!(allowed_actions(Role::Requester, TaskStatus::Cancelled).is_empty());

        // Identical across repeated calls: nothing but (role, status) feeds it.
        for _ in 0..3 {
            assert_eq!(
                allowed_actions(Role::Requester, TaskStatus::InProgress),
                &[Cancel]
            );
        }
    }

    #[test]
    fn transitions_follow_the_table() {
        assert_eq!(
            transition(TaskStatus::PendingReview, Role::Requester, TaskAction::Review),
            Some(TaskStatus::Completed)
        );
        assert_eq!(
            transition(TaskStatus::PendingReview, Role::Requester, TaskAction::Revision),
            Some(TaskStatus::RevisionRequested)
        );
        assert_eq!(
            transition(TaskStatus::RevisionRequested, Role::Expert, TaskAction::Upload),
            Some(TaskStatus::PendingReview)
        );
        assert_eq!(
            transition(TaskStatus::AwaitingExpert, Role::Requester, TaskAction::Edit),
            Some(TaskStatus::AwaitingExpert)
        );
        // Experts never cancel; requesters never upload.
        assert_eq!(
            transition(TaskStatus::InProgress, Role::Expert, TaskAction::Cancel),
            None
        );
        assert_eq!(
            transition(TaskStatus::InProgress, Role::Requester, TaskAction::Upload),
            None
        );
    }

    #[test]
    fn expert_sees_mirrored_labels() {
        assert_eq!(TaskStatus::InProgress.label_for(Role::Expert), "working");
        assert_eq!(TaskStatus::PendingReview.label_for(Role::Expert), "delivered");
        assert_eq!(
            TaskStatus::Completed.label_for(Role::Expert),
            "payment_received"
        );
        assert_eq!(
            TaskStatus::InProgress.label_for(Role::Requester),
            "in_progress"
        );
    }

    #[tokio::test]
    async fn review_completes_the_task() {
        let store = MemoryTaskStore::new();
        let task_id = store.seed(task_with_status(TaskStatus::PendingReview));

        let outcome = submit_task_action(
            &store,
            &task_id,
            TaskAction::Review,
            Role::Requester,
            "req-1",
            ActionPayload {
                rating: Some(5),
                feedback: Some("great".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("review should succeed");

        assert_eq!(outcome.new_status, TaskStatus::Completed);
        assert_eq!(outcome.progress_percent, 100);
        let task = store.snapshot(&task_id).unwrap();
        assert_eq!(task.rating, Some(5));
        assert_eq!(task.feedback.as_deref(), Some("great"));
    }

    #[tokio::test]
    async fn review_without_feedback_is_rejected() {
        let store = MemoryTaskStore::new();
        let task_id = store.seed(task_with_status(TaskStatus::PendingReview));
        let before = store.snapshot(&task_id).unwrap();

        let err = submit_task_action(
            &store,
            &task_id,
            TaskAction::Review,
            Role::Requester,
            "req-1",
            ActionPayload {
                rating: Some(4),
                feedback: Some("   ".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect_err("blank feedback must fail");

        assert!(matches!(err, TaskError::Validation(_)));
        assert_eq!(err.user_message(), "Please provide feedback");
        assert_eq!(store.snapshot(&task_id).unwrap(), before);
    }

    #[tokio::test]
    async fn out_of_range_rating_is_rejected() {
        let store = MemoryTaskStore::new();
        let task_id = store.seed(task_with_status(TaskStatus::PendingReview));
        let before = store.snapshot(&task_id).unwrap();

        for rating in [0, 6] {
            let err = submit_task_action(
                &store,
                &task_id,
                TaskAction::Review,
                Role::Requester,
                "req-1",
                ActionPayload {
                    rating: Some(rating),
                    feedback: Some("great".to_string()),
                    ..Default::default()
                },
            )
            .await
            .expect_err("rating outside 1..=5 must fail");

            assert!(matches!(err, TaskError::Validation(_)));
            assert_eq!(err.user_message(), "Rating must be between 1 and 5");
        }
        assert_eq!(store.snapshot(&task_id).unwrap(), before);
    }

    #[tokio::test]
    async fn empty_dispute_reason_is_rejected() {
        let store = MemoryTaskStore::new();
        let task_id = store.seed(task_with_status(TaskStatus::PendingReview));
        let before = store.snapshot(&task_id).unwrap();

        let err = submit_task_action(
            &store,
            &task_id,
            TaskAction::Dispute,
            Role::Requester,
            "req-1",
            ActionPayload {
                reason: Some("".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect_err("empty reason must fail");

        assert!(matches!(err, TaskError::Validation(_)));
        assert_eq!(err.user_message(), "Please provide a dispute reason");
        assert_eq!(store.snapshot(&task_id).unwrap(), before);
    }

    #[tokio::test]
    async fn upload_without_files_is_rejected() {
        let store = MemoryTaskStore::new();
        let task_id = store.seed(task_with_status(TaskStatus::InProgress));
        let before = store.snapshot(&task_id).unwrap();

        let err = submit_task_action(
            &store,
            &task_id,
            TaskAction::Upload,
            Role::Expert,
            "exp-1",
            ActionPayload {
                files: Some(vec![]),
                ..Default::default()
            },
        )
        .await
        .expect_err("upload without files must fail");

        assert_eq!(err.user_message(), "Please select files to upload");
        let task = store.snapshot(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task, before);
    }

    #[tokio::test]
    async fn upload_delivers_for_review() {
        let store = MemoryTaskStore::new();
        let task_id = store.seed(task_with_status(TaskStatus::InProgress));

        let outcome = submit_task_action(
            &store,
            &task_id,
            TaskAction::Upload,
            Role::Expert,
            "exp-1",
            ActionPayload {
                files: Some(vec!["solutions.pdf".to_string()]),
                message: Some("All done, see attached".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("upload should succeed");

        assert_eq!(outcome.new_status, TaskStatus::PendingReview);
        assert_eq!(outcome.status_label, "delivered");
        let task = store.snapshot(&task_id).unwrap();
        assert_eq!(task.delivered_files, vec!["solutions.pdf".to_string()]);
        assert_eq!(task.delivery_message.as_deref(), Some("All done, see attached"));
    }

    #[tokio::test]
    async fn revision_loop_returns_to_review() {
        let store = MemoryTaskStore::new();
        let task_id = store.seed(task_with_status(TaskStatus::PendingReview));

        let outcome = submit_task_action(
            &store,
            &task_id,
            TaskAction::Revision,
            Role::Requester,
            "req-1",
            ActionPayload {
                reason: Some("Fix question 7".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("revision request should succeed");
        assert_eq!(outcome.new_status, TaskStatus::RevisionRequested);

        let outcome = submit_task_action(
            &store,
            &task_id,
            TaskAction::Upload,
            Role::Expert,
            "exp-1",
            ActionPayload {
                files: Some(vec!["solutions-v2.pdf".to_string()]),
                ..Default::default()
            },
        )
        .await
        .expect("resubmission should succeed");
        assert_eq!(outcome.new_status, TaskStatus::PendingReview);
    }

    #[tokio::test]
    async fn action_in_wrong_status_is_unavailable() {
        let store = MemoryTaskStore::new();
        let task_id = store.seed(task_with_status(TaskStatus::Completed));

        let err = submit_task_action(
            &store,
            &task_id,
            TaskAction::Cancel,
            Role::Requester,
            "req-1",
            ActionPayload::default(),
        )
        .await
        .expect_err("completed tasks cannot be cancelled");
        assert!(matches!(err, TaskError::Unavailable));
    }

    #[tokio::test]
    async fn non_party_actor_is_rejected() {
        let store = MemoryTaskStore::new();
        let task_id = store.seed(task_with_status(TaskStatus::InProgress));

        let err = submit_task_action(
            &store,
            &task_id,
            TaskAction::Upload,
            Role::Expert,
            "exp-intruder",
            ActionPayload {
                files: Some(vec!["x.pdf".to_string()]),
                ..Default::default()
            },
        )
        .await
        .expect_err("only the assigned expert may deliver");
        assert!(matches!(err, TaskError::Validation(_)));
    }

    #[tokio::test]
    async fn cancelling_an_open_task_clears_applications() {
        let store = MemoryTaskStore::new();
        let mut task = task_with_status(TaskStatus::AwaitingExpert);
        task.expert_applications.push("exp-9".to_string());
        let task_id = store.seed(task);

        let outcome = submit_task_action(
            &store,
            &task_id,
            TaskAction::Cancel,
            Role::Requester,
            "req-1",
            ActionPayload::default(),
        )
        .await
        .expect("cancel should succeed");

        assert_eq!(outcome.new_status, TaskStatus::Cancelled);
        let task = store.snapshot(&task_id).unwrap();
        assert!(task.expert_applications.is_empty());
        assert!(task.assigned_expert_id.is_none());
    }

    #[tokio::test]
    async fn edit_keeps_status_and_updates_content() {
        let store = MemoryTaskStore::new();
        let task_id = store.seed(task_with_status(TaskStatus::AwaitingExpert));

        let outcome = submit_task_action(
            &store,
            &task_id,
            TaskAction::Edit,
            Role::Requester,
            "req-1",
            ActionPayload {
                edit: Some(TaskEdit {
                    title: Some("Solve the full problem set".to_string()),
                    price: Some(40.0),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .await
        .expect("edit should succeed");

        assert_eq!(outcome.new_status, TaskStatus::AwaitingExpert);
        let task = store.snapshot(&task_id).unwrap();
        assert_eq!(task.title, "Solve the full problem set");
        assert_eq!(task.price, 40.0);
    }

    #[tokio::test]
    async fn edit_with_non_finite_price_is_rejected() {
        let store = MemoryTaskStore::new();
        let task_id = store.seed(task_with_status(TaskStatus::AwaitingExpert));
        let before = store.snapshot(&task_id).unwrap();

        for price in [f64::NAN, f64::INFINITY, -1.0, 0.0] {
            let err = submit_task_action(
                &store,
                &task_id,
                TaskAction::Edit,
                Role::Requester,
                "req-1",
                ActionPayload {
                    edit: Some(TaskEdit {
                        price: Some(price),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .expect_err("non-positive price must fail");

            assert!(matches!(err, TaskError::Validation(_)));
            assert_eq!(err.user_message(), "Price must be a positive amount");
        }
        assert_eq!(store.snapshot(&task_id).unwrap(), before);
    }
}
