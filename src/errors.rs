use thiserror::Error;

/// Everything that can go wrong in the assignment and lifecycle paths.
///
/// All variants except [`TaskError::Transient`] are business-rule failures:
/// terminal for the attempt, never retried automatically. `Transient` marks
/// infrastructure trouble (store transaction aborted, network timeout) and is
/// the only class a client may retry.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task {0} not found")]
    NotFound(String),

    #[error("task is not in a claimable or eligible status")]
    Unavailable,

    #[error("task is already assigned to another expert")]
    AlreadyAssigned,

    #[error("expert has already applied to this task")]
    DuplicateApplication,

    #[error("{0}")]
    Validation(String),

    #[error("storage operation failed: {0}")]
    Transient(String),
}

impl TaskError {
    /// Short message suitable for showing directly to the user.
    pub fn user_message(&self) -> String {
        match self {
            TaskError::NotFound(_) => "Task not found.".to_string(),
            TaskError::Unavailable => "This task is no longer available.".to_string(),
            TaskError::AlreadyAssigned => {
                "Sorry! Another expert just accepted this task.".to_string()
            }
            TaskError::DuplicateApplication => {
                "You have already applied to this task.".to_string()
            }
            TaskError::Validation(msg) => msg.clone(),
            TaskError::Transient(_) => "Something went wrong. Please try again.".to_string(),
        }
    }

    /// Whether the client may offer a manual "Retry" affordance.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Transient(_))
    }
}
