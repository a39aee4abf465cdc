use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::user::Role;

/// Lifecycle status of a task. The values below are the canonical persisted
/// forms; the expert-facing labels (`working`, `delivered`, `payment_received`)
/// are display projections of the same states, see [`TaskStatus::label_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    AwaitingExpert,
    InProgress,
    PendingReview,
    RevisionRequested,
    Completed,
    Cancelled,
    Disputed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::AwaitingExpert => "awaiting_expert",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::PendingReview => "pending_review",
            TaskStatus::RevisionRequested => "revision_requested",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Disputed => "disputed",
        }
    }

    /// The status label shown to a given role. Requesters see the canonical
    /// names; experts see their side of the same state.
    pub fn label_for(&self, role: Role) -> &'static str {
        match (role, self) {
            (Role::Expert, TaskStatus::InProgress) => "working",
            (Role::Expert, TaskStatus::PendingReview) => "delivered",
            (Role::Expert, TaskStatus::Completed) => "payment_received",
            _ => self.as_str(),
        }
    }

    /// Completion percentage for progress display. Derived from status alone,
    /// never used for control flow.
    pub fn progress_percent(&self) -> u8 {
        match self {
            TaskStatus::AwaitingExpert => 0,
            TaskStatus::InProgress => 40,
            TaskStatus::RevisionRequested => 60,
            TaskStatus::PendingReview => 80,
            TaskStatus::Completed => 100,
            TaskStatus::Cancelled => 0,
            TaskStatus::Disputed => 50,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Disputed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    High,
    Medium,
    Low,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::High => "high",
            Urgency::Medium => "medium",
            Urgency::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiLevel {
    None,
    Partial,
    Full,
}

/// How much AI assistance the requester allows. `percentage` is only
/// meaningful for the `partial` level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiAssistance {
    pub level: AiLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u8>,
}

impl Default for AiAssistance {
    fn default() -> Self {
        AiAssistance {
            level: AiLevel::None,
            percentage: None,
        }
    }
}

/// A marketplace task document, persisted in the "tasks" collection with
/// camelCase field names (the schema the mobile clients read).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: String,

    pub title: String,
    pub description: String,
    /// Category, e.g. "math", "writing", "programming".
    pub subject: String,
    /// Always a positive amount; "$" formatting is a client concern.
    pub price: f64,
    pub deadline: DateTime<Utc>,
    pub urgency: Urgency,
    pub estimated_effort: Option<String>,
    pub ai_assistance: AiAssistance,
    pub special_instructions: Option<String>,
    pub tags: Vec<String>,
    /// File-storage URLs, uploaded out of band.
    pub attachments: Vec<String>,

    pub requester_id: String,
    pub requester_name: String,
    /// Set exactly once by the assignment transaction, never reassigned.
    pub assigned_expert_id: Option<String>,
    pub assigned_expert_name: Option<String>,

    /// Fixed at creation: `true` for auto-match, `false` for the open feed.
    pub auto_match: bool,

    pub status: TaskStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,

    pub view_count: i64,
    pub applicant_count: i64,
    /// Experts who attempted a claim. Non-empty only while awaiting an
    /// expert; cleared atomically when an assignment commits.
    pub expert_applications: Vec<String>,

    // Action payloads, filled in by the lifecycle transitions that carry them.
    pub rating: Option<i32>,
    pub feedback: Option<String>,
    pub dispute_reason: Option<String>,
    pub revision_notes: Option<String>,
    pub delivered_files: Vec<String>,
    pub delivery_message: Option<String>,
}

/// Everything needed to create a task; the store assigns identity and the
/// bookkeeping timestamps.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub subject: String,
    pub price: f64,
    pub deadline: DateTime<Utc>,
    pub urgency: Urgency,
    pub estimated_effort: Option<String>,
    pub ai_assistance: AiAssistance,
    pub special_instructions: Option<String>,
    pub tags: Vec<String>,
    pub attachments: Vec<String>,
    pub requester_id: String,
    pub requester_name: String,
    pub auto_match: bool,
}

impl Task {
    pub fn create(new: NewTask) -> Self {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4().to_string(),
            title: new.title,
            description: new.description,
            subject: new.subject,
            price: new.price,
            deadline: new.deadline,
            urgency: new.urgency,
            estimated_effort: new.estimated_effort,
            ai_assistance: new.ai_assistance,
            special_instructions: new.special_instructions,
            tags: new.tags,
            attachments: new.attachments,
            requester_id: new.requester_id,
            requester_name: new.requester_name,
            assigned_expert_id: None,
            assigned_expert_name: None,
            auto_match: new.auto_match,
            status: TaskStatus::AwaitingExpert,
            created_at: now,
            updated_at: now,
            assigned_at: None,
            view_count: 0,
            applicant_count: 0,
            expert_applications: vec![],
            rating: None,
            feedback: None,
            dispute_reason: None,
            revision_notes: None,
            delivered_files: vec![],
            delivery_message: None,
        }
    }
}

/// Request payload for creating a task.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: String,
    pub subject: String,
    pub price: f64,
    pub deadline: DateTime<Utc>,
    pub urgency: Urgency,
    pub estimated_effort: Option<String>,
    pub ai_assistance: Option<AiAssistance>,
    pub special_instructions: Option<String>,
    pub tags: Option<Vec<String>>,
    pub attachments: Option<Vec<String>>,
    #[serde(default)]
    pub auto_match: bool,
    #[serde(default)]
    pub manual_match: bool,
}

/// Content-only edits a requester may make while the task is still open.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub deadline: Option<DateTime<Utc>>,
    pub urgency: Option<Urgency>,
    pub special_instructions: Option<String>,
    pub tags: Option<Vec<String>>,
}
