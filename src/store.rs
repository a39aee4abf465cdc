use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use log::warn;
use mongodb::bson::doc;
use mongodb::error::{TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT};
use mongodb::{options::ClientOptions, Client, Database};

use crate::errors::TaskError;
use crate::models::task::{NewTask, Task, TaskEdit, TaskStatus};

/// Connection handle shared by the task store and the auth/user handlers.
pub struct MongoDB {
    pub client: Client,
    pub db: Database,
}

impl MongoDB {
    pub async fn init(uri: &str, db_name: &str) -> Self {
        let client_options = ClientOptions::parse(uri)
            .await
            .expect("Failed to parse MongoDB connection string");
        let client = Client::with_options(client_options).expect("Failed to initialize client");
        let db = client.database(db_name);
        MongoDB { client, db }
    }
}

/// The set of field writes a transaction commits against one task document.
/// All present fields land in a single atomic write, together with a fresh
/// `updatedAt`; an empty mutation still bumps `updatedAt`.
#[derive(Debug, Clone, Default)]
pub struct TaskMutation {
    pub status: Option<TaskStatus>,
    /// (expert_id, expert_name); also stamps `assignedAt` and clears the
    /// application list, the invariant the assignment transaction relies on.
    pub assignment: Option<(String, String)>,
    pub push_application: Option<String>,
    /// Applications may only exist while a task awaits an expert; any
    /// transition leaving that status sets this.
    pub clear_applications: bool,
    pub rating: Option<i32>,
    pub feedback: Option<String>,
    pub dispute_reason: Option<String>,
    pub revision_notes: Option<String>,
    pub delivered_files: Option<Vec<String>>,
    pub delivery_message: Option<String>,
    pub edit: Option<TaskEdit>,
}

impl TaskMutation {
    /// Apply this mutation to an in-memory copy of the task. Both store
    /// implementations go through here so the committed document and the
    /// value returned to the caller can never drift apart.
    pub fn apply_to(&self, task: &mut Task, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some((expert_id, expert_name)) = &self.assignment {
            task.assigned_expert_id = Some(expert_id.clone());
            task.assigned_expert_name = Some(expert_name.clone());
            task.assigned_at = Some(now);
            task.expert_applications.clear();
        }
        if let Some(expert_id) = &self.push_application {
            task.expert_applications.push(expert_id.clone());
            task.applicant_count = task.expert_applications.len() as i64;
        }
        if self.clear_applications {
            task.expert_applications.clear();
        }
        if let Some(rating) = self.rating {
            task.rating = Some(rating);
        }
        if let Some(feedback) = &self.feedback {
            task.feedback = Some(feedback.clone());
        }
        if let Some(reason) = &self.dispute_reason {
            task.dispute_reason = Some(reason.clone());
        }
        if let Some(notes) = &self.revision_notes {
            task.revision_notes = Some(notes.clone());
        }
        if let Some(files) = &self.delivered_files {
            task.delivered_files = files.clone();
        }
        if let Some(message) = &self.delivery_message {
            task.delivery_message = Some(message.clone());
        }
        if let Some(edit) = &self.edit {
            if let Some(title) = &edit.title {
                task.title = title.clone();
            }
            if let Some(description) = &edit.description {
                task.description = description.clone();
            }
            if let Some(price) = edit.price {
                task.price = price;
            }
            if let Some(deadline) = edit.deadline {
                task.deadline = deadline;
            }
            if let Some(urgency) = edit.urgency {
                task.urgency = urgency;
            }
            if let Some(instructions) = &edit.special_instructions {
                task.special_instructions = Some(instructions.clone());
            }
            if let Some(tags) = &edit.tags {
                task.tags = tags.clone();
            }
        }
        task.updated_at = now;
    }
}

/// Predicates for listing tasks. Fields combine with AND.
#[derive(Debug, Clone, Default)]
pub struct TaskListQuery {
    pub requester_id: Option<String>,
    pub assigned_expert_id: Option<String>,
    pub status: Option<TaskStatus>,
    /// Restrict to the open manual-match feed (awaiting an expert).
    pub open_feed: bool,
}

/// The read-validate-write body of a task transaction. Receives the current
/// document (or `None` if absent) and either returns the mutation to commit
/// or a terminal error that aborts with no write. May be re-invoked with
/// fresh state if the store retries on contention.
pub type TransactFn<'a> =
    &'a (dyn Fn(Option<&Task>) -> Result<TaskMutation, TaskError> + Send + Sync);

/// Storage seam for the "tasks" collection. The assignment coordinator and
/// the lifecycle state machine only ever talk to this trait, so the core
/// logic runs unchanged against MongoDB or the in-memory test store.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, new: NewTask) -> Result<Task, TaskError>;

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, TaskError>;

    async fn list_tasks(&self, query: TaskListQuery) -> Result<Vec<Task>, TaskError>;

    /// Run `apply` as a single atomic read-modify-write on one task document
    /// and return the post-commit state. This is the only mutation path for
    /// assignment and status fields; callers must never read-then-write
    /// across two separate store calls.
    async fn transact(&self, task_id: &str, apply: TransactFn<'_>) -> Result<Task, TaskError>;

    /// Bump the view counter. Best-effort display bookkeeping, not part of
    /// any correctness guarantee.
    async fn record_view(&self, task_id: &str);
}

pub struct MongoTaskStore {
    client: Client,
    db: Database,
}

impl MongoTaskStore {
    pub fn new(mongodb: &MongoDB) -> Self {
        MongoTaskStore {
            client: mongodb.client.clone(),
            db: mongodb.db.clone(),
        }
    }

    fn tasks(&self) -> mongodb::Collection<Task> {
        self.db.collection::<Task>("tasks")
    }

    fn transient(err: mongodb::error::Error) -> TaskError {
        TaskError::Transient(err.to_string())
    }
}

#[async_trait]
impl TaskStore for MongoTaskStore {
    async fn create_task(&self, new: NewTask) -> Result<Task, TaskError> {
        let task = Task::create(new);
        self.tasks()
            .insert_one(&task)
            .await
            .map_err(Self::transient)?;
        Ok(task)
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, TaskError> {
        self.tasks()
            .find_one(doc! { "_id": task_id })
            .await
            .map_err(Self::transient)
    }

    async fn list_tasks(&self, query: TaskListQuery) -> Result<Vec<Task>, TaskError> {
        let mut filter = doc! {};
        if let Some(requester_id) = &query.requester_id {
            filter.insert("requesterId", requester_id);
        }
        if let Some(expert_id) = &query.assigned_expert_id {
            filter.insert("assignedExpertId", expert_id);
        }
        if let Some(status) = query.status {
            filter.insert("status", status.as_str());
        }
        if query.open_feed {
            filter.insert("status", TaskStatus::AwaitingExpert.as_str());
            filter.insert("autoMatch", false);
        }

        self.tasks()
            .find(filter)
            .sort(doc! { "createdAt": -1 })
            .await
            .map_err(Self::transient)?
            .try_collect()
            .await
            .map_err(Self::transient)
    }

    async fn transact(&self, task_id: &str, apply: TransactFn<'_>) -> Result<Task, TaskError> {
        let mut session = self
            .client
            .start_session()
            .await
            .map_err(Self::transient)?;

        // Standard driver transaction loop: the whole body re-runs on a
        // transient abort, so `apply` always sees fresh state; commit alone
        // is re-attempted when its outcome is unknown.
        'transaction: loop {
            session
                .start_transaction()
                .await
                .map_err(Self::transient)?;

            let current = match self
                .tasks()
                .find_one(doc! { "_id": task_id })
                .session(&mut session)
                .await
            {
                Ok(current) => current,
                Err(e) if e.contains_label(TRANSIENT_TRANSACTION_ERROR) => continue 'transaction,
                Err(e) => {
                    let _ = session.abort_transaction().await;
                    return Err(Self::transient(e));
                }
            };

            let mutation = match apply(current.as_ref()) {
                Ok(mutation) => mutation,
                Err(e) => {
                    // Business-rule rejection: abort with nothing written.
                    let _ = session.abort_transaction().await;
                    return Err(e);
                }
            };

            let Some(mut updated) = current else {
                let _ = session.abort_transaction().await;
                return Err(TaskError::NotFound(task_id.to_string()));
            };
            mutation.apply_to(&mut updated, Utc::now());

            match self
                .tasks()
                .replace_one(doc! { "_id": task_id }, &updated)
                .session(&mut session)
                .await
            {
                Ok(_) => {}
                Err(e) if e.contains_label(TRANSIENT_TRANSACTION_ERROR) => continue 'transaction,
                Err(e) => {
                    let _ = session.abort_transaction().await;
                    return Err(Self::transient(e));
                }
            }

            loop {
                match session.commit_transaction().await {
                    Ok(()) => return Ok(updated),
                    Err(e) if e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) => continue,
                    Err(e) if e.contains_label(TRANSIENT_TRANSACTION_ERROR) => {
                        continue 'transaction
                    }
                    Err(e) => return Err(Self::transient(e)),
                }
            }
        }
    }

    async fn record_view(&self, task_id: &str) {
        let result = self
            .tasks()
            .update_one(doc! { "_id": task_id }, doc! { "$inc": { "viewCount": 1 } })
            .await;
        if let Err(e) = result {
            warn!("Failed to record view for task {}: {}", task_id, e);
        }
    }
}
