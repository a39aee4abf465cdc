use std::sync::Arc;

use async_trait::async_trait;
use log::warn;
use mongodb::bson::doc;
use mongodb::Database;

use crate::assignment::AcceptOutcome;
use crate::errors::TaskError;
use crate::models::notification::Notification;

/// Where notifications land. Kept behind a trait so the lifecycle tests can
/// capture deliveries instead of needing a database.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: Notification) -> Result<(), TaskError>;
}

pub struct MongoNotificationSink {
    db: Database,
}

impl MongoNotificationSink {
    pub fn new(db: Database) -> Self {
        MongoNotificationSink { db }
    }
}

#[async_trait]
impl NotificationSink for MongoNotificationSink {
    async fn deliver(&self, notification: Notification) -> Result<(), TaskError> {
        self.db
            .collection::<Notification>("notifications")
            .insert_one(&notification)
            .await
            .map_err(|e| TaskError::Transient(e.to_string()))?;
        Ok(())
    }
}

/// Fire-and-forget dispatch. Runs on the runtime after the triggering task
/// mutation has committed; a delivery failure is logged and dropped, never
/// surfaced to the caller.
pub fn dispatch(sink: Arc<dyn NotificationSink>, notification: Notification) {
    tokio::spawn(async move {
        let task_id = notification.task_id.clone();
        if let Err(e) = sink.deliver(notification).await {
            warn!(
                "Notification delivery failed (task {:?}): {}",
                task_id, e
            );
        }
    });
}

/// The requester-facing notification emitted after an assignment commits.
pub fn assignment_notification(outcome: &AcceptOutcome) -> Notification {
    Notification::new(
        &outcome.requester_id,
        "task_assigned",
        "Your task has an expert",
        &format!(
            "{} accepted \"{}\" and is getting started.",
            outcome.expert_name, outcome.title
        ),
    )
    .about_task(&outcome.task_id)
    .with_metadata(doc! {
        "expertId": &outcome.expert_id,
        "expertName": &outcome.expert_name,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    pub struct RecordingSink {
        pub delivered: Mutex<Vec<Notification>>,
        pub fail: bool,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn deliver(&self, notification: Notification) -> Result<(), TaskError> {
            if self.fail {
                return Err(TaskError::Transient("sink down".to_string()));
            }
            self.delivered
                .lock()
                .expect("sink lock poisoned")
                .push(notification);
            Ok(())
        }
    }

    fn outcome() -> AcceptOutcome {
        AcceptOutcome {
            task_id: "task-1".to_string(),
            title: "Proofread thesis chapter".to_string(),
            requester_id: "req-1".to_string(),
            expert_id: "exp-a".to_string(),
            expert_name: "Alice".to_string(),
        }
    }

    #[test]
    fn assignment_notification_targets_requester() {
        let n = assignment_notification(&outcome());
        assert_eq!(n.user_id, "req-1");
        assert_eq!(n.kind, "task_assigned");
        assert_eq!(n.task_id.as_deref(), Some("task-1"));
        assert!(!n.is_read);
        assert!(n.message.contains("Alice"));
        assert!(n.message.contains("Proofread thesis chapter"));
    }

    #[tokio::test]
    async fn dispatch_swallows_sink_failures() {
        let sink = Arc::new(RecordingSink {
            delivered: Mutex::new(vec![]),
            fail: true,
        });
        dispatch(sink.clone(), assignment_notification(&outcome()));
        // Nothing to assert beyond "does not panic and never propagates";
        // give the spawned delivery a chance to run.
        tokio::task::yield_now().await;
        assert!(sink.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dispatch_records_successful_delivery() {
        let sink = Arc::new(RecordingSink {
            delivered: Mutex::new(vec![]),
            fail: false,
        });
        dispatch(sink.clone(), assignment_notification(&outcome()));
        tokio::task::yield_now().await;
        let delivered = sink.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].user_id, "req-1");
    }
}
