use std::sync::Arc;

use actix::Addr;

use crate::config::Config;
use crate::notifications::NotificationSink;
use crate::store::{MongoDB, TaskStore};
use crate::task_feed::TaskFeedServer;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TaskStore>,
    pub notifications: Arc<dyn NotificationSink>,
    pub task_feed: Addr<TaskFeedServer>,
    pub mongodb: Arc<MongoDB>,
    pub config: Config,
}
