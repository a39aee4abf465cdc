//! Pure, side-effect-free helpers over task collections: filtering, sorting
//! and aggregate statistics. Deterministic by construction so both the
//! lifecycle views and the stats endpoint can share them.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::task::{Task, TaskStatus, Urgency};

/// Display priority, derived from urgency and deadline proximity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Critical,
    High,
    Medium,
    Low,
}

/// Urgency dominates: a high-urgency task is critical even when the deadline
/// is far out, and any overdue task is critical regardless of urgency.
pub fn task_priority(task: &Task, now: DateTime<Utc>) -> TaskPriority {
    if task.urgency == Urgency::High || task.deadline < now {
        TaskPriority::Critical
    } else if task.urgency == Urgency::Medium || task.deadline - now <= Duration::days(1) {
        TaskPriority::High
    } else if task.urgency == Urgency::Low {
        TaskPriority::Medium
    } else {
        TaskPriority::Low
    }
}

/// Filter predicates; all present fields must match (AND-combined).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub subject: Option<String>,
    pub urgency: Option<Urgency>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    /// Case-insensitive match against title, description and tags.
    pub search: Option<String>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(subject) = &self.subject {
            if !task.subject.eq_ignore_ascii_case(subject) {
                return false;
            }
        }
        if let Some(urgency) = self.urgency {
            if task.urgency != urgency {
                return false;
            }
        }
        if let Some(min) = self.min_price {
            if task.price < min {
                return false;
            }
        }
        if let Some(max) = self.max_price {
            if task.price > max {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            if !needle.is_empty() {
                let in_title = task.title.to_lowercase().contains(&needle);
                let in_description = task.description.to_lowercase().contains(&needle);
                let in_tags = task
                    .tags
                    .iter()
                    .any(|tag| tag.to_lowercase().contains(&needle));
                if !(in_title || in_description || in_tags) {
                    return false;
                }
            }
        }
        true
    }
}

pub fn filter_tasks(tasks: &[Task], filter: &TaskFilter) -> Vec<Task> {
    tasks
        .iter()
        .filter(|task| filter.matches(task))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSort {
    Priority,
    DueDateAsc,
    DueDateDesc,
    PriceAsc,
    PriceDesc,
}

pub fn sort_tasks(tasks: &mut [Task], sort: TaskSort, now: DateTime<Utc>) {
    match sort {
        TaskSort::Priority => {
            // Critical first; within a band, the nearer deadline wins.
            tasks.sort_by(|a, b| {
                task_priority(a, now)
                    .cmp(&task_priority(b, now))
                    .then_with(|| a.deadline.cmp(&b.deadline))
            });
        }
        TaskSort::DueDateAsc => tasks.sort_by(|a, b| a.deadline.cmp(&b.deadline)),
        TaskSort::DueDateDesc => tasks.sort_by(|a, b| b.deadline.cmp(&a.deadline)),
        TaskSort::PriceAsc => {
            tasks.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(Ordering::Equal))
        }
        TaskSort::PriceDesc => {
            tasks.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(Ordering::Equal))
        }
    }
}

/// Aggregates for a set of tasks. BTreeMaps keep the JSON output stable.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatistics {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_subject: BTreeMap<String, usize>,
    pub by_urgency: BTreeMap<String, usize>,
    pub total_price: f64,
    pub average_price: f64,
}

pub fn task_statistics(tasks: &[Task]) -> TaskStatistics {
    let mut by_status = BTreeMap::new();
    let mut by_subject = BTreeMap::new();
    let mut by_urgency = BTreeMap::new();
    let mut total_price = 0.0;

    for task in tasks {
        *by_status
            .entry(task.status.as_str().to_string())
            .or_insert(0) += 1;
        *by_subject.entry(task.subject.to_lowercase()).or_insert(0) += 1;
        *by_urgency
            .entry(task.urgency.as_str().to_string())
            .or_insert(0) += 1;
        total_price += task.price;
    }

    let average_price = if tasks.is_empty() {
        0.0
    } else {
        total_price / tasks.len() as f64
    };

    TaskStatistics {
        total: tasks.len(),
        by_status,
        by_subject,
        by_urgency,
        total_price,
        average_price,
    }
}
