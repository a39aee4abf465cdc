// src/task_api.rs

use actix_web::{web, HttpMessage, HttpRequest, HttpResponse, Responder};
use log::error;
use serde::Deserialize;
use serde_json::json;

use crate::app_state::AppState;
use crate::assignment::{accept_task, apply_to_task};
use crate::auth::current_user;
use crate::errors::TaskError;
use crate::lifecycle::{allowed_actions, submit_task_action, ActionPayload, TaskAction};
use crate::models::task::{AiAssistance, AiLevel, CreateTaskRequest, NewTask, TaskStatus, Urgency};
use crate::models::user::Role;
use crate::notifications::{assignment_notification, dispatch};
use crate::queries::{filter_tasks, sort_tasks, task_statistics, TaskFilter, TaskSort};
use crate::store::TaskListQuery;
use crate::task_feed::{Publish, TaskEvent};

fn error_response(err: &TaskError) -> HttpResponse {
    let body = json!({
        "success": false,
        "message": err.user_message(),
        "retryable": err.is_retryable(),
    });
    match err {
        TaskError::NotFound(_) => HttpResponse::NotFound().json(body),
        TaskError::Validation(_) => HttpResponse::BadRequest().json(body),
        TaskError::Unavailable
        | TaskError::AlreadyAssigned
        | TaskError::DuplicateApplication => HttpResponse::Conflict().json(body),
        TaskError::Transient(_) => HttpResponse::ServiceUnavailable().json(body),
    }
}

fn authenticated_user(req: &HttpRequest) -> Option<String> {
    req.extensions().get::<String>().cloned()
}

fn validate_create(payload: &CreateTaskRequest) -> Result<(), TaskError> {
    if payload.title.trim().is_empty() {
        return Err(TaskError::Validation("Please provide a title".to_string()));
    }
    if payload.description.trim().is_empty() {
        return Err(TaskError::Validation(
            "Please describe the task".to_string(),
        ));
    }
    if !payload.price.is_finite() || payload.price <= 0.0 {
        return Err(TaskError::Validation(
            "Price must be a positive amount".to_string(),
        ));
    }
    // Exactly one matching mode, fixed at creation.
    if payload.auto_match == payload.manual_match {
        return Err(TaskError::Validation(
            "Choose either auto match or manual match".to_string(),
        ));
    }
    if let Some(ai) = &payload.ai_assistance {
        if ai.level == AiLevel::Partial && ai.percentage.is_none() {
            return Err(TaskError::Validation(
                "Please set the AI assistance percentage".to_string(),
            ));
        }
    }
    Ok(())
}

/// CREATE a task (requesters only). Status starts at `awaiting_expert`.
pub async fn create_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<CreateTaskRequest>,
) -> impl Responder {
    let Some(current) = authenticated_user(&req) else {
        return HttpResponse::Unauthorized().body("Unauthorized");
    };
    let Some(user) = current_user(&data, &current).await else {
        return HttpResponse::Unauthorized().body("Unauthorized");
    };
    if user.role != Role::Requester {
        return HttpResponse::Forbidden().body("Only requesters can post tasks");
    }

    let payload = payload.into_inner();
    if let Err(e) = validate_create(&payload) {
        return error_response(&e);
    }

    let new_task = NewTask {
        title: payload.title,
        description: payload.description,
        subject: payload.subject,
        price: payload.price,
        deadline: payload.deadline,
        urgency: payload.urgency,
        estimated_effort: payload.estimated_effort,
        ai_assistance: payload.ai_assistance.unwrap_or_else(AiAssistance::default),
        special_instructions: payload.special_instructions,
        tags: payload.tags.unwrap_or_default(),
        attachments: payload.attachments.unwrap_or_default(),
        requester_id: user.user_id.clone(),
        requester_name: user.display_name.clone(),
        auto_match: payload.auto_match,
    };

    match data.store.create_task(new_task).await {
        Ok(task) => {
            data.task_feed.do_send(Publish {
                user_ids: vec![task.requester_id.clone()],
                event: TaskEvent {
                    task_id: task.id.clone(),
                    kind: "created".to_string(),
                    status: task.status.as_str().to_string(),
                },
            });
            HttpResponse::Ok().json(json!({
                "success": true,
                "message": "Task posted",
                "data": task,
            }))
        }
        Err(e) => {
            error!("Error creating task: {}", e);
            error_response(&e)
        }
    }
}

/// GET a single task. Bumps the view counter (best-effort) and reports the
/// actions the caller's role may take right now.
pub async fn get_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let Some(current) = authenticated_user(&req) else {
        return HttpResponse::Unauthorized().body("Unauthorized");
    };
    let Some(user) = current_user(&data, &current).await else {
        return HttpResponse::Unauthorized().body("Unauthorized");
    };
    let task_id = path.into_inner();

    match data.store.get_task(&task_id).await {
        Ok(Some(task)) => {
            data.store.record_view(&task_id).await;
            let actions = allowed_actions(user.role, task.status);
            HttpResponse::Ok().json(json!({
                "success": true,
                "data": {
                    "task": task,
                    "statusLabel": task.status.label_for(user.role),
                    "progressPercent": task.status.progress_percent(),
                    "allowedActions": actions,
                },
            }))
        }
        Ok(None) => error_response(&TaskError::NotFound(task_id)),
        Err(e) => {
            error!("Error fetching task {}: {}", task_id, e);
            error_response(&e)
        }
    }
}

// Query strings cannot carry nested structures, so the filter fields are
// spelled out and folded into a TaskFilter.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub status: Option<TaskStatus>,
    pub subject: Option<String>,
    pub urgency: Option<Urgency>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub search: Option<String>,
    pub sort: Option<TaskSort>,
}

impl ListParams {
    fn filter(&self) -> TaskFilter {
        TaskFilter {
            status: self.status,
            subject: self.subject.clone(),
            urgency: self.urgency,
            min_price: self.min_price,
            max_price: self.max_price,
            search: self.search.clone(),
        }
    }
}

/// LIST the caller's tasks: a requester sees the tasks they posted, an
/// expert the tasks assigned to them. Filter and sort parameters apply on
/// top of the role scope.
pub async fn list_tasks(
    req: HttpRequest,
    data: web::Data<AppState>,
    params: web::Query<ListParams>,
) -> impl Responder {
    let Some(current) = authenticated_user(&req) else {
        return HttpResponse::Unauthorized().body("Unauthorized");
    };
    let Some(user) = current_user(&data, &current).await else {
        return HttpResponse::Unauthorized().body("Unauthorized");
    };

    let query = match user.role {
        Role::Requester => TaskListQuery {
            requester_id: Some(user.user_id.clone()),
            ..Default::default()
        },
        Role::Expert => TaskListQuery {
            assigned_expert_id: Some(user.user_id.clone()),
            ..Default::default()
        },
    };

    match data.store.list_tasks(query).await {
        Ok(tasks) => {
            let params = params.into_inner();
            let mut tasks = filter_tasks(&tasks, &params.filter());
            if let Some(sort) = params.sort {
                sort_tasks(&mut tasks, sort, chrono::Utc::now());
            }
            HttpResponse::Ok().json(json!({ "success": true, "data": tasks }))
        }
        Err(e) => {
            error!("Error listing tasks: {}", e);
            error_response(&e)
        }
    }
}

/// LIST the open manual-match feed any expert may browse and claim from.
pub async fn open_feed(
    req: HttpRequest,
    data: web::Data<AppState>,
    params: web::Query<ListParams>,
) -> impl Responder {
    if authenticated_user(&req).is_none() {
        return HttpResponse::Unauthorized().body("Unauthorized");
    }

    let query = TaskListQuery {
        open_feed: true,
        ..Default::default()
    };
    match data.store.list_tasks(query).await {
        Ok(tasks) => {
            let params = params.into_inner();
            let mut tasks = filter_tasks(&tasks, &params.filter());
            sort_tasks(
                &mut tasks,
                params.sort.unwrap_or(TaskSort::Priority),
                chrono::Utc::now(),
            );
            HttpResponse::Ok().json(json!({ "success": true, "data": tasks }))
        }
        Err(e) => {
            error!("Error listing open tasks: {}", e);
            error_response(&e)
        }
    }
}

/// Aggregate statistics over the caller's tasks.
pub async fn task_stats(req: HttpRequest, data: web::Data<AppState>) -> impl Responder {
    let Some(current) = authenticated_user(&req) else {
        return HttpResponse::Unauthorized().body("Unauthorized");
    };
    let Some(user) = current_user(&data, &current).await else {
        return HttpResponse::Unauthorized().body("Unauthorized");
    };

    let query = match user.role {
        Role::Requester => TaskListQuery {
            requester_id: Some(user.user_id.clone()),
            ..Default::default()
        },
        Role::Expert => TaskListQuery {
            assigned_expert_id: Some(user.user_id.clone()),
            ..Default::default()
        },
    };

    match data.store.list_tasks(query).await {
        Ok(tasks) => HttpResponse::Ok().json(json!({
            "success": true,
            "data": task_statistics(&tasks),
        })),
        Err(e) => {
            error!("Error computing task stats: {}", e);
            error_response(&e)
        }
    }
}

/// POST /tasks/{id}/accept — claim an open task. Concurrent claims resolve
/// to one winner inside the store transaction; the requester notification
/// and feed event go out only after the commit.
pub async fn accept(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let Some(current) = authenticated_user(&req) else {
        return HttpResponse::Unauthorized().body("Unauthorized");
    };
    let Some(user) = current_user(&data, &current).await else {
        return HttpResponse::Unauthorized().body("Unauthorized");
    };
    if user.role != Role::Expert {
        return HttpResponse::Forbidden().body("Only experts can accept tasks");
    }
    let task_id = path.into_inner();

    match accept_task(data.store.as_ref(), &task_id, &user.user_id, &user.display_name).await {
        Ok(outcome) => {
            dispatch(data.notifications.clone(), assignment_notification(&outcome));
            data.task_feed.do_send(Publish {
                user_ids: vec![outcome.requester_id.clone(), outcome.expert_id.clone()],
                event: TaskEvent {
                    task_id: outcome.task_id.clone(),
                    kind: "assigned".to_string(),
                    status: TaskStatus::InProgress.as_str().to_string(),
                },
            });
            HttpResponse::Ok().json(json!({
                "success": true,
                "message": format!("You accepted \"{}\"", outcome.title),
                "data": {
                    "taskId": outcome.task_id,
                    "title": outcome.title,
                    "requesterId": outcome.requester_id,
                    "expertId": outcome.expert_id,
                    "expertName": outcome.expert_name,
                },
            }))
        }
        Err(e) => error_response(&e),
    }
}

/// POST /tasks/{id}/apply — register interest in an auto-match task.
pub async fn apply(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let Some(current) = authenticated_user(&req) else {
        return HttpResponse::Unauthorized().body("Unauthorized");
    };
    let Some(user) = current_user(&data, &current).await else {
        return HttpResponse::Unauthorized().body("Unauthorized");
    };
    if user.role != Role::Expert {
        return HttpResponse::Forbidden().body("Only experts can apply to tasks");
    }
    let task_id = path.into_inner();

    match apply_to_task(data.store.as_ref(), &task_id, &user.user_id).await {
        Ok(applicant_count) => HttpResponse::Ok().json(json!({
            "success": true,
            "message": "Application recorded",
            "data": { "taskId": task_id, "applicantCount": applicant_count },
        })),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: TaskAction,
    #[serde(flatten)]
    pub payload: ActionPayload,
}

/// POST /tasks/{id}/actions — run a lifecycle action. The new status comes
/// back in the response so the client updates without a reload.
pub async fn action(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ActionRequest>,
) -> impl Responder {
    let Some(current) = authenticated_user(&req) else {
        return HttpResponse::Unauthorized().body("Unauthorized");
    };
    let Some(user) = current_user(&data, &current).await else {
        return HttpResponse::Unauthorized().body("Unauthorized");
    };
    let task_id = path.into_inner();
    let body = body.into_inner();

    match submit_task_action(
        data.store.as_ref(),
        &task_id,
        body.action,
        user.role,
        &user.user_id,
        body.payload,
    )
    .await
    {
        Ok(outcome) => {
            let mut recipients = vec![user.user_id.clone()];
            if let Some(counterparty) = &outcome.counterparty_id {
                recipients.push(counterparty.clone());
            }
            data.task_feed.do_send(Publish {
                user_ids: recipients,
                event: TaskEvent {
                    task_id: outcome.task_id.clone(),
                    kind: "status_changed".to_string(),
                    status: outcome.new_status.as_str().to_string(),
                },
            });
            HttpResponse::Ok().json(json!({
                "success": true,
                "message": "Task updated",
                "data": {
                    "taskId": outcome.task_id,
                    "newStatus": outcome.new_status,
                    "statusLabel": outcome.status_label,
                    "progressPercent": outcome.progress_percent,
                },
            }))
        }
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn create_request() -> CreateTaskRequest {
        CreateTaskRequest {
            title: "Translate abstract".to_string(),
            description: "300 words, EN to DE".to_string(),
            subject: "languages".to_string(),
            price: 25.0,
            deadline: Utc::now() + Duration::days(1),
            urgency: Urgency::Low,
            estimated_effort: None,
            ai_assistance: None,
            special_instructions: None,
            tags: None,
            attachments: None,
            auto_match: false,
            manual_match: true,
        }
    }

    #[test]
    fn create_rejects_non_positive_and_non_finite_prices() {
        for price in [0.0, -5.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut payload = create_request();
            payload.price = price;
            let err = validate_create(&payload).expect_err("bad price must fail");
            assert!(matches!(err, TaskError::Validation(_)));
            assert_eq!(err.user_message(), "Price must be a positive amount");
        }
        assert!(validate_create(&create_request()).is_ok());
    }

    #[test]
    fn create_requires_exactly_one_matching_mode() {
        let mut both = create_request();
        both.auto_match = true;
        assert!(validate_create(&both).is_err());

        let mut neither = create_request();
        neither.manual_match = false;
        assert!(validate_create(&neither).is_err());
    }
}
