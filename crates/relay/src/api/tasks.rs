use axum::{
    extract::{Extension, Json, Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use taskman_common::{
    protocol::ws::{EventPayload, TaskData, TaskDeletedData, TaskMovedData},
    types::TaskStatus,
};
use uuid::Uuid;

use super::{ApiError, ApiState, BoardPath, TaskEnvelope, TasksEnvelope};
use crate::{
    auth::middleware::AuthenticatedUser,
    authz::{Action, ResourceRef},
    error::{ErrorCode, RelayError},
    store::{NewTask, TaskChanges},
    validation::{validate_bulk_ids, validate_description, validate_name, ValidatedJson},
};

#[derive(Debug, Deserialize)]
pub(super) struct CreateTaskRequest {
    name: String,
    #[serde(default)]
    description: String,
    deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    assignee_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub(super) struct UpdateTaskRequest {
    name: Option<String>,
    description: Option<String>,
    deadline: Option<DateTime<Utc>>,
    assignee_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct MoveTaskRequest {
    status: TaskStatus,
}

#[derive(Debug, Deserialize)]
pub(super) struct MoveTasksRequest {
    task_ids: Vec<Uuid>,
    status: TaskStatus,
}

/// Ids of a task route, checked against the cascade for `action`.
struct TaskTarget {
    org_id: Uuid,
    project_id: Uuid,
    task_id: Uuid,
}

async fn authorize_task(
    state: &ApiState,
    user: &AuthenticatedUser,
    path: &BoardPath,
    action: Action,
) -> Result<TaskTarget, ApiError> {
    let target = TaskTarget {
        org_id: path.org_id()?,
        project_id: path.project_id()?,
        task_id: path.task_id()?,
    };
    authorize_target(state, user, &target, action).await?;
    Ok(target)
}

async fn authorize_target(
    state: &ApiState,
    user: &AuthenticatedUser,
    target: &TaskTarget,
    action: Action,
) -> Result<(), ApiError> {
    let task_id = target.task_id;
    state.authorize(user, target.org_id, action, Some(ResourceRef::Task(task_id))).await?;

    // The cascade already pinned the task to this organization; the path's
    // project must be its parent too.
    if state.store.task_project(task_id).await? != Some(target.project_id) {
        return Err(RelayError::new(ErrorCode::NotFound, "task not found").into());
    }

    Ok(())
}

pub(super) async fn list_tasks(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(path): Path<BoardPath>,
) -> Result<Json<TasksEnvelope>, ApiError> {
    let org_id = path.org_id()?;
    let project_id = path.project_id()?;
    state.authorize(&user, org_id, Action::Read, Some(ResourceRef::Project(project_id))).await?;

    let items = state.store.list_tasks(project_id).await?;
    Ok(Json(TasksEnvelope { items }))
}

pub(super) async fn get_task(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(path): Path<BoardPath>,
) -> Result<Json<TaskEnvelope>, ApiError> {
    let target = authorize_task(&state, &user, &path, Action::Read).await?;

    let task = state.store.get_task(target.task_id).await?;
    Ok(Json(TaskEnvelope { task }))
}

pub(super) async fn create_task(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(path): Path<BoardPath>,
    ValidatedJson(payload): ValidatedJson<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskEnvelope>), ApiError> {
    let org_id = path.org_id()?;
    let project_id = path.project_id()?;
    state.authorize(&user, org_id, Action::Create, Some(ResourceRef::Project(project_id))).await?;

    let input = NewTask {
        name: validate_name("name", &payload.name)?,
        description: validate_description(&payload.description)?,
        deadline: payload.deadline,
        assignee_ids: payload.assignee_ids,
    };
    let task = state.store.create_task(project_id, user.user_id, input, state.seeding).await?;
    state
        .publish(
            org_id,
            EventPayload::TaskCreated(TaskData { task: task.clone(), user_id: user.user_id }),
            &user,
        )
        .await;

    Ok((StatusCode::CREATED, Json(TaskEnvelope { task })))
}

pub(super) async fn update_task(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(path): Path<BoardPath>,
    ValidatedJson(payload): ValidatedJson<UpdateTaskRequest>,
) -> Result<Json<TaskEnvelope>, ApiError> {
    let target = authorize_task(&state, &user, &path, Action::Update).await?;

    let changes = TaskChanges {
        name: payload.name.as_deref().map(|name| validate_name("name", name)).transpose()?,
        description: payload.description.as_deref().map(validate_description).transpose()?,
        deadline: payload.deadline,
        assignee_ids: payload.assignee_ids,
    };
    let task = state.store.update_task(target.task_id, changes).await?;
    state
        .publish(
            target.org_id,
            EventPayload::TaskUpdated(TaskData { task: task.clone(), user_id: user.user_id }),
            &user,
        )
        .await;

    Ok(Json(TaskEnvelope { task }))
}

pub(super) async fn move_task(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(path): Path<BoardPath>,
    ValidatedJson(payload): ValidatedJson<MoveTaskRequest>,
) -> Result<Json<TaskEnvelope>, ApiError> {
    let target = authorize_task(&state, &user, &path, Action::Move).await?;

    let moved = state.store.move_task(target.task_id, payload.status).await?;
    state
        .publish(
            target.org_id,
            EventPayload::TaskMoved(TaskMovedData {
                task_id: target.task_id,
                project_id: target.project_id,
                old_status: moved.old_status,
                new_status: moved.record.status,
                user_id: user.user_id,
            }),
            &user,
        )
        .await;

    Ok(Json(TaskEnvelope { task: moved.record }))
}

/// Moves several tasks of one project to one column. Every task is
/// authorized before any of them moves; each committed move publishes its
/// own event.
pub(super) async fn move_tasks(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(path): Path<BoardPath>,
    ValidatedJson(payload): ValidatedJson<MoveTasksRequest>,
) -> Result<Json<TasksEnvelope>, ApiError> {
    let org_id = path.org_id()?;
    let project_id = path.project_id()?;
    let targets = validate_bulk_ids("task_ids", payload.task_ids)?
        .into_iter()
        .map(|task_id| TaskTarget { org_id, project_id, task_id })
        .collect::<Vec<_>>();
    for target in &targets {
        authorize_target(&state, &user, target, Action::Move).await?;
    }

    let mut items = Vec::with_capacity(targets.len());
    for target in targets {
        let moved = state.store.move_task(target.task_id, payload.status).await?;
        state
            .publish(
                org_id,
                EventPayload::TaskMoved(TaskMovedData {
                    task_id: target.task_id,
                    project_id,
                    old_status: moved.old_status,
                    new_status: moved.record.status,
                    user_id: user.user_id,
                }),
                &user,
            )
            .await;
        items.push(moved.record);
    }

    Ok(Json(TasksEnvelope { items }))
}

pub(super) async fn delete_task(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(path): Path<BoardPath>,
) -> Result<StatusCode, ApiError> {
    let target = authorize_task(&state, &user, &path, Action::Delete).await?;

    state.store.delete_task(target.task_id).await?;
    state
        .publish(
            target.org_id,
            EventPayload::TaskDeleted(TaskDeletedData {
                task_id: target.task_id,
                project_id: target.project_id,
                user_id: user.user_id,
            }),
            &user,
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}
