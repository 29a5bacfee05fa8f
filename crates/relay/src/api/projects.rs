use axum::{
    extract::{Extension, Json, Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use taskman_common::{
    protocol::ws::{EventPayload, ProjectData, ProjectDeletedData, ProjectMovedData},
    types::ProjectStatus,
};
use uuid::Uuid;

use super::{ApiError, ApiState, BoardPath, ProjectEnvelope, ProjectsEnvelope};
use crate::{
    auth::middleware::AuthenticatedUser,
    authz::{Action, ResourceRef},
    store::{NewProject, ProjectChanges},
    validation::{validate_bulk_ids, validate_description, validate_name, ValidatedJson},
};

#[derive(Debug, Deserialize)]
pub(super) struct CreateProjectRequest {
    name: String,
    #[serde(default)]
    description: String,
    deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    assignee_ids: Vec<Uuid>,
}

impl CreateProjectRequest {
    fn validate(self) -> Result<NewProject, ApiError> {
        Ok(NewProject {
            name: validate_name("name", &self.name)?,
            description: validate_description(&self.description)?,
            deadline: self.deadline,
            assignee_ids: self.assignee_ids,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct UpdateProjectRequest {
    name: Option<String>,
    description: Option<String>,
    deadline: Option<DateTime<Utc>>,
    assignee_ids: Option<Vec<Uuid>>,
}

impl UpdateProjectRequest {
    fn validate(self) -> Result<ProjectChanges, ApiError> {
        Ok(ProjectChanges {
            name: self.name.as_deref().map(|name| validate_name("name", name)).transpose()?,
            description: self.description.as_deref().map(validate_description).transpose()?,
            deadline: self.deadline,
            assignee_ids: self.assignee_ids,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct MoveProjectRequest {
    status: ProjectStatus,
}

#[derive(Debug, Deserialize)]
pub(super) struct MoveProjectsRequest {
    project_ids: Vec<Uuid>,
    status: ProjectStatus,
}

pub(super) async fn list_projects(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(path): Path<BoardPath>,
) -> Result<Json<ProjectsEnvelope>, ApiError> {
    let org_id = path.org_id()?;
    state.authorize(&user, org_id, Action::Read, None).await?;

    let items = state.store.list_projects(org_id).await?;
    Ok(Json(ProjectsEnvelope { items }))
}

pub(super) async fn get_project(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(path): Path<BoardPath>,
) -> Result<Json<ProjectEnvelope>, ApiError> {
    let org_id = path.org_id()?;
    let project_id = path.project_id()?;
    state.authorize(&user, org_id, Action::Read, Some(ResourceRef::Project(project_id))).await?;

    let project = state.store.get_project(project_id).await?;
    Ok(Json(ProjectEnvelope { project }))
}

pub(super) async fn create_project(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(path): Path<BoardPath>,
    ValidatedJson(payload): ValidatedJson<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectEnvelope>), ApiError> {
    let org_id = path.org_id()?;
    state.authorize(&user, org_id, Action::Create, None).await?;

    let input = payload.validate()?;
    let project = state.store.create_project(org_id, user.user_id, input, state.seeding).await?;
    state
        .publish(
            org_id,
            EventPayload::ProjectCreated(ProjectData { project: project.clone(), user_id: user.user_id }),
            &user,
        )
        .await;

    Ok((StatusCode::CREATED, Json(ProjectEnvelope { project })))
}

pub(super) async fn update_project(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(path): Path<BoardPath>,
    ValidatedJson(payload): ValidatedJson<UpdateProjectRequest>,
) -> Result<Json<ProjectEnvelope>, ApiError> {
    let org_id = path.org_id()?;
    let project_id = path.project_id()?;
    state.authorize(&user, org_id, Action::Update, Some(ResourceRef::Project(project_id))).await?;

    let changes = payload.validate()?;
    let project = state.store.update_project(project_id, changes).await?;
    state
        .publish(
            org_id,
            EventPayload::ProjectUpdated(ProjectData { project: project.clone(), user_id: user.user_id }),
            &user,
        )
        .await;

    Ok(Json(ProjectEnvelope { project }))
}

pub(super) async fn move_project(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(path): Path<BoardPath>,
    ValidatedJson(payload): ValidatedJson<MoveProjectRequest>,
) -> Result<Json<ProjectEnvelope>, ApiError> {
    let org_id = path.org_id()?;
    let project_id = path.project_id()?;
    state.authorize(&user, org_id, Action::Move, Some(ResourceRef::Project(project_id))).await?;

    let moved = state.store.move_project(project_id, payload.status).await?;
    state
        .publish(
            org_id,
            EventPayload::ProjectMoved(ProjectMovedData {
                project_id,
                org_id,
                old_status: moved.old_status,
                new_status: moved.record.status,
                user_id: user.user_id,
            }),
            &user,
        )
        .await;

    Ok(Json(ProjectEnvelope { project: moved.record }))
}

/// Moves several projects to one column. Every project is authorized before
/// any of them moves; each committed move publishes its own event.
pub(super) async fn move_projects(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(path): Path<BoardPath>,
    ValidatedJson(payload): ValidatedJson<MoveProjectsRequest>,
) -> Result<Json<ProjectsEnvelope>, ApiError> {
    let org_id = path.org_id()?;
    let project_ids = validate_bulk_ids("project_ids", payload.project_ids)?;
    for project_id in &project_ids {
        state.authorize(&user, org_id, Action::Move, Some(ResourceRef::Project(*project_id))).await?;
    }

    let mut items = Vec::with_capacity(project_ids.len());
    for project_id in project_ids {
        let moved = state.store.move_project(project_id, payload.status).await?;
        state
            .publish(
                org_id,
                EventPayload::ProjectMoved(ProjectMovedData {
                    project_id,
                    org_id,
                    old_status: moved.old_status,
                    new_status: moved.record.status,
                    user_id: user.user_id,
                }),
                &user,
            )
            .await;
        items.push(moved.record);
    }

    Ok(Json(ProjectsEnvelope { items }))
}

/// Removes the project and every task under it.
pub(super) async fn delete_project(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(path): Path<BoardPath>,
) -> Result<StatusCode, ApiError> {
    let org_id = path.org_id()?;
    let project_id = path.project_id()?;
    state.authorize(&user, org_id, Action::Delete, Some(ResourceRef::Project(project_id))).await?;

    state.store.delete_project(project_id).await?;
    state
        .publish(
            org_id,
            EventPayload::ProjectDeleted(ProjectDeletedData { project_id, org_id, user_id: user.user_id }),
            &user,
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}
