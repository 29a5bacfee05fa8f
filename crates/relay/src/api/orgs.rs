use axum::{
    extract::{Extension, Json, Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use taskman_common::types::{MemberRole, Organization};
use tracing::info;

use super::{ApiError, ApiState, BoardPath, MembersEnvelope, OrganizationEnvelope, OrganizationsEnvelope};
use crate::{
    auth::middleware::AuthenticatedUser,
    authz::Action,
    error::{ErrorCode, RelayError},
    store::INVITE_CODE_LEN,
    validation::{validate_name, ValidatedJson},
};

#[derive(Debug, Deserialize)]
pub(super) struct CreateOrganizationRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct JoinOrganizationRequest {
    invite_code: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct UpdateOrganizationRequest {
    name: Option<String>,
}

pub(super) async fn list_organizations(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<OrganizationsEnvelope>, ApiError> {
    let items = state.store.list_organizations(user.user_id).await?;
    Ok(Json(OrganizationsEnvelope { items }))
}

/// The caller becomes the organization's first admin.
pub(super) async fn create_organization(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    ValidatedJson(payload): ValidatedJson<CreateOrganizationRequest>,
) -> Result<(StatusCode, Json<OrganizationEnvelope>), ApiError> {
    let name = validate_name("name", &payload.name)?;
    let organization = state.store.create_organization(user.user_id, &name).await?;
    info!(org_id = %organization.id, user_id = %user.user_id, "organization created");

    Ok((StatusCode::CREATED, Json(OrganizationEnvelope { organization })))
}

pub(super) async fn join_organization(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    ValidatedJson(payload): ValidatedJson<JoinOrganizationRequest>,
) -> Result<Json<OrganizationEnvelope>, ApiError> {
    let invite_code = payload.invite_code.trim();
    if invite_code.chars().count() != INVITE_CODE_LEN {
        return Err(RelayError::new(
            ErrorCode::ValidationFailed,
            format!("invite_code must be {INVITE_CODE_LEN} characters"),
        )
        .into());
    }

    let organization = state.store.join_organization(user.user_id, invite_code).await?;
    info!(org_id = %organization.id, user_id = %user.user_id, "joined organization");

    Ok(Json(OrganizationEnvelope { organization }))
}

pub(super) async fn get_organization(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(path): Path<BoardPath>,
) -> Result<Json<OrganizationEnvelope>, ApiError> {
    let org_id = path.org_id()?;
    state.authorize(&user, org_id, Action::Read, None).await?;

    let organization = state.store.get_organization(org_id, user.user_id).await?;
    Ok(Json(OrganizationEnvelope { organization }))
}

pub(super) async fn update_organization(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(path): Path<BoardPath>,
    ValidatedJson(payload): ValidatedJson<UpdateOrganizationRequest>,
) -> Result<Json<OrganizationEnvelope>, ApiError> {
    let org_id = path.org_id()?;
    state.authorize(&user, org_id, Action::Administer, None).await?;

    let Some(name) = payload.name else {
        return Err(RelayError::new(ErrorCode::ValidationFailed, "no fields to update").into());
    };
    let name = validate_name("name", &name)?;
    let organization = state.store.rename_organization(org_id, name).await?;
    info!(org_id = %org_id, user_id = %user.user_id, "organization renamed");

    Ok(Json(OrganizationEnvelope {
        organization: Organization { role: Some(MemberRole::Admin), ..organization },
    }))
}

pub(super) async fn list_members(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(path): Path<BoardPath>,
) -> Result<Json<MembersEnvelope>, ApiError> {
    let org_id = path.org_id()?;
    state.authorize(&user, org_id, Action::Read, None).await?;

    let items = state.store.list_members(org_id).await?;
    Ok(Json(MembersEnvelope { items }))
}

/// Drops the membership and disconnects every live connection the removed
/// member holds in this organization.
pub(super) async fn remove_member(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(path): Path<BoardPath>,
) -> Result<StatusCode, ApiError> {
    let org_id = path.org_id()?;
    let member_id = path.member_id()?;
    state.authorize(&user, org_id, Action::Administer, None).await?;

    state.store.remove_member(org_id, member_id).await?;
    let evicted = state.hub.evict_member(org_id, member_id).await;
    info!(org_id = %org_id, user_id = %user.user_id, member_id = %member_id, evicted, "member removed");

    Ok(StatusCode::NO_CONTENT)
}
