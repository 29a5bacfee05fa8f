//! Board REST surface.
//!
//! Every mutating route runs the same sequence: parse ids, ask the
//! authorization cascade, commit through the store, publish the domain
//! event to the hub, respond. Publishing happens only after a successful
//! commit, so subscribers never see an event for a rolled-back change.

mod orgs;
mod projects;
mod tasks;

use std::sync::Arc;

use axum::{
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use taskman_common::{
    protocol::ws::EventPayload,
    types::{OrgMember, Organization, Project, Task},
};
use tracing::error;
use uuid::Uuid;

use crate::{
    auth::{
        jwt::AccessTokenVerifier,
        middleware::{require_bearer_auth, AuthenticatedUser},
    },
    authz::{Action, AuthzError, DenyReason, ResourceRef},
    error::{ErrorCode, RelayError},
    hub::BoardHub,
    store::{AssigneeSeeding, BoardStore, StoreError},
};

#[derive(Clone)]
pub struct ApiState {
    store: BoardStore,
    hub: Arc<BoardHub>,
    seeding: AssigneeSeeding,
}

impl ApiState {
    pub fn new(store: BoardStore, hub: Arc<BoardHub>, seeding: AssigneeSeeding) -> Self {
        Self { store, hub, seeding }
    }

    async fn authorize(
        &self,
        user: &AuthenticatedUser,
        org_id: Uuid,
        action: Action,
        resource: Option<ResourceRef>,
    ) -> Result<(), ApiError> {
        self.hub
            .cascade()
            .authorize(user.user_id, org_id, action, resource)
            .await?
            .into_result()?;
        Ok(())
    }

    async fn publish(&self, org_id: Uuid, payload: EventPayload, user: &AuthenticatedUser) {
        self.hub.publish(org_id, payload, user.user_id).await;
    }
}

pub fn router(state: ApiState, verifier: Arc<AccessTokenVerifier>) -> Router {
    Router::new()
        .route("/v1/orgs", get(orgs::list_organizations).post(orgs::create_organization))
        .route("/v1/orgs/join", post(orgs::join_organization))
        .route(
            "/v1/orgs/{org_id}",
            get(orgs::get_organization).put(orgs::update_organization),
        )
        .route("/v1/orgs/{org_id}/members", get(orgs::list_members))
        .route("/v1/orgs/{org_id}/members/{member_id}", delete(orgs::remove_member))
        .route(
            "/v1/orgs/{org_id}/projects",
            get(projects::list_projects).post(projects::create_project),
        )
        .route("/v1/orgs/{org_id}/projects/move", patch(projects::move_projects))
        .route(
            "/v1/orgs/{org_id}/projects/{project_id}",
            get(projects::get_project)
                .put(projects::update_project)
                .delete(projects::delete_project),
        )
        .route("/v1/orgs/{org_id}/projects/{project_id}/move", patch(projects::move_project))
        .route(
            "/v1/orgs/{org_id}/projects/{project_id}/tasks",
            get(tasks::list_tasks).post(tasks::create_task),
        )
        .route("/v1/orgs/{org_id}/projects/{project_id}/tasks/move", patch(tasks::move_tasks))
        .route(
            "/v1/orgs/{org_id}/projects/{project_id}/tasks/{task_id}",
            get(tasks::get_task).put(tasks::update_task).delete(tasks::delete_task),
        )
        .route(
            "/v1/orgs/{org_id}/projects/{project_id}/tasks/{task_id}/move",
            patch(tasks::move_task),
        )
        .with_state(state)
        .route_layer(middleware::from_fn_with_state(verifier, require_bearer_auth))
}

/// Raw path segments. Ids are parsed by the handler so a malformed tenant
/// surfaces as `INVALID_TENANT` rather than a generic rejection.
#[derive(Debug, Deserialize)]
struct BoardPath {
    org_id: String,
    project_id: Option<String>,
    task_id: Option<String>,
    member_id: Option<String>,
}

impl BoardPath {
    fn org_id(&self) -> Result<Uuid, ApiError> {
        Uuid::parse_str(&self.org_id)
            .map_err(|_| RelayError::from_code(ErrorCode::InvalidTenant).into())
    }

    fn project_id(&self) -> Result<Uuid, ApiError> {
        parse_segment("project_id", self.project_id.as_deref())
    }

    fn task_id(&self) -> Result<Uuid, ApiError> {
        parse_segment("task_id", self.task_id.as_deref())
    }

    fn member_id(&self) -> Result<Uuid, ApiError> {
        parse_segment("member_id", self.member_id.as_deref())
    }
}

fn parse_segment(name: &'static str, raw: Option<&str>) -> Result<Uuid, ApiError> {
    raw.and_then(|raw| Uuid::parse_str(raw).ok()).ok_or_else(|| {
        RelayError::new(ErrorCode::ValidationFailed, format!("{name} must be a UUID")).into()
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct OrganizationEnvelope {
    organization: Organization,
}

#[derive(Debug, Serialize, Deserialize)]
struct OrganizationsEnvelope {
    items: Vec<Organization>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MembersEnvelope {
    items: Vec<OrgMember>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProjectEnvelope {
    project: Project,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProjectsEnvelope {
    items: Vec<Project>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TaskEnvelope {
    task: Task,
}

#[derive(Debug, Serialize, Deserialize)]
struct TasksEnvelope {
    items: Vec<Task>,
}

#[derive(Debug)]
enum ApiError {
    Relay(RelayError),
    Internal(anyhow::Error),
}

impl From<RelayError> for ApiError {
    fn from(error: RelayError) -> Self {
        Self::Relay(error)
    }
}

impl From<DenyReason> for ApiError {
    fn from(reason: DenyReason) -> Self {
        Self::Relay(reason.into())
    }
}

impl From<AuthzError> for ApiError {
    fn from(error: AuthzError) -> Self {
        match error {
            AuthzError::ResourceNotFound(resource) => Self::Relay(RelayError::new(
                ErrorCode::NotFound,
                format!("{} not found", resource.kind()),
            )),
            AuthzError::Lookup(error) => Self::Internal(error),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(kind) => {
                Self::Relay(RelayError::new(ErrorCode::NotFound, format!("{kind} not found")))
            }
            StoreError::InvalidInviteCode | StoreError::InviteCodeExpired => Self::Relay(
                RelayError::new(ErrorCode::ValidationFailed, "invalid or expired invite code"),
            ),
            StoreError::InviteCodeTaken => Self::Internal(error.into()),
            StoreError::Internal(error) => Self::Internal(error),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Relay(error) => error.into_response(),
            Self::Internal(error) => {
                error!(error = ?error, "board api internal error");
                RelayError::from_code(ErrorCode::InternalError).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header::AUTHORIZATION, Method, Request, StatusCode},
        response::Response,
        Router,
    };
    use serde_json::{json, Value};
    use taskman_common::{
        protocol::ws::{EventEnvelope, EventPayload, EventType},
        types::{Actor, MemberRole, ProjectStatus, TaskStatus},
    };
    use tokio::sync::mpsc::UnboundedReceiver;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::{router, ApiState};
    use crate::{
        auth::jwt::{testing::token_for, AccessTokenVerifier},
        hub::SynchronizationHub,
        store::{AssigneeSeeding, BoardStore},
    };

    const TEST_SECRET: &str = "taskman_test_secret_that_is_definitely_long_enough";

    struct Fixture {
        app: Router,
        store: BoardStore,
        hub: Arc<crate::hub::BoardHub>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = BoardStore::memory();
            let verifier = Arc::new(AccessTokenVerifier::new(TEST_SECRET).expect("verifier"));
            let hub = Arc::new(SynchronizationHub::new(store.clone(), false));
            let state = ApiState::new(store.clone(), Arc::clone(&hub), AssigneeSeeding::IncludeCreator);
            Self { app: router(state, verifier), store, hub }
        }

        fn token(&self, actor: &Actor) -> String {
            token_for(TEST_SECRET, actor)
        }

        async fn send(&self, actor: &Actor, method: Method, uri: &str, body: Option<Value>) -> Response {
            let mut builder = Request::builder()
                .method(method)
                .uri(uri)
                .header(AUTHORIZATION, format!("Bearer {}", self.token(actor)));
            let body = match body {
                Some(body) => {
                    builder = builder.header("content-type", "application/json");
                    Body::from(body.to_string())
                }
                None => Body::empty(),
            };
            self.app
                .clone()
                .oneshot(builder.body(body).expect("request should build"))
                .await
                .expect("request should return a response")
        }

        async fn org(&self, owner: &Actor, name: &str) -> Uuid {
            let response =
                self.send(owner, Method::POST, "/v1/orgs", Some(json!({ "name": name }))).await;
            assert_eq!(response.status(), StatusCode::CREATED);
            let body = read_json(response).await;
            Uuid::parse_str(body["organization"]["id"].as_str().expect("org id")).expect("uuid")
        }

        async fn member(&self, org_id: Uuid, email: &str) -> Actor {
            let actor = Actor::new(Uuid::new_v4(), email);
            self.store.add_member(org_id, actor.user_id, MemberRole::Member).await.expect("add");
            actor
        }

        async fn project(&self, actor: &Actor, org_id: Uuid, assignees: &[Uuid]) -> Uuid {
            let response = self
                .send(
                    actor,
                    Method::POST,
                    &format!("/v1/orgs/{org_id}/projects"),
                    Some(json!({ "name": "Launch", "assignee_ids": assignees })),
                )
                .await;
            assert_eq!(response.status(), StatusCode::CREATED);
            let body = read_json(response).await;
            Uuid::parse_str(body["project"]["id"].as_str().expect("project id")).expect("uuid")
        }

        async fn task(&self, actor: &Actor, org_id: Uuid, project_id: Uuid) -> Uuid {
            let response = self
                .send(
                    actor,
                    Method::POST,
                    &format!("/v1/orgs/{org_id}/projects/{project_id}/tasks"),
                    Some(json!({ "name": "Write copy" })),
                )
                .await;
            assert_eq!(response.status(), StatusCode::CREATED);
            let body = read_json(response).await;
            Uuid::parse_str(body["task"]["id"].as_str().expect("task id")).expect("uuid")
        }
    }

    async fn read_json(response: Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body should read");
        serde_json::from_slice(&body).expect("body should be valid json")
    }

    async fn error_code(response: Response) -> String {
        read_json(response).await["error"]["code"].as_str().unwrap_or_default().to_owned()
    }

    fn drain(receiver: &mut UnboundedReceiver<Arc<EventEnvelope>>) -> Vec<Arc<EventEnvelope>> {
        let mut envelopes = Vec::new();
        while let Ok(envelope) = receiver.try_recv() {
            envelopes.push(envelope);
        }
        envelopes
    }

    #[tokio::test]
    async fn board_routes_require_bearer_auth() {
        let fixture = Fixture::new();
        let response = fixture
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/orgs/{}/projects", Uuid::new_v4()))
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn creator_is_admin_and_invitees_can_join() {
        let fixture = Fixture::new();
        let owner = Actor::new(Uuid::new_v4(), "owner@example.com");
        let response = fixture
            .send(&owner, Method::POST, "/v1/orgs", Some(json!({ "name": "Acme" })))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = read_json(response).await;
        assert_eq!(body["organization"]["role"], "admin");
        let invite_code = body["organization"]["invite_code"].as_str().expect("code").to_owned();

        let invitee = Actor::new(Uuid::new_v4(), "invitee@example.com");
        let response = fixture
            .send(&invitee, Method::POST, "/v1/orgs/join", Some(json!({ "invite_code": invite_code })))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["organization"]["role"], "member");

        let response = fixture
            .send(&invitee, Method::POST, "/v1/orgs/join", Some(json!({ "invite_code": "NOPE00" })))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn organization_name_is_validated() {
        let fixture = Fixture::new();
        let owner = Actor::new(Uuid::new_v4(), "owner@example.com");
        let response =
            fixture.send(&owner, Method::POST, "/v1/orgs", Some(json!({ "name": "A" }))).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn malformed_org_id_is_an_invalid_tenant() {
        let fixture = Fixture::new();
        let owner = Actor::new(Uuid::new_v4(), "owner@example.com");
        let response =
            fixture.send(&owner, Method::GET, "/v1/orgs/not-a-uuid/projects", None).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "INVALID_TENANT");
    }

    #[tokio::test]
    async fn non_members_are_rejected_before_anything_else() {
        let fixture = Fixture::new();
        let owner = Actor::new(Uuid::new_v4(), "owner@example.com");
        let org_id = fixture.org(&owner, "Acme").await;
        let project_id = fixture.project(&owner, org_id, &[]).await;
        let stranger = Actor::new(Uuid::new_v4(), "stranger@example.com");

        let response =
            fixture.send(&stranger, Method::GET, &format!("/v1/orgs/{org_id}/projects"), None).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(error_code(response).await, "NOT_A_MEMBER");

        let response = fixture
            .send(
                &stranger,
                Method::DELETE,
                &format!("/v1/orgs/{org_id}/projects/{}", Uuid::new_v4()),
                None,
            )
            .await;
        assert_eq!(error_code(response).await, "NOT_A_MEMBER");

        let response = fixture
            .send(
                &stranger,
                Method::PATCH,
                &format!("/v1/orgs/{org_id}/projects/{project_id}/move"),
                Some(json!({ "status": "finished" })),
            )
            .await;
        assert_eq!(error_code(response).await, "NOT_A_MEMBER");
    }

    #[tokio::test]
    async fn project_lifecycle_publishes_to_the_tenant() {
        let fixture = Fixture::new();
        let owner = Actor::new(Uuid::new_v4(), "owner@example.com");
        let org_id = fixture.org(&owner, "Acme").await;
        let (_session, mut rx) = fixture.hub.register(owner.clone(), org_id).await;
        drain(&mut rx);

        let project_id = fixture.project(&owner, org_id, &[]).await;
        let created = drain(&mut rx);
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].event_type(), EventType::ProjectCreated);
        assert_eq!(created[0].user_id(), owner.user_id);

        let response = fixture
            .send(
                &owner,
                Method::PATCH,
                &format!("/v1/orgs/{org_id}/projects/{project_id}/move"),
                Some(json!({ "status": "in-progress" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["project"]["status"], "in-progress");
        let moved = drain(&mut rx);
        match moved[0].payload().expect("payload") {
            EventPayload::ProjectMoved(data) => {
                assert_eq!(data.project_id, project_id);
                assert_eq!(data.org_id, org_id);
                assert_eq!(data.old_status, ProjectStatus::Idea);
                assert_eq!(data.new_status, ProjectStatus::InProgress);
            }
            other => panic!("unexpected payload {other:?}"),
        }

        let response = fixture
            .send(
                &owner,
                Method::PUT,
                &format!("/v1/orgs/{org_id}/projects/{project_id}"),
                Some(json!({ "description": "Ship it" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(drain(&mut rx)[0].event_type(), EventType::ProjectUpdated);

        let response = fixture
            .send(&owner, Method::GET, &format!("/v1/orgs/{org_id}/projects"), None)
            .await;
        let body = read_json(response).await;
        assert_eq!(body["items"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["items"][0]["description"], "Ship it");

        let response = fixture
            .send(&owner, Method::DELETE, &format!("/v1/orgs/{org_id}/projects/{project_id}"), None)
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(drain(&mut rx)[0].event_type(), EventType::ProjectDeleted);
    }

    #[tokio::test]
    async fn non_assignee_update_is_not_authorized_but_admin_delete_is_allowed() {
        let fixture = Fixture::new();
        let owner = Actor::new(Uuid::new_v4(), "owner@example.com");
        let org_id = fixture.org(&owner, "Acme").await;
        let author = fixture.member(org_id, "author@example.com").await;
        let bystander = fixture.member(org_id, "bystander@example.com").await;
        let project_id = fixture.project(&author, org_id, &[]).await;
        let uri = format!("/v1/orgs/{org_id}/projects/{project_id}");

        let response = fixture
            .send(&bystander, Method::PUT, &uri, Some(json!({ "name": "Hijacked" })))
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(error_code(response).await, "NOT_AUTHORIZED");

        let response = fixture.send(&bystander, Method::DELETE, &uri, None).await;
        assert_eq!(error_code(response).await, "NOT_AUTHORIZED");

        let response = fixture.send(&owner, Method::DELETE, &uri, None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn resources_of_another_tenant_are_a_mismatch() {
        let fixture = Fixture::new();
        let owner = Actor::new(Uuid::new_v4(), "owner@example.com");
        let home = fixture.org(&owner, "Home").await;
        let away = fixture.org(&owner, "Away").await;
        let away_project = fixture.project(&owner, away, &[]).await;

        let response = fixture
            .send(
                &owner,
                Method::PATCH,
                &format!("/v1/orgs/{home}/projects/{away_project}/move"),
                Some(json!({ "status": "finished" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(error_code(response).await, "RESOURCE_MISMATCH");

        let response = fixture
            .send(&owner, Method::GET, &format!("/v1/orgs/{home}/projects/{away_project}/tasks"), None)
            .await;
        assert_eq!(error_code(response).await, "RESOURCE_MISMATCH");
    }

    #[tokio::test]
    async fn unknown_status_and_missing_resources_are_rejected() {
        let fixture = Fixture::new();
        let owner = Actor::new(Uuid::new_v4(), "owner@example.com");
        let org_id = fixture.org(&owner, "Acme").await;
        let project_id = fixture.project(&owner, org_id, &[]).await;

        let response = fixture
            .send(
                &owner,
                Method::PATCH,
                &format!("/v1/orgs/{org_id}/projects/{project_id}/move"),
                Some(json!({ "status": "done" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = fixture
            .send(
                &owner,
                Method::DELETE,
                &format!("/v1/orgs/{org_id}/projects/{}", Uuid::new_v4()),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn task_move_reaches_every_member_connection_and_no_other_tenant() {
        let fixture = Fixture::new();
        let owner = Actor::new(Uuid::new_v4(), "owner@example.com");
        let org_id = fixture.org(&owner, "Acme").await;
        let peer = fixture.member(org_id, "peer@example.com").await;
        let outsider = Actor::new(Uuid::new_v4(), "outsider@example.com");
        let other_org = fixture.org(&outsider, "Elsewhere").await;

        let project_id = fixture.project(&owner, org_id, &[]).await;
        let task_id = fixture.task(&owner, org_id, project_id).await;

        let (_owner_session, mut owner_rx) = fixture.hub.register(owner.clone(), org_id).await;
        let (_peer_session, mut peer_rx) = fixture.hub.register(peer.clone(), org_id).await;
        let (_outsider_session, mut outsider_rx) =
            fixture.hub.register(outsider.clone(), other_org).await;
        drain(&mut owner_rx);
        drain(&mut peer_rx);
        drain(&mut outsider_rx);

        let response = fixture
            .send(
                &owner,
                Method::PATCH,
                &format!("/v1/orgs/{org_id}/projects/{project_id}/tasks/{task_id}/move"),
                Some(json!({ "status": "in-progress" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        for receiver in [&mut owner_rx, &mut peer_rx] {
            let envelopes = drain(receiver);
            assert_eq!(envelopes.len(), 1);
            assert_eq!(envelopes[0].user_id(), owner.user_id);
            match envelopes[0].payload().expect("payload") {
                EventPayload::TaskMoved(data) => {
                    assert_eq!(data.task_id, task_id);
                    assert_eq!(data.project_id, project_id);
                    assert_eq!(data.old_status, TaskStatus::NotStarted);
                    assert_eq!(data.new_status, TaskStatus::InProgress);
                    assert_eq!(data.user_id, owner.user_id);
                }
                other => panic!("unexpected payload {other:?}"),
            }
        }
        assert!(drain(&mut outsider_rx).is_empty());
    }

    #[tokio::test]
    async fn task_routes_check_the_parent_project() {
        let fixture = Fixture::new();
        let owner = Actor::new(Uuid::new_v4(), "owner@example.com");
        let org_id = fixture.org(&owner, "Acme").await;
        let first = fixture.project(&owner, org_id, &[]).await;
        let second = fixture.project(&owner, org_id, &[]).await;
        let task_id = fixture.task(&owner, org_id, first).await;

        let response = fixture
            .send(
                &owner,
                Method::DELETE,
                &format!("/v1/orgs/{org_id}/projects/{second}/tasks/{task_id}"),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = fixture
            .send(&owner, Method::GET, &format!("/v1/orgs/{org_id}/projects/{first}/tasks"), None)
            .await;
        let body = read_json(response).await;
        assert_eq!(body["items"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn task_update_replaces_assignees_and_delete_publishes() {
        let fixture = Fixture::new();
        let owner = Actor::new(Uuid::new_v4(), "owner@example.com");
        let org_id = fixture.org(&owner, "Acme").await;
        let helper = fixture.member(org_id, "helper@example.com").await;
        let project_id = fixture.project(&owner, org_id, &[]).await;
        let task_id = fixture.task(&owner, org_id, project_id).await;
        let uri = format!("/v1/orgs/{org_id}/projects/{project_id}/tasks/{task_id}");

        let response = fixture
            .send(&owner, Method::PUT, &uri, Some(json!({ "assignee_ids": [helper.user_id] })))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["task"]["assignee_ids"], json!([helper.user_id]));

        let response = fixture
            .send(
                &helper,
                Method::PATCH,
                &format!("{uri}/move"),
                Some(json!({ "status": "done" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let (_session, mut rx) = fixture.hub.register(owner.clone(), org_id).await;
        drain(&mut rx);
        let response = fixture.send(&helper, Method::DELETE, &uri, None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        match drain(&mut rx)[0].payload().expect("payload") {
            EventPayload::TaskDeleted(data) => {
                assert_eq!(data.task_id, task_id);
                assert_eq!(data.project_id, project_id);
                assert_eq!(data.user_id, helper.user_id);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn organizations_are_listed_read_and_renamed_by_admins() {
        let fixture = Fixture::new();
        let owner = Actor::new(Uuid::new_v4(), "owner@example.com");
        let org_id = fixture.org(&owner, "Acme").await;
        let member = fixture.member(org_id, "member@example.com").await;
        let stranger = Actor::new(Uuid::new_v4(), "stranger@example.com");

        let response = fixture.send(&member, Method::GET, "/v1/orgs", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["items"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["items"][0]["role"], "member");
        assert_eq!(body["items"][0]["member_count"], 2);

        let uri = format!("/v1/orgs/{org_id}");
        let response = fixture.send(&member, Method::GET, &uri, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await["organization"]["name"], "Acme");

        let response = fixture.send(&stranger, Method::GET, &uri, None).await;
        assert_eq!(error_code(response).await, "NOT_A_MEMBER");

        let response =
            fixture.send(&member, Method::PUT, &uri, Some(json!({ "name": "Hijacked" }))).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(error_code(response).await, "NOT_AUTHORIZED");

        let response = fixture.send(&owner, Method::PUT, &uri, Some(json!({}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "VALIDATION_FAILED");

        let response =
            fixture.send(&owner, Method::PUT, &uri, Some(json!({ "name": "Acme Labs" }))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["organization"]["name"], "Acme Labs");
        assert_eq!(body["organization"]["role"], "admin");
    }

    #[tokio::test]
    async fn members_are_listed_and_only_admins_remove_them() {
        let fixture = Fixture::new();
        let owner = Actor::new(Uuid::new_v4(), "owner@example.com");
        let org_id = fixture.org(&owner, "Acme").await;
        let member = fixture.member(org_id, "member@example.com").await;
        let other = fixture.member(org_id, "other@example.com").await;

        let response =
            fixture.send(&member, Method::GET, &format!("/v1/orgs/{org_id}/members"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["items"].as_array().map(Vec::len), Some(3));
        let admins = body["items"]
            .as_array()
            .map(|items| items.iter().filter(|item| item["role"] == "admin").collect::<Vec<_>>())
            .unwrap_or_default();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0]["user_id"], json!(owner.user_id));

        let uri = format!("/v1/orgs/{org_id}/members/{}", other.user_id);
        let response = fixture.send(&member, Method::DELETE, &uri, None).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(error_code(response).await, "NOT_AUTHORIZED");

        let response = fixture
            .send(&owner, Method::DELETE, &format!("/v1/orgs/{org_id}/members/not-a-uuid"), None)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = fixture
            .send(&owner, Method::DELETE, &format!("/v1/orgs/{org_id}/members/{}", Uuid::new_v4()), None)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn removed_member_loses_access_and_live_connections() {
        let fixture = Fixture::new();
        let owner = Actor::new(Uuid::new_v4(), "owner@example.com");
        let org_id = fixture.org(&owner, "Acme").await;
        let member = fixture.member(org_id, "member@example.com").await;
        let (_owner_session, mut owner_rx) = fixture.hub.register(owner.clone(), org_id).await;
        let (member_session, mut member_rx) = fixture.hub.register(member.clone(), org_id).await;
        drain(&mut owner_rx);
        drain(&mut member_rx);

        let response = fixture
            .send(&owner, Method::DELETE, &format!("/v1/orgs/{org_id}/members/{}", member.user_id), None)
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        tokio::time::timeout(std::time::Duration::from_secs(1), member_session.revoked())
            .await
            .expect("removed member's connection should be revoked");
        let notices = drain(&mut member_rx);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].event_type(), EventType::Error);
        assert_eq!(fixture.hub.registry().connection_count(org_id).await, 1);

        let response =
            fixture.send(&member, Method::GET, &format!("/v1/orgs/{org_id}/projects"), None).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(error_code(response).await, "NOT_A_MEMBER");

        fixture.project(&owner, org_id, &[]).await;
        assert!(drain(&mut member_rx).is_empty());
    }

    #[tokio::test]
    async fn single_project_and_task_reads_are_tenant_checked() {
        let fixture = Fixture::new();
        let owner = Actor::new(Uuid::new_v4(), "owner@example.com");
        let org_id = fixture.org(&owner, "Acme").await;
        let away = fixture.org(&owner, "Away").await;
        let project_id = fixture.project(&owner, org_id, &[]).await;
        let other_project = fixture.project(&owner, org_id, &[]).await;
        let task_id = fixture.task(&owner, org_id, project_id).await;

        let response = fixture
            .send(&owner, Method::GET, &format!("/v1/orgs/{org_id}/projects/{project_id}"), None)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await["project"]["id"], json!(project_id));

        let response = fixture
            .send(
                &owner,
                Method::GET,
                &format!("/v1/orgs/{org_id}/projects/{project_id}/tasks/{task_id}"),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await["task"]["id"], json!(task_id));

        let response = fixture
            .send(&owner, Method::GET, &format!("/v1/orgs/{away}/projects/{project_id}"), None)
            .await;
        assert_eq!(error_code(response).await, "RESOURCE_MISMATCH");

        let response = fixture
            .send(
                &owner,
                Method::GET,
                &format!("/v1/orgs/{org_id}/projects/{other_project}/tasks/{task_id}"),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bulk_moves_publish_one_event_per_item() {
        let fixture = Fixture::new();
        let owner = Actor::new(Uuid::new_v4(), "owner@example.com");
        let org_id = fixture.org(&owner, "Acme").await;
        let first = fixture.project(&owner, org_id, &[]).await;
        let second = fixture.project(&owner, org_id, &[]).await;
        let tasks = [
            fixture.task(&owner, org_id, first).await,
            fixture.task(&owner, org_id, first).await,
        ];
        let (_session, mut rx) = fixture.hub.register(owner.clone(), org_id).await;
        drain(&mut rx);

        let response = fixture
            .send(
                &owner,
                Method::PATCH,
                &format!("/v1/orgs/{org_id}/projects/move"),
                Some(json!({ "project_ids": [first, second, first], "status": "finished" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["items"].as_array().map(Vec::len), Some(2));
        let moved = drain(&mut rx);
        assert_eq!(moved.len(), 2);
        assert!(moved.iter().all(|envelope| envelope.event_type() == EventType::ProjectMoved));

        let response = fixture
            .send(
                &owner,
                Method::PATCH,
                &format!("/v1/orgs/{org_id}/projects/{first}/tasks/move"),
                Some(json!({ "task_ids": tasks, "status": "done" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let moved = drain(&mut rx);
        assert_eq!(moved.len(), 2);
        for (envelope, task_id) in moved.iter().zip(tasks) {
            match envelope.payload().expect("payload") {
                EventPayload::TaskMoved(data) => {
                    assert_eq!(data.task_id, task_id);
                    assert_eq!(data.new_status, TaskStatus::Done);
                }
                other => panic!("unexpected payload {other:?}"),
            }
        }

        let response = fixture
            .send(
                &owner,
                Method::PATCH,
                &format!("/v1/orgs/{org_id}/projects/move"),
                Some(json!({ "project_ids": [], "status": "idea" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bulk_move_commits_nothing_when_any_item_is_denied() {
        let fixture = Fixture::new();
        let owner = Actor::new(Uuid::new_v4(), "owner@example.com");
        let org_id = fixture.org(&owner, "Acme").await;
        let member = fixture.member(org_id, "member@example.com").await;
        let own = fixture.project(&member, org_id, &[]).await;
        let foreign = fixture.project(&owner, org_id, &[]).await;
        let (_session, mut rx) = fixture.hub.register(owner.clone(), org_id).await;
        drain(&mut rx);

        let response = fixture
            .send(
                &member,
                Method::PATCH,
                &format!("/v1/orgs/{org_id}/projects/move"),
                Some(json!({ "project_ids": [own, foreign], "status": "finished" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(error_code(response).await, "NOT_AUTHORIZED");
        assert!(drain(&mut rx).is_empty());
        let project = fixture.store.get_project(own).await.expect("project");
        assert_eq!(project.status, ProjectStatus::Idea);
    }
}
