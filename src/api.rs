// 🌐 HTTP API - axum router over the ledger
//
// Every mutating route resolves the office it touches, asks the injected
// Policy, then runs the ledger call on the blocking pool (SQLite + retry
// sleeps must not stall the async workers).

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::commands::{CreateBudgetEntry, CreatePlan, CreatePpa, DeletePpa, EntryFields, SetFiscalYearStatus, UpdateBudgetEntry};
use crate::entities::{EntryId, FiscalYearId, FiscalYearStatus, OfficeId, PlanId, PpaId};
use crate::error::AipError;
use crate::ledger::Ledger;
use crate::policy::{Action, Actor, Policy, Resource, Role};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub policy: Arc<dyn Policy>,
}

/// API Response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

pub struct ApiError(AipError);

impl From<AipError> for ApiError {
    fn from(err: AipError) -> Self {
        ApiError(err)
    }
}

pub fn status_for(err: &AipError) -> StatusCode {
    match err {
        AipError::NotFound { .. } => StatusCode::NOT_FOUND,
        AipError::Forbidden(_) => StatusCode::FORBIDDEN,
        AipError::Invalid(_)
        | AipError::InvalidParent { .. }
        | AipError::MissingOffice
        | AipError::NotLeaf { .. }
        | AipError::OfficeMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AipError::FiscalYearClosed { .. }
        | AipError::DuplicateEntry { .. }
        | AipError::HasEntriesInClosedYear { .. }
        | AipError::FiscalYearInUse { .. } => StatusCode::CONFLICT,
        AipError::ConcurrencyConflict { .. } => StatusCode::SERVICE_UNAVAILABLE,
        AipError::Storage(_) | AipError::Serialization(_) | AipError::Csv(_) | AipError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "request failed");
        }

        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.0.to_string()),
            code: Some(self.0.code().to_string()),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Run a ledger call on the blocking pool.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Ledger) -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let ledger = Arc::clone(&state.ledger);
    tokio::task::spawn_blocking(move || f(&ledger))
        .await
        .map_err(|e| ApiError(AipError::Io(std::io::Error::other(e.to_string()))))?
        .map_err(ApiError)
}

// ============================================================================
// Actor + policy
// ============================================================================

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub fn actor_from_headers(headers: &HeaderMap) -> Actor {
    Actor::new(
        header(headers, "x-actor").unwrap_or("anonymous"),
        header(headers, "x-office").map(OfficeId::from),
        header(headers, "x-role").map(Role::parse).unwrap_or_default(),
    )
}

fn authorize(state: &AppState, actor: &Actor, action: Action, resource: Resource) -> Result<(), ApiError> {
    state.policy.authorize(actor, action, &resource).map_err(ApiError)
}

fn node_office(state: &AppState, id: PpaId) -> Result<Resource, ApiError> {
    Ok(Resource::Office(state.ledger.get_node(id)?.office_id))
}

fn entry_office(state: &AppState, id: EntryId) -> Result<Resource, ApiError> {
    let entry = state.ledger.get_entry(id)?;
    node_office(state, entry.ppa_node_id)
}

fn plan_office(state: &AppState, id: PlanId) -> Result<Resource, ApiError> {
    Ok(Resource::Office(state.ledger.get_plan(id)?.office_id))
}

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateFiscalYearBody {
    pub year: i32,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: FiscalYearStatus,
}

#[derive(Debug, Deserialize)]
pub struct ActiveBody {
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub fiscal_year_id: FiscalYearId,
    #[serde(default)]
    pub root_id: Option<PpaId>,
}

#[derive(Debug, Deserialize)]
pub struct RollupQuery {
    pub fiscal_year_id: FiscalYearId,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/fiscal-years
async fn list_fiscal_years(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(state.ledger.list_fiscal_years()))
}

/// POST /api/fiscal-years
async fn create_fiscal_year(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateFiscalYearBody>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor_from_headers(&headers);
    authorize(&state, &actor, Action::ManageFiscalYear, Resource::FiscalYear)?;

    let fy = blocking(&state, move |l| l.create_fiscal_year(body.year, &actor.id)).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(fy))))
}

/// PUT /api/fiscal-years/:id/status
async fn set_fiscal_year_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<FiscalYearId>,
    Json(body): Json<StatusBody>,
) -> ApiResult<crate::entities::FiscalYear> {
    let actor = actor_from_headers(&headers);
    authorize(&state, &actor, Action::ManageFiscalYear, Resource::FiscalYear)?;

    let cmd = SetFiscalYearStatus {
        fiscal_year_id: id,
        status: body.status,
    };
    let fy = blocking(&state, move |l| l.set_fiscal_year_status(cmd, &actor.id)).await?;
    Ok(Json(ApiResponse::ok(fy)))
}

/// DELETE /api/fiscal-years/:id
async fn delete_fiscal_year(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<FiscalYearId>,
) -> ApiResult<crate::entities::FiscalYear> {
    let actor = actor_from_headers(&headers);
    authorize(&state, &actor, Action::ManageFiscalYear, Resource::FiscalYear)?;

    let fy = blocking(&state, move |l| l.delete_fiscal_year(id, &actor.id)).await?;
    Ok(Json(ApiResponse::ok(fy)))
}

/// POST /api/ppas
async fn create_ppa(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(cmd): Json<CreatePpa>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor_from_headers(&headers);

    // Authorize before the ledger sees the request: every office it names or
    // inherits must allow the write. With no office at all the request is
    // checked as a global write.
    let mut resources = Vec::new();
    if let Some(office) = &cmd.office_id {
        resources.push(Resource::Office(office.clone()));
    }
    if let Some(parent) = cmd.parent_id.and_then(|pid| state.ledger.get_node(pid).ok()) {
        resources.push(Resource::Office(parent.office_id));
    }
    if resources.is_empty() {
        resources.push(Resource::Global);
    }
    for resource in resources {
        authorize(&state, &actor, Action::CreatePpa, resource)?;
    }

    let node = blocking(&state, move |l| l.create_ppa(cmd, &actor.id)).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(node))))
}

/// GET /api/ppas/:id
async fn get_ppa(State(state): State<AppState>, Path(id): Path<PpaId>) -> ApiResult<crate::entities::PpaNode> {
    Ok(Json(ApiResponse::ok(state.ledger.get_node(id)?)))
}

/// DELETE /api/ppas/:id
async fn delete_ppa(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<PpaId>,
) -> ApiResult<Vec<PpaId>> {
    let actor = actor_from_headers(&headers);
    authorize(&state, &actor, Action::DeletePpa, node_office(&state, id)?)?;

    let removed = blocking(&state, move |l| l.delete_ppa(DeletePpa { id }, &actor.id)).await?;
    Ok(Json(ApiResponse::ok(removed)))
}

/// PUT /api/ppas/:id/active
async fn set_ppa_active(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<PpaId>,
    Json(body): Json<ActiveBody>,
) -> ApiResult<crate::entities::PpaNode> {
    let actor = actor_from_headers(&headers);
    authorize(&state, &actor, Action::SetPpaActive, node_office(&state, id)?)?;

    let node = blocking(&state, move |l| l.set_ppa_active(id, body.active, &actor.id)).await?;
    Ok(Json(ApiResponse::ok(node)))
}

/// POST /api/entries
async fn create_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(cmd): Json<CreateBudgetEntry>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor_from_headers(&headers);
    authorize(&state, &actor, Action::CreateEntry, node_office(&state, cmd.node_id)?)?;

    let entry = blocking(&state, move |l| l.create_entry(cmd, &actor.id)).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(entry))))
}

/// PUT /api/entries/:id
async fn update_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<EntryId>,
    Json(fields): Json<EntryFields>,
) -> ApiResult<crate::entities::BudgetEntry> {
    let actor = actor_from_headers(&headers);
    authorize(&state, &actor, Action::UpdateEntry, entry_office(&state, id)?)?;

    let cmd = UpdateBudgetEntry { id, fields };
    let entry = blocking(&state, move |l| l.update_entry(cmd, &actor.id)).await?;
    Ok(Json(ApiResponse::ok(entry)))
}

/// DELETE /api/entries/:id
async fn delete_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<EntryId>,
) -> ApiResult<crate::entities::BudgetEntry> {
    let actor = actor_from_headers(&headers);
    authorize(&state, &actor, Action::DeleteEntry, entry_office(&state, id)?)?;

    let entry = blocking(&state, move |l| l.delete_entry(id, &actor.id)).await?;
    Ok(Json(ApiResponse::ok(entry)))
}

/// GET /api/summary?fiscal_year_id=&root_id=
async fn get_summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> ApiResult<crate::summary::TreeSummary> {
    let summary = state.ledger.tree_summary(query.root_id, query.fiscal_year_id)?;
    Ok(Json(ApiResponse::ok(summary)))
}

/// GET /api/rollup/:node_id?fiscal_year_id=
async fn get_rollup(
    State(state): State<AppState>,
    Path(node_id): Path<PpaId>,
    Query(query): Query<RollupQuery>,
) -> ApiResult<crate::rollup::Rollup> {
    Ok(Json(ApiResponse::ok(state.ledger.rollup(node_id, query.fiscal_year_id)?)))
}

/// GET /api/verify
async fn verify(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(state.ledger.verify()))
}

/// POST /api/plans
async fn create_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(cmd): Json<CreatePlan>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor_from_headers(&headers);
    authorize(&state, &actor, Action::CreatePlan, Resource::Office(cmd.office_id.clone()))?;

    let plan = blocking(&state, move |l| l.create_plan(cmd, &actor.id)).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(plan))))
}

/// POST /api/plans/:id/items/:node_id
async fn attach_plan_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((plan_id, node_id)): Path<(PlanId, PpaId)>,
) -> ApiResult<Vec<crate::entities::PpaNode>> {
    let actor = actor_from_headers(&headers);
    authorize(&state, &actor, Action::AttachPlanItem, plan_office(&state, plan_id)?)?;

    let items = blocking(&state, move |l| {
        l.attach_plan_item(plan_id, node_id, &actor.id)?;
        l.plan_items(plan_id)
    })
    .await?;
    Ok(Json(ApiResponse::ok(items)))
}

/// DELETE /api/plans/:id/items/:node_id
async fn detach_plan_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((plan_id, node_id)): Path<(PlanId, PpaId)>,
) -> ApiResult<Vec<crate::entities::PpaNode>> {
    let actor = actor_from_headers(&headers);
    authorize(&state, &actor, Action::DetachPlanItem, plan_office(&state, plan_id)?)?;

    let items = blocking(&state, move |l| {
        l.detach_plan_item(plan_id, node_id, &actor.id)?;
        l.plan_items(plan_id)
    })
    .await?;
    Ok(Json(ApiResponse::ok(items)))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(ledger: Arc<Ledger>, policy: Arc<dyn Policy>) -> Router {
    let state = AppState { ledger, policy };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/fiscal-years", get(list_fiscal_years).post(create_fiscal_year))
        .route("/fiscal-years/:id/status", put(set_fiscal_year_status))
        .route("/fiscal-years/:id", axum::routing::delete(delete_fiscal_year))
        .route("/ppas", post(create_ppa))
        .route("/ppas/:id", get(get_ppa).delete(delete_ppa))
        .route("/ppas/:id/active", put(set_ppa_active))
        .route("/entries", post(create_entry))
        .route("/entries/:id", put(update_entry).delete(delete_entry))
        .route("/summary", get(get_summary))
        .route("/rollup/:node_id", get(get_rollup))
        .route("/verify", get(verify))
        .route("/plans", post(create_plan))
        .route("/plans/:id/items/:node_id", post(attach_plan_item).delete(detach_plan_item))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{FiscalYear, PpaNode};
    use crate::policy::{AllowAll, OfficeScoped};
    use crate::rollup::Rollup;
    use axum::body::Body;
    use axum::http::Request;
    use rust_decimal_macros::dec;
    use serde::de::DeserializeOwned;
    use tower::ServiceExt;

    fn app(policy: Arc<dyn Policy>) -> Router {
        router(Arc::new(Ledger::open_in_memory().unwrap()), policy)
    }

    async fn send<T: DeserializeOwned>(
        app: &Router,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> (StatusCode, ApiResponse<T>) {
        let mut req = Request::builder().method(method).uri(uri);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        let req = match body {
            Some(json) => req
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    const ADMIN: &[(&str, &str)] = &[("x-actor", "root"), ("x-role", "admin")];
    const O1: &[(&str, &str)] = &[("x-actor", "alice"), ("x-office", "O1")];
    const O2: &[(&str, &str)] = &[("x-actor", "bob"), ("x-office", "O2")];

    #[tokio::test]
    async fn test_health() {
        let app = app(Arc::new(AllowAll));
        let (status, body) = send::<String>(&app, "GET", "/api/health", &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.data.as_deref(), Some("OK"));
    }

    #[tokio::test]
    async fn test_entry_flow_and_rollup() {
        let app = app(Arc::new(OfficeScoped));

        let (status, fy) = send::<FiscalYear>(
            &app,
            "POST",
            "/api/fiscal-years",
            ADMIN,
            Some(serde_json::json!({ "year": 2025 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let fy = fy.data.unwrap();

        let (_, root) = send::<PpaNode>(
            &app,
            "POST",
            "/api/ppas",
            O1,
            Some(serde_json::json!({ "office_id": "O1", "description": "Health" })),
        )
        .await;
        let root = root.data.unwrap();
        let (_, leaf) = send::<PpaNode>(
            &app,
            "POST",
            "/api/ppas",
            O1,
            Some(serde_json::json!({ "parent_id": root.id, "description": "Clinic" })),
        )
        .await;
        let leaf = leaf.data.unwrap();
        assert_eq!(leaf.code(), "1.1");

        let (status, _) = send::<serde_json::Value>(
            &app,
            "POST",
            "/api/entries",
            O1,
            Some(serde_json::json!({
                "node_id": leaf.id,
                "fiscal_year_id": fy.id,
                "ps": "100",
                "mooe": "50"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let uri = format!("/api/rollup/{}?fiscal_year_id={}", root.id, fy.id);
        let (status, rollup) = send::<Rollup>(&app, "GET", &uri, &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rollup.data.unwrap().grand_total, dec!(150));
    }

    #[tokio::test]
    async fn test_policy_and_error_mapping() {
        let app = app(Arc::new(OfficeScoped));

        let (status, body) = send::<serde_json::Value>(
            &app,
            "POST",
            "/api/fiscal-years",
            O1,
            Some(serde_json::json!({ "year": 2025 })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.code.as_deref(), Some("forbidden"));

        let (_, root) = send::<PpaNode>(
            &app,
            "POST",
            "/api/ppas",
            O1,
            Some(serde_json::json!({ "office_id": "O1", "description": "Health" })),
        )
        .await;
        let root = root.data.unwrap();

        let uri = format!("/api/ppas/{}", root.id);
        let (status, _) = send::<serde_json::Value>(&app, "DELETE", &uri, O2, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send::<serde_json::Value>(
            &app,
            "POST",
            "/api/ppas",
            ADMIN,
            Some(serde_json::json!({ "description": "No office" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.code.as_deref(), Some("missing_office"));

        let uri = format!("/api/ppas/{}", PpaId::new());
        let (status, _) = send::<serde_json::Value>(&app, "GET", &uri, &[], None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send::<serde_json::Value>(&app, "DELETE", &format!("/api/ppas/{}", root.id), O1, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_ppa_is_authorized_before_validation() {
        let app = app(Arc::new(OfficeScoped));
        let ghost = PpaId::new();

        let requests = [
            serde_json::json!({ "description": "No office" }),
            serde_json::json!({ "parent_id": ghost, "description": "Ghost parent" }),
            serde_json::json!({ "parent_id": ghost, "office_id": "O2", "description": "Foreign" }),
        ];
        for request in requests {
            let (status, body) = send::<serde_json::Value>(&app, "POST", "/api/ppas", O1, Some(request)).await;
            assert_eq!(status, StatusCode::FORBIDDEN);
            assert_eq!(body.code.as_deref(), Some("forbidden"));
        }

        // an allowed actor reaches the ledger's own checks
        let (status, body) = send::<serde_json::Value>(
            &app,
            "POST",
            "/api/ppas",
            O1,
            Some(serde_json::json!({ "parent_id": ghost, "office_id": "O1", "description": "Ghost parent" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.code.as_deref(), Some("invalid_parent"));

        // a child naming its own office still answers to the parent's office
        let (_, root) = send::<PpaNode>(
            &app,
            "POST",
            "/api/ppas",
            O1,
            Some(serde_json::json!({ "office_id": "O1", "description": "Health" })),
        )
        .await;
        let root = root.data.unwrap();
        let (status, _) = send::<serde_json::Value>(
            &app,
            "POST",
            "/api/ppas",
            O2,
            Some(serde_json::json!({ "parent_id": root.id, "office_id": "O2", "description": "Clinic" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, report) = send::<serde_json::Value>(&app, "GET", "/api/verify", &[], None).await;
        assert_eq!(report.data.unwrap()["node_count"], 1);
    }

    #[tokio::test]
    async fn test_closed_year_is_conflict() {
        let app = app(Arc::new(AllowAll));
        let (_, fy) = send::<FiscalYear>(&app, "POST", "/api/fiscal-years", &[], Some(serde_json::json!({ "year": 2024 }))).await;
        let fy = fy.data.unwrap();
        let (_, node) = send::<PpaNode>(
            &app,
            "POST",
            "/api/ppas",
            &[],
            Some(serde_json::json!({ "office_id": "O1", "description": "P" })),
        )
        .await;
        let node = node.data.unwrap();

        let uri = format!("/api/fiscal-years/{}/status", fy.id);
        let (status, _) = send::<FiscalYear>(&app, "PUT", &uri, &[], Some(serde_json::json!({ "status": "Closed" }))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send::<serde_json::Value>(
            &app,
            "POST",
            "/api/entries",
            &[],
            Some(serde_json::json!({ "node_id": node.id, "fiscal_year_id": fy.id, "co": "5" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.code.as_deref(), Some("fiscal_year_closed"));
    }
}
