//! Thin HTTP surface over the function, invocation and schedule services.
//!
//! Every error body is `{"error": "<message>"}`.

use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::FaasError;
use crate::function::{CreateFunctionRequest, FunctionService};
use crate::invocation::{Invocation, InvocationDispatcher, InvocationStatus};
use crate::scheduler::{CreateScheduleRequest, ScheduleService};

#[derive(Clone)]
pub struct ApiState {
    pub functions: FunctionService,
    pub dispatcher: InvocationDispatcher,
    pub schedules: ScheduleService,
}

/// Error rendered as a JSON body with a status derived from the error kind.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Service(FaasError),
}

impl From<FaasError> for ApiError {
    fn from(e: FaasError) -> Self {
        ApiError::Service(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Service(e) if e.is_not_found() => (StatusCode::NOT_FOUND, e.to_string()),
            ApiError::Service(e) if e.is_validation() => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Service(e) => {
                tracing::error!(error = %e, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_id(raw: &str, what: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid {} id", what)))
}

fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid request body: {}", e)))
}

#[derive(Debug, Default, Deserialize)]
struct InvokeRequest {
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct ListInvocationsQuery {
    limit: Option<usize>,
}

/// Client view of an invocation.
#[derive(Debug, Serialize)]
struct InvocationView {
    status: InvocationStatus,
    function_id: Uuid,
    invocation_id: Uuid,
    input_event: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    invoked_by: Option<String>,
    logged_at: DateTime<Utc>,
}

impl From<Invocation> for InvocationView {
    fn from(inv: Invocation) -> Self {
        Self {
            status: inv.status,
            function_id: inv.function_id,
            invocation_id: inv.id,
            input_event: inv.input_event,
            result: inv.output_result,
            error_message: inv.error_message,
            duration_ms: inv.duration_ms,
            invoked_by: inv.invoked_by,
            logged_at: inv.invoked_at,
        }
    }
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/functions",
            post(create_function_handler).get(list_functions_handler),
        )
        .route(
            "/api/functions/:id",
            get(get_function_handler).delete(delete_function_handler),
        )
        .route("/api/functions/:id/invoke", post(invoke_handler))
        .route("/api/functions/:id/invocations", get(list_invocations_handler))
        .route(
            "/api/functions/:id/invocations/:invocation_id",
            get(poll_result_handler),
        )
        .route(
            "/api/functions/:id/schedules",
            post(create_schedule_handler).get(list_schedules_handler),
        )
        .route(
            "/api/functions/:id/schedules/:schedule_id",
            delete(delete_schedule_handler),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API until `shutdown` fires.
pub async fn serve(
    addr: SocketAddr,
    state: ApiState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Starting API server");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "UP" }))
}

async fn create_function_handler(
    State(state): State<ApiState>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let req: CreateFunctionRequest = parse_body(&body)?;
    let function = state.functions.create_function(req).await?;
    Ok((StatusCode::CREATED, Json(function)))
}

async fn list_functions_handler(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.functions.list_functions().await?))
}

async fn get_function_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, "function")?;
    Ok(Json(state.functions.get_function(id).await?))
}

async fn delete_function_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, "function")?;
    state.functions.delete_function(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn invoke_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    peer: Option<ConnectInfo<SocketAddr>>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, "function")?;
    // An unreadable body invokes with an empty event
    let params = serde_json::from_slice::<InvokeRequest>(&body)
        .map(|req| req.params)
        .unwrap_or(Value::Null);
    let params = match params {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    let invoked_by = peer
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "anonymous".to_string());

    let invocation = state.dispatcher.invoke(id, params, &invoked_by).await?;
    Ok(Json(InvocationView::from(invocation)))
}

async fn list_invocations_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<ListInvocationsQuery>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, "function")?;
    let invocations = state.dispatcher.list_invocations(id, query.limit).await?;
    let views: Vec<InvocationView> = invocations.into_iter().map(InvocationView::from).collect();
    Ok(Json(views))
}

async fn poll_result_handler(
    State(state): State<ApiState>,
    Path((id, invocation_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let function_id = parse_id(&id, "function")?;
    let invocation_id = parse_id(&invocation_id, "invocation")?;
    let invocation = state
        .dispatcher
        .poll_function_result(function_id, invocation_id)
        .await?;
    Ok(Json(InvocationView::from(invocation)))
}

async fn create_schedule_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, "function")?;
    let req: CreateScheduleRequest = parse_body(&body)?;
    let schedule = state.schedules.create_schedule(id, req).await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

async fn list_schedules_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, "function")?;
    Ok(Json(state.schedules.list_schedules(id).await?))
}

async fn delete_schedule_handler(
    State(state): State<ApiState>,
    Path((id, schedule_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let function_id = parse_id(&id, "function")?;
    let schedule_id = parse_id(&schedule_id, "schedule")?;
    state
        .schedules
        .delete_schedule(function_id, schedule_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
