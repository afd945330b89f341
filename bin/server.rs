// Tabular Exchange - Web Server
// REST API with Axum over the import/export engine

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use tabular_exchange::{
    logging, AttributeDescriptor, EntityKind, ExchangeConfig, ExchangeError, ExportFormat,
    ExportPipeline, ExportPreview, ExportQuery, ImportOutcome, ImportPipeline, ImportRun,
    ImportShape, RecordStore, ShapeRegistry, SqliteRecordStore, SqliteTemplateStore, StoreError,
    Template, TemplateFamily, TemplateRepository,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    records: Arc<Mutex<SqliteRecordStore>>,
    templates: Arc<Mutex<SqliteTemplateStore>>,
    registry: Arc<ShapeRegistry>,
    preview_limit: usize,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn failure(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Error side of every handler: status + envelope
struct ApiError(ExchangeError);

impl From<ExchangeError> for ApiError {
    fn from(e: ExchangeError) -> Self {
        ApiError(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError(e.into())
    }
}

fn status_for(e: &ExchangeError) -> StatusCode {
    match e {
        ExchangeError::Store(StoreError::Conflict { .. }) => StatusCode::CONFLICT,
        ExchangeError::Store(StoreError::NotFound { .. }) | ExchangeError::NothingToExport => {
            StatusCode::NOT_FOUND
        }
        ExchangeError::Decode(_)
        | ExchangeError::UnknownShape(_)
        | ExchangeError::InvalidTemplate(_)
        | ExchangeError::Store(StoreError::Rejected(_)) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        }
        (status, Json(ApiResponse::<()>::failure(self.0.to_string()))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, ApiError> {
    mutex.lock().map_err(|_| ApiError::from(StoreError::Lock))
}

fn bad_request(message: String) -> ApiError {
    ApiError(ExchangeError::InvalidTemplate(message))
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/import/:shape - Import the request body as a delimited file
async fn import_file(
    State(state): State<AppState>,
    Path(shape): Path<String>,
    body: Bytes,
) -> ApiResult<ImportOutcome> {
    let shape: ImportShape = shape.parse()?;
    let store = lock(&state.records)?;

    let outcome = ImportPipeline::new(&*store, &state.registry).run(&body, shape, &mut ())?;
    store.record_import_run(&ImportRun::new(shape, None, &body, outcome.clone()))?;

    Ok(Json(ApiResponse::ok(outcome)))
}

/// GET /api/import/:shape/blank - Download the starter file of a shape
async fn blank_file(
    State(state): State<AppState>,
    Path(shape): Path<String>,
) -> Result<Response, ApiError> {
    let shape: ImportShape = shape.parse()?;
    let content = state.registry.require(shape)?.blank_file()?;

    Ok(download(
        ExportFormat::Csv.mime_type(),
        shape.blank_file_name(),
        content,
    ))
}

#[derive(Deserialize)]
struct TemplateListParams {
    family: Option<TemplateFamily>,
    search: Option<String>,
}

/// GET /api/templates?family=&search= - List saved templates
async fn list_templates(
    State(state): State<AppState>,
    axum::extract::Query(params): axum::extract::Query<TemplateListParams>,
) -> ApiResult<Vec<Template>> {
    let store = lock(&state.templates)?;
    let templates = store.search(params.family, params.search.as_deref().unwrap_or(""))?;
    Ok(Json(ApiResponse::ok(templates)))
}

/// POST /api/templates - Insert or replace a template
async fn save_template(
    State(state): State<AppState>,
    Json(template): Json<Template>,
) -> ApiResult<Template> {
    let store = lock(&state.templates)?;
    Ok(Json(ApiResponse::ok(store.save(template)?)))
}

/// GET /api/templates/:id
async fn get_template(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Template> {
    let store = lock(&state.templates)?;
    Ok(Json(ApiResponse::ok(store.get(id)?)))
}

/// DELETE /api/templates/:id
async fn delete_template(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Uuid> {
    let store = lock(&state.templates)?;
    store.remove(id)?;
    Ok(Json(ApiResponse::ok(id)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportRequest {
    template_id: Uuid,
    #[serde(flatten)]
    query: ExportQuery,
    /// CSV when omitted on downloads; on previews, asks for serialized text
    #[serde(default)]
    format: Option<ExportFormat>,
}

fn load_export_template(state: &AppState, id: Uuid) -> Result<Template, ApiError> {
    let template = lock(&state.templates)?.get(id)?;
    if template.family != TemplateFamily::Export {
        return Err(bad_request(format!("'{}' is not an export template", template.name)));
    }
    Ok(template)
}

/// POST /api/export - Full export as a download
async fn export(
    State(state): State<AppState>,
    Json(request): Json<ExportRequest>,
) -> Result<Response, ApiError> {
    let template = load_export_template(&state, request.template_id)?;
    let store = lock(&state.records)?;

    let format = request.format.unwrap_or_default();
    let artifact = ExportPipeline::new(&*store).export(&template, &request.query, format)?;
    info!(file = %artifact.file_name, rows = artifact.row_count, "export served");

    Ok(download(&artifact.mime_type, &artifact.file_name, artifact.content))
}

/// POST /api/export/preview - First rows of an export
///
/// Without `format` the rows come back in the JSON envelope; with it, as the
/// same text the full download would start with.
async fn export_preview(
    State(state): State<AppState>,
    Json(request): Json<ExportRequest>,
) -> Result<Response, ApiError> {
    let template = load_export_template(&state, request.template_id)?;
    let store = lock(&state.records)?;
    let pipeline = ExportPipeline::new(&*store);

    match request.format {
        None => {
            let preview: ExportPreview = pipeline.preview(&template, &request.query, state.preview_limit)?;
            Ok(Json(ApiResponse::ok(preview)).into_response())
        }
        Some(format) => {
            let content = pipeline.render_preview(&template, &request.query, state.preview_limit, format)?;
            Ok(([(header::CONTENT_TYPE, format.mime_type())], content).into_response())
        }
    }
}

/// GET /api/schema/:kind - Attributes of a record kind
async fn schema(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> ApiResult<Vec<AttributeDescriptor>> {
    let kind: EntityKind = kind.parse().map_err(bad_request)?;
    let store = lock(&state.records)?;
    Ok(Json(ApiResponse::ok(store.schema(kind)?)))
}

fn download(mime_type: &str, file_name: &str, content: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, mime_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        content,
    )
        .into_response()
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ExchangeConfig::load(None).context("Failed to load configuration")?;
    logging::init(&config.logging)?;

    info!(database = %config.database_path.display(), "opening database");
    let records = SqliteRecordStore::open(&config.database_path).context("Failed to open record store")?;
    let templates =
        SqliteTemplateStore::open(&config.database_path).context("Failed to open template store")?;

    // Create shared state
    let state = AppState {
        records: Arc::new(Mutex::new(records)),
        templates: Arc::new(Mutex::new(templates)),
        registry: Arc::new(ShapeRegistry::builtin()),
        preview_limit: config.preview_limit,
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/import/:shape", post(import_file))
        .route("/import/:shape/blank", get(blank_file))
        .route("/templates", get(list_templates).post(save_template))
        .route("/templates/:id", get(get_template).delete(delete_template))
        .route("/export", post(export))
        .route("/export/preview", post(export_preview))
        .route("/schema/:kind", get(schema))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.bind))?;

    info!("server running on http://{}", config.server.bind);
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
