//! HTTP boundary for classrooms, documents and generated artifacts.
//!
//! The caller's account arrives in the `x-account-id` header; authenticating
//! it is the job of whatever sits in front of this server.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Health check |
//! | `POST` | `/classrooms` | Create a classroom |
//! | `GET` | `/classrooms` | List classrooms |
//! | `POST` | `/classrooms/{id}/documents` | Upload a document (multipart `file`) |
//! | `GET` | `/classrooms/{id}/documents` | List documents |
//! | `GET` / `DELETE` | `/documents/{id}` | Fetch or delete a document |
//! | `POST` | `/documents/{id}/reindex` | Rebuild a READY document's index |
//! | `POST` | `/classrooms/{id}/chat` | Ask a question |
//! | `POST` | `/classrooms/{id}/flashcard-sets` | Generate flashcards |
//! | `POST` | `/classrooms/{id}/quiz-sets` | Generate a quiz |
//! | `POST` | `/classrooms/{id}/summaries` | Generate a summary |
//! | `GET` | `/classrooms/{id}/artifacts` | List artifacts |
//! | `GET` / `DELETE` | `/artifacts/{id}` | Fetch or delete an artifact |
//! | `GET` | `/usage` | Today's usage for the account |

use crate::app::App;
use crate::error::{Result, StudyError};
use crate::generation::GenerationRequest;
use crate::models::{
    ArtifactKind, ArtifactPayload, Classroom, Document, GeneratedArtifact, GenerationMode,
    SourceRef, UsageCounter,
};
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

pub const ACCOUNT_HEADER: &str = "x-account-id";

/// Shared server state.
#[derive(Clone)]
struct AppState {
    app: Arc<App>,
}

/// Build the router over an assembled application.
pub fn router(app: Arc<App>) -> Router {
    let server = &app.settings().server;
    let body_limit = DefaultBodyLimit::max(server.max_upload_bytes);
    let cors = if server.permissive_cors {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(handle_health))
        .route("/classrooms", post(handle_create_classroom).get(handle_list_classrooms))
        .route(
            "/classrooms/{id}/documents",
            post(handle_upload).get(handle_list_documents),
        )
        .route(
            "/documents/{id}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/documents/{id}/reindex", post(handle_reindex))
        .route("/classrooms/{id}/chat", post(handle_chat))
        .route("/classrooms/{id}/flashcard-sets", post(handle_flashcards))
        .route("/classrooms/{id}/quiz-sets", post(handle_quiz))
        .route("/classrooms/{id}/summaries", post(handle_summary))
        .route("/classrooms/{id}/artifacts", get(handle_list_artifacts))
        .route(
            "/artifacts/{id}",
            get(handle_get_artifact).delete(handle_delete_artifact),
        )
        .route("/usage", get(handle_usage))
        .layer(body_limit)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { app })
}

/// Bind to the configured address and serve until the process is stopped.
pub async fn run_server(app: Arc<App>) -> Result<()> {
    let addr = format!("{}:{}", app.settings().server.host, app.settings().server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, router(app)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// HTTP status for each error class.
fn status_for(err: &StudyError) -> StatusCode {
    match err {
        StudyError::Validation(_) => StatusCode::BAD_REQUEST,
        StudyError::NotFound(_) => StatusCode::NOT_FOUND,
        StudyError::Conflict(_) => StatusCode::CONFLICT,
        StudyError::NoRelevantContext => StatusCode::UNPROCESSABLE_ENTITY,
        StudyError::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
        StudyError::Extraction(_)
        | StudyError::Embedding(_)
        | StudyError::Index(_)
        | StudyError::Generation(_)
        | StudyError::Transient(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<StudyError> for AppError {
    fn from(err: StudyError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            error!("Request failed: {}", err);
        }
        AppError::new(status, err.code(), err.to_string())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), "validation_error", err.body_text())
    }
}

type ApiResult<T> = std::result::Result<T, AppError>;

// ============ Account header ============

/// The calling account, taken from the `x-account-id` header.
struct Account(String);

impl<S: Send + Sync> FromRequestParts<S> for Account {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> ApiResult<Self> {
        parts
            .headers
            .get(ACCOUNT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Account(v.to_string()))
            .ok_or_else(|| {
                AppError::new(
                    StatusCode::UNAUTHORIZED,
                    "unauthorized",
                    format!("missing {} header", ACCOUNT_HEADER),
                )
            })
    }
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Deserialize)]
struct CreateClassroomRequest {
    name: String,
}

async fn handle_create_classroom(
    State(state): State<AppState>,
    Account(account): Account,
    Json(body): Json<CreateClassroomRequest>,
) -> ApiResult<(StatusCode, Json<Classroom>)> {
    let classroom = state.app.create_classroom(&account, &body.name).await?;
    Ok((StatusCode::CREATED, Json(classroom)))
}

async fn handle_list_classrooms(
    State(state): State<AppState>,
    Account(account): Account,
) -> ApiResult<Json<Vec<Classroom>>> {
    Ok(Json(state.app.list_classrooms(&account).await?))
}

/// Store the uploaded file and start ingestion in the background.
async fn handle_upload(
    State(state): State<AppState>,
    Account(account): Account,
    Path(classroom_id): Path<Uuid>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Document>)> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let mime_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await?;

        let ingestion = state.app.ingestion();
        let document = ingestion
            .upload(&account, classroom_id, &filename, mime_type.as_deref(), &bytes)
            .await?;
        // Failures end up on the document record.
        drop(ingestion.spawn(&account, document.id));
        return Ok((StatusCode::ACCEPTED, Json(document)));
    }

    Err(StudyError::Validation("multipart field \"file\" is required".to_string()).into())
}

async fn handle_list_documents(
    State(state): State<AppState>,
    Account(account): Account,
    Path(classroom_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Document>>> {
    Ok(Json(state.app.list_documents(&account, classroom_id).await?))
}

async fn handle_get_document(
    State(state): State<AppState>,
    Account(account): Account,
    Path(document_id): Path<Uuid>,
) -> ApiResult<Json<Document>> {
    Ok(Json(state.app.document(&account, document_id).await?))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Account(account): Account,
    Path(document_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state
        .app
        .ingestion()
        .delete_document(&account, document_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReindexResponse {
    document_id: Uuid,
    chunk_count: usize,
}

async fn handle_reindex(
    State(state): State<AppState>,
    Account(account): Account,
    Path(document_id): Path<Uuid>,
) -> ApiResult<Json<ReindexResponse>> {
    let ingestion = state.app.ingestion();
    let chunk_count = tokio::spawn(async move { ingestion.reindex(&account, document_id).await })
        .await
        .map_err(|e| AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string()))??;
    Ok(Json(ReindexResponse {
        document_id,
        chunk_count,
    }))
}

/// Run a generation to completion even if the client goes away.
async fn generate(
    state: AppState,
    account: String,
    classroom_id: Uuid,
    kind: ArtifactKind,
    mut request: GenerationRequest,
) -> ApiResult<GeneratedArtifact> {
    request.account_id = account;
    request.classroom_id = classroom_id;

    let generation = state.app.generation();
    let artifact = tokio::spawn(async move { generation.generate(kind, request).await })
        .await
        .map_err(|e| AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string()))??;
    Ok(artifact)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatResponse {
    artifact_id: Uuid,
    answer: String,
    sources: Vec<SourceRef>,
    has_relevant_context: bool,
    mode: GenerationMode,
}

impl From<GeneratedArtifact> for ChatResponse {
    fn from(artifact: GeneratedArtifact) -> Self {
        let (answer, has_relevant_context) = match artifact.payload {
            ArtifactPayload::ChatAnswer {
                answer,
                has_relevant_context,
                ..
            } => (answer, has_relevant_context),
            _ => (String::new(), false),
        };
        Self {
            artifact_id: artifact.id,
            answer,
            sources: artifact.sources,
            has_relevant_context,
            mode: artifact.mode,
        }
    }
}

async fn handle_chat(
    State(state): State<AppState>,
    Account(account): Account,
    Path(classroom_id): Path<Uuid>,
    Json(request): Json<GenerationRequest>,
) -> ApiResult<Json<ChatResponse>> {
    let artifact = generate(state, account, classroom_id, ArtifactKind::ChatAnswer, request).await?;
    Ok(Json(artifact.into()))
}

async fn handle_flashcards(
    State(state): State<AppState>,
    Account(account): Account,
    Path(classroom_id): Path<Uuid>,
    Json(request): Json<GenerationRequest>,
) -> ApiResult<(StatusCode, Json<GeneratedArtifact>)> {
    let artifact = generate(state, account, classroom_id, ArtifactKind::Flashcards, request).await?;
    Ok((StatusCode::CREATED, Json(artifact)))
}

async fn handle_quiz(
    State(state): State<AppState>,
    Account(account): Account,
    Path(classroom_id): Path<Uuid>,
    Json(request): Json<GenerationRequest>,
) -> ApiResult<(StatusCode, Json<GeneratedArtifact>)> {
    let artifact = generate(state, account, classroom_id, ArtifactKind::Quiz, request).await?;
    Ok((StatusCode::CREATED, Json(artifact)))
}

async fn handle_summary(
    State(state): State<AppState>,
    Account(account): Account,
    Path(classroom_id): Path<Uuid>,
    Json(request): Json<GenerationRequest>,
) -> ApiResult<(StatusCode, Json<GeneratedArtifact>)> {
    let artifact = generate(state, account, classroom_id, ArtifactKind::Summary, request).await?;
    Ok((StatusCode::CREATED, Json(artifact)))
}

async fn handle_list_artifacts(
    State(state): State<AppState>,
    Account(account): Account,
    Path(classroom_id): Path<Uuid>,
) -> ApiResult<Json<Vec<GeneratedArtifact>>> {
    Ok(Json(state.app.list_artifacts(&account, classroom_id).await?))
}

async fn handle_get_artifact(
    State(state): State<AppState>,
    Account(account): Account,
    Path(artifact_id): Path<Uuid>,
) -> ApiResult<Json<GeneratedArtifact>> {
    Ok(Json(state.app.artifact(&account, artifact_id).await?))
}

async fn handle_delete_artifact(
    State(state): State<AppState>,
    Account(account): Account,
    Path(artifact_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.app.delete_artifact(&account, artifact_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_usage(
    State(state): State<AppState>,
    Account(account): Account,
) -> ApiResult<Json<UsageCounter>> {
    Ok(Json(state.app.usage(&account).await?))
}
