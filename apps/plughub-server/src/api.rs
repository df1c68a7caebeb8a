//! HTTP handlers
//!
//! - `POST /pdfservice`: unified JSON endpoint for every operation
//! - `POST /lock`, `POST /unlock`, `POST /split`: multipart single-file forms
//! - `GET /health`

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Multipart, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use plughub_core::bridge::{require_password, validate_upload};
use plughub_core::{Artifact, EngineCommand, OperationRequest};
use serde::Serialize;
use tracing::info;

use crate::error::ServerError;
use crate::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Handler: GET /health
pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "plughub-server",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Handler: POST /pdfservice
pub async fn handle_pdfservice(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ServerError> {
    let request = OperationRequest::from_json(&body)?;
    let command = request.validate(&state.limits)?;
    let kind = command.kind();
    info!(operation = %kind, inputs = command.inputs().len(), "Unified request");

    let artifact = state.engine.run(command).await?;
    if artifact.is_empty() {
        return Err(ServerError::Processing("Output file missing.".into()));
    }
    let filename = format!("pdfservice-result.{}", artifact.kind.extension());
    Ok(attachment(artifact, &filename))
}

/// Handler: POST /lock
pub async fn handle_lock(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, ServerError> {
    let form = UploadForm::read(multipart).await?;
    let file = validate_upload(form.file_name, form.file, &state.limits)?;
    let password = require_password(form.password.as_deref())?;
    run_single(&state, EngineCommand::Lock { file, password }).await
}

/// Handler: POST /unlock
pub async fn handle_unlock(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, ServerError> {
    let form = UploadForm::read(multipart).await?;
    let file = validate_upload(form.file_name, form.file, &state.limits)?;
    let password = require_password(form.password.as_deref())?;
    run_single(&state, EngineCommand::Unlock { file, password }).await
}

/// Handler: POST /split
pub async fn handle_split(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, ServerError> {
    let form = UploadForm::read(multipart).await?;
    let file = validate_upload(form.file_name, form.file, &state.limits)?;
    run_single(&state, EngineCommand::Split { file }).await
}

async fn run_single(state: &AppState, command: EngineCommand) -> Result<Response, ServerError> {
    let kind = command.kind();
    info!(operation = %kind, "Form request");
    let artifact = state.engine.run(command).await?;
    let filename = artifact.filename.clone();
    Ok(attachment(artifact, &filename))
}

/// Fields of the single-file forms
#[derive(Debug, Default)]
struct UploadForm {
    file: Option<Vec<u8>>,
    file_name: Option<String>,
    password: Option<String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ServerError> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    form.file_name = field.file_name().map(str::to_string);
                    form.file = Some(field.bytes().await?.to_vec());
                }
                "password" => form.password = Some(field.text().await?),
                _ => {}
            }
        }
        Ok(form)
    }
}

/// Artifact bytes as a download
fn attachment(artifact: Artifact, filename: &str) -> Response {
    let headers = [
        (header::CONTENT_TYPE, artifact.kind.mime().to_string()),
        (header::CONTENT_LENGTH, artifact.len().to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        ),
    ];
    (headers, artifact.bytes).into_response()
}
