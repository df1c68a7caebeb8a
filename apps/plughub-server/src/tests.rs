//! HTTP tests for the PlugHub server
//!
//! Routes are exercised through `axum-test` against a recording engine, and
//! the subprocess transport against small shell scripts standing in for
//! the engine binary.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use base64::{engine::general_purpose::STANDARD, Engine};
use plughub_core::fixtures::{build_pdf, png_bytes, PageSpec};
use plughub_core::{Artifact, BridgeError, EngineCommand, ProcessingEngine, RequestLimits};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crate::process::ProcessEngine;
use crate::{app, AppState};

/// Records commands and answers with a fixed artifact
#[derive(Default)]
struct RecordingEngine {
    commands: Mutex<Vec<EngineCommand>>,
}

#[async_trait]
impl ProcessingEngine for RecordingEngine {
    async fn run(&self, command: EngineCommand) -> Result<Artifact, BridgeError> {
        let name = command.artifact_name();
        let output = command.kind().output();
        self.commands.lock().unwrap().push(command);
        Ok(match output {
            plughub_core::ContentKind::Pdf => Artifact::pdf(b"%PDF-1.7 out".to_vec(), name),
            plughub_core::ContentKind::Zip => Artifact::zip(b"PK out".to_vec(), name),
        })
    }
}

fn server_with(engine: Arc<dyn ProcessingEngine>, max_upload_bytes: usize) -> TestServer {
    let state = Arc::new(AppState {
        limits: RequestLimits { max_upload_bytes },
        engine,
    });
    TestServer::new(app(state)).unwrap()
}

fn recording() -> (TestServer, Arc<RecordingEngine>) {
    let engine = Arc::new(RecordingEngine::default());
    (server_with(engine.clone(), 1024 * 1024), engine)
}

fn pdf_b64() -> String {
    STANDARD.encode(build_pdf(&[PageSpec::blank()]))
}

fn pdf_part(name: &str) -> Part {
    Part::bytes(build_pdf(&[PageSpec::blank()]))
        .file_name(name)
        .mime_type("application/pdf")
}

#[tokio::test]
async fn health_reports_service() {
    let (server, _) = recording();
    let body: Value = server.get("/health").await.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "plughub-server");
}

#[tokio::test]
async fn invalid_json_is_bad_request() {
    let (server, engine) = recording();
    let response = server.post("/pdfservice").text("{oops").await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"], "Invalid JSON payload.");
    assert!(engine.commands.lock().unwrap().is_empty());
}

#[tokio::test]
async fn merge_with_one_file_is_rejected_without_processing() {
    let (server, engine) = recording();
    let response = server
        .post("/pdfservice")
        .json(&json!({ "operation": "merge", "files": [pdf_b64()] }))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json::<Value>()["error"],
        "At least two PDFs are required to merge."
    );
    assert!(engine.commands.lock().unwrap().is_empty());
}

#[tokio::test]
async fn oversized_file_is_rejected() {
    let pdf = build_pdf(&[PageSpec::blank()]);
    let engine = Arc::new(RecordingEngine::default());
    let server = server_with(engine, pdf.len() - 1);
    let response = server
        .post("/pdfservice")
        .json(&json!({ "operation": "split", "files": [STANDARD.encode(&pdf)] }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json::<Value>()["error"],
        "File at index 0 exceeds size limit."
    );
}

#[tokio::test]
async fn unified_success_returns_attachment() {
    let (server, engine) = recording();
    let response = server
        .post("/pdfservice")
        .json(&json!({
            "operation": " Convert To Image ",
            "files": [pdf_b64()],
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.header("content-type"), "application/zip");
    assert_eq!(
        response.header("content-disposition"),
        "attachment; filename=\"pdfservice-result.zip\""
    );
    assert_eq!(response.as_bytes().as_ref(), b"PK out");
    assert!(matches!(
        engine.commands.lock().unwrap()[0],
        EngineCommand::ConvertToImage { .. }
    ));
}

#[tokio::test]
async fn convert_to_pdf_requires_images() {
    let (server, _) = recording();
    let response = server
        .post("/pdfservice")
        .json(&json!({
            "operation": "convert to pdf",
            "files": [STANDARD.encode(png_bytes(4, 4)), pdf_b64()],
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json::<Value>()["error"],
        "File at index 1 must be an image (PNG/JPEG/WebP)."
    );
}

#[tokio::test]
async fn lock_form_names_download() {
    let (server, engine) = recording();
    let form = MultipartForm::new()
        .add_part("file", pdf_part("Report.pdf"))
        .add_text("password", "  pw  ");
    let response = server.post("/lock").multipart(form).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(
        response.header("content-disposition"),
        "attachment; filename=\"Report-locked.pdf\""
    );
    let commands = engine.commands.lock().unwrap();
    match &commands[0] {
        EngineCommand::Lock { password, file } => {
            assert_eq!(password, "pw");
            assert_eq!(file.name.as_deref(), Some("Report.pdf"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn form_validation_messages() {
    let (server, _) = recording();

    let response = server
        .post("/unlock")
        .multipart(MultipartForm::new().add_text("password", "pw"))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"], "PDF upload missing.");

    let response = server
        .post("/unlock")
        .multipart(MultipartForm::new().add_part("file", pdf_part("a.pdf")))
        .await;
    assert_eq!(response.json::<Value>()["error"], "Password is required.");

    let text = Part::bytes(b"hello".to_vec()).file_name("notes.txt");
    let response = server
        .post("/split")
        .multipart(MultipartForm::new().add_part("file", text))
        .await;
    assert_eq!(response.json::<Value>()["error"], "Uploaded file must be a PDF.");
}

#[cfg(unix)]
mod subprocess {
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    /// Write an executable shell script; arguments are `op -- paths...`
    fn script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("engine.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn process_server(binary: PathBuf, timeout: Duration) -> TestServer {
        server_with(Arc::new(ProcessEngine::new(binary, timeout)), 1024 * 1024)
    }

    async fn lock(server: &TestServer) -> axum_test::TestResponse {
        server
            .post("/pdfservice")
            .json(&json!({ "operation": "lock", "password": "pw", "files": [pdf_b64()] }))
            .await
    }

    #[tokio::test]
    async fn engine_output_is_returned() {
        let dir = TempDir::new().unwrap();
        let binary = script(&dir, r#"[ "$2" = "--" ] || exit 64
cp "$3" "$4""#);
        let response = lock(&process_server(binary, Duration::from_secs(10))).await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert!(response.as_bytes().starts_with(b"%PDF-"));
    }

    #[tokio::test]
    async fn engine_stderr_becomes_error() {
        let dir = TempDir::new().unwrap();
        let binary = script(&dir, "echo 'Invalid password for PDF.' >&2\nexit 65");
        let response = lock(&process_server(binary, Duration::from_secs(10))).await;
        assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.json::<Value>()["error"], "Invalid password for PDF.");
    }

    #[tokio::test]
    async fn silent_failure_uses_fallback() {
        let dir = TempDir::new().unwrap();
        let binary = script(&dir, "exit 0");
        let response = lock(&process_server(binary, Duration::from_secs(10))).await;
        assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.json::<Value>()["error"], "Failed to lock PDF.");
    }

    #[tokio::test]
    async fn slow_engine_times_out() {
        let dir = TempDir::new().unwrap();
        let binary = script(&dir, "sleep 5");
        let response = lock(&process_server(binary, Duration::from_millis(200))).await;
        assert_eq!(response.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn missing_binary_cannot_start() {
        let dir = TempDir::new().unwrap();
        let response = lock(&process_server(
            dir.path().join("no-such-engine"),
            Duration::from_secs(1),
        ))
        .await;
        assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.json::<Value>()["error"], "Unable to start process.");
    }
}
