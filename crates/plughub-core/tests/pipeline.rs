//! End-to-end pipeline tests
//!
//! Drives sessions, the controller and the assembler the way the server
//! and the web front end do, using generated PDFs and images.

use std::collections::BTreeSet;
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::RgbaImage;
use lopdf::Document;
use pretty_assertions::assert_eq;

use plughub_core::assemble::{images_to_pdf, ImageSource};
use plughub_core::engine::open_document;
use plughub_core::fixtures::{blank_engine, build_pdf, page_texts, PageSpec};
use plughub_core::page;
use plughub_core::{
    Action, Artifact, BridgeError, ControllerState, CoreError, DocumentEngine, DocumentHandle,
    EngineCommand, Feature, InvalidReason, LopdfEngine, OpenError, OperationController,
    OperationRequest, OutputAssembler, ProcessingEngine, RequestLimits, Session, TextIndex,
    Upload, ValidationState,
};

fn pdf(name: &str, specs: &[PageSpec]) -> Upload {
    Upload::new(name, "application/pdf", build_pdf(specs))
}

/// Opens documents after a fixed delay
struct DelayedEngine {
    delay: Duration,
    inner: LopdfEngine,
}

impl DelayedEngine {
    fn new(millis: u64) -> Self {
        Self {
            delay: Duration::from_millis(millis),
            inner: blank_engine(),
        }
    }
}

#[async_trait]
impl DocumentEngine for DelayedEngine {
    async fn open(&self, bytes: &[u8]) -> Result<Document, OpenError> {
        tokio::time::sleep(self.delay).await;
        open_document(bytes)
    }

    async fn rasterize(
        &self,
        handle: &DocumentHandle,
        page_number: u32,
        scale: f32,
    ) -> Result<RgbaImage, CoreError> {
        self.inner.rasterize(handle, page_number, scale).await
    }
}

/// Counts commands and never produces output
#[derive(Default)]
struct CountingEngine {
    calls: Mutex<usize>,
}

#[async_trait]
impl ProcessingEngine for CountingEngine {
    async fn run(&self, command: EngineCommand) -> Result<Artifact, BridgeError> {
        *self.calls.lock().unwrap() += 1;
        Err(BridgeError::processing(command.kind().fallback_error()))
    }
}

#[tokio::test]
async fn latest_validation_generation_wins() {
    let mut session = Session::new(Arc::new(blank_engine()));
    let slow = DelayedEngine::new(80);
    let fast = DelayedEngine::new(1);

    let first = session.replace_batch(vec![Upload::new(
        "broken.pdf",
        "application/pdf",
        b"%PDF-1.7 broken".to_vec(),
    )]);
    let second = session.replace_batch(vec![pdf("fine.pdf", &[PageSpec::blank()])]);

    let (stale, current) = tokio::join!(first.execute(&slow), second.execute(&fast));

    // The fast run lands first, the slow one arrives afterwards
    assert!(session.commit_validation(current));
    assert!(!session.commit_validation(stale));

    let states: Vec<ValidationState> = session.items().iter().map(|i| i.state).collect();
    assert_eq!(states, vec![ValidationState::Valid]);
}

#[tokio::test]
async fn merge_follows_descriptor_order() {
    let mut session = Session::new(Arc::new(blank_engine()));
    session
        .upload(vec![
            pdf("a.pdf", &[PageSpec::text("A1"), PageSpec::text("A2")]),
            pdf("b.pdf", &[PageSpec::text("B1")]),
        ])
        .await;
    let a = session.items()[0].id;
    let b = session.items()[1].id;

    let (cache, items) = session.documents();
    let artifact = OutputAssembler::default()
        .merge(cache, items, &[(a, 2), (b, 1), (a, 1)])
        .await
        .unwrap();

    assert_eq!(
        page_texts(&artifact.bytes),
        vec![vec!["A2"], vec!["B1"], vec!["A1"]]
    );
}

#[tokio::test]
async fn redaction_covers_every_occurrence_and_nothing_else() {
    let mut session = Session::new(Arc::new(blank_engine()));
    session
        .upload(vec![pdf(
            "memo.pdf",
            &[
                PageSpec::text("Mike"),
                PageSpec::text("Anna"),
                PageSpec::text("Mike"),
            ],
        )])
        .await;
    let id = session.items()[0].id;

    let (cache, items) = session.documents();
    let handle = cache.get_or_load(id, items).await.unwrap();
    let index = TextIndex::extract(&handle).unwrap();
    let pages: Vec<u32> = index
        .runs()
        .iter()
        .filter(|run| run.text == "Mike")
        .map(|run| run.page_number)
        .collect();
    assert_eq!(pages, vec![1, 3]);

    let selection = BTreeSet::from(["Mike".to_string()]);
    let artifact = OutputAssembler::default()
        .redact(cache, items, id, index.runs(), &selection)
        .await
        .unwrap();

    let redacted = Document::load_mem(&artifact.bytes).unwrap();
    let labels: Vec<usize> = redacted
        .get_pages()
        .into_values()
        .map(|page_id| {
            let content = page::content(&redacted, page_id).unwrap();
            String::from_utf8_lossy(&content).matches("[REDACTED]").count()
        })
        .collect();
    assert_eq!(labels, vec![1, 0, 1]);

    let absent = BTreeSet::from(["Zed".to_string()]);
    let result = OutputAssembler::default()
        .redact(cache, items, id, index.runs(), &absent)
        .await;
    assert!(matches!(result, Err(CoreError::NoMatchingText)));
}

#[tokio::test]
async fn pdf_to_images_and_back_keeps_pixel_size() {
    let mut session = Session::new(Arc::new(blank_engine()));
    session.upload(vec![pdf("letter.pdf", &[PageSpec::blank()])]).await;
    let id = session.items()[0].id;

    let (cache, items) = session.documents();
    let archive = OutputAssembler::default()
        .convert_to_image(cache, items, id)
        .await
        .unwrap();

    let mut zip = zip::ZipArchive::new(Cursor::new(archive.bytes)).unwrap();
    assert_eq!(zip.len(), 1);
    let mut png = Vec::new();
    zip.by_name("page-1.png").unwrap().read_to_end(&mut png).unwrap();
    let raster = image::load_from_memory(&png).unwrap();
    assert_eq!((raster.width(), raster.height()), (1224, 1584));

    let rebuilt = images_to_pdf(&[ImageSource::new("page-1.png", "image/png", &png)]).unwrap();
    let doc = Document::load_mem(&rebuilt).unwrap();
    let pages = doc.get_pages();
    assert_eq!(pages.len(), 1);
    assert_eq!(
        page::view_box(&doc, pages[&1]),
        [0.0, 0.0, 1224.0, 1584.0]
    );
}

#[test]
fn unified_merge_with_one_file_is_client_fault() {
    use base64::{engine::general_purpose::STANDARD, Engine};

    let body = serde_json::json!({
        "operation": "merge",
        "files": [STANDARD.encode(build_pdf(&[PageSpec::blank()]))],
    });
    let request = OperationRequest::from_json(body.to_string().as_bytes()).unwrap();
    let err = request.validate(&RequestLimits::default()).unwrap_err();
    assert!(err.is_client());
    assert_eq!(err.to_string(), "At least two PDFs are required to merge.");
}

#[tokio::test]
async fn controller_recovers_after_engine_failure() {
    let mut session = Session::new(Arc::new(blank_engine()));
    session.upload(vec![pdf("a.pdf", &[PageSpec::blank()])]).await;
    let engine = Arc::new(CountingEngine::default());
    let mut controller = OperationController::new(engine.clone());

    controller.enter(&mut session, Feature::Split).await;
    let err = controller.act(&mut session, Action::Split).await.unwrap_err();
    assert_eq!(err.to_string(), "Failed to split PDF.");
    assert_eq!(*engine.calls.lock().unwrap(), 1);
    assert!(!controller.state().is_busy());
    assert_eq!(controller.view().button_label, Some("Split PDF"));

    // Other features stay usable
    let state = controller.enter(&mut session, Feature::Merge).await.clone();
    assert_eq!(state, ControllerState::ReadyForAction);
    let merged = controller.act(&mut session, Action::Merge).await.unwrap();
    assert_eq!(page_texts(&merged.bytes).len(), 1);
}

#[tokio::test]
async fn locked_uploads_only_reach_unlock() {
    struct LockedEngine;

    #[async_trait]
    impl DocumentEngine for LockedEngine {
        async fn open(&self, _bytes: &[u8]) -> Result<Document, OpenError> {
            Err(OpenError::PasswordRequired)
        }

        async fn rasterize(
            &self,
            _handle: &DocumentHandle,
            _page_number: u32,
            _scale: f32,
        ) -> Result<RgbaImage, CoreError> {
            Err(CoreError::RenderError("locked".into()))
        }
    }

    let mut session = Session::new(Arc::new(LockedEngine));
    session.upload(vec![pdf("secret.pdf", &[PageSpec::blank()])]).await;
    assert_eq!(
        session.items()[0].state,
        ValidationState::Invalid(InvalidReason::PasswordProtected)
    );

    let mut controller = OperationController::new(Arc::new(CountingEngine::default()));
    controller.enter(&mut session, Feature::Merge).await;
    assert_eq!(
        controller.view().alert.as_deref(),
        Some("Cannot open: secret.pdf (password-protected PDF)")
    );

    controller.enter(&mut session, Feature::Unlock).await;
    assert_eq!(controller.view().entries, vec![session.items()[0].id]);
    assert_eq!(controller.view().alert, None);
}
