//! Feature workflow state machine
//!
//! One feature is active at a time. Entering a feature throws away whatever
//! the previous one built, picks the uploads it can work on, and builds its
//! preview. Actions run the in-process assembler or hand the work to the
//! processing engine, and always leave the controller out of its busy state.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::assemble::OutputAssembler;
use crate::bridge::{BridgeError, EngineCommand, InputFile, ProcessingEngine};
use crate::error::CoreError;
use crate::intake::{ItemId, UploadedItem, ValidationState, InvalidReason};
use crate::operation::Artifact;
use crate::page_model::PageModel;
use crate::session::Session;
use crate::text_index::{TextIndex, CANDIDATE_LIMIT};
use crate::thumbnail::ThumbnailRenderer;

/// Loading message restored when no specific work is running
pub const DEFAULT_LOADING_MESSAGE: &str = "Preparing preview...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Feature {
    Merge,
    Split,
    Lock,
    Unlock,
    ConvertToImage,
    ConvertToPdf,
    Redact,
    ApiAccess,
}

impl Feature {
    pub const ALL: [Feature; 8] = [
        Feature::Merge,
        Feature::Split,
        Feature::Lock,
        Feature::Unlock,
        Feature::ConvertToImage,
        Feature::ConvertToPdf,
        Feature::Redact,
        Feature::ApiAccess,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Feature::Merge => "Merge PDF",
            Feature::Split => "Split PDF",
            Feature::Lock => "Lock PDF",
            Feature::Unlock => "Unlock PDF",
            Feature::ConvertToImage => "PDF to Image",
            Feature::ConvertToPdf => "Image to PDF",
            Feature::Redact => "Redact PDF",
            Feature::ApiAccess => "API Access",
        }
    }

    pub fn instructions(&self) -> &'static str {
        match self {
            Feature::Merge => "Drag pages to reorder before merging.",
            Feature::Split => "Preview pages, then split into individual PDFs.",
            Feature::Lock => "Enter a password to lock your PDF on the server.",
            Feature::Unlock => "Provide the password to unlock and download a clean PDF.",
            Feature::ConvertToImage => "Convert every page of your PDF into high-quality PNG images.",
            Feature::ConvertToPdf => "Convert your images into a single PDF.",
            Feature::Redact => "Select the text to redact, then export a new PDF.",
            Feature::ApiAccess => "Single POST endpoint for all PDF operations.",
        }
    }

    /// Label of the action button at rest
    pub fn idle_label(&self) -> Option<&'static str> {
        match self {
            Feature::Merge => Some("Apply merge order"),
            Feature::Split => Some("Split PDF"),
            Feature::Lock => Some("Lock PDF"),
            Feature::Unlock => Some("Unlock PDF"),
            Feature::ConvertToImage => Some("Convert to Image"),
            Feature::ConvertToPdf => Some("Convert to PDF"),
            Feature::Redact => Some("Redact Text"),
            Feature::ApiAccess => None,
        }
    }

    /// Label of the action button while the action runs
    pub fn acting_label(&self) -> Option<&'static str> {
        match self {
            Feature::Merge => Some("Merging..."),
            Feature::Split => Some("Splitting..."),
            Feature::Lock => Some("Locking..."),
            Feature::Unlock => Some("Unlocking..."),
            Feature::ConvertToImage | Feature::ConvertToPdf => Some("Converting..."),
            Feature::Redact => Some("Redacting..."),
            Feature::ApiAccess => None,
        }
    }

    fn preview_message(&self) -> Option<&'static str> {
        match self {
            Feature::Merge | Feature::Split => Some(DEFAULT_LOADING_MESSAGE),
            Feature::Redact => Some("Scanning text for redaction..."),
            _ => None,
        }
    }

    fn preview_failure(&self) -> &'static str {
        match self {
            Feature::Redact => "Unable to load text for redaction.",
            _ => "Unable to preview PDF pages right now.",
        }
    }

    fn acting_message(&self) -> Option<&'static str> {
        match self {
            Feature::ConvertToImage => Some("Converting pages to images..."),
            Feature::ConvertToPdf => Some("Converting images to PDF..."),
            Feature::Redact => Some("Applying redactions..."),
            _ => None,
        }
    }

    /// Whether `item` is something this feature can work on
    fn accepts(&self, item: &UploadedItem) -> bool {
        match self {
            Feature::ConvertToPdf => item.is_image(),
            Feature::Unlock => item.is_pdf(),
            Feature::ApiAccess => false,
            _ => item.is_pdf() && item.state.is_valid(),
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "kebab-case")]
pub enum ControllerState {
    Idle,
    LoadingPreview(String),
    ReadyForAction,
    Acting(String),
    /// Summary of the produced artifact
    Done(String),
    Error(String),
}

impl ControllerState {
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ControllerState::LoadingPreview(_) | ControllerState::Acting(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Merge,
    Split,
    Lock { password: String },
    Unlock { password: String },
    ConvertToImage,
    ConvertToPdf,
    Redact,
}

impl Action {
    pub fn feature(&self) -> Feature {
        match self {
            Action::Merge => Feature::Merge,
            Action::Split => Feature::Split,
            Action::Lock { .. } => Feature::Lock,
            Action::Unlock { .. } => Feature::Unlock,
            Action::ConvertToImage => Feature::ConvertToImage,
            Action::ConvertToPdf => Feature::ConvertToPdf,
            Action::Redact => Feature::Redact,
        }
    }
}

#[derive(Error, Debug)]
pub enum ActionError {
    /// A condition the user can fix before retrying
    #[error("{0}")]
    Precondition(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl ActionError {
    fn precondition(message: impl Into<String>) -> Self {
        ActionError::Precondition(message.into())
    }
}

/// Transient state of the active feature
#[derive(Debug, Clone, Default)]
pub struct FeatureView {
    pub entries: Vec<ItemId>,
    /// Blocking problem shown in place of the feature
    pub alert: Option<String>,
    /// Non-blocking notice shown above the feature
    pub warning: Option<String>,
    pub loading_message: Option<&'static str>,
    pub button_label: Option<&'static str>,
    pub text_index: TextIndex,
    pub selection: BTreeSet<String>,
    pub filter: String,
    /// Reference text for the API access feature
    pub reference: Option<String>,
}

pub struct OperationController {
    feature: Option<Feature>,
    state: ControllerState,
    view: FeatureView,
    thumbnails: ThumbnailRenderer,
    assembler: OutputAssembler,
    bridge: Arc<dyn ProcessingEngine>,
}

impl OperationController {
    pub fn new(bridge: Arc<dyn ProcessingEngine>) -> Self {
        Self {
            feature: None,
            state: ControllerState::Idle,
            view: FeatureView::default(),
            thumbnails: ThumbnailRenderer::default(),
            assembler: OutputAssembler::default(),
            bridge,
        }
    }

    pub fn with_renderers(mut self, thumbnails: ThumbnailRenderer, assembler: OutputAssembler) -> Self {
        self.thumbnails = thumbnails;
        self.assembler = assembler;
        self
    }

    pub fn feature(&self) -> Option<Feature> {
        self.feature
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn view(&self) -> &FeatureView {
        &self.view
    }

    /// Switch to `feature`, discarding everything the previous one built
    pub async fn enter(&mut self, session: &mut Session, feature: Feature) -> &ControllerState {
        self.view = FeatureView::default();
        session.set_page_model(PageModel::default());
        self.feature = Some(feature);
        self.state = ControllerState::Idle;
        debug!(%feature, "Entering feature");

        if feature == Feature::ApiAccess {
            self.view.reference = Some(api_reference());
            self.state = ControllerState::ReadyForAction;
            return &self.state;
        }

        let entries: Vec<ItemId> = session
            .items()
            .iter()
            .filter(|item| feature.accepts(item))
            .map(|item| item.id)
            .collect();
        if entries.is_empty() {
            let alert = empty_alert(feature, session.items());
            info!(%feature, alert = %alert, "Nothing to work on");
            self.view.alert = Some(alert);
            return &self.state;
        }

        if feature != Feature::Unlock {
            let locked = session.locked_items();
            if !locked.is_empty() {
                let names = describe(&locked);
                self.view.warning = Some(format!(
                    "Locked PDFs detected: {}. Use Unlock PDFs to remove the password.",
                    names
                ));
            }
        }

        self.view.entries = entries;
        self.view.button_label = feature.idle_label();

        match feature.preview_message() {
            Some(message) => {
                self.view.loading_message = Some(message);
                self.state = ControllerState::LoadingPreview(message.to_string());
                let result = self.build_preview(session, feature).await;
                self.view.loading_message = None;
                self.state = match result {
                    Ok(()) => ControllerState::ReadyForAction,
                    Err(e) => {
                        warn!(%feature, error = %e, "Preview failed");
                        ControllerState::Error(feature.preview_failure().to_string())
                    }
                };
            }
            None => self.state = ControllerState::ReadyForAction,
        }
        &self.state
    }

    async fn build_preview(&mut self, session: &mut Session, feature: Feature) -> Result<(), CoreError> {
        let entries = self.view.entries.clone();
        match feature {
            Feature::Merge => {
                let (cache, items) = session.documents();
                let pages = self.thumbnails.load(cache, items, &entries).await?;
                session.set_page_model(PageModel::new(pages, true));
            }
            Feature::Split => {
                let (cache, items) = session.documents();
                let pages = self.thumbnails.load(cache, items, &entries[..1]).await?;
                session.set_page_model(PageModel::new(pages, false));
            }
            Feature::Redact => {
                let (cache, items) = session.documents();
                let handle = cache.get_or_load(entries[0], items).await?;
                self.view.text_index = TextIndex::extract(&handle)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Move a merge preview page
    pub fn reorder(&mut self, session: &mut Session, from: usize, to: usize) -> Result<(), CoreError> {
        session.page_model_mut().reorder(from, to)
    }

    pub fn set_filter(&mut self, filter: impl Into<String>) {
        self.view.filter = filter.into();
    }

    /// Redaction candidates matching the current filter
    pub fn candidates(&self) -> Vec<&str> {
        self.view.text_index.candidates(&self.view.filter, CANDIDATE_LIMIT)
    }

    /// Flip selection of a text value; returns whether it is now selected
    pub fn toggle_selection(&mut self, value: &str) -> bool {
        if self.view.selection.remove(value) {
            return false;
        }
        if self.view.text_index.runs().iter().any(|run| run.text == value) {
            self.view.selection.insert(value.to_string());
            return true;
        }
        false
    }

    pub fn clear_selection(&mut self) {
        self.view.selection.clear();
    }

    /// Run `action` for the active feature.
    ///
    /// The button label and loading message are restored whatever happens.
    pub async fn act(&mut self, session: &mut Session, action: Action) -> Result<Artifact, ActionError> {
        let feature = action.feature();
        if self.feature != Some(feature) {
            return Err(ActionError::precondition(format!(
                "Open {} before running it.",
                feature.title()
            )));
        }

        if let Some(label) = feature.acting_label() {
            self.view.button_label = Some(label);
            self.state = ControllerState::Acting(label.to_string());
        }
        self.view.loading_message = feature.acting_message();

        let result = self.run(session, action).await;

        self.view.button_label = feature.idle_label();
        self.view.loading_message = None;
        self.state = match &result {
            Ok(artifact) => {
                info!(%feature, artifact = %artifact.filename, bytes = artifact.len(), "Action finished");
                ControllerState::Done(artifact.summary())
            }
            Err(e) => {
                match e {
                    ActionError::Precondition(_) => debug!(%feature, error = %e, "Action refused"),
                    _ => error!(%feature, error = %e, "Action failed"),
                }
                ControllerState::Error(e.to_string())
            }
        };
        result
    }

    async fn run(&mut self, session: &mut Session, action: Action) -> Result<Artifact, ActionError> {
        match action {
            Action::Merge => {
                let order = session.page_model().page_refs();
                if order.is_empty() {
                    return Err(CoreError::NoPagesToMerge.into());
                }
                let (cache, items) = session.documents();
                Ok(self.assembler.merge(cache, items, &order).await?)
            }
            Action::Split => {
                let item = self.usable_pdf(session, "No PDF to split.")?;
                let command = EngineCommand::Split { file: input(item) };
                Ok(self.bridge.run(command).await?)
            }
            Action::Lock { password } => {
                let password = password.trim();
                if password.is_empty() {
                    return Err(ActionError::precondition("Please enter a password to lock the PDF."));
                }
                let item = self.single_entry(session, "No PDF to lock.", "Lock one PDF at a time.")?;
                if !item.state.is_valid() {
                    return Err(ActionError::precondition("Selected PDF is locked or corrupt."));
                }
                let command = EngineCommand::Lock {
                    file: input(item),
                    password: password.to_string(),
                };
                Ok(self.bridge.run(command).await?)
            }
            Action::Unlock { password } => {
                let password = password.trim();
                if password.is_empty() {
                    return Err(ActionError::precondition(
                        "Please enter the password to unlock the PDF.",
                    ));
                }
                let item =
                    self.single_entry(session, "No PDF to unlock.", "Unlock one PDF at a time.")?;
                if !matches!(
                    item.state,
                    ValidationState::Valid | ValidationState::Invalid(InvalidReason::PasswordProtected)
                ) {
                    return Err(ActionError::precondition(
                        "Selected PDF is corrupt or unsupported for unlocking.",
                    ));
                }
                let command = EngineCommand::Unlock {
                    file: input(item),
                    password: password.to_string(),
                };
                Ok(self.bridge.run(command).await?)
            }
            Action::ConvertToImage => {
                let id = self.usable_pdf(session, "No PDF to convert.")?.id;
                let (cache, items) = session.documents();
                Ok(self.assembler.convert_to_image(cache, items, id).await?)
            }
            Action::ConvertToPdf => {
                if self.view.entries.is_empty() {
                    return Err(ActionError::precondition("No images to convert."));
                }
                Ok(self.assembler.convert_to_pdf(session.items(), &self.view.entries)?)
            }
            Action::Redact => {
                if self.view.entries.is_empty() {
                    return Err(ActionError::precondition("No PDF to redact."));
                }
                if self.view.selection.is_empty() {
                    return Err(CoreError::NothingSelected.into());
                }
                let id = self.usable_pdf(session, "No PDF to redact.")?.id;
                let (cache, items) = session.documents();
                Ok(self
                    .assembler
                    .redact(cache, items, id, self.view.text_index.runs(), &self.view.selection)
                    .await?)
            }
        }
    }

    /// First entry that is still a valid PDF
    fn usable_pdf<'s>(&self, session: &'s Session, none: &str) -> Result<&'s UploadedItem, ActionError> {
        if self.view.entries.is_empty() {
            return Err(ActionError::precondition(none));
        }
        self.view
            .entries
            .iter()
            .filter_map(|id| session.item(*id))
            .find(|item| item.is_pdf() && item.state.is_valid())
            .ok_or_else(|| ActionError::precondition("Selected PDF is locked or corrupt."))
    }

    fn single_entry<'s>(
        &self,
        session: &'s Session,
        none: &str,
        many: &str,
    ) -> Result<&'s UploadedItem, ActionError> {
        match self.view.entries.as_slice() {
            [] => Err(ActionError::precondition(none)),
            [id] => session
                .item(*id)
                .ok_or_else(|| ActionError::precondition(none)),
            _ => Err(ActionError::precondition(many)),
        }
    }
}

fn input(item: &UploadedItem) -> InputFile {
    InputFile::new(Some(item.name.clone()), item.bytes.to_vec())
}

/// `name (reason); name (reason)` for invalid items
fn describe(items: &[&UploadedItem]) -> String {
    items
        .iter()
        .map(|item| {
            let reason = match item.state {
                ValidationState::Invalid(reason) => reason.note(),
                _ => "unknown",
            };
            format!("{} ({})", item.name, reason)
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn empty_alert(feature: Feature, items: &[UploadedItem]) -> String {
    match feature {
        Feature::Unlock => "Upload a locked PDF to unlock.".to_string(),
        Feature::ConvertToPdf => "Please upload at least one image to convert.".to_string(),
        Feature::ConvertToImage => "A PDF should be first uploaded.".to_string(),
        Feature::Redact => "Upload a PDF to redact.".to_string(),
        _ => {
            let invalid: Vec<&UploadedItem> = items
                .iter()
                .filter(|item| item.is_pdf() && item.state.is_invalid())
                .collect();
            if invalid.is_empty() {
                "A PDF should be first uploaded.".to_string()
            } else {
                format!("Cannot open: {}", describe(&invalid))
            }
        }
    }
}

/// Usage notes for the unified endpoint
pub fn api_reference() -> String {
    r#"Endpoint
  POST /pdfservice

Headers
  Content-Type: application/json

Payload
  {
    "operation": "lock",                      // lock | unlock | merge | split | redact | convert to pdf | convert to image
    "password": "secret",                     // required for lock/unlock
    "files": ["<base64-encoded file bytes>"], // single file for most ops, array for merge/convert to pdf
    "text": ["Term A", "Term B"],             // for redact
    "order": [0, 1, 2]                        // optional ordering for merge
  }

Examples
  Lock:             {"operation":"lock","password":"1234","files":["base64pdf"]}
  Unlock:           {"operation":"unlock","password":"1234","files":["base64pdf"]}
  Merge:            {"operation":"merge","files":["base64pdf1","base64pdf2"]}
  Split:            {"operation":"split","files":["base64pdf"]}
  Redact:           {"operation":"redact","text":["SSN","Mike"],"files":["base64pdf"]}
  Convert to image: {"operation":"convert to image","files":["base64pdf"]}
  Convert to pdf:   {"operation":"convert to pdf","files":["base64img1","base64img2"]}

Responses return the processed file bytes (PDF or ZIP) with the matching content type.
Errors return {"error": "..."} with a 4xx status for bad requests and 5xx for processing failures."#
        .to_string()
}
