//! PlugHub document pipeline
//!
//! Uploads are classified and validated, PDFs are opened once into a
//! session cache, and features build previews and artifacts from there:
//!
//! - `intake` / `session`: upload batches and generation-checked validation
//! - `cache` / `engine`: decoded documents and the engine seam behind them
//! - `page_model` / `thumbnail`: ordered page previews
//! - `text_index` / `cmap` / `redaction`: positioned text runs and cover-up rewriting
//! - `assemble`: merge, split, page images and image-to-PDF
//! - `security`: the RC4 standard security handler
//! - `bridge`: request validation for the external processing engine
//! - `controller`: the per-feature workflow state machine

pub mod assemble;
pub mod bridge;
pub mod cache;
pub mod cmap;
pub mod controller;
pub mod engine;
pub mod error;
pub mod fixtures;
pub mod intake;
pub mod operation;
pub mod page;
pub mod page_model;
pub mod redaction;
pub mod security;
pub mod session;
pub mod text_index;
pub mod thumbnail;
pub mod viewport;

pub use assemble::{parse_ranges, OutputAssembler};
pub use bridge::{
    BridgeError, EngineCommand, InputFile, OperationRequest, ProcessingEngine, RequestLimits,
};
pub use cache::{DocumentCache, DocumentHandle};
pub use controller::{Action, ActionError, ControllerState, Feature, OperationController};
pub use engine::{DocumentEngine, LopdfEngine, OpenError};
pub use error::CoreError;
pub use intake::{
    FileKind, InvalidReason, ItemId, Upload, UploadedItem, ValidationOutcome, ValidationState,
};
pub use operation::{Artifact, ContentKind, OperationKind};
pub use page_model::{PageDescriptor, PageModel};
pub use redaction::RedactionEngine;
pub use session::Session;
pub use text_index::{TextIndex, TextRun};
pub use thumbnail::ThumbnailRenderer;
pub use viewport::{Matrix, Rect, Viewport};

