//! Subcommand implementations
//!
//! Each command reads its inputs from disk, runs the matching pipeline
//! step and writes exactly one output file.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lopdf::Document;
use plughub_core::assemble::{
    images_to_pdf, merge_pages, pages_to_images, split_archive, ImageSource, EXPORT_SCALE,
};
use plughub_core::engine::{open_document, LopdfEngine};
use plughub_core::redaction::RedactionEngine;
use plughub_core::security;
use plughub_core::{DocumentHandle, ItemId, OpenError, TextIndex, TextRun};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::Command;

pub async fn run(command: Command) -> Result<(), EngineError> {
    match command {
        Command::Lock { input, output, password } => lock(&input, &output, &password),
        Command::Unlock { input, output, password } => unlock(&input, &output, &password),
        Command::Split { input, output, pages } => split(&input, &output, pages.as_deref()),
        Command::Merge { output, inputs } => merge(&output, &inputs),
        Command::Redact { input, output, terms } => redact(&input, &output, &terms),
        Command::PdfToImages { input, output } => pdf_to_images(&input, &output).await,
        Command::ImagesToPdf { output, inputs } => images_to_pdf_file(&output, &inputs),
    }
}

fn lock(input: &Path, output: &Path, password: &str) -> Result<(), EngineError> {
    if password.is_empty() {
        return Err(EngineError::Usage("Password required.".into()));
    }
    let bytes = read_source(input)?;
    let mut doc = Document::load_mem(&bytes)
        .map_err(|e| EngineError::Data(format!("Unable to read PDF: {}", e)))?;
    doc.compress();
    security::encrypt(&mut doc, password)?;
    save(&mut doc, output)?;
    info!(output = %output.display(), "Locked PDF");
    Ok(())
}

fn unlock(input: &Path, output: &Path, password: &str) -> Result<(), EngineError> {
    if password.is_empty() {
        return Err(EngineError::Usage("Password required to unlock PDF.".into()));
    }
    let bytes = read_source(input)?;
    let mut doc = Document::load_mem(&bytes)
        .map_err(|e| EngineError::Data(format!("Unable to decrypt PDF: {}", e)))?;
    match security::decrypt(&mut doc, password) {
        Ok(()) => {}
        // Nothing to remove; the copy is still written
        Err(security::SecurityError::NotEncrypted) => debug!("Input was not encrypted"),
        Err(e) => return Err(e.into()),
    }
    save(&mut doc, output)?;
    info!(output = %output.display(), "Unlocked PDF");
    Ok(())
}

fn split(input: &Path, output: &Path, pages: Option<&str>) -> Result<(), EngineError> {
    let doc = load_pdf(&read_source(input)?)?;
    let archive = split_archive(&doc, pages)?;
    std::fs::write(output, archive)?;
    info!(output = %output.display(), "Split PDF");
    Ok(())
}

fn merge(output: &Path, inputs: &[PathBuf]) -> Result<(), EngineError> {
    if inputs.iter().any(|path| !path.is_file()) {
        return Err(EngineError::MissingInput(
            "One or more input PDFs are missing.".into(),
        ));
    }

    let mut pages = Vec::new();
    for (index, path) in inputs.iter().enumerate() {
        let handle = Arc::new(handle(ItemId(index), std::fs::read(path)?)?);
        for page_number in 1..=handle.page_count() {
            pages.push((Arc::clone(&handle), page_number));
        }
    }
    if pages.is_empty() {
        return Err(EngineError::Data("No pages to merge.".into()));
    }

    std::fs::write(output, merge_pages(&pages)?)?;
    info!(inputs = inputs.len(), pages = pages.len(), "Merged PDFs");
    Ok(())
}

/// Cover every text run containing one of `terms`.
///
/// A document without any hit is still written, unchanged.
fn redact(input: &Path, output: &Path, terms: &[String]) -> Result<(), EngineError> {
    let terms: BTreeSet<&str> = terms
        .iter()
        .map(|term| term.trim())
        .filter(|term| !term.is_empty())
        .collect();
    if terms.is_empty() {
        return Err(EngineError::Usage("Redaction text list is required.".into()));
    }

    let handle = handle(ItemId(0), read_source(input)?)?;
    let index = TextIndex::extract(&handle)?;
    let targets: Vec<&TextRun> = index
        .runs()
        .iter()
        .filter(|run| terms.iter().any(|term| run.text.contains(term)))
        .collect();
    if targets.is_empty() {
        warn!(terms = terms.len(), "No text matched the redaction terms");
    } else {
        debug!(terms = terms.len(), matches = targets.len(), "Matched redaction terms");
    }

    let bytes = RedactionEngine::cover(&handle, &targets)?;
    std::fs::write(output, bytes)?;
    info!(output = %output.display(), boxes = targets.len(), "Redacted PDF");
    Ok(())
}

async fn pdf_to_images(input: &Path, output: &Path) -> Result<(), EngineError> {
    let handle = handle(ItemId(0), read_source(input)?)?;
    let engine = LopdfEngine::detect()?;
    let archive = pages_to_images(&engine, &handle, EXPORT_SCALE).await?;
    std::fs::write(output, archive)?;
    info!(pages = handle.page_count(), "Converted PDF to images");
    Ok(())
}

fn images_to_pdf_file(output: &Path, inputs: &[PathBuf]) -> Result<(), EngineError> {
    if inputs.iter().any(|path| !path.is_file()) {
        return Err(EngineError::MissingInput(
            "One or more input images are missing.".into(),
        ));
    }

    let files = inputs
        .iter()
        .map(|path| {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok((name, std::fs::read(path)?))
        })
        .collect::<Result<Vec<(String, Vec<u8>)>, EngineError>>()?;
    let sources: Vec<ImageSource<'_>> = files
        .iter()
        .map(|(name, bytes)| ImageSource::new(name, "", bytes))
        .collect();

    std::fs::write(output, images_to_pdf(&sources)?)?;
    info!(images = sources.len(), "Converted images to PDF");
    Ok(())
}

fn read_source(path: &Path) -> Result<Vec<u8>, EngineError> {
    if !path.is_file() {
        return Err(EngineError::MissingInput("Source file missing.".into()));
    }
    Ok(std::fs::read(path)?)
}

fn load_pdf(bytes: &[u8]) -> Result<Document, EngineError> {
    open_document(bytes).map_err(|e| match e {
        OpenError::PasswordRequired => EngineError::Data("PDF is password-protected.".into()),
        OpenError::Corrupt(reason) => EngineError::Data(format!("Unable to read PDF: {}", reason)),
    })
}

fn handle(id: ItemId, bytes: Vec<u8>) -> Result<DocumentHandle, EngineError> {
    let document = load_pdf(&bytes)?;
    Ok(DocumentHandle::new(id, Arc::from(bytes), document))
}

fn save(doc: &mut Document, output: &Path) -> Result<(), EngineError> {
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| EngineError::Internal(format!("Failed to save PDF: {}", e)))?;
    std::fs::write(output, buffer)?;
    Ok(())
}
