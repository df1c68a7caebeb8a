//! Output assembly
//!
//! Builds final artifacts from cached documents and uploads: merged PDFs,
//! per-page archives, page images, image-to-PDF conversion and redacted
//! copies. Cached handles are only ever read; every writer works on its
//! own document.

mod convert;
mod images;
mod merge;
mod split;

use std::collections::BTreeSet;
use std::io::{Cursor, Write};

use lopdf::Document;
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub(crate) use convert::first_stem;
pub use convert::{images_to_pdf, ImageSource};
pub use images::{pages_to_images, EXPORT_SCALE};
pub use merge::{merge_pages, MERGED_FILENAME};
pub use split::{extract_pages, parse_ranges, split_archive};

use crate::cache::DocumentCache;
use crate::error::CoreError;
use crate::intake::{ItemId, UploadedItem};
use crate::operation::{download_name, Artifact};
use crate::redaction::RedactionEngine;
use crate::text_index::TextRun;

/// Assembles artifacts for the in-process operations
#[derive(Debug, Clone, Copy)]
pub struct OutputAssembler {
    export_scale: f32,
}

impl Default for OutputAssembler {
    fn default() -> Self {
        Self {
            export_scale: EXPORT_SCALE,
        }
    }
}

impl OutputAssembler {
    pub fn with_export_scale(export_scale: f32) -> Self {
        Self { export_scale }
    }

    /// Collate `order` (source, page) pairs into one PDF
    pub async fn merge(
        &self,
        cache: &mut DocumentCache,
        items: &[UploadedItem],
        order: &[(ItemId, u32)],
    ) -> Result<Artifact, CoreError> {
        if order.is_empty() {
            return Err(CoreError::NoPagesToMerge);
        }

        let mut pages = Vec::with_capacity(order.len());
        for (id, page_number) in order {
            let handle = cache.get_or_load(*id, items).await?;
            pages.push((handle, *page_number));
        }

        let bytes = merge_pages(&pages)?;
        info!(pages = pages.len(), bytes = bytes.len(), "Merged pages");
        Ok(Artifact::pdf(bytes, MERGED_FILENAME))
    }

    /// Render every page of `id` at the export scale into a PNG archive
    pub async fn convert_to_image(
        &self,
        cache: &mut DocumentCache,
        items: &[UploadedItem],
        id: ItemId,
    ) -> Result<Artifact, CoreError> {
        let handle = cache.get_or_load(id, items).await?;
        let bytes = pages_to_images(cache.engine().as_ref(), &handle, self.export_scale).await?;
        let name = item_name(items, id);
        Ok(Artifact::zip(bytes, download_name(&name, "-images.zip")))
    }

    /// One full-bleed page per image entry, in entry order
    pub fn convert_to_pdf(
        &self,
        items: &[UploadedItem],
        entries: &[ItemId],
    ) -> Result<Artifact, CoreError> {
        let images: Vec<&UploadedItem> = entries
            .iter()
            .filter_map(|id| items.iter().find(|item| item.id == *id))
            .filter(|item| item.is_image())
            .collect();
        let Some(first) = images.first() else {
            return Err(CoreError::NoImages);
        };

        let sources: Vec<ImageSource<'_>> = images
            .iter()
            .map(|item| ImageSource::new(&item.name, &item.mime, &item.bytes))
            .collect();
        let bytes = images_to_pdf(&sources)?;
        Ok(Artifact::pdf(
            bytes,
            format!("{}-converted.pdf", first_stem(&first.name)),
        ))
    }

    /// Cover every run of `id` whose text is selected
    pub async fn redact(
        &self,
        cache: &mut DocumentCache,
        items: &[UploadedItem],
        id: ItemId,
        runs: &[TextRun],
        selection: &BTreeSet<String>,
    ) -> Result<Artifact, CoreError> {
        if selection.is_empty() {
            return Err(CoreError::NothingSelected);
        }
        let handle = cache.get_or_load(id, items).await?;
        let bytes = RedactionEngine::apply(&handle, runs, selection)?;
        let name = item_name(items, id);
        Ok(Artifact::pdf(bytes, download_name(&name, "-redacted.pdf")))
    }
}

fn item_name(items: &[UploadedItem], id: ItemId) -> String {
    items
        .iter()
        .find(|item| item.id == id)
        .map(|item| item.name.clone())
        .unwrap_or_default()
}

/// Deflated ZIP of `(name, bytes)` entries, in order
pub fn zip_entries<I>(entries: I) -> Result<Vec<u8>, CoreError>
where
    I: IntoIterator<Item = (String, Vec<u8>)>,
{
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in entries {
        writer.start_file(name, options)?;
        writer
            .write_all(&data)
            .map_err(zip::result::ZipError::from)?;
    }
    Ok(writer.finish()?.into_inner())
}

/// Compress and serialize a finished document
pub(crate) fn save(doc: &mut Document) -> Result<Vec<u8>, CoreError> {
    doc.compress();
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| CoreError::OperationError(format!("Failed to save PDF: {}", e)))?;
    Ok(buffer)
}
