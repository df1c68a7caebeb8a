use thiserror::Error;

use crate::intake::ItemId;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Source file {0} is missing")]
    SourceMissing(ItemId),

    #[error("PDF {0} is locked or corrupt.")]
    LockedOrCorrupt(ItemId),

    #[error("No pages rendered")]
    NoPagesRendered,

    #[error("No PDF files provided")]
    NoPdfFiles,

    #[error("No pages to merge.")]
    NoPagesToMerge,

    #[error("No matching text found to redact.")]
    NoMatchingText,

    #[error("Select at least one text entry to redact.")]
    NothingSelected,

    #[error("No valid images to convert.")]
    NoImages,

    #[error("Cannot move page {from} to {to}")]
    InvalidReorder { from: usize, to: usize },

    #[error("Page order is fixed for this preview")]
    ReorderLocked,

    #[error("Failed to parse PDF: {0}")]
    ParseError(String),

    #[error("Invalid page range: {0}")]
    InvalidRange(String),

    #[error("PDF operation failed: {0}")]
    OperationError(String),

    #[error("Render failed: {0}")]
    RenderError(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}
