//! Operation names and output artifacts

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::CoreError;

/// Operations accepted by the unified endpoint and the engine binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Lock,
    Unlock,
    Split,
    Merge,
    ConvertToImage,
    ConvertToPdf,
    Redact,
}

impl OperationKind {
    pub const ALL: [OperationKind; 7] = [
        OperationKind::Lock,
        OperationKind::Unlock,
        OperationKind::Merge,
        OperationKind::Split,
        OperationKind::Redact,
        OperationKind::ConvertToImage,
        OperationKind::ConvertToPdf,
    ];

    /// Name as written in requests
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Lock => "lock",
            OperationKind::Unlock => "unlock",
            OperationKind::Split => "split",
            OperationKind::Merge => "merge",
            OperationKind::ConvertToImage => "convert to image",
            OperationKind::ConvertToPdf => "convert to pdf",
            OperationKind::Redact => "redact",
        }
    }

    /// Message used when the engine fails without saying why
    pub fn fallback_error(&self) -> &'static str {
        match self {
            OperationKind::Lock => "Failed to lock PDF.",
            OperationKind::Unlock => "Failed to unlock PDF.",
            OperationKind::Split => "Failed to split PDF.",
            OperationKind::Merge => "Failed to merge PDFs.",
            OperationKind::ConvertToImage => "Failed to convert PDF to images.",
            OperationKind::ConvertToPdf => "Failed to convert images to PDF.",
            OperationKind::Redact => "Failed to redact PDF.",
        }
    }

    /// Kind of artifact the operation produces
    pub fn output(&self) -> ContentKind {
        match self {
            OperationKind::Split | OperationKind::ConvertToImage => ContentKind::Zip,
            _ => ContentKind::Pdf,
        }
    }

    /// Whether every input must be a PDF
    pub fn consumes_pdf(&self) -> bool {
        !matches!(self, OperationKind::ConvertToPdf)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        OperationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| CoreError::OperationError(format!("Unsupported operation: {}", s.trim())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContentKind {
    Pdf,
    Zip,
}

impl ContentKind {
    pub fn mime(&self) -> &'static str {
        match self {
            ContentKind::Pdf => "application/pdf",
            ContentKind::Zip => "application/zip",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ContentKind::Pdf => "pdf",
            ContentKind::Zip => "zip",
        }
    }
}

/// Finished output ready for download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub kind: ContentKind,
    pub filename: String,
}

impl Artifact {
    pub fn pdf(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        Self {
            bytes,
            kind: ContentKind::Pdf,
            filename: filename.into(),
        }
    }

    pub fn zip(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        Self {
            bytes,
            kind: ContentKind::Zip,
            filename: filename.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Short human summary, e.g. `report-locked.pdf (12.4 KB)`
    pub fn summary(&self) -> String {
        format!("{} ({:.1} KB)", self.filename, self.bytes.len() as f64 / 1024.0)
    }
}

/// Download name derived from an uploaded PDF name.
///
/// Drops a trailing `.pdf` (any case), falls back to `plughub`, and strips
/// characters that would break a `Content-Disposition` header.
pub fn download_name(original: &str, suffix: &str) -> String {
    let trimmed = original.trim();
    let base = match trimmed.len().checked_sub(4) {
        Some(cut) if trimmed.is_char_boundary(cut) && trimmed[cut..].eq_ignore_ascii_case(".pdf") => {
            &trimmed[..cut]
        }
        _ => trimmed,
    };
    let base: String = base
        .chars()
        .filter(|c| !matches!(c, '"' | '\\' | '\r' | '\n'))
        .collect();
    let base = if base.is_empty() { "plughub" } else { base.as_str() };
    format!("{}{}", base, suffix)
}
