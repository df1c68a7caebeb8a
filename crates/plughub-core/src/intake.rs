//! Upload classification and structural validation
//!
//! Every upload batch gets a fresh validation generation. A run snapshots the
//! PDF items that still need a structural open, executes against a
//! [`DocumentEngine`], and its outcome only lands if no newer batch started
//! in the meantime.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::{DocumentEngine, OpenError};

/// Stable identity of an uploaded item within its batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ItemId(pub usize);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind declared by MIME type and file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Image,
    Other,
}

impl FileKind {
    pub fn classify(name: &str, mime: &str) -> Self {
        let name = name.to_ascii_lowercase();
        let mime = mime.trim().to_ascii_lowercase();
        let pdf_name = name.ends_with(".pdf");

        if mime == "application/pdf" || pdf_name {
            FileKind::Pdf
        } else if mime.starts_with("image/") {
            FileKind::Image
        } else {
            FileKind::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidReason {
    Corrupt,
    PasswordProtected,
    UnsupportedType,
}

impl InvalidReason {
    /// Short note shown next to the file name
    pub fn note(&self) -> &'static str {
        match self {
            InvalidReason::Corrupt => "corrupt or password-protected PDF",
            InvalidReason::PasswordProtected => "password-protected PDF",
            InvalidReason::UnsupportedType => "unsupported file type",
        }
    }
}

impl From<&OpenError> for InvalidReason {
    fn from(err: &OpenError) -> Self {
        match err {
            OpenError::PasswordRequired => InvalidReason::PasswordProtected,
            OpenError::Corrupt(_) => InvalidReason::Corrupt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum ValidationState {
    Pending,
    Valid,
    Invalid(InvalidReason),
}

impl ValidationState {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationState::Valid)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, ValidationState::Invalid(_))
    }

    pub fn is_locked(&self) -> bool {
        matches!(
            self,
            ValidationState::Invalid(InvalidReason::PasswordProtected)
        )
    }
}

/// Raw upload as received from the user
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadedItem {
    pub id: ItemId,
    pub name: String,
    pub mime: String,
    pub bytes: Arc<[u8]>,
    pub kind: FileKind,
    pub state: ValidationState,
}

impl UploadedItem {
    /// Classify an upload. Images are usable immediately, anything that is
    /// neither PDF nor image is rejected, PDFs wait for structural validation.
    pub fn new(id: ItemId, upload: Upload) -> Self {
        let kind = FileKind::classify(&upload.name, &upload.mime);
        let state = match kind {
            FileKind::Pdf => ValidationState::Pending,
            FileKind::Image => ValidationState::Valid,
            FileKind::Other => ValidationState::Invalid(InvalidReason::UnsupportedType),
        };

        Self {
            id,
            name: upload.name,
            mime: upload.mime,
            bytes: upload.bytes.into(),
            kind,
            state,
        }
    }

    pub fn is_pdf(&self) -> bool {
        self.kind == FileKind::Pdf
    }

    pub fn is_image(&self) -> bool {
        self.kind == FileKind::Image
    }

    /// File name without its final extension, used for download names
    pub fn stem(&self) -> &str {
        match self.name.rfind('.') {
            Some(dot) if dot > 0 => &self.name[..dot],
            _ => &self.name,
        }
    }

    pub fn size_mb(&self) -> String {
        format!("{:.1}", self.bytes.len() as f64 / 1024.0 / 1024.0)
    }
}

/// Row of the visible file list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRow {
    pub name: String,
    pub size_mb: String,
    pub note: Option<&'static str>,
}

impl From<&UploadedItem> for FileRow {
    fn from(item: &UploadedItem) -> Self {
        let note = match item.state {
            ValidationState::Invalid(reason) => Some(reason.note()),
            _ => None,
        };
        Self {
            name: item.name.clone(),
            size_mb: item.size_mb(),
            note,
        }
    }
}

/// Hands out validation generations and decides which outcomes may commit
#[derive(Debug, Default)]
pub struct IntakeValidator {
    generation: u64,
}

impl IntakeValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_generation(&self) -> u64 {
        self.generation
    }

    /// Start a run over every PDF still pending in `items`
    pub fn begin(&mut self, items: &[UploadedItem]) -> ValidationRun {
        self.generation += 1;
        let targets = items
            .iter()
            .filter(|item| item.is_pdf() && item.state == ValidationState::Pending)
            .map(|item| (item.id, Arc::clone(&item.bytes)))
            .collect();

        ValidationRun {
            generation: self.generation,
            targets,
        }
    }

    /// Apply `outcome` to `items` if it belongs to the current generation.
    ///
    /// Returns the ids that became invalid, or `None` when the outcome is stale.
    pub fn commit(
        &self,
        items: &mut [UploadedItem],
        outcome: ValidationOutcome,
    ) -> Option<Vec<ItemId>> {
        if outcome.generation != self.generation {
            warn!(
                stale = outcome.generation,
                current = self.generation,
                "Discarding superseded validation run"
            );
            return None;
        }

        let mut invalidated = Vec::new();
        for (id, state) in outcome.results {
            let Some(item) = items.iter_mut().find(|item| item.id == id) else {
                continue;
            };
            if item.state != ValidationState::Pending {
                continue;
            }
            item.state = state;
            if state.is_invalid() {
                invalidated.push(id);
            }
        }

        info!(
            generation = self.generation,
            invalid = invalidated.len(),
            "Validation committed"
        );
        Some(invalidated)
    }
}

/// Snapshot of the PDFs one validation generation has to open
#[derive(Debug)]
pub struct ValidationRun {
    generation: u64,
    targets: Vec<(ItemId, Arc<[u8]>)>,
}

impl ValidationRun {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn targets(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.targets.iter().map(|(id, _)| *id)
    }

    /// Open every target with an empty password
    pub async fn execute<E>(self, engine: &E) -> ValidationOutcome
    where
        E: DocumentEngine + ?Sized,
    {
        let mut results = Vec::with_capacity(self.targets.len());
        for (id, bytes) in self.targets {
            let state = match engine.open(&bytes).await {
                Ok(_) => ValidationState::Valid,
                Err(err) => {
                    debug!(item = %id, error = %err, "Structural open failed");
                    ValidationState::Invalid(InvalidReason::from(&err))
                }
            };
            results.push((id, state));
        }

        ValidationOutcome {
            generation: self.generation,
            results,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub generation: u64,
    pub results: Vec<(ItemId, ValidationState)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn item(idx: usize, name: &str, mime: &str) -> UploadedItem {
        UploadedItem::new(ItemId(idx), Upload::new(name, mime, vec![1, 2, 3]))
    }

    #[test]
    fn test_classify_by_mime_and_extension() {
        assert_eq!(FileKind::classify("a.pdf", ""), FileKind::Pdf);
        assert_eq!(FileKind::classify("A.PDF", "text/plain"), FileKind::Pdf);
        assert_eq!(FileKind::classify("doc", "application/pdf"), FileKind::Pdf);
        assert_eq!(FileKind::classify("photo.png", "image/png"), FileKind::Image);
        assert_eq!(FileKind::classify("scan.pdf", "image/png"), FileKind::Pdf);
        assert_eq!(FileKind::classify("notes.txt", "text/plain"), FileKind::Other);
    }

    #[test]
    fn test_initial_states() {
        assert_eq!(item(0, "a.pdf", "").state, ValidationState::Pending);
        assert_eq!(item(1, "a.jpg", "image/jpeg").state, ValidationState::Valid);
        assert_eq!(
            item(2, "a.doc", "application/msword").state,
            ValidationState::Invalid(InvalidReason::UnsupportedType)
        );
    }

    #[test]
    fn test_begin_targets_only_pending_pdfs() {
        let items = vec![
            item(0, "a.pdf", ""),
            item(1, "b.png", "image/png"),
            item(2, "c.pdf", ""),
        ];
        let mut validator = IntakeValidator::new();
        let run = validator.begin(&items);
        assert_eq!(run.generation(), 1);
        assert_eq!(run.targets().collect::<Vec<_>>(), vec![ItemId(0), ItemId(2)]);
    }

    #[test]
    fn test_stale_outcome_is_discarded() {
        let mut items = vec![item(0, "a.pdf", "")];
        let mut validator = IntakeValidator::new();
        let first = validator.begin(&items);
        let _second = validator.begin(&items);

        let outcome = ValidationOutcome {
            generation: first.generation(),
            results: vec![(ItemId(0), ValidationState::Valid)],
        };
        assert!(validator.commit(&mut items, outcome).is_none());
        assert_eq!(items[0].state, ValidationState::Pending);
    }

    #[test]
    fn test_commit_reports_invalidated_items() {
        let mut items = vec![item(0, "a.pdf", ""), item(1, "b.pdf", "")];
        let mut validator = IntakeValidator::new();
        let run = validator.begin(&items);
        let outcome = ValidationOutcome {
            generation: run.generation(),
            results: vec![
                (ItemId(0), ValidationState::Valid),
                (
                    ItemId(1),
                    ValidationState::Invalid(InvalidReason::PasswordProtected),
                ),
            ],
        };

        let invalidated = validator.commit(&mut items, outcome).unwrap();
        assert_eq!(invalidated, vec![ItemId(1)]);
        assert!(items[0].state.is_valid());
        assert!(items[1].state.is_locked());
    }

    #[test]
    fn test_settled_state_is_not_overwritten() {
        let mut items = vec![item(0, "a.png", "image/png")];
        let mut validator = IntakeValidator::new();
        let run = validator.begin(&items);
        let outcome = ValidationOutcome {
            generation: run.generation(),
            results: vec![(ItemId(0), ValidationState::Invalid(InvalidReason::Corrupt))],
        };
        validator.commit(&mut items, outcome).unwrap();
        assert_eq!(items[0].state, ValidationState::Valid);
    }

    #[test]
    fn test_stem_and_file_row() {
        let mut pdf = item(0, "Report.Final.pdf", "");
        assert_eq!(pdf.stem(), "Report.Final");
        pdf.state = ValidationState::Invalid(InvalidReason::PasswordProtected);

        let row = FileRow::from(&pdf);
        assert_eq!(row.size_mb, "0.0");
        assert_eq!(row.note, Some("password-protected PDF"));
        assert_eq!(item(1, ".hidden", "").stem(), ".hidden");
    }
}
