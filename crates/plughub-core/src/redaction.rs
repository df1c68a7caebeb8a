//! Opaque redaction overlays
//!
//! Selected values are matched against the text index and every matching
//! run gets a black cover box with a `[REDACTED]` label. Callers with their
//! own matching rule hand the chosen runs to `cover` directly. Page content is
//! kept as-is underneath: the original stream is wrapped in `q ... Q` and
//! the overlay goes into a new stream appended after it.

use std::collections::{BTreeMap, BTreeSet};

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::{debug, info};

use crate::cache::DocumentHandle;
use crate::error::CoreError;
use crate::page::{self, resolve};
use crate::text_index::TextRun;
use crate::viewport::Viewport;

/// Padding added around each matched box, in points
pub const REDACTION_MARGIN: f32 = 1.5;

pub const REDACTION_LABEL: &str = "[REDACTED]";

const LABEL_MAX_SIZE: f32 = 12.0;

/// Resource name of the label font added to redacted pages
const LABEL_FONT: &str = "PHRedactBold";

pub struct RedactionEngine;

impl RedactionEngine {
    /// Cover every run whose text is in `selection` and save a new document.
    ///
    /// The cached handle is read only; edits go to a copy.
    pub fn apply(
        handle: &DocumentHandle,
        runs: &[TextRun],
        selection: &BTreeSet<String>,
    ) -> Result<Vec<u8>, CoreError> {
        if selection.is_empty() {
            return Err(CoreError::NothingSelected);
        }

        let targets: Vec<&TextRun> = runs
            .iter()
            .filter(|run| selection.contains(&run.text))
            .collect();
        if targets.is_empty() {
            return Err(CoreError::NoMatchingText);
        }
        Self::cover(handle, &targets)
    }

    /// Cover exactly `targets` and save a new document.
    ///
    /// With no targets the copy is saved without overlays.
    pub fn cover(handle: &DocumentHandle, targets: &[&TextRun]) -> Result<Vec<u8>, CoreError> {
        let mut by_page: BTreeMap<u32, Vec<&TextRun>> = BTreeMap::new();
        for run in targets {
            by_page.entry(run.page_number).or_default().push(run);
        }

        let mut doc = handle.document().clone();
        if !by_page.is_empty() {
            let font_id = doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => "Helvetica-Bold",
                "Encoding" => "WinAnsiEncoding",
            });

            let pages = doc.get_pages();
            for (page_number, page_targets) in &by_page {
                let page_id = pages.get(page_number).copied().ok_or_else(|| {
                    CoreError::OperationError(format!("Page {} does not exist", page_number))
                })?;
                let viewport = page::viewport(&doc, page_id, 1.0);
                let overlay = overlay_operations(&viewport, page_targets);

                install_font(&mut doc, page_id, font_id)?;
                wrap_contents(&mut doc, page_id, overlay)?;
                debug!(page = page_number, boxes = page_targets.len(), "Redacted page");
            }
        }

        doc.compress();
        let mut output = Vec::new();
        doc.save_to(&mut output)
            .map_err(|e| CoreError::OperationError(format!("Failed to save PDF: {}", e)))?;

        info!(
            item = %handle.item(),
            boxes = targets.len(),
            pages = by_page.len(),
            "Applied redactions"
        );
        Ok(output)
    }
}

/// Cover box and label for each run, in page user space
fn overlay_operations(viewport: &Viewport, runs: &[&TextRun]) -> Vec<Operation> {
    let mut ops = Vec::new();
    for run in runs {
        let area = viewport.to_user_rect(&run.bbox).expand(REDACTION_MARGIN);
        let base = if run.font_size > 0.0 {
            run.font_size
        } else {
            run.bbox.height
        };
        let label_size = LABEL_MAX_SIZE.min(base + 2.0);

        ops.extend([
            Operation::new("rg", vec![real(0.0), real(0.0), real(0.0)]),
            Operation::new(
                "re",
                vec![
                    real(area.x),
                    real(area.y),
                    real(area.width),
                    real(area.height),
                ],
            ),
            Operation::new("f", vec![]),
            Operation::new("BT", vec![]),
            Operation::new("rg", vec![real(1.0), real(1.0), real(1.0)]),
            Operation::new("Tf", vec![LABEL_FONT.into(), real(label_size)]),
            Operation::new(
                "Td",
                vec![real(area.x + 2.0), real(area.y + area.height / 2.0 - 4.0)],
            ),
            Operation::new(
                "Tj",
                vec![Object::String(
                    REDACTION_LABEL.as_bytes().to_vec(),
                    StringFormat::Literal,
                )],
            ),
            Operation::new("ET", vec![]),
        ]);
    }
    ops
}

fn real(value: f32) -> Object {
    Object::Real(value as _)
}

/// Give the page its own resource dictionary carrying the label font
fn install_font(doc: &mut Document, page_id: ObjectId, font_id: ObjectId) -> Result<(), CoreError> {
    let mut resources = page::resources(doc, page_id);
    let mut fonts = resources
        .get(b"Font")
        .ok()
        .and_then(|obj| resolve(doc, obj).as_dict().ok())
        .cloned()
        .unwrap_or_default();
    fonts.set(LABEL_FONT, font_id);
    resources.set("Font", fonts);

    page_dict_mut(doc, page_id)?.set("Resources", resources);
    Ok(())
}

fn wrap_contents(
    doc: &mut Document,
    page_id: ObjectId,
    overlay: Vec<Operation>,
) -> Result<(), CoreError> {
    let existing = match page::page_dict(doc, page_id)?.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(Object::Array(items)) => items.clone(),
        _ => Vec::new(),
    };

    let mut operations = vec![Operation::new("Q", vec![])];
    operations.extend(overlay);
    let encoded = Content { operations }
        .encode()
        .map_err(|e| CoreError::OperationError(format!("Failed to encode overlay: {}", e)))?;
    // Leading newline keeps Q apart from the last operator of the page stream
    let mut closing = b"\n".to_vec();
    closing.extend(encoded);

    let open_id = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
    let close_id = doc.add_object(Stream::new(dictionary! {}, closing));

    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(open_id));
    contents.extend(existing);
    contents.push(Object::Reference(close_id));

    page_dict_mut(doc, page_id)?.set("Contents", contents);
    Ok(())
}

fn page_dict_mut(doc: &mut Document, page_id: ObjectId) -> Result<&mut lopdf::Dictionary, CoreError> {
    doc.get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| CoreError::ParseError(format!("Page {:?} is not a dictionary: {}", page_id, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{build_pdf, page_texts, with_content_streams, PageSpec};
    use crate::intake::ItemId;
    use crate::text_index::TextIndex;
    use std::sync::Arc;

    fn handle(specs: &[PageSpec]) -> DocumentHandle {
        handle_of(build_pdf(specs))
    }

    fn handle_of(bytes: Vec<u8>) -> DocumentHandle {
        let document = Document::load_mem(&bytes).unwrap();
        DocumentHandle::new(ItemId(0), Arc::from(bytes), document)
    }

    fn selection(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 0.01
    }

    #[test]
    fn test_empty_selection_is_rejected() {
        let handle = handle(&[PageSpec::text("Mike")]);
        let runs = TextIndex::extract(&handle).unwrap().into_runs();
        let result = RedactionEngine::apply(&handle, &runs, &BTreeSet::new());
        assert!(matches!(result, Err(CoreError::NothingSelected)));
    }

    #[test]
    fn test_absent_value_is_no_matching_text() {
        let handle = handle(&[PageSpec::text("Mike")]);
        let runs = TextIndex::extract(&handle).unwrap().into_runs();
        let result = RedactionEngine::apply(&handle, &runs, &selection(&["Bob"]));
        assert!(matches!(result, Err(CoreError::NoMatchingText)));
    }

    #[test]
    fn test_matching_pages_get_overlays_only() {
        let handle = handle(&[
            PageSpec::text("Mike"),
            PageSpec::text("Anna"),
            PageSpec::text("Mike"),
        ]);
        let runs = TextIndex::extract(&handle).unwrap().into_runs();
        let output = RedactionEngine::apply(&handle, &runs, &selection(&["Mike"])).unwrap();

        let texts = page_texts(&output);
        assert_eq!(texts[0], vec!["Mike", REDACTION_LABEL]);
        assert_eq!(texts[1], vec!["Anna"]);
        assert_eq!(texts[2], vec!["Mike", REDACTION_LABEL]);

        // The cached document is untouched
        assert_eq!(page_texts(handle.bytes())[0], vec!["Mike"]);
    }

    #[test]
    fn test_cover_box_matches_text_with_margin() {
        let handle = handle(&[PageSpec::text("Mike")]);
        let runs = TextIndex::extract(&handle).unwrap().into_runs();
        let output = RedactionEngine::apply(&handle, &runs, &selection(&["Mike"])).unwrap();

        let doc = Document::load_mem(&output).unwrap();
        let page_id = *doc.get_pages().get(&1).unwrap();
        let content = Content::decode(&page::content(&doc, page_id).unwrap()).unwrap();

        let rect = content
            .operations
            .iter()
            .find(|op| op.operator == "re")
            .unwrap();
        let values: Vec<f32> = rect.operands.iter().filter_map(page::number).collect();
        let expected = [48.5, 698.5, 27.0, 15.0];
        assert!(values.iter().zip(expected).all(|(a, b)| close(*a, b)), "{:?}", values);

        let font = content
            .operations
            .iter()
            .find(|op| op.operator == "Tf" && op.operands[0].as_name().ok() == Some(LABEL_FONT.as_bytes()))
            .unwrap();
        assert!(close(page::number(&font.operands[1]).unwrap(), 12.0));

        // Original stream is bracketed by the save/restore pair
        let ops: Vec<&str> = content.operations.iter().map(|op| op.operator.as_str()).collect();
        assert_eq!(ops.first(), Some(&"q"));
        let restore = ops.iter().position(|op| *op == "Q").unwrap();
        assert!(ops[..restore].contains(&"Tj"));
    }

    /// Operands of the first `re` on page 1
    fn cover_rect(output: &[u8]) -> Vec<f32> {
        let doc = Document::load_mem(output).unwrap();
        let page_id = *doc.get_pages().get(&1).unwrap();
        let content = Content::decode(&page::content(&doc, page_id).unwrap()).unwrap();
        let rect = content.operations.iter().find(|op| op.operator == "re").unwrap();
        rect.operands.iter().filter_map(page::number).collect()
    }

    #[test]
    fn test_run_in_second_content_stream_is_covered() {
        let bytes = with_content_streams(
            &build_pdf(&[PageSpec::blank()]),
            1,
            &[
                "BT /F1 12 Tf 50 700 Td (Mike) Tj ET",
                "BT /F1 12 Tf 50 600 Td (Secret) Tj ET",
            ],
        );
        let handle = handle_of(bytes);
        let runs = TextIndex::extract(&handle).unwrap().into_runs();
        let output = RedactionEngine::apply(&handle, &runs, &selection(&["Secret"])).unwrap();

        let values = cover_rect(&output);
        let expected = [48.5, 598.5, 39.0, 15.0];
        assert!(values.iter().zip(expected).all(|(a, b)| close(*a, b)), "{:?}", values);
        assert_eq!(page_texts(&output)[0], vec!["Mike", "Secret", REDACTION_LABEL]);
    }

    #[test]
    fn test_cover_without_targets_saves_plain_copy() {
        let handle = handle(&[PageSpec::text("Mike")]);
        let output = RedactionEngine::cover(&handle, &[]).unwrap();
        assert_eq!(page_texts(&output)[0], vec!["Mike"]);

        let doc = Document::load_mem(&output).unwrap();
        let page_id = *doc.get_pages().get(&1).unwrap();
        assert!(!content_has_operator(&doc, page_id, "re"));
    }

    fn content_has_operator(doc: &Document, page_id: ObjectId, operator: &str) -> bool {
        let content = Content::decode(&page::content(doc, page_id).unwrap()).unwrap();
        content.operations.iter().any(|op| op.operator == operator)
    }

    #[test]
    fn test_label_font_is_registered_on_page() {
        let handle = handle(&[PageSpec::text("Mike")]);
        let runs = TextIndex::extract(&handle).unwrap().into_runs();
        let output = RedactionEngine::apply(&handle, &runs, &selection(&["Mike"])).unwrap();

        let doc = Document::load_mem(&output).unwrap();
        let page_id = *doc.get_pages().get(&1).unwrap();
        let resources = page::resources(&doc, page_id);
        let fonts = resolve(&doc, resources.get(b"Font").unwrap()).as_dict().unwrap();
        assert!(fonts.has(b"F1"));
        assert!(fonts.has(LABEL_FONT.as_bytes()));
    }

    #[test]
    fn test_rotated_page_box_stays_on_page() {
        let handle = handle(&[PageSpec::text("Mike").rotated(90)]);
        let runs = TextIndex::extract(&handle).unwrap().into_runs();
        let viewport = page::viewport(handle.document(), handle.page_ids()[0], 1.0);
        let area = viewport.to_user_rect(&runs[0].bbox);
        assert!(close(area.x, 50.0));
        assert!(close(area.y, 700.0));
        assert!(close(area.width, 24.0));
        assert!(close(area.height, 12.0));
    }
}
