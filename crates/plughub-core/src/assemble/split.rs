//! Page extraction and per-page archives

use std::collections::HashSet;

use lopdf::Document;
use tracing::debug;

use crate::error::CoreError;

/// Pages named by a range expression such as `"1-3, 5"`, sorted and unique.
///
/// Range ends past `page_count` are clamped; a page or range start past it
/// is an error, as is page 0.
pub fn parse_ranges(input: &str, page_count: u32) -> Result<Vec<u32>, CoreError> {
    let mut selected = vec![false; page_count as usize];

    for token in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let (first, last) = match token.split_once('-') {
            Some((first, last)) => (page_number(first)?, page_number(last)?),
            None => {
                let page = page_number(token)?;
                (page, page)
            }
        };
        if first > last {
            return Err(CoreError::InvalidRange(format!(
                "Range {} runs backwards",
                token
            )));
        }
        if first > page_count {
            return Err(CoreError::InvalidRange(format!(
                "Page {} does not exist (document has {} pages)",
                first, page_count
            )));
        }
        for slot in &mut selected[first as usize - 1..last.min(page_count) as usize] {
            *slot = true;
        }
    }

    Ok((1..=page_count)
        .zip(selected)
        .filter_map(|(page, keep)| keep.then_some(page))
        .collect())
}

fn page_number(text: &str) -> Result<u32, CoreError> {
    match text.trim().parse::<u32>() {
        Ok(0) => Err(CoreError::InvalidRange("Page numbers start at 1".into())),
        Ok(page) => Ok(page),
        Err(_) => Err(CoreError::InvalidRange(format!(
            "Not a page number: {}",
            text.trim()
        ))),
    }
}

/// Copy of `doc` keeping only `pages` (1-based), saved
pub fn extract_pages(doc: &Document, pages: &[u32]) -> Result<Vec<u8>, CoreError> {
    if pages.is_empty() {
        return Err(CoreError::InvalidRange("No pages specified".into()));
    }

    let page_count = doc.get_pages().len() as u32;
    if let Some(&missing) = pages.iter().find(|&&p| p == 0 || p > page_count) {
        return Err(CoreError::InvalidRange(format!(
            "Page {} does not exist (document has {} pages)",
            missing, page_count
        )));
    }

    let keep: HashSet<u32> = pages.iter().copied().collect();
    let mut new_doc = doc.clone();
    // Highest first so remaining page numbers stay valid
    for page_number in (1..=page_count).rev().filter(|p| !keep.contains(p)) {
        new_doc.delete_pages(&[page_number]);
    }

    new_doc.prune_objects();
    super::save(&mut new_doc)
}

/// ZIP of `page-{n}.pdf`, one single-page PDF per selected page.
///
/// Without `ranges` every page is included.
pub fn split_archive(doc: &Document, ranges: Option<&str>) -> Result<Vec<u8>, CoreError> {
    let page_count = doc.get_pages().len() as u32;
    if page_count == 0 {
        return Err(CoreError::OperationError("PDF has no pages.".into()));
    }

    let selected = match ranges.map(str::trim).filter(|r| !r.is_empty()) {
        Some(ranges) => parse_ranges(ranges, page_count)?,
        None => (1..=page_count).collect(),
    };
    if selected.is_empty() {
        return Err(CoreError::InvalidRange("No pages specified".into()));
    }

    let mut entries = Vec::with_capacity(selected.len());
    for page_number in selected {
        let bytes = extract_pages(doc, &[page_number])?;
        debug!(page = page_number, bytes = bytes.len(), "Extracted page");
        entries.push((format!("page-{}.pdf", page_number), bytes));
    }
    super::zip_entries(entries)
}
