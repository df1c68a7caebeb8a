//! Ordered page sequence for merge and split previews

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Serialize;

use crate::error::CoreError;
use crate::intake::ItemId;

/// PNG preview of one page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    #[serde(skip)]
    pub png: Vec<u8>,
}

impl Thumbnail {
    pub fn data_url(&self) -> String {
        format!("data:image/png;base64,{}", BASE64.encode(&self.png))
    }
}

/// A specific page of a specific source document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageDescriptor {
    pub source: ItemId,
    /// 1-based page number within the source
    pub page_number: u32,
    pub thumbnail: Thumbnail,
    pub label: String,
}

impl PageDescriptor {
    pub fn label_for(file_name: &str, page_number: u32) -> String {
        format!("{} • p{}", file_name, page_number)
    }
}

/// Flat, rebuilt-not-patched page sequence.
///
/// Moving a page is the only mutation, and only when the model was built as
/// reorderable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageModel {
    pages: Vec<PageDescriptor>,
    reorderable: bool,
}

impl PageModel {
    pub fn new(pages: Vec<PageDescriptor>, reorderable: bool) -> Self {
        Self { pages, reorderable }
    }

    pub fn pages(&self) -> &[PageDescriptor] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn is_reorderable(&self) -> bool {
        self.reorderable
    }

    /// `(source, page)` pairs in current order
    pub fn page_refs(&self) -> Vec<(ItemId, u32)> {
        self.pages
            .iter()
            .map(|page| (page.source, page.page_number))
            .collect()
    }

    /// Move the page at `from` so it ends up at index `to`
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<(), CoreError> {
        if !self.reorderable {
            return Err(CoreError::ReorderLocked);
        }
        if from == to || from >= self.pages.len() || to >= self.pages.len() {
            return Err(CoreError::InvalidReorder { from, to });
        }
        let page = self.pages.remove(from);
        self.pages.insert(to, page);
        Ok(())
    }
}
