//! Per-user working state
//!
//! A session owns the uploaded batch, the decoded-document cache and the
//! current page model. Uploading a new batch replaces all three.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::DocumentCache;
use crate::engine::DocumentEngine;
use crate::intake::{
    FileRow, IntakeValidator, ItemId, Upload, UploadedItem, ValidationOutcome, ValidationRun,
};
use crate::page_model::PageModel;

pub struct Session {
    items: Vec<UploadedItem>,
    validator: IntakeValidator,
    cache: DocumentCache,
    page_model: PageModel,
    file_list_revision: u64,
    next_id: usize,
}

impl Session {
    pub fn new(engine: Arc<dyn DocumentEngine>) -> Self {
        Self {
            items: Vec::new(),
            validator: IntakeValidator::new(),
            cache: DocumentCache::new(engine),
            page_model: PageModel::default(),
            file_list_revision: 0,
            next_id: 0,
        }
    }

    pub fn engine(&self) -> Arc<dyn DocumentEngine> {
        Arc::clone(self.cache.engine())
    }

    pub fn items(&self) -> &[UploadedItem] {
        &self.items
    }

    pub fn item(&self, id: ItemId) -> Option<&UploadedItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Replace the batch and start validating it.
    ///
    /// Cached documents and the page model belong to the old batch and are
    /// dropped here.
    pub fn replace_batch(&mut self, uploads: Vec<Upload>) -> ValidationRun {
        self.cache.clear();
        self.page_model = PageModel::default();
        self.items = uploads
            .into_iter()
            .map(|upload| {
                let id = ItemId(self.next_id);
                self.next_id += 1;
                UploadedItem::new(id, upload)
            })
            .collect();
        self.file_list_revision += 1;
        info!(items = self.items.len(), "Replaced upload batch");
        self.begin_validation()
    }

    /// Start a validation generation over the pending PDFs
    pub fn begin_validation(&mut self) -> ValidationRun {
        let run = self.validator.begin(&self.items);
        debug!(generation = run.generation(), "Validation started");
        run
    }

    /// Apply `outcome` if it is still current; returns whether it committed
    pub fn commit_validation(&mut self, outcome: ValidationOutcome) -> bool {
        let Some(invalidated) = self.validator.commit(&mut self.items, outcome) else {
            return false;
        };
        for id in invalidated {
            self.cache.evict(id);
        }
        self.file_list_revision += 1;
        true
    }

    /// Replace the batch, validate it and commit the result
    pub async fn upload(&mut self, uploads: Vec<Upload>) -> bool {
        let run = self.replace_batch(uploads);
        let engine = self.engine();
        let outcome = run.execute(engine.as_ref()).await;
        self.commit_validation(outcome)
    }

    pub fn file_list(&self) -> Vec<FileRow> {
        self.items.iter().map(FileRow::from).collect()
    }

    /// Bumped whenever the visible file list changes
    pub fn file_list_revision(&self) -> u64 {
        self.file_list_revision
    }

    /// PDFs that failed validation because they need a password
    pub fn locked_items(&self) -> Vec<&UploadedItem> {
        self.items
            .iter()
            .filter(|item| item.is_pdf() && item.state.is_locked())
            .collect()
    }

    /// Cache and items borrowed together, for loaders that need both
    pub fn documents(&mut self) -> (&mut DocumentCache, &[UploadedItem]) {
        (&mut self.cache, &self.items)
    }

    pub fn cache(&self) -> &DocumentCache {
        &self.cache
    }

    pub fn page_model(&self) -> &PageModel {
        &self.page_model
    }

    pub fn page_model_mut(&mut self) -> &mut PageModel {
        &mut self.page_model
    }

    /// Swap in a freshly built page model
    pub fn set_page_model(&mut self, model: PageModel) {
        self.page_model = model;
    }
}
