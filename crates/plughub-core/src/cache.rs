//! Decoded document cache
//!
//! One handle per uploaded item, decoded on first use and shared by every
//! consumer. Consumers clone what they modify; handles are never mutated.

use std::collections::HashMap;
use std::sync::Arc;

use lopdf::{Document, ObjectId};
use tracing::{debug, warn};

use crate::engine::DocumentEngine;
use crate::error::CoreError;
use crate::intake::{ItemId, UploadedItem};

/// Decoded in-memory PDF owned by the cache
#[derive(Debug)]
pub struct DocumentHandle {
    item: ItemId,
    bytes: Arc<[u8]>,
    document: Document,
}

impl DocumentHandle {
    pub fn new(item: ItemId, bytes: Arc<[u8]>, document: Document) -> Self {
        Self {
            item,
            bytes,
            document,
        }
    }

    pub fn item(&self) -> ItemId {
        self.item
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn page_count(&self) -> u32 {
        self.document.get_pages().len() as u32
    }

    /// Page object ids in page order
    pub fn page_ids(&self) -> Vec<ObjectId> {
        self.document.get_pages().into_values().collect()
    }
}

pub struct DocumentCache {
    engine: Arc<dyn DocumentEngine>,
    handles: HashMap<ItemId, Arc<DocumentHandle>>,
}

impl DocumentCache {
    pub fn new(engine: Arc<dyn DocumentEngine>) -> Self {
        Self {
            engine,
            handles: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &Arc<dyn DocumentEngine> {
        &self.engine
    }

    /// Return the handle for `id`, decoding it on first request.
    ///
    /// Items that are unknown fail with `SourceMissing`; items that are not
    /// PDFs or are already marked invalid fail with `LockedOrCorrupt` without
    /// touching the engine.
    pub async fn get_or_load(
        &mut self,
        id: ItemId,
        items: &[UploadedItem],
    ) -> Result<Arc<DocumentHandle>, CoreError> {
        let item = items
            .iter()
            .find(|item| item.id == id)
            .ok_or(CoreError::SourceMissing(id))?;

        if !item.is_pdf() || item.state.is_invalid() {
            self.handles.remove(&id);
            return Err(CoreError::LockedOrCorrupt(id));
        }

        if let Some(handle) = self.handles.get(&id) {
            return Ok(Arc::clone(handle));
        }

        let document = self.engine.open(&item.bytes).await.map_err(|e| {
            warn!(item = %id, error = %e, "Failed to decode document");
            CoreError::LockedOrCorrupt(id)
        })?;

        debug!(item = %id, name = %item.name, "Decoded document");
        let handle = Arc::new(DocumentHandle::new(id, Arc::clone(&item.bytes), document));
        self.handles.insert(id, Arc::clone(&handle));
        Ok(handle)
    }

    /// Drop a handle whose item became invalid
    pub fn evict(&mut self, id: ItemId) {
        self.handles.remove(&id);
    }

    /// Drop every handle; called whenever the upload batch is replaced
    pub fn clear(&mut self) {
        self.handles.clear();
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.handles.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
