//! Page collation across documents
//!
//! Every source document is imported once into the destination with its
//! object ids shifted past the destination's highest id. Selected pages are
//! then hung off a fresh page tree in the requested order; everything the
//! new tree does not reach is pruned before saving.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lopdf::{dictionary, Document, Object, ObjectId};
use tracing::debug;

use crate::cache::DocumentHandle;
use crate::error::CoreError;
use crate::intake::ItemId;
use crate::page::{self, INHERITABLE_KEYS};

pub const MERGED_FILENAME: &str = "plughub-merged.pdf";

/// Merge `(document, page number)` pairs in order.
///
/// A page listed twice appears twice; the second copy gets its own object.
pub fn merge_pages(pages: &[(Arc<DocumentHandle>, u32)]) -> Result<Vec<u8>, CoreError> {
    if pages.is_empty() {
        return Err(CoreError::NoPagesToMerge);
    }

    let mut dest = Document::with_version("1.7");
    let pages_id = dest.new_object_id();

    let mut offsets: HashMap<ItemId, u32> = HashMap::new();
    let mut placed: HashSet<ObjectId> = HashSet::new();
    let mut kids = Vec::with_capacity(pages.len());

    for (handle, page_number) in pages {
        let source = handle.document();
        let offset = match offsets.get(&handle.item()) {
            Some(offset) => *offset,
            None => {
                let offset = import_objects(&mut dest, source);
                offsets.insert(handle.item(), offset);
                offset
            }
        };

        let source_page = page::page_id(source, *page_number)?;
        let mut page_dict = page::page_dict(source, source_page)?.clone();
        for key in INHERITABLE_KEYS {
            if page_dict.has(key) {
                continue;
            }
            if let Some(value) = page::inherited(source, source_page, key) {
                page_dict.set(key.to_vec(), value.clone());
            }
        }
        let page_obj = match remap_object_refs(Object::Dictionary(page_dict), offset) {
            Object::Dictionary(mut dict) => {
                dict.set("Parent", Object::Reference(pages_id));
                Object::Dictionary(dict)
            }
            other => other,
        };

        let mapped = (source_page.0 + offset, source_page.1);
        let page_id = if placed.insert(mapped) {
            dest.objects.insert(mapped, page_obj);
            mapped
        } else {
            dest.add_object(page_obj)
        };
        debug!(item = %handle.item(), page = page_number, "Placed page");
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    dest.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = dest.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    dest.trailer.set("Root", catalog_id);

    dest.prune_objects();
    super::save(&mut dest)
}

/// Copy every object of `source` into `dest` with shifted ids.
///
/// Returns the shift applied.
fn import_objects(dest: &mut Document, source: &Document) -> u32 {
    let offset = dest.max_id;
    for (old_id, object) in &source.objects {
        let new_id = (old_id.0 + offset, old_id.1);
        dest.objects
            .insert(new_id, remap_object_refs(object.clone(), offset));
    }
    dest.max_id = offset + source.max_id;
    offset
}

/// Shift every reference inside `obj` by `offset`
fn remap_object_refs(obj: Object, offset: u32) -> Object {
    match obj {
        Object::Reference(id) => Object::Reference((id.0 + offset, id.1)),
        Object::Array(items) => Object::Array(
            items
                .into_iter()
                .map(|item| remap_object_refs(item, offset))
                .collect(),
        ),
        Object::Dictionary(mut dict) => {
            for (_, value) in dict.iter_mut() {
                *value = remap_object_refs(std::mem::replace(value, Object::Null), offset);
            }
            Object::Dictionary(dict)
        }
        Object::Stream(mut stream) => {
            for (_, value) in stream.dict.iter_mut() {
                *value = remap_object_refs(std::mem::replace(value, Object::Null), offset);
            }
            Object::Stream(stream)
        }
        other => other,
    }
}
