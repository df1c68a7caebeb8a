//! Page-level attribute lookup
//!
//! Page dictionaries may inherit `Resources`, `MediaBox`, `CropBox` and
//! `Rotate` from any ancestor in the page tree. These helpers resolve that
//! inheritance and the indirect references along the way.

use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::error::CoreError;
use crate::viewport::Viewport;

/// Attributes a page may inherit from its ancestors
pub const INHERITABLE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Guard against cyclic Parent chains
const MAX_TREE_DEPTH: usize = 64;

/// Follow references until a direct object is reached
pub fn resolve<'a>(doc: &'a Document, mut obj: &'a Object) -> &'a Object {
    for _ in 0..MAX_TREE_DEPTH {
        match obj {
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(target) => obj = target,
                Err(_) => return obj,
            },
            _ => return obj,
        }
    }
    obj
}

/// Numeric value of an integer or real object
pub fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(n) => Some(*n as f32),
        Object::Real(n) => Some(*n as f32),
        _ => None,
    }
}

pub fn page_dict(doc: &Document, page_id: ObjectId) -> Result<&Dictionary, CoreError> {
    doc.get_object(page_id)
        .and_then(Object::as_dict)
        .map_err(|e| CoreError::ParseError(format!("Page {:?} is not a dictionary: {}", page_id, e)))
}

/// Look up `key` on the page or the nearest ancestor that defines it
pub fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut dict = page_dict(doc, page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = dict.get(key) {
            return Some(resolve(doc, value));
        }
        let parent = dict.get(b"Parent").ok()?.as_reference().ok()?;
        dict = doc.get_object(parent).ok()?.as_dict().ok()?;
    }
    None
}

/// Effective resource dictionary of a page, cloned
pub fn resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    inherited(doc, page_id, b"Resources")
        .and_then(|obj| obj.as_dict().ok())
        .cloned()
        .unwrap_or_default()
}

/// Visible page box: CropBox when present, else MediaBox, else US Letter
pub fn view_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    inherited(doc, page_id, b"CropBox")
        .and_then(|obj| parse_box(doc, obj))
        .or_else(|| inherited(doc, page_id, b"MediaBox").and_then(|obj| parse_box(doc, obj)))
        .unwrap_or([0.0, 0.0, 612.0, 792.0])
}

fn parse_box(doc: &Document, obj: &Object) -> Option<[f32; 4]> {
    let array = obj.as_array().ok()?;
    if array.len() != 4 {
        return None;
    }
    let mut values = [0.0; 4];
    for (slot, item) in values.iter_mut().zip(array) {
        *slot = number(resolve(doc, item))?;
    }
    // Normalize so the first corner is lower-left
    Some([
        values[0].min(values[2]),
        values[1].min(values[3]),
        values[0].max(values[2]),
        values[1].max(values[3]),
    ])
}

pub fn rotation(doc: &Document, page_id: ObjectId) -> i32 {
    inherited(doc, page_id, b"Rotate")
        .and_then(|obj| obj.as_i64().ok())
        .map(|angle| normalize_rotation(angle as i32))
        .unwrap_or(0)
}

/// Normalize rotation to 0, 90, 180, or 270
pub fn normalize_rotation(angle: i32) -> i32 {
    let quarter = (angle.rem_euclid(360) + 45) / 90;
    (quarter % 4) * 90
}

/// Viewport of a page at `scale`, honouring its `/Rotate`
pub fn viewport(doc: &Document, page_id: ObjectId, scale: f32) -> Viewport {
    Viewport::new(view_box(doc, page_id), scale, rotation(doc, page_id))
}

/// Decoded content of a page.
///
/// Each stream of a `/Contents` array is decoded separately and the parts
/// are joined with a newline, so operators never fuse across stream ends.
pub fn content(doc: &Document, page_id: ObjectId) -> Result<Vec<u8>, CoreError> {
    let contents = match page_dict(doc, page_id)?.get(b"Contents") {
        Ok(obj) => resolve(doc, obj),
        Err(_) => return Ok(Vec::new()),
    };
    let parts: Vec<&Object> = match contents {
        Object::Array(items) => items.iter().map(|item| resolve(doc, item)).collect(),
        other => vec![other],
    };

    let mut data = Vec::new();
    for part in parts {
        if let Object::Stream(stream) = part {
            match stream.decompressed_content() {
                Ok(decoded) => data.extend_from_slice(&decoded),
                Err(_) => data.extend_from_slice(&stream.content),
            }
            data.push(b'\n');
        }
    }
    Ok(data)
}

/// Object id of a 1-based page number
pub fn page_id(doc: &Document, page_number: u32) -> Result<ObjectId, CoreError> {
    doc.get_pages()
        .get(&page_number)
        .copied()
        .ok_or_else(|| CoreError::OperationError(format!("Page {} does not exist", page_number)))
}
