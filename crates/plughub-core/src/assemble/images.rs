//! Page rasters packaged as a PNG archive

use tracing::{debug, info};

use crate::cache::DocumentHandle;
use crate::engine::DocumentEngine;
use crate::error::CoreError;
use crate::thumbnail::encode_png;

/// Export scale, independent of the preview scale
pub const EXPORT_SCALE: f32 = 2.0;

/// Render every page at `scale` and zip them as `page-{n}.png`
pub async fn pages_to_images(
    engine: &dyn DocumentEngine,
    handle: &DocumentHandle,
    scale: f32,
) -> Result<Vec<u8>, CoreError> {
    let mut entries = Vec::new();
    for page_number in 1..=handle.page_count() {
        let raster = engine.rasterize(handle, page_number, scale).await?;
        debug!(
            page = page_number,
            width = raster.width(),
            height = raster.height(),
            "Rendered page"
        );
        entries.push((format!("page-{}.png", page_number), encode_png(&raster)?));
    }

    if entries.is_empty() {
        return Err(CoreError::NoPagesRendered);
    }
    info!(item = %handle.item(), pages = entries.len(), "Rendered page images");
    super::zip_entries(entries)
}
