//! Low-resolution page previews

use std::io::Cursor;

use image::{ImageFormat, RgbaImage};
use tracing::{debug, info};

use crate::cache::DocumentCache;
use crate::error::CoreError;
use crate::intake::{ItemId, UploadedItem};
use crate::page_model::{PageDescriptor, Thumbnail};

/// Preview scale, independent of the export scale
pub const PREVIEW_SCALE: f32 = 0.32;

#[derive(Debug, Clone, Copy)]
pub struct ThumbnailRenderer {
    scale: f32,
}

impl Default for ThumbnailRenderer {
    fn default() -> Self {
        Self {
            scale: PREVIEW_SCALE,
        }
    }
}

impl ThumbnailRenderer {
    pub fn with_scale(scale: f32) -> Self {
        Self { scale }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Render every page of every valid PDF in `entries`, file by file.
    ///
    /// Entries that are not valid PDFs are skipped.
    pub async fn load(
        &self,
        cache: &mut DocumentCache,
        items: &[UploadedItem],
        entries: &[ItemId],
    ) -> Result<Vec<PageDescriptor>, CoreError> {
        let usable: Vec<&UploadedItem> = entries
            .iter()
            .filter_map(|id| items.iter().find(|item| item.id == *id))
            .filter(|item| item.is_pdf() && item.state.is_valid())
            .collect();
        if usable.is_empty() {
            return Err(CoreError::NoPdfFiles);
        }

        let mut descriptors = Vec::new();
        for item in usable {
            let handle = cache.get_or_load(item.id, items).await?;
            for page_number in 1..=handle.page_count() {
                let raster = cache
                    .engine()
                    .rasterize(&handle, page_number, self.scale)
                    .await?;
                descriptors.push(PageDescriptor {
                    source: item.id,
                    page_number,
                    thumbnail: encode_thumbnail(&raster)?,
                    label: PageDescriptor::label_for(&item.name, page_number),
                });
            }
            debug!(item = %item.id, pages = handle.page_count(), "Rendered previews");
        }

        if descriptors.is_empty() {
            return Err(CoreError::NoPagesRendered);
        }
        info!(pages = descriptors.len(), "Page previews ready");
        Ok(descriptors)
    }
}

pub fn encode_png(raster: &RgbaImage) -> Result<Vec<u8>, CoreError> {
    let mut buffer = Cursor::new(Vec::new());
    raster.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

fn encode_thumbnail(raster: &RgbaImage) -> Result<Thumbnail, CoreError> {
    Ok(Thumbnail {
        width: raster.width(),
        height: raster.height(),
        png: encode_png(raster)?,
    })
}
