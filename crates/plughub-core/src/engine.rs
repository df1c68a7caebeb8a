//! Document engine capability
//!
//! Parsing and rasterization sit behind [`DocumentEngine`] so the pipeline
//! runs against lopdf plus a rendering backend in production and against
//! scripted engines in tests.

use std::sync::Arc;

use async_trait::async_trait;
use image::RgbaImage;
use lopdf::Document;
use thiserror::Error;
use tracing::debug;

use crate::cache::DocumentHandle;
use crate::error::CoreError;
use crate::security::{self, SecurityError};

/// Why a structural open failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpenError {
    #[error("PDF is password-protected")]
    PasswordRequired,

    #[error("PDF is corrupt: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait DocumentEngine: Send + Sync {
    /// Open `bytes` with an empty password
    async fn open(&self, bytes: &[u8]) -> Result<Document, OpenError>;

    /// Render one page (1-based) at `scale`
    async fn rasterize(
        &self,
        handle: &DocumentHandle,
        page_number: u32,
        scale: f32,
    ) -> Result<RgbaImage, CoreError>;
}

/// Turns one page into pixels
pub trait PageRasterizer: Send + Sync {
    fn render(
        &self,
        handle: &DocumentHandle,
        page_number: u32,
        scale: f32,
    ) -> Result<RgbaImage, CoreError>;
}

#[cfg(feature = "pdfium")]
pub use pdfium_backend::PdfiumRasterizer;

#[cfg(feature = "pdfium")]
mod pdfium_backend {
    use image::RgbaImage;
    use pdfium_render::prelude::{PdfRenderConfig, Pdfium};

    use super::PageRasterizer;
    use crate::cache::DocumentHandle;
    use crate::error::CoreError;

    /// Renders through a pdfium shared library
    pub struct PdfiumRasterizer {
        pdfium: Pdfium,
    }

    impl PdfiumRasterizer {
        /// Bind to pdfium next to the executable, falling back to the system library
        pub fn bind() -> Result<Self, CoreError> {
            let bindings = std::env::current_exe()
                .ok()
                .and_then(|exe| {
                    exe.parent()
                        .map(|dir| Pdfium::pdfium_platform_library_name_at_path(dir))
                })
                .and_then(|path| Pdfium::bind_to_library(&path).ok())
                .map(Ok)
                .unwrap_or_else(Pdfium::bind_to_system_library)
                .map_err(|e| CoreError::RenderError(format!("pdfium unavailable: {}", e)))?;
            Ok(Self {
                pdfium: Pdfium::new(bindings),
            })
        }
    }

    impl PageRasterizer for PdfiumRasterizer {
        fn render(
            &self,
            handle: &DocumentHandle,
            page_number: u32,
            scale: f32,
        ) -> Result<RgbaImage, CoreError> {
            let render_err = |e: pdfium_render::prelude::PdfiumError| {
                CoreError::RenderError(e.to_string())
            };
            let document = self
                .pdfium
                .load_pdf_from_byte_slice(handle.bytes(), None)
                .map_err(render_err)?;
            let index = u16::try_from(page_number.saturating_sub(1))
                .map_err(|_| CoreError::RenderError("page index out of range".into()))?;
            let page = document.pages().get(index).map_err(render_err)?;

            let config = PdfRenderConfig::new()
                .scale_page_by_factor(scale)
                .render_form_data(true)
                .render_annotations(true);
            let bitmap = page.render_with_config(&config).map_err(render_err)?;
            Ok(bitmap.as_image().to_rgba8())
        }
    }
}

/// lopdf-backed engine with a pluggable rasterizer
#[derive(Clone)]
pub struct LopdfEngine {
    rasterizer: Arc<dyn PageRasterizer>,
}

impl LopdfEngine {
    pub fn new(rasterizer: Arc<dyn PageRasterizer>) -> Self {
        Self { rasterizer }
    }

    /// Engine backed by the rendering library linked into this build.
    ///
    /// Fails when no renderer is compiled in or the library cannot be loaded.
    pub fn detect() -> Result<Self, CoreError> {
        #[cfg(feature = "pdfium")]
        {
            let pdfium = PdfiumRasterizer::bind()?;
            Ok(Self::new(Arc::new(pdfium)))
        }
        #[cfg(not(feature = "pdfium"))]
        {
            Err(CoreError::RenderError(
                "no page renderer in this build (enable the pdfium feature)".into(),
            ))
        }
    }
}

#[async_trait]
impl DocumentEngine for LopdfEngine {
    async fn open(&self, bytes: &[u8]) -> Result<Document, OpenError> {
        open_document(bytes)
    }

    async fn rasterize(
        &self,
        handle: &DocumentHandle,
        page_number: u32,
        scale: f32,
    ) -> Result<RgbaImage, CoreError> {
        debug!(item = %handle.item(), page = page_number, scale, "Rasterizing page");
        self.rasterizer.render(handle, page_number, scale)
    }
}

/// Parse `bytes` with an empty password and classify any failure.
///
/// Encrypted files whose user password is empty are decrypted and open
/// like plain ones.
pub fn open_document(bytes: &[u8]) -> Result<Document, OpenError> {
    let mut doc = match Document::load_mem(bytes) {
        Ok(doc) => doc,
        Err(_) if contains(bytes, b"/Encrypt") => return Err(OpenError::PasswordRequired),
        Err(e) => return Err(OpenError::Corrupt(e.to_string())),
    };

    if doc.is_encrypted() {
        match security::decrypt(&mut doc, "") {
            Ok(()) => debug!("Opened encrypted PDF with empty user password"),
            Err(SecurityError::BadPassword | SecurityError::Unsupported(_)) => {
                return Err(OpenError::PasswordRequired)
            }
            Err(e) => return Err(OpenError::Corrupt(e.to_string())),
        }
    }
    if doc.get_pages().is_empty() {
        return Err(OpenError::Corrupt("PDF has no pages".to_string()));
    }
    Ok(doc)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
