//! Builders for small PDFs and images
//!
//! Used by the test suites across the workspace.

use std::io::Cursor;
use std::sync::Arc;

use image::{ImageFormat, Rgba, RgbaImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};

use crate::cache::DocumentHandle;
use crate::engine::{LopdfEngine, PageRasterizer};
use crate::error::CoreError;
use crate::page;

/// One line of text placed on a page
#[derive(Debug, Clone)]
pub struct TextLine {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub size: f32,
}

#[derive(Debug, Clone)]
pub struct PageSpec {
    pub width: f32,
    pub height: f32,
    pub rotation: i32,
    pub lines: Vec<TextLine>,
}

impl PageSpec {
    pub fn blank() -> Self {
        Self {
            width: 612.0,
            height: 792.0,
            rotation: 0,
            lines: Vec::new(),
        }
    }

    /// Letter page with `text` at (50, 700) in 12pt
    pub fn text(text: &str) -> Self {
        Self::blank().with_line(text, 50.0, 700.0, 12.0)
    }

    pub fn with_line(mut self, text: &str, x: f32, y: f32, size: f32) -> Self {
        self.lines.push(TextLine {
            text: text.to_string(),
            x,
            y,
            size,
        });
        self
    }

    pub fn with_size(mut self, width: f32, height: f32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn rotated(mut self, rotation: i32) -> Self {
        self.rotation = rotation;
        self
    }
}

/// Build a PDF with one page per spec, all sharing a Helvetica `/F1`
pub fn build_pdf(pages: &[PageSpec]) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids = Vec::new();
    for spec in pages {
        let mut operations = Vec::new();
        for line in &spec.lines {
            operations.extend([
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), real(line.size)]),
                Operation::new("Td", vec![real(line.x), real(line.y)]),
                Operation::new(
                    "Tj",
                    vec![Object::String(
                        line.text.clone().into_bytes(),
                        StringFormat::Literal,
                    )],
                ),
                Operation::new("ET", vec![]),
            ]);
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().unwrap_or_default(),
        ));

        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), real(spec.width), real(spec.height)],
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
            "Contents" => content_id,
        };
        if spec.rotation != 0 {
            page.set("Rotate", spec.rotation as i64);
        }
        kids.push(Object::Reference(doc.add_object(page)));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap_or_default();
    buffer
}

fn real(value: f32) -> Object {
    Object::Real(value as _)
}

/// Replace page `page_number` of `bytes` with a `/Contents` array of `streams`
pub fn with_content_streams(bytes: &[u8], page_number: u32, streams: &[&str]) -> Vec<u8> {
    let Ok(mut doc) = Document::load_mem(bytes) else {
        return Vec::new();
    };
    let Some(page_id) = doc.get_pages().get(&page_number).copied() else {
        return Vec::new();
    };
    let parts: Vec<Object> = streams
        .iter()
        .map(|data| Object::Reference(doc.add_object(Stream::new(dictionary! {}, data.as_bytes().to_vec()))))
        .collect();
    if let Ok(page) = doc.get_object_mut(page_id).and_then(Object::as_dict_mut) {
        page.set("Contents", parts);
    }

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap_or_default();
    buffer
}

/// Paints a white canvas of the page's viewport size
#[derive(Debug, Default, Clone, Copy)]
pub struct BlankRasterizer;

impl PageRasterizer for BlankRasterizer {
    fn render(
        &self,
        handle: &DocumentHandle,
        page_number: u32,
        scale: f32,
    ) -> Result<RgbaImage, CoreError> {
        let doc = handle.document();
        let page_id = page::page_id(doc, page_number)?;
        let (width, height) = page::viewport(doc, page_id, scale).pixel_size();
        Ok(RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255])))
    }
}

/// lopdf engine whose pages render blank, for geometry checks
pub fn blank_engine() -> LopdfEngine {
    LopdfEngine::new(Arc::new(BlankRasterizer))
}

/// Text shown by `Tj` operators on each page, in page order
pub fn page_texts(bytes: &[u8]) -> Vec<Vec<String>> {
    let Ok(doc) = Document::load_mem(bytes) else {
        return Vec::new();
    };
    doc.get_pages()
        .into_values()
        .map(|page_id| {
            let data = page::content(&doc, page_id).unwrap_or_default();
            let content = Content::decode(&data).unwrap_or(Content { operations: vec![] });
            content
                .operations
                .iter()
                .filter(|op| op.operator == "Tj")
                .filter_map(|op| match op.operands.first() {
                    Some(Object::String(bytes, _)) => {
                        Some(String::from_utf8_lossy(bytes).into_owned())
                    }
                    _ => None,
                })
                .collect()
        })
        .collect()
}

pub fn solid_image(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(color))
}

pub fn encode_image(image: &RgbaImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    let result = match format {
        ImageFormat::Jpeg => image::DynamicImage::ImageRgba8(image.clone())
            .to_rgb8()
            .write_to(&mut buffer, format),
        _ => image.write_to(&mut buffer, format),
    };
    match result {
        Ok(()) => buffer.into_inner(),
        Err(_) => Vec::new(),
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode_image(&solid_image(width, height, [30, 90, 200, 255]), ImageFormat::Png)
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode_image(&solid_image(width, height, [200, 90, 30, 255]), ImageFormat::Jpeg)
}
