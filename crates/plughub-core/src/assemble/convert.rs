//! Images embedded as full-bleed PDF pages

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::{ColorType, ImageFormat};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, info};

use crate::error::CoreError;

/// An uploaded image to place on its own page
#[derive(Debug, Clone, Copy)]
pub struct ImageSource<'a> {
    pub name: &'a str,
    pub mime: &'a str,
    pub bytes: &'a [u8],
}

impl<'a> ImageSource<'a> {
    pub fn new(name: &'a str, mime: &'a str, bytes: &'a [u8]) -> Self {
        Self { name, mime, bytes }
    }

    /// Declared PNG by MIME type or extension
    fn is_png(&self) -> bool {
        self.mime.to_lowercase().contains("png") || self.name.to_lowercase().ends_with(".png")
    }
}

/// Image XObject ready to be placed
struct Embedded {
    width: u32,
    height: u32,
    id: ObjectId,
}

/// Build a PDF with one page per image, each page sized to the image pixels
pub fn images_to_pdf(images: &[ImageSource<'_>]) -> Result<Vec<u8>, CoreError> {
    if images.is_empty() {
        return Err(CoreError::NoImages);
    }

    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::with_capacity(images.len());

    for source in images {
        let embedded = embed(&mut doc, source)?;
        let (width, height) = (embedded.width as i64, embedded.height as i64);
        let content = format!("q {} 0 0 {} 0 0 cm /Im0 Do Q", width, height);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => embedded.id },
            },
            "Contents" => content_id,
        });
        debug!(name = source.name, width, height, "Embedded image page");
        kids.push(Object::Reference(page_id));
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

    let bytes = super::save(&mut doc)?;
    info!(pages = images.len(), bytes = bytes.len(), "Converted images to PDF");
    Ok(bytes)
}

/// JPEG data is passed through untouched; everything else is decoded to RGB
/// with an optional soft mask.
fn embed(doc: &mut Document, source: &ImageSource<'_>) -> Result<Embedded, CoreError> {
    let jpeg = !source.is_png() && matches!(image::guess_format(source.bytes), Ok(ImageFormat::Jpeg));
    if jpeg {
        embed_jpeg(doc, source.bytes)
    } else {
        embed_raster(doc, source.bytes)
    }
}

fn embed_jpeg(doc: &mut Document, bytes: &[u8]) -> Result<Embedded, CoreError> {
    let decoded = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?;
    let (width, height) = (decoded.width(), decoded.height());
    let color_space = match decoded.color() {
        ColorType::L8 | ColorType::L16 => "DeviceGray",
        _ => "DeviceRGB",
    };

    let dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width as i64,
        "Height" => height as i64,
        "ColorSpace" => color_space,
        "BitsPerComponent" => 8,
        "Filter" => "DCTDecode",
    };
    let id = doc.add_object(Stream::new(dict, bytes.to_vec()).with_compression(false));
    Ok(Embedded { width, height, id })
}

fn embed_raster(doc: &mut Document, bytes: &[u8]) -> Result<Embedded, CoreError> {
    let rgba = image::load_from_memory(bytes)?.to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    let mut alpha = Vec::with_capacity((width * height) as usize);
    for pixel in rgba.pixels() {
        rgb.extend_from_slice(&pixel.0[..3]);
        alpha.push(pixel.0[3]);
    }

    let mut dict = image_dict(width, height, "DeviceRGB");
    if alpha.iter().any(|&a| a != u8::MAX) {
        let mask = Stream::new(image_dict(width, height, "DeviceGray"), deflate(&alpha)?)
            .with_compression(false);
        dict.set("SMask", doc.add_object(mask));
    }

    let id = doc.add_object(Stream::new(dict, deflate(&rgb)?).with_compression(false));
    Ok(Embedded { width, height, id })
}

fn image_dict(width: u32, height: u32, color_space: &str) -> Dictionary {
    dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width as i64,
        "Height" => height as i64,
        "ColorSpace" => color_space,
        "BitsPerComponent" => 8,
        "Filter" => "FlateDecode",
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, CoreError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| CoreError::OperationError(format!("Failed to compress image: {}", e)))
}

/// Name up to the first dot, as used for converted downloads
pub(crate) fn first_stem(name: &str) -> &str {
    match name.split('.').next() {
        Some(stem) if !stem.is_empty() => stem,
        _ => "images",
    }
}
