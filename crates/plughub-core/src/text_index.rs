//! Positioned text extraction
//!
//! Walks each page's content stream, tracking the graphics and text state
//! far enough to place every text-showing operation. Form XObjects drawn
//! with `Do` are walked too, and fonts with a ToUnicode CMap are decoded
//! through it. Boxes are reported in the page viewport at scale 1 (top-left
//! origin), the same space thumbnails are rendered in.

use std::collections::{HashMap, HashSet};

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object};
use serde::Serialize;
use tracing::debug;

use crate::cache::DocumentHandle;
use crate::cmap::ToUnicode;
use crate::error::CoreError;
use crate::page::{self, number, resolve};
use crate::viewport::{Matrix, Rect, Viewport};

/// Most candidate values listed for selection at once
pub const CANDIDATE_LIMIT: usize = 300;

/// Advance used for glyphs without width information, in em
const DEFAULT_GLYPH_WIDTH: f32 = 0.5;

/// Height and font size used when the text matrix is degenerate
const MIN_EXTENT: f32 = 10.0;

/// Form XObjects nested deeper than this are not walked
const MAX_FORM_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextRun {
    pub text: String,
    pub page_number: u32,
    /// Viewport box at scale 1, y measured from the visual top
    pub bbox: Rect,
    pub font_size: f32,
}

/// Text runs of one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextIndex {
    runs: Vec<TextRun>,
}

impl TextIndex {
    pub fn extract(handle: &DocumentHandle) -> Result<Self, CoreError> {
        let runs = extract_runs(handle.document())?;
        debug!(item = %handle.item(), runs = runs.len(), "Indexed text");
        Ok(Self { runs })
    }

    pub fn from_runs(runs: Vec<TextRun>) -> Self {
        Self { runs }
    }

    pub fn runs(&self) -> &[TextRun] {
        &self.runs
    }

    pub fn into_runs(self) -> Vec<TextRun> {
        self.runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Distinct text values in first-seen order
    pub fn values(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.runs
            .iter()
            .map(|run| run.text.as_str())
            .filter(|text| seen.insert(*text))
            .collect()
    }

    /// Distinct values containing `filter` (case-insensitive), at most `limit`
    pub fn candidates(&self, filter: &str, limit: usize) -> Vec<&str> {
        let needle = filter.trim().to_lowercase();
        self.values()
            .into_iter()
            .filter(|text| needle.is_empty() || text.to_lowercase().contains(&needle))
            .take(limit)
            .collect()
    }
}

/// Extract text runs for every page of `doc`
pub fn extract_runs(doc: &Document) -> Result<Vec<TextRun>, CoreError> {
    let mut runs = Vec::new();
    for (page_number, page_id) in doc.get_pages() {
        let viewport = page::viewport(doc, page_id, 1.0);
        let resources = page::resources(doc, page_id);
        let fonts = load_fonts(doc, &resources);
        let data = page::content(doc, page_id)?;
        let content = Content::decode(&data)
            .map_err(|e| CoreError::ParseError(format!("page {} content: {}", page_number, e)))?;

        let mut interpreter = Interpreter::new(doc, &resources, &fonts, 0);
        for operation in &content.operations {
            interpreter.step(operation);
        }
        runs.extend(
            interpreter
                .fragments
                .into_iter()
                .map(|fragment| fragment.into_run(page_number, &viewport)),
        );
    }
    Ok(runs)
}

/// Width metrics and text mapping of one font resource
#[derive(Debug, Clone, PartialEq)]
struct FontInfo {
    first_char: u32,
    /// Glyph widths in em
    widths: Vec<f32>,
    missing_width: Option<f32>,
    default_width: f32,
    two_byte: bool,
    to_unicode: Option<ToUnicode>,
}

impl FontInfo {
    fn from_dict(doc: &Document, dict: &Dictionary) -> Self {
        let em = |obj: &Object| number(resolve(doc, obj)).map(|w| w / 1000.0);
        let two_byte = dict
            .get(b"Subtype")
            .and_then(Object::as_name)
            .map(|name| name == b"Type0")
            .unwrap_or(false);

        let default_width = dict
            .get(b"DescendantFonts")
            .ok()
            .and_then(|obj| resolve(doc, obj).as_array().ok())
            .and_then(|fonts| fonts.first())
            .and_then(|font| resolve(doc, font).as_dict().ok())
            .and_then(|font| font.get(b"DW").ok())
            .and_then(em)
            .unwrap_or(if two_byte { 1.0 } else { DEFAULT_GLYPH_WIDTH });

        let widths = dict
            .get(b"Widths")
            .ok()
            .and_then(|obj| resolve(doc, obj).as_array().ok())
            .map(|array| array.iter().map(|w| em(w).unwrap_or(0.0)).collect())
            .unwrap_or_default();

        let missing_width = dict
            .get(b"FontDescriptor")
            .ok()
            .and_then(|obj| resolve(doc, obj).as_dict().ok())
            .and_then(|desc| desc.get(b"MissingWidth").ok())
            .and_then(em);

        let first_char = dict
            .get(b"FirstChar")
            .ok()
            .and_then(|obj| resolve(doc, obj).as_i64().ok())
            .unwrap_or(0)
            .max(0) as u32;

        let to_unicode = dict
            .get(b"ToUnicode")
            .ok()
            .and_then(|obj| resolve(doc, obj).as_stream().ok())
            .map(|stream| {
                let data = stream
                    .decompressed_content()
                    .unwrap_or_else(|_| stream.content.clone());
                ToUnicode::parse(&data)
            })
            .filter(|cmap| !cmap.is_empty());

        Self {
            first_char,
            widths,
            missing_width,
            default_width,
            two_byte,
            to_unicode,
        }
    }

    /// Bytes per character code
    fn code_len(&self) -> usize {
        if !self.two_byte {
            return 1;
        }
        self.to_unicode
            .as_ref()
            .and_then(ToUnicode::code_len)
            .unwrap_or(2)
    }

    fn width(&self, code: u32) -> f32 {
        code.checked_sub(self.first_char)
            .and_then(|idx| self.widths.get(idx as usize))
            .copied()
            .or(self.missing_width)
            .unwrap_or(self.default_width)
    }
}

fn load_fonts(doc: &Document, resources: &Dictionary) -> HashMap<Vec<u8>, FontInfo> {
    let Some(fonts) = resources
        .get(b"Font")
        .ok()
        .and_then(|obj| resolve(doc, obj).as_dict().ok())
    else {
        return HashMap::new();
    };

    fonts
        .iter()
        .filter_map(|(name, obj)| {
            let dict = resolve(doc, obj).as_dict().ok()?;
            Some((name.clone(), FontInfo::from_dict(doc, dict)))
        })
        .collect()
}

/// Character codes of a shown string
fn char_codes(bytes: &[u8], font: Option<&FontInfo>) -> Vec<u32> {
    let width = font.map_or(1, FontInfo::code_len).max(1);
    bytes
        .chunks(width)
        .map(|code| code.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32))
        .collect()
}

/// Text of a shown string.
///
/// A ToUnicode CMap wins when the font has one. Otherwise UTF-16BE for
/// composite fonts and BOM-prefixed strings, else UTF-8, else Latin-1.
fn decode_text(bytes: &[u8], font: Option<&FontInfo>) -> String {
    if let Some(cmap) = font.and_then(|f| f.to_unicode.as_ref()) {
        return char_codes(bytes, font)
            .into_iter()
            .map(|code| match cmap.get(code) {
                Some(text) => text.to_string(),
                None if code < 0x100 => char::from(code as u8).to_string(),
                None => char::REPLACEMENT_CHARACTER.to_string(),
            })
            .collect();
    }

    let utf16 = |data: &[u8]| {
        let units: Vec<u16> = data
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    };

    if bytes.starts_with(&[0xFE, 0xFF]) {
        return utf16(&bytes[2..]);
    }
    if font.is_some_and(|f| f.two_byte) {
        return utf16(bytes);
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

#[derive(Debug, Clone, Copy)]
struct GraphicsState<'a> {
    ctm: Matrix,
    char_spacing: f32,
    word_spacing: f32,
    horizontal_scale: f32,
    leading: f32,
    rise: f32,
    font: Option<&'a FontInfo>,
    font_size: f32,
}

impl Default for GraphicsState<'_> {
    fn default() -> Self {
        Self {
            ctm: Matrix::IDENTITY,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 1.0,
            leading: 0.0,
            rise: 0.0,
            font: None,
            font_size: 0.0,
        }
    }
}

/// One text-showing operation, still in user space
#[derive(Debug)]
struct Fragment {
    text: String,
    /// Text rendering matrix at the start of the string
    trm: Matrix,
    /// Advance along the baseline in user space
    width: f32,
}

impl Fragment {
    fn into_run(self, page_number: u32, viewport: &Viewport) -> TextRun {
        let [a, _, c, d, e, f] = self.trm.0;
        let height = non_zero(c.hypot(d))
            .or(non_zero(d.abs()))
            .unwrap_or(MIN_EXTENT);
        let font_size = non_zero(a.abs())
            .or(non_zero(d.abs()))
            .unwrap_or(MIN_EXTENT);

        TextRun {
            text: self.text,
            page_number,
            bbox: viewport.to_viewport_rect(e, f, e + self.width, f + height),
            font_size,
        }
    }
}

fn matrix_of(doc: &Document, obj: &Object) -> Option<Matrix> {
    let values = resolve(doc, obj).as_array().ok()?;
    if values.len() != 6 {
        return None;
    }
    let mut m = [0.0; 6];
    for (slot, value) in m.iter_mut().zip(values) {
        *slot = number(resolve(doc, value))?;
    }
    Some(Matrix(m))
}

fn non_zero(value: f32) -> Option<f32> {
    (value.is_finite() && value.abs() > f32::EPSILON).then_some(value)
}

struct Interpreter<'a> {
    doc: &'a Document,
    resources: &'a Dictionary,
    fonts: &'a HashMap<Vec<u8>, FontInfo>,
    depth: usize,
    state: GraphicsState<'a>,
    stack: Vec<GraphicsState<'a>>,
    text_matrix: Matrix,
    line_matrix: Matrix,
    fragments: Vec<Fragment>,
}

impl<'a> Interpreter<'a> {
    fn new(
        doc: &'a Document,
        resources: &'a Dictionary,
        fonts: &'a HashMap<Vec<u8>, FontInfo>,
        depth: usize,
    ) -> Self {
        Self {
            doc,
            resources,
            fonts,
            depth,
            state: GraphicsState::default(),
            stack: Vec::new(),
            text_matrix: Matrix::IDENTITY,
            line_matrix: Matrix::IDENTITY,
            fragments: Vec::new(),
        }
    }

    fn step(&mut self, op: &Operation) {
        let nums: Vec<f32> = op.operands.iter().filter_map(number).collect();
        let num = |i: usize| nums.get(i).copied().unwrap_or(0.0);

        match op.operator.as_str() {
            "q" => self.stack.push(self.state),
            "Q" => {
                if let Some(state) = self.stack.pop() {
                    self.state = state;
                }
            }
            "cm" if nums.len() == 6 => {
                let m = Matrix([num(0), num(1), num(2), num(3), num(4), num(5)]);
                self.state.ctm = m.then(&self.state.ctm);
            }
            "BT" => {
                self.text_matrix = Matrix::IDENTITY;
                self.line_matrix = Matrix::IDENTITY;
            }
            "Tc" => self.state.char_spacing = num(0),
            "Tw" => self.state.word_spacing = num(0),
            "Tz" => self.state.horizontal_scale = num(0) / 100.0,
            "TL" => self.state.leading = num(0),
            "Ts" => self.state.rise = num(0),
            "Tf" => {
                self.state.font = op
                    .operands
                    .first()
                    .and_then(|name| name.as_name().ok())
                    .and_then(|name| self.fonts.get(name));
                self.state.font_size = op.operands.get(1).and_then(number).unwrap_or(0.0);
            }
            "Td" => self.move_line(num(0), num(1)),
            "TD" => {
                self.state.leading = -num(1);
                self.move_line(num(0), num(1));
            }
            "Tm" if nums.len() == 6 => {
                self.line_matrix = Matrix([num(0), num(1), num(2), num(3), num(4), num(5)]);
                self.text_matrix = self.line_matrix;
            }
            "T*" => self.next_line(),
            "Tj" => self.show(&op.operands),
            "TJ" => {
                if let Some(Object::Array(items)) = op.operands.first() {
                    self.show(items);
                }
            }
            "'" => {
                self.next_line();
                self.show(&op.operands);
            }
            "\"" => {
                self.state.word_spacing = num(0);
                self.state.char_spacing = num(1);
                self.next_line();
                self.show(op.operands.get(2..).unwrap_or(&[]));
            }
            "Do" => {
                if let Some(name) = op.operands.first().and_then(|name| name.as_name().ok()) {
                    self.draw_form(name);
                }
            }
            _ => {}
        }
    }

    /// Walk a Form XObject in the current graphics state
    fn draw_form(&mut self, name: &[u8]) {
        if self.depth >= MAX_FORM_DEPTH {
            debug!(depth = self.depth, "Form XObjects nested too deep");
            return;
        }
        let doc = self.doc;
        let Some(form) = self
            .resources
            .get(b"XObject")
            .ok()
            .and_then(|obj| resolve(doc, obj).as_dict().ok())
            .and_then(|xobjects| xobjects.get(name).ok())
            .and_then(|obj| resolve(doc, obj).as_stream().ok())
        else {
            return;
        };
        let is_form = form
            .dict
            .get(b"Subtype")
            .and_then(Object::as_name)
            .is_ok_and(|subtype| subtype == b"Form");
        if !is_form {
            return;
        }

        let data = form
            .decompressed_content()
            .unwrap_or_else(|_| form.content.clone());
        let Ok(content) = Content::decode(&data) else {
            debug!(form = %String::from_utf8_lossy(name), "Unreadable form content");
            return;
        };
        let matrix = form
            .dict
            .get(b"Matrix")
            .ok()
            .and_then(|obj| matrix_of(doc, obj))
            .unwrap_or(Matrix::IDENTITY);
        // Forms without their own resources use the enclosing ones
        let resources = form
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|obj| resolve(doc, obj).as_dict().ok())
            .unwrap_or(self.resources);
        let fonts = load_fonts(doc, resources);

        let mut nested = Interpreter::new(doc, resources, &fonts, self.depth + 1);
        let mut state = self.state;
        state.ctm = matrix.then(&self.state.ctm);
        state.font = None;
        nested.state = state;
        for operation in &content.operations {
            nested.step(operation);
        }
        self.fragments.extend(nested.fragments);
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix = Matrix::translate(tx, ty).then(&self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn next_line(&mut self) {
        self.move_line(0.0, -self.state.leading);
    }

    /// Show strings and `TJ` adjustments, advancing the text matrix
    fn show(&mut self, items: &[Object]) {
        let state = self.state;
        let font_size = state.font_size;
        let h_scale = state.horizontal_scale;

        let trm = Matrix([font_size * h_scale, 0.0, 0.0, font_size, 0.0, state.rise])
            .then(&self.text_matrix)
            .then(&state.ctm);
        let user = self.text_matrix.then(&state.ctm);

        let mut text = String::new();
        let mut advance = 0.0;
        for item in items {
            match item {
                Object::String(bytes, _) => {
                    text.push_str(&decode_text(bytes, state.font));
                    let single_byte = !state.font.is_some_and(|f| f.two_byte);
                    for code in char_codes(bytes, state.font) {
                        let glyph = state
                            .font
                            .map(|f| f.width(code))
                            .unwrap_or(DEFAULT_GLYPH_WIDTH);
                        let mut tx = glyph * font_size + state.char_spacing;
                        if single_byte && code == 32 {
                            tx += state.word_spacing;
                        }
                        advance += tx * h_scale;
                    }
                }
                other => {
                    if let Some(adjust) = number(other) {
                        advance -= adjust / 1000.0 * font_size * h_scale;
                        // Wide negative kerning usually separates words
                        if adjust < -100.0 {
                            text.push(' ');
                        }
                    }
                }
            }
        }

        self.text_matrix = Matrix::translate(advance, 0.0).then(&self.text_matrix);

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        let [a, b, ..] = user.0;
        self.fragments.push(Fragment {
            text: trimmed.to_string(),
            trm,
            width: advance * a.hypot(b),
        });
    }
}
