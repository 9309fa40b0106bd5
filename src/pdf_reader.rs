//! Glyph source over a PDF file. Replays each page's text operators and
//! reports every shown string with its position; no rendering happens.

use std::collections::{BTreeMap, hash_map::DefaultHasher};
use std::hash::{Hash, Hasher};
use std::path::Path;

use encoding_rs::{BIG5, UTF_16BE};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId};
use tracing::debug;

use crate::error::ExtractError;
use crate::glyph::{
    FALLBACK_ADVANCE_EM, GlyphSource, IDENTITY, Matrix, PageGlyphs, PageViewport, RawGlyph,
    multiply,
};

/// US Letter, used when a page tree carries no MediaBox at all.
const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];
const MAX_PARENT_DEPTH: usize = 32;
/// TJ adjustments below this (thousandths of an em) read as a word gap.
const TJ_SPACE_THRESHOLD: f64 = -100.0;

fn looks_decoding_broken(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    if text.contains("?Identity-H Unimplemented?") {
        return true;
    }

    let total = text.chars().count();
    let replacement = text.matches('\u{FFFD}').count();
    let control = text
        .chars()
        .filter(|ch| ch.is_control() && !matches!(ch, '\n' | '\r' | '\t'))
        .count();
    replacement * 8 > total || control * 5 > total
}

fn decode_utf16(bytes: &[u8]) -> Option<String> {
    let (text, had_errors) = UTF_16BE.decode_without_bom_handling(bytes);
    (!had_errors && !text.is_empty()).then(|| text.into_owned())
}

/// Decodes a string operand with the font's encoding, retrying as UTF-16 or
/// Big5 when the straightforward decode produced garbage.
fn decode_pdf_bytes(encoding: Option<&str>, bytes: &[u8]) -> String {
    let decoded = Document::decode_text(encoding, bytes);
    if !looks_decoding_broken(&decoded) {
        return decoded;
    }

    if bytes.starts_with(&[0xFE, 0xFF]) {
        if let Some(text) = decode_utf16(&bytes[2..]) {
            return text;
        }
    }

    let hint = encoding.map(str::to_ascii_lowercase).unwrap_or_default();
    if ["utf16", "ucs2", "identity-h", "unicode"]
        .iter()
        .any(|marker| hint.contains(marker))
    {
        if let Some(text) = decode_utf16(bytes) {
            return text;
        }
    }
    if ["big5", "b5", "eten", "cns"]
        .iter()
        .any(|marker| hint.contains(marker))
    {
        let (text, _, had_errors) = BIG5.decode(bytes);
        if !had_errors && !text.is_empty() {
            return text.into_owned();
        }
    }

    String::from_utf8_lossy(bytes).into_owned()
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => document.get_object(*id).unwrap_or(object),
        _ => object,
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(value) => Some(*value as f64),
        Object::Real(value) => Some(f64::from(*value)),
        _ => None,
    }
}

fn numbers(operands: &[Object]) -> Option<Vec<f64>> {
    operands.iter().map(as_number).collect()
}

fn matrix_operands(operation: &Operation) -> Option<Matrix> {
    match numbers(&operation.operands)?.as_slice() {
        [a, b, c, d, e, f] => Some([*a, *b, *c, *d, *e, *f]),
        _ => None,
    }
}

/// MediaBox of a page, inherited through `Parent` links.
fn media_box(document: &Document, page_id: ObjectId) -> [f64; 4] {
    let mut current = page_id;
    for _ in 0..MAX_PARENT_DEPTH {
        let Some(dict) = document
            .get_object(current)
            .ok()
            .and_then(|object| object.as_dict().ok())
        else {
            break;
        };
        let values = dict
            .get(b"MediaBox")
            .ok()
            .and_then(|object| resolve(document, object).as_array().ok())
            .and_then(|array| {
                array
                    .iter()
                    .map(|item| as_number(resolve(document, item)))
                    .collect::<Option<Vec<_>>>()
            });
        if let Some([x0, y0, x1, y1]) = values.as_deref() {
            return [*x0, *y0, *x1, *y1];
        }
        match dict.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent) => current = parent,
            Err(_) => break,
        }
    }
    DEFAULT_MEDIA_BOX
}

#[derive(Debug, Clone)]
struct TextState<'a> {
    ctm: Matrix,
    saved: Vec<Matrix>,
    text_matrix: Matrix,
    line_matrix: Matrix,
    font_size: f64,
    leading: f64,
    encoding: Option<&'a str>,
}

impl TextState<'_> {
    fn new(origin: Matrix) -> Self {
        Self {
            ctm: origin,
            saved: Vec::new(),
            text_matrix: IDENTITY,
            line_matrix: IDENTITY,
            font_size: 0.0,
            leading: 0.0,
            encoding: None,
        }
    }

    fn move_line(&mut self, tx: f64, ty: f64) {
        self.line_matrix = multiply(&self.line_matrix, &[1.0, 0.0, 0.0, 1.0, tx, ty]);
        self.text_matrix = self.line_matrix;
    }

    fn next_line(&mut self) {
        self.move_line(0.0, -self.leading);
    }

    /// Emits one glyph run and advances the text matrix by the estimated
    /// run width.
    fn show(&mut self, text: String, glyphs: &mut Vec<RawGlyph>) {
        let size = [self.font_size, 0.0, 0.0, self.font_size, 0.0, 0.0];
        let transform = multiply(&self.ctm, &multiply(&self.text_matrix, &size));
        let chars = text.chars().count() as f64;
        let advance = chars * FALLBACK_ADVANCE_EM * self.font_size;
        self.text_matrix = multiply(&self.text_matrix, &[1.0, 0.0, 0.0, 1.0, advance, 0.0]);
        if !text.trim().is_empty() {
            glyphs.push(RawGlyph {
                text,
                transform,
                width: None,
                height: None,
            });
        }
    }

    fn decode_operand(&self, operand: &Object) -> String {
        match operand {
            Object::String(bytes, _) => decode_pdf_bytes(self.encoding, bytes),
            Object::Array(items) => {
                let mut text = String::new();
                for item in items {
                    match item {
                        Object::String(bytes, _) => {
                            text.push_str(&decode_pdf_bytes(self.encoding, bytes));
                        }
                        other => {
                            if as_number(other).is_some_and(|kern| kern < TJ_SPACE_THRESHOLD) {
                                text.push(' ');
                            }
                        }
                    }
                }
                text
            }
            _ => String::new(),
        }
    }
}

fn page_raw_glyphs(
    document: &Document,
    page: u32,
    page_id: ObjectId,
    origin: Matrix,
) -> Result<Vec<RawGlyph>, ExtractError> {
    let unavailable = |reason: String| ExtractError::PageUnavailable { page, reason };
    let raw_content = document
        .get_page_content(page_id)
        .map_err(|err| unavailable(format!("cannot read content stream: {err}")))?;
    let content = Content::decode(&raw_content)
        .map_err(|err| unavailable(format!("cannot decode content stream: {err}")))?;
    let encodings = document
        .get_page_fonts(page_id)
        .into_iter()
        .map(|(name, font)| (name, font.get_font_encoding()))
        .collect::<BTreeMap<Vec<u8>, &str>>();

    let mut state = TextState::new(origin);
    let mut glyphs = Vec::new();
    for operation in &content.operations {
        let operands = &operation.operands;
        match operation.operator.as_str() {
            "q" => state.saved.push(state.ctm),
            "Q" => {
                if let Some(ctm) = state.saved.pop() {
                    state.ctm = ctm;
                }
            }
            "cm" => {
                if let Some(matrix) = matrix_operands(operation) {
                    state.ctm = multiply(&state.ctm, &matrix);
                }
            }
            "BT" => {
                state.text_matrix = IDENTITY;
                state.line_matrix = IDENTITY;
            }
            "Tf" => {
                if let Some(name) = operands.first().and_then(|operand| operand.as_name().ok()) {
                    state.encoding = encodings.get(name).copied();
                }
                if let Some(size) = operands.get(1).and_then(as_number) {
                    state.font_size = size;
                }
            }
            "TL" => {
                if let Some(leading) = operands.first().and_then(as_number) {
                    state.leading = leading;
                }
            }
            "Td" | "TD" => {
                if let Some([tx, ty]) = numbers(operands).as_deref() {
                    if operation.operator == "TD" {
                        state.leading = -ty;
                    }
                    state.move_line(*tx, *ty);
                }
            }
            "Tm" => {
                if let Some(matrix) = matrix_operands(operation) {
                    state.line_matrix = matrix;
                    state.text_matrix = matrix;
                }
            }
            "T*" => state.next_line(),
            "Tj" | "TJ" => {
                if let Some(operand) = operands.first() {
                    let text = state.decode_operand(operand);
                    state.show(text, &mut glyphs);
                }
            }
            "'" => {
                state.next_line();
                if let Some(operand) = operands.first() {
                    let text = state.decode_operand(operand);
                    state.show(text, &mut glyphs);
                }
            }
            "\"" => {
                state.next_line();
                if let Some(operand) = operands.get(2) {
                    let text = state.decode_operand(operand);
                    state.show(text, &mut glyphs);
                }
            }
            _ => {}
        }
    }
    Ok(glyphs)
}

/// A loaded PDF acting as the renderer boundary.
pub struct PdfGlyphSource {
    document: Document,
    document_id: String,
    pages: BTreeMap<u32, ObjectId>,
}

impl PdfGlyphSource {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ExtractError> {
        let document = Document::load_mem(bytes)?;
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        let pages = document.get_pages();
        debug!(pages = pages.len(), "loaded pdf document");
        Ok(Self {
            document,
            document_id: format!("{:016x}", hasher.finish()),
            pages,
        })
    }

    pub fn open(path: &Path) -> Result<Self, ExtractError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    fn page_id(&self, page: u32) -> Result<ObjectId, ExtractError> {
        self.pages
            .get(&page)
            .copied()
            .ok_or_else(|| ExtractError::PageUnavailable {
                page,
                reason: "page does not exist in the document".to_string(),
            })
    }
}

impl GlyphSource for PdfGlyphSource {
    fn document_id(&self) -> &str {
        &self.document_id
    }

    fn page_numbers(&self) -> Vec<u32> {
        self.pages.keys().copied().collect()
    }

    fn page_glyphs(&self, page: u32, scale: f64) -> Result<PageGlyphs, ExtractError> {
        let page_id = self.page_id(page)?;
        let [x0, y0, x1, y1] = media_box(&self.document, page_id);
        let origin = [1.0, 0.0, 0.0, 1.0, -x0.min(x1), -y0.min(y1)];
        let glyphs = page_raw_glyphs(&self.document, page, page_id, origin)?;
        Ok(PageGlyphs {
            viewport: PageViewport::new((x1 - x0).abs(), (y1 - y0).abs(), scale),
            glyphs,
        })
    }

    fn page_viewport(&self, page: u32, scale: f64) -> Result<PageViewport, ExtractError> {
        let [x0, y0, x1, y1] = media_box(&self.document, self.page_id(page)?);
        Ok(PageViewport::new((x1 - x0).abs(), (y1 - y0).abs(), scale))
    }
}

#[cfg(test)]
mod tests {
    use super::{TextState, decode_pdf_bytes, looks_decoding_broken};
    use crate::glyph::IDENTITY;

    #[test]
    fn decodes_big5_when_encoding_hint_is_present() {
        let (bytes, _, had_errors) = encoding_rs::BIG5.encode("測試");
        assert!(!had_errors);
        assert_eq!(decode_pdf_bytes(Some("ETen-B5-H"), &bytes), "測試");
    }

    #[test]
    fn replacement_heavy_text_counts_as_broken() {
        assert!(looks_decoding_broken("\u{FFFD}\u{FFFD}a"));
        assert!(!looks_decoding_broken("Balance 12.50"));
    }

    #[test]
    fn shown_runs_advance_the_text_matrix() {
        let mut state = TextState::new(IDENTITY);
        state.font_size = 10.0;
        state.move_line(50.0, 700.0);
        let mut glyphs = Vec::new();
        state.show("Total".to_string(), &mut glyphs);
        state.show("   ".to_string(), &mut glyphs);
        state.show("9".to_string(), &mut glyphs);

        assert_eq!(glyphs.len(), 2);
        assert_eq!(glyphs[0].transform, [10.0, 0.0, 0.0, 10.0, 50.0, 700.0]);
        // 5 chars + 3 spaces at half an em each
        assert_eq!(glyphs[1].transform[4], 90.0);
    }
}
