//! Renderer-facing glyph types and the mapping of baseline-anchored text runs
//! into top-left pixel boxes.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ExtractError;
use crate::geometry::Rect;

/// Affine transform `[a, b, c, d, e, f]` in PDF column-vector convention.
pub type Matrix = [f64; 6];

pub const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// Fallback advance per character, in em, when the renderer gives no width.
pub(crate) const FALLBACK_ADVANCE_EM: f64 = 0.5;

/// `outer x inner`: applies `inner` first.
#[must_use]
pub fn multiply(outer: &Matrix, inner: &Matrix) -> Matrix {
    [
        outer[0] * inner[0] + outer[2] * inner[1],
        outer[1] * inner[0] + outer[3] * inner[1],
        outer[0] * inner[2] + outer[2] * inner[3],
        outer[1] * inner[2] + outer[3] * inner[3],
        outer[0] * inner[4] + outer[2] * inner[5] + outer[4],
        outer[1] * inner[4] + outer[3] * inner[5] + outer[5],
    ]
}

/// Page-to-pixel projection at a zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageViewport {
    pub width: f64,
    pub height: f64,
    pub scale: f64,
    pub transform: Matrix,
}

impl PageViewport {
    /// Viewport for a page of `page_width` x `page_height` user-space units,
    /// flipping the y axis so the pixel origin is top-left.
    #[must_use]
    pub fn new(page_width: f64, page_height: f64, scale: f64) -> Self {
        Self {
            width: page_width * scale,
            height: page_height * scale,
            scale,
            transform: [scale, 0.0, 0.0, -scale, 0.0, page_height * scale],
        }
    }

    fn horizontal_scale(&self) -> f64 {
        self.transform[0].hypot(self.transform[1])
    }

    fn vertical_scale(&self) -> f64 {
        self.transform[2].hypot(self.transform[3])
    }

    fn cache_key(&self) -> [u64; 6] {
        self.transform.map(f64::to_bits)
    }
}

/// One text run as emitted by the renderer. `width`/`height` are in page
/// units and may be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawGlyph {
    #[serde(alias = "str")]
    pub text: String,
    pub transform: Matrix,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlyphBox {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl GlyphBox {
    #[must_use]
    pub fn new(text: impl Into<String>, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            text: text.into(),
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    #[must_use]
    pub fn center_x(&self) -> f64 {
        self.x + self.width / 2.0
    }

    #[must_use]
    pub fn center_y(&self) -> f64 {
        self.y + self.height / 2.0
    }
}

/// Projects one glyph into pixel space. Empty runs produce no box.
#[must_use]
pub fn map_glyph(glyph: &RawGlyph, viewport: &PageViewport) -> Option<GlyphBox> {
    if glyph.text.is_empty() {
        return None;
    }

    let tx = multiply(&viewport.transform, &glyph.transform);
    let height = match glyph.height {
        Some(height) if height > 0.0 => height * viewport.vertical_scale(),
        _ => tx[2].hypot(tx[3]),
    };
    let width = match glyph.width {
        Some(width) if width > 0.0 => width * viewport.horizontal_scale(),
        _ => {
            let chars = glyph.text.chars().count() as f64;
            tx[0].hypot(tx[1]) * chars * FALLBACK_ADVANCE_EM
        }
    };

    Some(GlyphBox {
        text: glyph.text.clone(),
        x: tx[4],
        y: tx[5] - height,
        width,
        height,
    })
}

#[must_use]
pub fn map_page(glyphs: &[RawGlyph], viewport: &PageViewport) -> Vec<GlyphBox> {
    glyphs
        .iter()
        .filter_map(|glyph| map_glyph(glyph, viewport))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageGlyphs {
    pub viewport: PageViewport,
    pub glyphs: Vec<RawGlyph>,
}

/// Renderer boundary: anything that can hand out positioned glyphs per page.
pub trait GlyphSource {
    /// Stable identity of the loaded document; a change clears caches.
    fn document_id(&self) -> &str;

    /// 1-based page numbers in document order.
    fn page_numbers(&self) -> Vec<u32>;

    fn page_glyphs(&self, page: u32, scale: f64) -> Result<PageGlyphs, ExtractError>;

    /// Projection the page would be mapped with, without reading its glyphs.
    fn page_viewport(&self, page: u32, scale: f64) -> Result<PageViewport, ExtractError> {
        Ok(self.page_glyphs(page, scale)?.viewport)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpPage {
    pub page: u32,
    pub width: f64,
    pub height: f64,
    pub glyphs: Vec<RawGlyph>,
}

/// Glyph stream captured from an external renderer as JSON, page units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlyphDump {
    pub document: String,
    pub pages: Vec<DumpPage>,
}

impl GlyphDump {
    pub fn from_json_file(path: &Path) -> Result<Self, ExtractError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn dump_page(&self, page: u32) -> Result<&DumpPage, ExtractError> {
        self.pages
            .iter()
            .find(|candidate| candidate.page == page)
            .ok_or_else(|| ExtractError::PageUnavailable {
                page,
                reason: "page is not present in the glyph dump".to_string(),
            })
    }
}

impl GlyphSource for GlyphDump {
    fn document_id(&self) -> &str {
        &self.document
    }

    fn page_numbers(&self) -> Vec<u32> {
        self.pages.iter().map(|page| page.page).collect()
    }

    fn page_glyphs(&self, page: u32, scale: f64) -> Result<PageGlyphs, ExtractError> {
        let dump = self.dump_page(page)?;
        Ok(PageGlyphs {
            viewport: PageViewport::new(dump.width, dump.height, scale),
            glyphs: dump.glyphs.clone(),
        })
    }

    fn page_viewport(&self, page: u32, scale: f64) -> Result<PageViewport, ExtractError> {
        let dump = self.dump_page(page)?;
        Ok(PageViewport::new(dump.width, dump.height, scale))
    }
}

#[derive(Debug, Clone)]
struct CachedPage {
    key: [u64; 6],
    viewport: PageViewport,
    boxes: Vec<GlyphBox>,
}

/// Mapped boxes per page, valid for one document and one zoom level.
#[derive(Debug, Clone, Default)]
pub struct GlyphCache {
    document_id: Option<String>,
    pages: HashMap<u32, CachedPage>,
}

impl GlyphCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&mut self) {
        self.pages.clear();
        self.document_id = None;
    }

    #[must_use]
    pub fn cached_pages(&self) -> usize {
        self.pages.len()
    }

    /// Returns the page's boxes and viewport, loading them on first access or
    /// when the page-to-pixel transform changed.
    pub fn load<S: GlyphSource + ?Sized>(
        &mut self,
        source: &S,
        page: u32,
        scale: f64,
    ) -> Result<(&PageViewport, &[GlyphBox]), ExtractError> {
        if self.document_id.as_deref() != Some(source.document_id()) {
            self.pages.clear();
            self.document_id = Some(source.document_id().to_string());
        }

        let key = source.page_viewport(page, scale)?.cache_key();
        let stale = self
            .pages
            .get(&page)
            .is_none_or(|cached| cached.key != key);

        if stale {
            let raw = source.page_glyphs(page, scale)?;
            let boxes = map_page(&raw.glyphs, &raw.viewport);
            debug!(page, scale, glyphs = boxes.len(), "mapped page glyphs");
            self.pages.insert(
                page,
                CachedPage {
                    key: raw.viewport.cache_key(),
                    viewport: raw.viewport,
                    boxes,
                },
            );
        }

        let cached = self
            .pages
            .get(&page)
            .ok_or_else(|| ExtractError::PageUnavailable {
                page,
                reason: "glyph cache lost the page".to_string(),
            })?;
        Ok((&cached.viewport, cached.boxes.as_slice()))
    }

    /// Transform bits the page's boxes were produced with.
    #[must_use]
    pub fn transform_key(&self, page: u32) -> Option<[u64; 6]> {
        self.pages.get(&page).map(|cached| cached.key)
    }
}
