//! Row and column synthesis for tables whose guides are missing.
//!
//! Everything here works on 1-D projections of glyph centers: rows cluster
//! vertical centers, columns cluster horizontal midpoints. Results are a pure
//! function of the inputs; a single extra glyph may move every boundary, so
//! callers rebuild instead of patching.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::geometry::Rect;
use crate::glyph::GlyphBox;
use crate::options::{ColumnMode, InferenceConfig, RowMode};

static NOISE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\s.\-–—·•]*$").expect("hardcoded table-rule noise regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnStrategy {
    Explicit,
    KMeans { k: usize },
    TwoColumnForm,
    Proportional,
    SingleColumn,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferredGrid {
    pub rows: Vec<Rect>,
    pub cols: Vec<Rect>,
    pub column_strategy: ColumnStrategy,
    pub paragraph_rows_dropped: usize,
    pub single_row_fallback: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct RowCluster<'a> {
    pub members: Vec<&'a GlyphBox>,
    pub mean: f64,
    pub top: f64,
    pub bottom: f64,
    pub paragraph: bool,
}

impl RowCluster<'_> {
    fn text(&self) -> String {
        let mut members = self.members.clone();
        members.sort_by(|a, b| a.x.total_cmp(&b.x));
        members
            .iter()
            .map(|glyph| glyph.text.trim())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub(crate) fn is_noise(text: &str) -> bool {
    NOISE_RE.is_match(text)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0_usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

fn looks_like_paragraph(text: &str, config: &InferenceConfig) -> bool {
    text.chars().count() > config.paragraph_max_chars
        || text.split_whitespace().count() > config.paragraph_max_tokens
}

/// Greedy vertical clustering. Clusters come back top to bottom with their
/// paragraph flag set but not yet filtered.
pub(crate) fn detect_row_clusters<'a>(
    glyphs: &[&'a GlyphBox],
    row_mode: RowMode,
    config: &InferenceConfig,
) -> Vec<RowCluster<'a>> {
    if glyphs.is_empty() {
        return Vec::new();
    }

    let mut sorted = glyphs.to_vec();
    sorted.sort_by(|a, b| {
        a.center_y()
            .total_cmp(&b.center_y())
            .then(a.x.total_cmp(&b.x))
    });

    let factor = match row_mode {
        RowMode::Standard => config.row_tolerance_factor,
        RowMode::Relaxed => config.relaxed_row_tolerance_factor,
    };
    let mean_height = mean(sorted.iter().map(|glyph| glyph.height));
    let tolerance = config.row_tolerance_floor.max(factor * mean_height);

    let mut clusters: Vec<RowCluster<'a>> = Vec::new();
    for glyph in sorted {
        let cy = glyph.center_y();
        match clusters.last_mut() {
            Some(cluster) if (cy - cluster.mean).abs() <= tolerance => {
                let count = cluster.members.len() as f64;
                cluster.mean = (cluster.mean * count + cy) / (count + 1.0);
                cluster.top = cluster.top.min(glyph.y);
                cluster.bottom = cluster.bottom.max(glyph.y + glyph.height);
                cluster.members.push(glyph);
            }
            _ => clusters.push(RowCluster {
                members: vec![glyph],
                mean: cy,
                top: glyph.y,
                bottom: glyph.y + glyph.height,
                paragraph: false,
            }),
        }
    }

    for cluster in &mut clusters {
        cluster.paragraph = looks_like_paragraph(&cluster.text(), config);
    }
    clusters
}

/// Row rects spanning the table width. Overlapping neighbours are split at
/// the midpoint of their means so a glyph center lands in one row only.
fn rows_from_clusters(table: &Rect, clusters: &[&RowCluster<'_>]) -> Vec<Rect> {
    let mut edges = clusters
        .iter()
        .map(|cluster| (cluster.top, cluster.bottom, cluster.mean))
        .collect::<Vec<_>>();

    for index in 1..edges.len() {
        let (_, prev_bottom, prev_mean) = edges[index - 1];
        let (top, _, mean) = edges[index];
        if prev_bottom > top {
            let boundary = ((prev_mean + mean) / 2.0).clamp(top, prev_bottom);
            edges[index - 1].1 = boundary;
            edges[index].0 = boundary;
        }
    }

    edges
        .into_iter()
        .map(|(top, bottom, _)| {
            Rect::from_edges(
                table.x,
                top.max(table.y),
                table.right(),
                bottom.min(table.bottom()),
            )
        })
        .filter(|rect| rect.height > 0.0)
        .collect()
}

#[derive(Debug, Clone)]
struct KMeansFit {
    centroids: Vec<f64>,
    assignment: Vec<usize>,
    sizes: Vec<usize>,
}

fn nearest(centroids: &[f64], value: f64) -> usize {
    let mut best = 0;
    for (index, centroid) in centroids.iter().enumerate().skip(1) {
        if (value - centroid).abs() < (value - centroids[best]).abs() {
            best = index;
        }
    }
    best
}

/// Lloyd's algorithm over sorted scalars with quantile seeding, so the same
/// input always converges to the same clustering.
fn kmeans_1d(sorted: &[f64], k: usize, iterations: usize) -> KMeansFit {
    let n = sorted.len();
    let mut centroids = (0..k)
        .map(|j| sorted[((2 * j + 1) * n / (2 * k)).min(n - 1)])
        .collect::<Vec<_>>();
    let mut assignment = sorted
        .iter()
        .map(|value| nearest(&centroids, *value))
        .collect::<Vec<_>>();

    for _ in 0..iterations {
        let mut sums = vec![0.0; k];
        let mut counts = vec![0_usize; k];
        for (value, cluster) in sorted.iter().zip(&assignment) {
            sums[*cluster] += value;
            counts[*cluster] += 1;
        }
        for cluster in 0..k {
            if counts[cluster] > 0 {
                centroids[cluster] = sums[cluster] / counts[cluster] as f64;
            }
        }

        let next = sorted
            .iter()
            .map(|value| nearest(&centroids, *value))
            .collect::<Vec<_>>();
        if next == assignment {
            break;
        }
        assignment = next;
    }

    let mut sizes = vec![0_usize; k];
    for cluster in &assignment {
        sizes[*cluster] += 1;
    }
    KMeansFit {
        centroids,
        assignment,
        sizes,
    }
}

/// Larger is better: wide gaps between centroids, tight clusters, few
/// under-populated clusters.
fn score_fit(fit: &KMeansFit, sorted: &[f64], config: &InferenceConfig) -> f64 {
    let mut ordered = fit.centroids.clone();
    ordered.sort_by(f64::total_cmp);
    let gap = mean(ordered.windows(2).map(|pair| pair[1] - pair[0]));

    let spread = mean((0..fit.centroids.len()).filter(|c| fit.sizes[*c] > 0).map(|cluster| {
        let members = sorted
            .iter()
            .zip(&fit.assignment)
            .filter(|(_, assigned)| **assigned == cluster)
            .map(|(value, _)| *value)
            .collect::<Vec<_>>();
        let centroid = mean(members.iter().copied());
        mean(members.iter().map(|value| (value - centroid).powi(2))).sqrt()
    }));

    let small = fit
        .sizes
        .iter()
        .filter(|size| **size < config.min_cluster_members)
        .count();

    gap - config.spread_weight * spread - config.small_cluster_penalty * small as f64
}

#[derive(Debug, Clone, Copy)]
struct ColumnSpan {
    left: f64,
    right: f64,
    center: f64,
}

fn column_span(members: &[&GlyphBox]) -> Option<ColumnSpan> {
    let left = members.iter().map(|glyph| glyph.x).reduce(f64::min)?;
    let right = members
        .iter()
        .map(|glyph| glyph.x + glyph.width)
        .reduce(f64::max)?;
    Some(ColumnSpan {
        left,
        right,
        center: mean(members.iter().map(|glyph| glyph.center_x())),
    })
}

/// Column rects in x order, clipped to the table and the row band.
/// Overlapping neighbours are split at the midpoint of their centroids so a
/// glyph center lands in one column only.
fn columns_from_spans(table: &Rect, band: (f64, f64), mut spans: Vec<ColumnSpan>) -> Vec<Rect> {
    spans.sort_by(|a, b| a.center.total_cmp(&b.center));

    for index in 1..spans.len() {
        let prev = spans[index - 1];
        let next = spans[index];
        if prev.right > next.left {
            let boundary = ((prev.center + next.center) / 2.0).clamp(next.left, prev.right);
            spans[index - 1].right = boundary;
            spans[index].left = boundary;
        }
    }

    // a wide span may still reach past a narrower neighbour
    let mut floor = f64::NEG_INFINITY;
    for span in &mut spans {
        span.left = span.left.max(floor);
        floor = floor.max(span.right);
    }

    spans
        .into_iter()
        .map(|span| {
            Rect::from_edges(
                span.left.max(table.x),
                band.0,
                span.right.min(table.right()),
                band.1,
            )
        })
        .filter(|rect| rect.width > 0.0 && rect.height > 0.0)
        .collect()
}

fn kmeans_columns(
    table: &Rect,
    band: (f64, f64),
    glyphs: &[&GlyphBox],
    config: &InferenceConfig,
) -> Option<(usize, Vec<Rect>)> {
    let mut sorted = glyphs.to_vec();
    sorted.sort_by(|a, b| a.center_x().total_cmp(&b.center_x()));
    let xs = sorted.iter().map(|glyph| glyph.center_x()).collect::<Vec<_>>();
    let distinct = xs.windows(2).filter(|pair| pair[1] > pair[0]).count() + 1;
    if xs.len() < 2 || distinct < 2 {
        return None;
    }

    let mut best: Option<(f64, usize, KMeansFit)> = None;
    for k in 2..=config.max_cols.min(xs.len()) {
        let fit = kmeans_1d(&xs, k, config.kmeans_iterations);
        let score = score_fit(&fit, &xs, config);
        debug!(k, score, "scored k-means column fit");
        if best.as_ref().is_none_or(|(best_score, _, _)| score > *best_score) {
            best = Some((score, k, fit));
        }
    }

    let (_, k, fit) = best?;
    let spans = (0..k)
        .filter_map(|cluster| {
            let members = sorted
                .iter()
                .zip(&fit.assignment)
                .filter(|(_, assigned)| **assigned == cluster)
                .map(|(glyph, _)| *glyph)
                .collect::<Vec<_>>();
            column_span(&members)
        })
        .collect::<Vec<_>>();
    Some((k, columns_from_spans(table, band, spans)))
}

/// Splits at the widest gap between consecutive midpoints, if it is wide
/// enough to be a label/value gutter.
fn form_split(glyphs: &[&GlyphBox], config: &InferenceConfig) -> Option<f64> {
    let mut xs = glyphs.iter().map(|glyph| glyph.center_x()).collect::<Vec<_>>();
    xs.sort_by(f64::total_cmp);
    let (gap, split) = xs
        .windows(2)
        .map(|pair| (pair[1] - pair[0], (pair[0] + pair[1]) / 2.0))
        .max_by(|a, b| a.0.total_cmp(&b.0))?;

    let mean_width = mean(glyphs.iter().map(|glyph| glyph.width));
    let threshold = config.form_gap_floor.max(config.form_gap_factor * mean_width);
    (gap > threshold).then_some(split)
}

fn proportional_columns(
    table: &Rect,
    band: (f64, f64),
    glyphs: &[&GlyphBox],
    config: &InferenceConfig,
) -> Vec<Rect> {
    let mut sorted = glyphs.to_vec();
    sorted.sort_by(|a, b| a.center_x().total_cmp(&b.center_x()));
    let mean_width = mean(sorted.iter().map(|glyph| glyph.width));
    let tolerance = config
        .column_tolerance_floor
        .max(config.column_tolerance_factor * mean_width);

    let mut clusters: Vec<(f64, Vec<&GlyphBox>)> = Vec::new();
    for glyph in sorted {
        let cx = glyph.center_x();
        match clusters.last_mut() {
            Some((cluster_mean, members)) if (cx - *cluster_mean).abs() <= tolerance => {
                let count = members.len() as f64;
                *cluster_mean = (*cluster_mean * count + cx) / (count + 1.0);
                members.push(glyph);
            }
            _ => clusters.push((cx, vec![glyph])),
        }
    }

    let spans = clusters
        .iter()
        .filter_map(|(_, members)| column_span(members))
        .collect();
    columns_from_spans(table, band, spans)
}

/// Prose test for form layouts: a row with any glyph crossing the
/// label/value gutter is running text, not a `label value` pair.
fn straddles(cluster: &RowCluster<'_>, split: f64) -> bool {
    cluster
        .members
        .iter()
        .any(|glyph| glyph.x < split && glyph.x + glyph.width > split)
}

/// Fills whichever axes `known_rows`/`known_cols` leave empty. Explicit
/// guides are returned untouched; an axis that cannot be determined
/// degrades to one rect spanning the table.
#[must_use]
pub fn infer_grid(
    table: &Rect,
    glyphs: &[GlyphBox],
    known_rows: &[Rect],
    known_cols: &[Rect],
    column_mode: ColumnMode,
    row_mode: RowMode,
    config: &InferenceConfig,
) -> InferredGrid {
    let content = glyphs
        .iter()
        .filter(|glyph| {
            let (cx, cy) = glyph.center();
            table.contains_point(cx, cy, config.eps) && !is_noise(&glyph.text)
        })
        .collect::<Vec<_>>();

    let clusters = if known_rows.is_empty() {
        detect_row_clusters(&content, row_mode, config)
    } else {
        Vec::new()
    };
    let mut kept = clusters
        .iter()
        .filter(|cluster| !cluster.paragraph)
        .collect::<Vec<_>>();

    // Glyphs feeding column detection: real rows only, never prose.
    let column_glyphs = if known_rows.is_empty() {
        kept.iter()
            .flat_map(|cluster| cluster.members.iter().copied())
            .collect::<Vec<_>>()
    } else {
        content
            .iter()
            .copied()
            .filter(|glyph| {
                let (cx, cy) = glyph.center();
                known_rows
                    .iter()
                    .any(|row| row.contains_point(cx, cy, config.eps))
            })
            .collect()
    };

    let mut split = None;
    let (mut cols, mut column_strategy) = if known_cols.is_empty() {
        (Vec::new(), ColumnStrategy::SingleColumn)
    } else {
        (known_cols.to_vec(), ColumnStrategy::Explicit)
    };

    if known_cols.is_empty() && column_mode == ColumnMode::TwoColumnForm {
        split = form_split(&column_glyphs, config);
        if let Some(split_x) = split {
            kept.retain(|cluster| !straddles(cluster, split_x));
        }
    }

    let band = if known_rows.is_empty() {
        match (kept.first(), kept.last()) {
            (Some(first), Some(last)) => (first.top.max(table.y), last.bottom.min(table.bottom())),
            _ => (table.y, table.bottom()),
        }
    } else {
        Rect::bounding(known_rows)
            .map_or((table.y, table.bottom()), |rows| {
                (rows.y.max(table.y), rows.bottom().min(table.bottom()))
            })
    };
    let band = if band.1 > band.0 { band } else { (table.y, table.bottom()) };

    if known_cols.is_empty() {
        let band_glyphs = column_glyphs
            .iter()
            .copied()
            .filter(|glyph| glyph.center_y() >= band.0 && glyph.center_y() <= band.1)
            .collect::<Vec<_>>();

        match (column_mode, split) {
            (ColumnMode::TwoColumnForm, Some(split_x)) => {
                cols = vec![
                    Rect::from_edges(table.x, band.0, split_x, band.1),
                    Rect::from_edges(split_x, band.0, table.right(), band.1),
                ];
                column_strategy = ColumnStrategy::TwoColumnForm;
            }
            (ColumnMode::Auto, _) => {
                if let Some((k, rects)) = kmeans_columns(table, band, &band_glyphs, config) {
                    cols = rects;
                    column_strategy = ColumnStrategy::KMeans { k };
                }
            }
            _ => {}
        }

        if cols.is_empty() && !band_glyphs.is_empty() {
            cols = proportional_columns(table, band, &band_glyphs, config);
            column_strategy = ColumnStrategy::Proportional;
        }
        if cols.is_empty() {
            cols = vec![Rect::from_edges(table.x, band.0, table.right(), band.1)];
            column_strategy = ColumnStrategy::SingleColumn;
        }
    }

    let paragraph_rows_dropped = clusters.len() - kept.len();
    let mut single_row_fallback = false;
    let rows = if known_rows.is_empty() {
        let rows = rows_from_clusters(table, &kept);
        if rows.is_empty() {
            single_row_fallback = true;
            vec![*table]
        } else {
            rows
        }
    } else {
        known_rows.to_vec()
    };

    debug!(
        rows = rows.len(),
        cols = cols.len(),
        ?column_strategy,
        paragraph_rows_dropped,
        "inferred table grid"
    );

    InferredGrid {
        rows,
        cols,
        column_strategy,
        paragraph_rows_dropped,
        single_row_fallback,
    }
}
