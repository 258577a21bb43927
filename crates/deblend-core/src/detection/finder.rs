//! Multi-threshold connected-component labeling.
//!
//! One top-to-bottom scan finds maximal runs at every level. Lowest-level
//! runs get disjoint-set labels and are unioned with 8-connected runs on the
//! previous row; every higher-level run inherits the label of the base run
//! that contains it. Only the previous and current row's runs are kept while
//! scanning.

use std::collections::HashMap;

use ndarray::ArrayView1;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::flags::ObjectFlags;
use crate::grid::{DefectBits, PixelGrid};
use crate::mask::{RunLengthMask, Span};

use super::config::FindConfig;
use super::disjoint_set::DisjointSet;
use super::Detection;

#[derive(Clone, Copy, Debug)]
struct LabeledRun {
    span: Span,
    label: u32,
}

/// Label every region of `grid` at or above `config.levels[0]`, optionally
/// restricted to the pixels of `restrict`.
///
/// Detections come back in scan order of their first pixel. Panics if the
/// levels are not strictly ascending.
pub fn find_detections(
    grid: &PixelGrid,
    restrict: Option<&RunLengthMask>,
    config: &FindConfig,
    cancel: &CancelToken,
) -> Result<Vec<Detection>> {
    config.validate();
    let nlevels = config.levels.len();

    if grid.width() == 0 || grid.height() == 0 {
        return Ok(Vec::new());
    }
    let (row_lo, row_hi) = match restrict {
        Some(mask) => match mask.bounding_box() {
            Some(b) => (b.row0.max(grid.row0), b.row1.min(grid.row1())),
            None => return Ok(Vec::new()),
        },
        None => (grid.row0, grid.row1()),
    };

    let mut sets = DisjointSet::new();
    let mut found: Vec<Vec<(u32, Span)>> = vec![Vec::new(); nlevels];
    let mut prev: Vec<LabeledRun> = Vec::new();
    let mut cur: Vec<LabeledRun> = Vec::new();
    let mut segments: Vec<(i32, i32)> = Vec::new();
    let mut runs: Vec<Span> = Vec::new();

    for row in row_lo..=row_hi {
        cancel.check()?;

        segments.clear();
        match restrict {
            Some(mask) => {
                for s in mask.row_spans(row) {
                    let c0 = s.col0.max(grid.col0);
                    let c1 = s.col1.min(grid.col1());
                    if c0 <= c1 {
                        segments.push((c0, c1));
                    }
                }
            }
            None => segments.push((grid.col0, grid.col1())),
        }

        let line = grid.data.row((row - grid.row0) as usize);
        cur.clear();

        for (k, &level) in config.levels.iter().enumerate() {
            runs.clear();
            scan_runs(&line, grid.col0, &segments, level, row, &mut runs);
            if runs.is_empty() {
                break;
            }

            if k == 0 {
                label_base_runs(&runs, &prev, &mut cur, &mut sets);
                found[0].extend(cur.iter().map(|r| (r.label, r.span)));
            } else {
                for run in &runs {
                    let idx = cur.partition_point(|b| b.span.col1 < run.col0);
                    debug_assert!(
                        idx < cur.len() && cur[idx].span.col0 <= run.col0,
                        "level {k} run outside every base run"
                    );
                    found[k].push((cur[idx].label, *run));
                }
            }
        }

        std::mem::swap(&mut prev, &mut cur);
    }

    sets.flatten();

    // Group spans by final label, ordered by first appearance.
    let mut index_of: HashMap<u32, usize> = HashMap::new();
    let mut groups: Vec<Vec<Vec<Span>>> = Vec::new();
    for &(label, span) in &found[0] {
        let root = sets.find(label);
        let idx = *index_of.entry(root).or_insert_with(|| {
            groups.push(vec![Vec::new(); nlevels]);
            groups.len() - 1
        });
        groups[idx][0].push(span);
    }
    for (k, level_spans) in found.iter().enumerate().skip(1) {
        for &(label, span) in level_spans {
            let root = sets.find(label);
            if let Some(&idx) = index_of.get(&root) {
                groups[idx][k].push(span);
            }
        }
    }

    let total = groups.len();
    let mut detections = Vec::with_capacity(total);
    for level_spans in groups {
        let masks: Vec<RunLengthMask> = level_spans
            .into_iter()
            .map(RunLengthMask::from_canonical)
            .collect();

        if masks[config.min_level].npix() < config.min_pixels {
            continue;
        }
        if not_checked_fraction(grid, &masks[0]) >= config.max_not_checked_fraction {
            continue;
        }

        let (row_c, col_c, row_err, col_err) =
            weighted_centroid(grid, &masks[0], config.levels[0]);
        let mut flags = ObjectFlags::empty();
        if touches_border(grid, &masks[0]) {
            flags |= ObjectFlags::EDGE;
        }

        detections.push(Detection {
            id: detections.len(),
            levels: config.levels.clone(),
            masks,
            row_c,
            col_c,
            row_err,
            col_err,
            peaks: Vec::new(),
            flags,
        });
    }

    if let Some(limit) = config.max_detections {
        if detections.len() > limit {
            warn!(
                found = detections.len(),
                limit, "Detection limit reached; dropping remainder"
            );
            detections.truncate(limit);
        }
    }

    debug!(
        regions = total,
        kept = detections.len(),
        levels = nlevels,
        "Connected components labeled"
    );
    Ok(detections)
}

/// Append the maximal runs at or above `level` inside each column segment.
fn scan_runs(
    line: &ArrayView1<f32>,
    col_origin: i32,
    segments: &[(i32, i32)],
    level: f32,
    row: i32,
    out: &mut Vec<Span>,
) {
    for &(c0, c1) in segments {
        let mut start: Option<i32> = None;
        for col in c0..=c1 {
            let above = line[(col - col_origin) as usize] >= level;
            match (above, start) {
                (true, None) => start = Some(col),
                (false, Some(s)) => {
                    out.push(Span::new(row, s, col - 1));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            out.push(Span::new(row, s, c1));
        }
    }
}

/// Label this row's base runs, unioning each with the 8-connected runs of
/// the previous row.
fn label_base_runs(
    runs: &[Span],
    prev: &[LabeledRun],
    cur: &mut Vec<LabeledRun>,
    sets: &mut DisjointSet,
) {
    let mut j = 0;
    for run in runs {
        while j < prev.len() && prev[j].span.col1 + 1 < run.col0 {
            j += 1;
        }
        let mut label: Option<u32> = None;
        let mut k = j;
        while k < prev.len() && prev[k].span.col0 <= run.col1 + 1 {
            let other = prev[k].label;
            label = Some(match label {
                None => other,
                Some(l) => sets.union(l, other),
            });
            k += 1;
        }
        let label = label.unwrap_or_else(|| sets.make_set());
        cur.push(LabeledRun { span: *run, label });
    }
}

fn not_checked_fraction(grid: &PixelGrid, mask: &RunLengthMask) -> f32 {
    if mask.npix() == 0 {
        return 0.0;
    }
    let flagged = mask
        .pixels()
        .filter(|&(r, c)| grid.defect(r, c).contains(DefectBits::NOT_CHECKED))
        .count();
    flagged as f32 / mask.npix() as f32
}

/// Returns true if the mask's bounding box touches any edge of the grid.
pub fn touches_border(grid: &PixelGrid, mask: &RunLengthMask) -> bool {
    match mask.bounding_box() {
        Some(b) => {
            b.row0 <= grid.row0 || b.row1 >= grid.row1() || b.col0 <= grid.col0 || b.col1 >= grid.col1()
        }
        None => false,
    }
}

/// Intensity-weighted centroid over `mask` with `floor` subtracted.
///
/// Returns `(row, col, row_err, col_err)`, where each error is the standard
/// error of the mean: the weighted spread `sqrt(Σw·d²/Σw)` divided by the
/// square root of the number of pixels above the floor. Falls back to the
/// unweighted pixel mean when no pixel rises above the floor.
pub fn weighted_centroid(
    grid: &PixelGrid,
    mask: &RunLengthMask,
    floor: f32,
) -> (f64, f64, f64, f64) {
    let mut sum_r = 0.0f64;
    let mut sum_c = 0.0f64;
    let mut sum_w = 0.0f64;
    let mut n = 0usize;
    let mut n_weighted = 0usize;
    let mut mean_r = 0.0f64;
    let mut mean_c = 0.0f64;

    for (r, c) in mask.pixels() {
        n += 1;
        mean_r += r as f64;
        mean_c += c as f64;
        let w = grid.value(r, c).map_or(0.0, |v| (v - floor).max(0.0) as f64);
        sum_r += r as f64 * w;
        sum_c += c as f64 * w;
        sum_w += w;
        if w > 0.0 {
            n_weighted += 1;
        }
    }

    if n == 0 {
        return (0.0, 0.0, 0.0, 0.0);
    }
    if sum_w <= 0.0 {
        return (mean_r / n as f64, mean_c / n as f64, 0.5, 0.5);
    }

    let row_c = sum_r / sum_w;
    let col_c = sum_c / sum_w;
    let mut var_r = 0.0f64;
    let mut var_c = 0.0f64;
    for (r, c) in mask.pixels() {
        let w = grid.value(r, c).map_or(0.0, |v| (v - floor).max(0.0) as f64);
        var_r += w * (r as f64 - row_c).powi(2);
        var_c += w * (c as f64 - col_c).powi(2);
    }
    let root_n = (n_weighted as f64).sqrt();
    (
        row_c,
        col_c,
        (var_r / sum_w).sqrt() / root_n,
        (var_c / sum_w).sqrt() / root_n,
    )
}
