//! Local-maximum and plateau search inside a footprint.

use ndarray::Array2;
use tracing::debug;

use crate::band::NoiseModel;
use crate::detection::DisjointSet;
use crate::flags::PeakFlags;
use crate::grid::PixelGrid;
use crate::mask::RunLengthMask;

use super::{Peak, PeakCapPolicy, PeakConfig};

const NEIGHBORS: [(i32, i32); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// Peaks of one footprint, brightest first.
#[derive(Clone, Debug, Default)]
pub struct ExtractedPeaks {
    pub peaks: Vec<Peak>,
    /// More than `npeak_max` peaks were present.
    pub truncated: bool,
}

/// Running sums for one plateau.
#[derive(Clone, Debug)]
struct Plateau {
    first: usize,
    value: f32,
    sum_r: f64,
    sum_c: f64,
    count: usize,
    higher: bool,
    members: Vec<(i32, i32)>,
}

/// Find strict local maxima and maximal plateaus of `grid` inside `mask`.
///
/// A pixel is a strict maximum when it exceeds all 8 in-grid neighbours by at
/// least `config.min_margin`. Pixels with an equal-valued neighbour inside
/// the mask are grouped into plateaus; a plateau is a peak when none of its
/// members has a strictly higher neighbour. If the footprint's maximum pixel
/// was not found it is inserted as peak 0.
pub fn find_peaks(
    grid: &PixelGrid,
    mask: &RunLengthMask,
    config: &PeakConfig,
    noise: Option<&NoiseModel>,
) -> ExtractedPeaks {
    let Some(bbox) = mask.bounding_box() else {
        return ExtractedPeaks::default();
    };

    const UNLABELED: u32 = u32::MAX;
    let mut labels = Array2::<u32>::from_elem((bbox.height(), bbox.width()), UNLABELED);
    let mut sets = DisjointSet::new();
    let mut plateaus: Vec<Plateau> = Vec::new();
    // (discovery index, peak)
    let mut found: Vec<(usize, Peak)> = Vec::new();
    let mut stopped_early = false;
    let mut discovery = 0usize;

    'scan: for span in mask.spans() {
        for col in span.col0..=span.col1 {
            let row = span.row;
            let Some(v) = grid.value(row, col) else {
                continue;
            };
            if v.is_nan() {
                continue;
            }
            discovery += 1;

            let mut higher = false;
            let mut equal_in_mask = false;
            let mut margin_ok = true;
            for (dr, dc) in NEIGHBORS {
                let Some(n) = grid.value(row + dr, col + dc) else {
                    continue;
                };
                if n > v {
                    higher = true;
                }
                if n == v && mask.contains(row + dr, col + dc) {
                    equal_in_mask = true;
                }
                if v - n < config.min_margin {
                    margin_ok = false;
                }
            }

            if equal_in_mask {
                let label = join_plateau(
                    row,
                    col,
                    v,
                    &bbox,
                    &mut labels,
                    &mut sets,
                    &mut plateaus,
                    discovery,
                );
                let p = &mut plateaus[label as usize];
                p.sum_r += row as f64;
                p.sum_c += col as f64;
                p.count += 1;
                p.higher |= higher;
                p.members.push((row, col));
            } else if !higher && margin_ok {
                let mut peak = Peak::new(row, col, v);
                refine_centroid(grid, &mut peak, noise);
                found.push((discovery, peak));
                if config.cap_policy == PeakCapPolicy::StopEarly && found.len() > config.npeak_max
                {
                    stopped_early = true;
                    break 'scan;
                }
            }
        }
    }

    // Resolve plateaus: fold each label into its root.
    let mut merged: Vec<Option<Plateau>> = vec![None; plateaus.len()];
    for (label, p) in plateaus.into_iter().enumerate() {
        let root = sets.find(label as u32) as usize;
        match &mut merged[root] {
            Some(acc) => {
                acc.first = acc.first.min(p.first);
                acc.sum_r += p.sum_r;
                acc.sum_c += p.sum_c;
                acc.count += p.count;
                acc.higher |= p.higher;
                acc.members.extend(p.members);
            }
            slot => *slot = Some(p),
        }
    }
    for p in merged.into_iter().flatten() {
        if p.higher || p.count == 0 {
            continue;
        }
        let mean_r = p.sum_r / p.count as f64;
        let mean_c = p.sum_c / p.count as f64;
        let &(row, col) = p
            .members
            .iter()
            .min_by(|a, b| {
                let da = (a.0 as f64 - mean_r).powi(2) + (a.1 as f64 - mean_c).powi(2);
                let db = (b.0 as f64 - mean_r).powi(2) + (b.1 as f64 - mean_c).powi(2);
                da.total_cmp(&db)
            })
            .unwrap_or(&(p.members[0].0, p.members[0].1));
        let mut peak = Peak::new(row, col, p.value);
        peak.row_c = mean_r;
        peak.col_c = mean_c;
        peak.row_err = 0.5 / (p.count as f64).sqrt();
        peak.col_err = peak.row_err;
        peak.flags |= PeakFlags::PLATEAU;
        found.push((p.first, peak));
    }

    let total = found.len();
    let truncated = stopped_early || total > config.npeak_max;
    if stopped_early {
        // Keep what was found first, in discovery order.
        found.sort_by_key(|(idx, _)| *idx);
        found.truncate(config.npeak_max);
    }

    // Strictly decreasing value, ties by discovery order.
    found.sort_by(|(ia, a), (ib, b)| b.value.total_cmp(&a.value).then(ia.cmp(ib)));
    let mut peaks: Vec<Peak> = found.into_iter().map(|(_, p)| p).collect();
    peaks.truncate(config.npeak_max);

    if let Some((row, col, v)) = footprint_maximum(grid, mask) {
        if peaks.first().map_or(true, |p| p.value < v) {
            let mut peak = Peak::new(row, col, v);
            refine_centroid(grid, &mut peak, noise);
            peak.flags |= PeakFlags::FORCED_MAXIMUM;
            peaks.insert(0, peak);
            if peaks.len() > config.npeak_max.max(1) {
                peaks.truncate(config.npeak_max.max(1));
            }
        }
    }

    debug!(
        npix = mask.npix(),
        found = total,
        kept = peaks.len(),
        truncated,
        "Peaks extracted"
    );
    ExtractedPeaks { peaks, truncated }
}

/// Brightest pixel of the whole footprint, first in scan order on ties.
fn footprint_maximum(grid: &PixelGrid, mask: &RunLengthMask) -> Option<(i32, i32, f32)> {
    let mut best: Option<(i32, i32, f32)> = None;
    for (row, col) in mask.pixels() {
        if let Some(v) = grid.value(row, col) {
            if best.map_or(true, |(_, _, m)| v > m) {
                best = Some((row, col, v));
            }
        }
    }
    best
}

/// Label `(row, col)` as a plateau pixel, unioning it with every equal,
/// already-labeled neighbour. Returns the pixel's own label.
#[allow(clippy::too_many_arguments)]
fn join_plateau(
    row: i32,
    col: i32,
    v: f32,
    bbox: &crate::mask::BBox,
    labels: &mut Array2<u32>,
    sets: &mut DisjointSet,
    plateaus: &mut Vec<Plateau>,
    discovery: usize,
) -> u32 {
    let label = sets.make_set();
    plateaus.push(Plateau {
        first: discovery,
        value: v,
        sum_r: 0.0,
        sum_c: 0.0,
        count: 0,
        higher: false,
        members: Vec::new(),
    });
    if let Some(idx) = bbox.index(row, col) {
        labels[idx] = label;
    }
    for (dr, dc) in NEIGHBORS {
        let Some(idx) = bbox.index(row + dr, col + dc) else {
            continue;
        };
        let other = labels[idx];
        if other != u32::MAX && plateaus[other as usize].value == v {
            sets.union(label, other);
        }
    }
    label
}

/// Sub-pixel refinement with a 3-point parabola along each axis.
fn refine_centroid(grid: &PixelGrid, peak: &mut Peak, noise: Option<&NoiseModel>) {
    let (row, col) = (peak.row, peak.col);
    let v = peak.value as f64;
    let sigma = noise.map(|n| n.peak_sigma(peak.value));

    let axis = |before: Option<f32>, after: Option<f32>| -> (f64, f64) {
        match (before, after) {
            (Some(a), Some(c)) => {
                let (a, c) = (a as f64, c as f64);
                let denom = a - 2.0 * v + c;
                if denom < 0.0 {
                    let offset = (0.5 * (a - c) / denom).clamp(-0.5, 0.5);
                    let err = sigma.map_or(0.29, |s| (s * 2.0f64.sqrt() / -denom).min(1.0));
                    (offset, err)
                } else {
                    (0.0, 0.5)
                }
            }
            _ => (0.0, 0.5),
        }
    };

    let (dr, er) = axis(grid.value(row - 1, col), grid.value(row + 1, col));
    let (dc, ec) = axis(grid.value(row, col - 1), grid.value(row, col + 1));
    peak.row_c = row as f64 + dr;
    peak.col_c = col as f64 + dc;
    peak.row_err = er;
    peak.col_err = ec;
}
