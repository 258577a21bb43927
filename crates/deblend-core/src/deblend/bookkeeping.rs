use crate::flags::ObjectFlags;
use crate::grid::{DefectBits, PixelGrid};
use crate::mask::RunLengthMask;

use super::config::DeblendConfig;

/// Median in place; `None` for an empty slice.
pub fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let mid = values.len() / 2;
    let (_, &mut upper, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    if values.len() % 2 == 1 {
        Some(upper)
    } else {
        let lower = values[..mid].iter().copied().fold(f32::NEG_INFINITY, f32::max);
        Some(0.5 * (lower + upper))
    }
}

/// Local sky level (DN) for one child in one band.
///
/// Uses the median of the pixels in a box around the child's support that
/// neither the child nor any sibling claims. Falls back to a disk around the
/// child's centre, then to `default`.
pub fn local_background(
    grid: &PixelGrid,
    support: &RunLengthMask,
    claimed: &RunLengthMask,
    center: (f64, f64),
    config: &DeblendConfig,
    default: f32,
) -> f32 {
    let mut values = Vec::new();
    if let Some(b) = support.bounding_box() {
        let b = b.grow(config.background_margin);
        for row in b.row0.max(grid.row0)..=b.row1.min(grid.row1()) {
            for col in b.col0.max(grid.col0)..=b.col1.min(grid.col1()) {
                if support.contains(row, col) || claimed.contains(row, col) {
                    continue;
                }
                if let Some(v) = grid.value(row, col) {
                    values.push(v);
                }
            }
        }
    }
    if let Some(m) = median(&mut values) {
        return m;
    }

    let r = config.background_disk_radius;
    let (rc, cc) = (center.0.round() as i32, center.1.round() as i32);
    for row in rc - r..=rc + r {
        for col in cc - r..=cc + r {
            if (row - rc).pow(2) + (col - cc).pow(2) > r * r {
                continue;
            }
            if let Some(v) = grid.value(row, col) {
                values.push(v);
            }
        }
    }
    median(&mut values).unwrap_or(default)
}

/// Flags for defective pixels under `support`.
pub fn contamination(grid: &PixelGrid, support: &RunLengthMask) -> ObjectFlags {
    let mut bits = DefectBits::empty();
    for (r, c) in support.pixels() {
        bits |= grid.defect(r, c);
    }
    let mut flags = ObjectFlags::empty();
    if bits.contains(DefectBits::COSMIC_RAY) {
        flags |= ObjectFlags::COSMIC_RAY;
    }
    if bits.contains(DefectBits::SATURATED) {
        flags |= ObjectFlags::SATURATED;
    }
    if bits.contains(DefectBits::INTERPOLATED) {
        flags |= ObjectFlags::INTERPOLATED;
    }
    flags
}
