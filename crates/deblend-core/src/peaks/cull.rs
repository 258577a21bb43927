//! Saddle-point rejection of peaks.
//!
//! A fainter peak survives only if every path from it to a brighter,
//! already-accepted peak dips at least `delta` below it.

use tracing::debug;

use crate::band::NoiseModel;
use crate::cancel::CancelToken;
use crate::detection::{find_detections, Detection, FindConfig};
use crate::error::Result;
use crate::grid::PixelGrid;
use crate::mask::RunLengthMask;

use super::{Peak, PeakConfig};

#[derive(Clone, Debug, Default)]
pub struct CulledPeaks {
    /// Surviving peaks, brightest first.
    pub peaks: Vec<Peak>,
    /// Number of peaks removed.
    pub culled: usize,
}

/// Remove peaks that are not separated from a brighter peak by a saddle at
/// least `delta` deep. `peaks` must be sorted brightest first, as returned by
/// [`find_peaks`](super::find_peaks).
///
/// `detection` must have been labeled on `grid`: its nested contours are
/// used to settle separations without relabeling where they can.
pub fn cull_peaks(
    grid: &PixelGrid,
    detection: &Detection,
    peaks: Vec<Peak>,
    config: &PeakConfig,
    noise: Option<&NoiseModel>,
    cancel: &CancelToken,
) -> Result<CulledPeaks> {
    cull(grid, detection, true, peaks, config, noise, cancel)
}

/// [`cull_peaks`] for a band other than the one `detection` was labeled
/// on. Only the footprint is used.
pub fn cull_band_peaks(
    grid: &PixelGrid,
    detection: &Detection,
    peaks: Vec<Peak>,
    config: &PeakConfig,
    noise: Option<&NoiseModel>,
    cancel: &CancelToken,
) -> Result<CulledPeaks> {
    cull(grid, detection, false, peaks, config, noise, cancel)
}

fn cull(
    grid: &PixelGrid,
    detection: &Detection,
    use_contours: bool,
    peaks: Vec<Peak>,
    config: &PeakConfig,
    noise: Option<&NoiseModel>,
    cancel: &CancelToken,
) -> Result<CulledPeaks> {
    debug_assert!(
        peaks.windows(2).all(|w| w[0].value >= w[1].value),
        "peaks must be sorted brightest first"
    );
    let mut iter = peaks.into_iter();
    let Some(brightest) = iter.next() else {
        return Ok(CulledPeaks::default());
    };

    let footprint = detection.footprint();
    let mut accepted = vec![brightest];
    let mut culled = 0usize;

    for candidate in iter {
        cancel.check()?;
        let delta = config.saddle_delta.resolve(candidate.value, noise);
        if delta <= 0.0 {
            accepted.push(candidate);
            continue;
        }
        let threshold = candidate.value - delta;

        if climbs_locally(grid, footprint, &candidate, threshold, config.saddle_radius as i32) {
            culled += 1;
            continue;
        }

        let settled = if use_contours {
            settled_by_contours(detection, &candidate, threshold, &accepted)
        } else {
            None
        };
        let joined = match settled {
            Some(joined) => joined,
            None => joined_to_accepted(grid, footprint, &candidate, threshold, &accepted, cancel)?,
        };
        if joined {
            culled += 1;
        } else {
            accepted.push(candidate);
        }
    }

    debug!(
        detection = detection.id,
        kept = accepted.len(),
        culled,
        "Peaks culled"
    );
    Ok(CulledPeaks {
        peaks: accepted,
        culled,
    })
}

/// Flood from the candidate through pixels at or above `threshold` within a
/// `(2r+1)²` window. Returns true if a strictly brighter pixel is reached.
fn climbs_locally(
    grid: &PixelGrid,
    footprint: &RunLengthMask,
    candidate: &Peak,
    threshold: f32,
    radius: i32,
) -> bool {
    if radius <= 0 {
        return false;
    }
    let size = (2 * radius + 1) as usize;
    let mut visited = vec![false; size * size];
    let index = |r: i32, c: i32| -> Option<usize> {
        let dr = r - candidate.row + radius;
        let dc = c - candidate.col + radius;
        if dr < 0 || dc < 0 || dr >= size as i32 || dc >= size as i32 {
            None
        } else {
            Some(dr as usize * size + dc as usize)
        }
    };

    let mut stack = vec![(candidate.row, candidate.col)];
    if let Some(i) = index(candidate.row, candidate.col) {
        visited[i] = true;
    }
    while let Some((r, c)) = stack.pop() {
        for dr in -1..=1 {
            for dc in -1..=1 {
                let (nr, nc) = (r + dr, c + dc);
                let Some(i) = index(nr, nc) else {
                    continue;
                };
                if visited[i] || !footprint.contains(nr, nc) {
                    continue;
                }
                let Some(v) = grid.value(nr, nc) else {
                    continue;
                };
                if v < threshold {
                    continue;
                }
                if v > candidate.value {
                    return true;
                }
                visited[i] = true;
                stack.push((nr, nc));
            }
        }
    }
    false
}

/// Answer "is the candidate joined to a brighter accepted peak at
/// `threshold`?" from the detection's contours when they decide it. A
/// contour at or below `threshold` that cuts the candidate off proves it is
/// separate; one at or above `threshold` that connects them proves it is
/// joined.
fn settled_by_contours(
    detection: &Detection,
    candidate: &Peak,
    threshold: f32,
    accepted: &[Peak],
) -> Option<bool> {
    let joins = |k: usize| -> Option<bool> {
        let piece = detection
            .mask_at(k)?
            .component_at(candidate.row, candidate.col)?;
        Some(
            accepted
                .iter()
                .any(|p| p.value >= candidate.value && piece.contains(p.row, p.col)),
        )
    };

    let below = detection.levels.iter().rposition(|&l| l <= threshold);
    if below.and_then(joins) == Some(false) {
        return Some(false);
    }
    let above = detection.levels.iter().position(|&l| l >= threshold);
    if above.and_then(joins) == Some(true) {
        return Some(true);
    }
    None
}

/// Relabel the footprint at `threshold` and check whether the candidate's
/// region also holds an accepted peak.
fn joined_to_accepted(
    grid: &PixelGrid,
    footprint: &RunLengthMask,
    candidate: &Peak,
    threshold: f32,
    accepted: &[Peak],
    cancel: &CancelToken,
) -> Result<bool> {
    let regions = find_detections(
        grid,
        Some(footprint),
        &FindConfig::single_level(threshold),
        cancel,
    )?;
    let region = regions
        .iter()
        .find(|d| d.footprint().contains(candidate.row, candidate.col));
    Ok(match region {
        Some(d) => accepted
            .iter()
            .any(|p| p.value >= candidate.value && d.footprint().contains(p.row, p.col)),
        None => false,
    })
}
