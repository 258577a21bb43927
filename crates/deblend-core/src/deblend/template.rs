//! Child templates.
//!
//! An extended child's template is the pixel-wise minimum of the working
//! image and its 180° rotation about the child's centre. It is cleaned to
//! the connected region around the centre, padded by a margin, and can be
//! averaged across bands. Point-source children use the analytic PSF.

use ndarray::Array2;
use tracing::debug;

use crate::band::BandContext;
use crate::cancel::CancelToken;
use crate::consts::{B3_KERNEL, PSF_CORE_FRACTION};
use crate::detection::finder::touches_border;
use crate::detection::{find_detections, FindConfig};
use crate::error::Result;
use crate::flags::ObjectFlags;
use crate::grid::PixelGrid;
use crate::mask::{dilate, intersect, union, BBox, RunLengthMask};
use crate::psf::Psf;

use super::blend::{Blend, Child};
use super::config::DeblendConfig;
use super::scratch::ScratchArena;

/// Fill `out` with the symmetric-minimum template of `work` about `center`.
/// Pixels whose reflection falls off the footprint get zero, as do negative
/// minima and pixels marked in `excluded`.
pub fn symmetric_template(
    work: &Array2<f32>,
    inside: &Array2<bool>,
    excluded: &Array2<bool>,
    bbox: &BBox,
    center: (f64, f64),
    out: &mut Array2<f32>,
) {
    let pivot_r = (2.0 * center.0).round() as i32;
    let pivot_c = (2.0 * center.1).round() as i32;
    out.fill(0.0);
    for ((i, j), &here) in work.indexed_iter() {
        if !inside[[i, j]] || excluded[[i, j]] {
            continue;
        }
        let row = bbox.row0 + i as i32;
        let col = bbox.col0 + j as i32;
        let Some(mirror) = bbox.index(pivot_r - row, pivot_c - col) else {
            continue;
        };
        if !inside[mirror] {
            continue;
        }
        out[[i, j]] = here.min(work[mirror]).max(0.0);
    }
}

/// Unit-peak PSF template clipped to the footprint.
pub fn point_source_template(
    psf: &Psf,
    inside: &Array2<bool>,
    bbox: &BBox,
    center: (f64, f64),
    out: &mut Array2<f32>,
) {
    let r = psf.radius() as f64;
    out.fill(0.0);
    for ((i, j), v) in out.indexed_iter_mut() {
        if !inside[[i, j]] {
            continue;
        }
        let dr = (bbox.row0 + i as i32) as f64 - center.0;
        let dc = (bbox.col0 + j as i32) as f64 - center.1;
        if dr.abs() <= r && dc.abs() <= r {
            *v = psf.value(dr, dc) as f32;
        }
    }
}

/// Keep only the connected region of `template` at or above `level` that
/// holds the centre pixel, grow it by `margin` inside the footprint, and
/// zero everything else. Returns the template's mask, empty if the centre
/// falls below `level`.
pub fn clean_template(
    template: &mut Array2<f32>,
    bbox: &BBox,
    footprint: &RunLengthMask,
    center: (f64, f64),
    level: f32,
    margin: u32,
    cancel: &CancelToken,
) -> Result<RunLengthMask> {
    let grid = PixelGrid::new(std::mem::take(template)).with_origin(bbox.row0, bbox.col0);
    let found = find_detections(
        &grid,
        Some(footprint),
        &FindConfig::single_level(level.max(f32::MIN_POSITIVE)),
        cancel,
    );
    *template = grid.data;
    let regions = found?;

    let (rc, cc) = (center.0.round() as i32, center.1.round() as i32);
    let mask = match regions.iter().find(|d| d.footprint().contains(rc, cc)) {
        Some(region) => intersect(&dilate(region.footprint(), margin), footprint),
        None => RunLengthMask::new(),
    };

    let keep = mask.to_array(bbox);
    template.zip_mut_with(&keep, |v, &k| {
        if !k {
            *v = 0.0;
        }
    });
    Ok(mask)
}

/// Replace each band's template with the cross-band mean shape, scaled back
/// to that band's peak. Bands with an all-zero template are left alone.
pub fn average_templates(templates: &mut [Array2<f32>], masks: &mut [RunLengthMask]) {
    let peaks: Vec<f32> = templates
        .iter()
        .map(|t| t.iter().copied().fold(0.0f32, f32::max))
        .collect();
    let used: Vec<usize> = (0..templates.len()).filter(|&b| peaks[b] > 0.0).collect();
    if used.len() < 2 {
        return;
    }

    let mut mean = Array2::<f32>::zeros(templates[used[0]].dim());
    for &b in &used {
        mean.scaled_add(1.0 / peaks[b], &templates[b]);
    }
    mean.mapv_inplace(|v| v / used.len() as f32);

    let combined = used
        .iter()
        .fold(RunLengthMask::new(), |acc, &b| union(&acc, &masks[b]));
    for &b in &used {
        templates[b].assign(&mean);
        templates[b].mapv_inplace(|v| v * peaks[b]);
        masks[b] = combined.clone();
    }
}

/// Build every live child's per-band templates.
pub(crate) fn build_templates(
    blend: &mut Blend,
    grids: &[PixelGrid],
    contexts: &[BandContext],
    config: &DeblendConfig,
    arena: &mut ScratchArena,
    cancel: &CancelToken,
) -> Result<()> {
    let Blend {
        bbox,
        footprint,
        inside,
        work,
        children,
        ..
    } = blend;
    let shape = (bbox.height(), bbox.width());
    let cores: Vec<Array2<bool>> = contexts
        .iter()
        .enumerate()
        .map(|(b, ctx)| point_source_cores(children, b, &ctx.psf, bbox))
        .collect();

    for child in children.iter_mut().filter(|c| c.alive) {
        cancel.check()?;
        let mut templates = Vec::with_capacity(contexts.len());
        let mut masks = Vec::with_capacity(contexts.len());
        for (b, ctx) in contexts.iter().enumerate() {
            let center = child.centers[b];
            let mut t = arena.take(shape);
            let mask = if child.is_psf() {
                point_source_template(&ctx.psf, inside, bbox, center, &mut t);
                let support = RunLengthMask::from_fn(*bbox, |r, c| {
                    bbox.index(r, c).is_some_and(|idx| t[idx] > 0.0)
                });
                intersect(&support, footprint)
            } else {
                symmetric_template(&work[b], inside, &cores[b], bbox, center, &mut t);
                let level = (config.template_threshold_sigma as f64 * ctx.sky_variance().sqrt()) as f32;
                clean_template(&mut t, bbox, footprint, center, level, config.template_margin, cancel)?
            };
            if touches_border(&grids[b], &mask) {
                child.flags |= ObjectFlags::EDGE_TRIMMED;
            }
            templates.push(t);
            masks.push(mask);
        }
        if config.average_templates && !child.is_psf() && !child.is_moving() {
            average_templates(&mut templates, &mut masks);
        }
        arena.give_all(std::mem::replace(&mut child.templates, templates));
        child.masks = masks;
    }

    debug!(
        children = children.iter().filter(|c| c.alive).count(),
        bands = contexts.len(),
        "Templates built"
    );
    Ok(())
}

/// Pixels where some live point-source child's PSF is at least
/// `PSF_CORE_FRACTION` of its peak.
fn point_source_cores(children: &[Child], band: usize, psf: &Psf, bbox: &BBox) -> Array2<bool> {
    let mut core = Array2::from_elem((bbox.height(), bbox.width()), false);
    let r = psf.radius();
    for child in children.iter().filter(|c| c.alive && c.is_psf()) {
        let (rc, cc) = child.centers[band];
        let (r0, c0) = (rc.round() as i32, cc.round() as i32);
        for row in r0 - r..=r0 + r {
            for col in c0 - r..=c0 + r {
                let Some(idx) = bbox.index(row, col) else {
                    continue;
                };
                if psf.value(row as f64 - rc, col as f64 - cc) >= PSF_CORE_FRACTION as f64 {
                    core[idx] = true;
                }
            }
        }
    }
    core
}

/// Smooth with the separable B3 spline kernel, clamping at the edges.
pub fn smooth_b3(data: &Array2<f32>) -> Array2<f32> {
    convolve_cols_clamped(&convolve_rows_clamped(data, &B3_KERNEL), &B3_KERNEL)
}

fn convolve_rows_clamped(data: &Array2<f32>, kernel: &[f32]) -> Array2<f32> {
    let (h, w) = data.dim();
    let radius = kernel.len() / 2;
    let mut result = Array2::<f32>::zeros((h, w));
    for row in 0..h {
        for col in 0..w {
            let mut sum = 0.0f32;
            for (k, &kv) in kernel.iter().enumerate() {
                let c = (col as isize + k as isize - radius as isize).clamp(0, w as isize - 1) as usize;
                sum += data[[row, c]] * kv;
            }
            result[[row, col]] = sum;
        }
    }
    result
}

fn convolve_cols_clamped(data: &Array2<f32>, kernel: &[f32]) -> Array2<f32> {
    let (h, w) = data.dim();
    let radius = kernel.len() / 2;
    let mut result = Array2::<f32>::zeros((h, w));
    for row in 0..h {
        for col in 0..w {
            let mut sum = 0.0f32;
            for (k, &kv) in kernel.iter().enumerate() {
                let r = (row as isize + k as isize - radius as isize).clamp(0, h as isize - 1) as usize;
                sum += data[[r, col]] * kv;
            }
            result[[row, col]] = sum;
        }
    }
    result
}
