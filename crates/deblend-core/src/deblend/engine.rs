use ndarray::Array2;
use tracing::{debug, warn};

use crate::band::BandContext;
use crate::cancel::CancelToken;
use crate::detection::Detection;
use crate::error::{DeblendError, Result};
use crate::flags::ObjectFlags;
use crate::grid::PixelGrid;
use crate::mask::{intersect, union, BBox, RunLengthMask};
use crate::peaks::Peak;

use super::blend::{Blend, Hypothesis};
use super::bookkeeping::{contamination, local_background};
use super::config::DeblendConfig;
use super::family::{Cutout, FamilyNode};
use super::redistribute::{assign_unassigned, redistribute, Redistribution};
use super::scratch::ScratchArena;
use super::{moving, point_source, solve, template};

/// Why a parent could not be deblended at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Uncleanable {
    TooLarge,
    OffRaster,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeblendStatus {
    /// At most one child survived.
    NotDeblended,
    /// Two or more children with populated cutouts.
    Deblended,
    /// A precondition failed; nothing was attempted.
    Uncleanable(Uncleanable),
}

/// Result of deblending one parent.
#[derive(Clone, Debug)]
pub struct DeblendOutcome {
    pub status: DeblendStatus,
    pub family: FamilyNode,
    /// Window covered by `residual` and every cutout.
    pub bbox: BBox,
    /// Background-subtracted parent flux no child received, per band.
    pub residual: Vec<Array2<f32>>,
    /// Flux left in `residual`, per band.
    pub unassigned_flux: Vec<f64>,
    /// Flux handed out by the unassigned-pixel pass, per band.
    pub reassigned_flux: Vec<f64>,
}

impl DeblendOutcome {
    fn untouched(status: DeblendStatus, family: FamilyNode, bbox: BBox, nbands: usize) -> Self {
        Self {
            status,
            family,
            bbox,
            residual: Vec::new(),
            unassigned_flux: vec![0.0; nbands],
            reassigned_flux: vec![0.0; nbands],
        }
    }

    /// Children of the accepted hypothesis.
    pub fn children(&self) -> &[FamilyNode] {
        &self.family.children
    }
}

/// Split one parent into children.
///
/// `peaks` are the parent's surviving peaks, brightest first, normally from
/// [`merge_band_peaks`](crate::peaks::merge_band_peaks). The caller's rasters
/// are only read; all work happens on private copies drawn from `arena`.
///
/// Panics if the band slices differ in length, are empty, or the rasters do
/// not share one pixel frame.
pub fn deblend(
    grids: &[PixelGrid],
    contexts: &[BandContext],
    detection: &Detection,
    peaks: &[Peak],
    config: &DeblendConfig,
    arena: &mut ScratchArena,
    cancel: &CancelToken,
) -> Result<DeblendOutcome> {
    assert!(!grids.is_empty(), "at least one band is required");
    assert_eq!(
        grids.len(),
        contexts.len(),
        "one band context per raster is required"
    );
    assert!(
        grids.iter().all(|g| g.is_aligned_with(&grids[0])),
        "band rasters must share one pixel frame"
    );
    cancel.check()?;

    let nbands = grids.len();
    let bbox = detection.bbox();
    let footprint = detection.footprint();
    let mut family = FamilyNode::new(0, detection.id, detection.row_c, detection.col_c);
    family.flags = detection.flags;
    family.peaks = peaks.to_vec();
    for grid in grids {
        family.flags |= contamination(grid, footprint);
    }

    if let Err(err) = check_cleanable(&grids[0], detection, config) {
        let reason = match err {
            DeblendError::ObjectTooLarge { .. } => {
                family.flags |= ObjectFlags::TOO_LARGE;
                Uncleanable::TooLarge
            }
            _ => Uncleanable::OffRaster,
        };
        family.flags |= ObjectFlags::UNCLEANABLE;
        warn!(detection = detection.id, %err, "Parent left unblended");
        return Ok(DeblendOutcome::untouched(
            DeblendStatus::Uncleanable(reason),
            family,
            bbox,
            nbands,
        ));
    }

    let max_children = contexts.iter().map(|c| c.max_children).min().unwrap_or(0);
    let mut peaks = peaks.to_vec();
    if peaks.len() > max_children {
        debug!(
            detection = detection.id,
            found = peaks.len(),
            max_children,
            "Too many peaks; keeping the brightest"
        );
        peaks.truncate(max_children);
        family.flags |= ObjectFlags::TOO_MANY_PEAKS;
    }
    if peaks.len() >= 2 {
        family.flags |= ObjectFlags::BLENDED;
    }

    let mut blend = Blend::new(grids, contexts, footprint, bbox, peaks, arena);
    let mut hypotheses: Vec<Vec<Hypothesis>> = Vec::new();

    if blend.children.len() >= 2 {
        if let Some(fit) = moving::detect_moving(&blend.children, contexts, config) {
            let children = std::mem::take(&mut blend.children);
            hypotheses.push(children.iter().map(|c| c.hypothesis()).collect());
            blend.children.extend(moving::moving_child(children, &fit, contexts));
            debug!(
                detection = detection.id,
                speed = fit.speed(),
                "Parent treated as a moving object"
            );
        }
    }

    if blend.children.len() >= 2 {
        cancel.check()?;
        point_source::subtract_point_sources(&mut blend, contexts, config);
        template::build_templates(&mut blend, grids, contexts, config, arena, cancel)?;
        for (_, why) in solve::solve_weights(&mut blend, contexts, config, cancel)? {
            family.flags |= why.flag();
        }
        for (a, b) in moving::merge_peepholes(&mut blend, contexts, config) {
            hypotheses.push(vec![a, b]);
        }
    }
    cancel.check()?;

    let alive = blend.alive();
    let mut red = redistribute(&blend, &alive, arena);
    if config.reassign_unassigned && alive.len() >= 2 {
        assign_unassigned(&blend, &alive, &mut red);
        if red.reassigned_fraction() > config.max_unassigned_fraction {
            family.flags |= ObjectFlags::UNASSIGNED_FLUX_EXCEEDED;
        }
    }

    let status = if alive.len() >= 2 {
        family.flags |= ObjectFlags::DEBLENDED;
        DeblendStatus::Deblended
    } else {
        family.flags |= ObjectFlags::NOT_DEBLENDED;
        if let Some(&only) = alive.first() {
            family.row_c = blend.children[only].row_c;
            family.col_c = blend.children[only].col_c;
        }
        DeblendStatus::NotDeblended
    };

    let unassigned_flux = red.unassigned_flux();
    let reassigned_flux = red.reassigned.clone();
    let residual = build_family(&mut family, &blend, &alive, red, grids, contexts, config);

    let mut next_id = family.children.len() + 1;
    for group in hypotheses {
        let mut sibling = FamilyNode::new(next_id, detection.id, family.row_c, family.col_c);
        sibling.parent_id = Some(0);
        next_id += 1;
        for h in group {
            let mut node = FamilyNode::new(next_id, detection.id, h.row_c, h.col_c);
            next_id += 1;
            node.parent_id = Some(sibling.id);
            node.peaks = h.peaks;
            node.flags = h.flags;
            node.weights = h.weights;
            sibling.children.push(node);
        }
        family.siblings.push(sibling);
    }

    blend.release(arena);
    debug!(
        detection = detection.id,
        status = ?status,
        children = family.children.len(),
        siblings = family.siblings.len(),
        "Parent deblended"
    );
    Ok(DeblendOutcome {
        status,
        family,
        bbox,
        residual,
        unassigned_flux,
        reassigned_flux,
    })
}

fn check_cleanable(grid: &PixelGrid, detection: &Detection, config: &DeblendConfig) -> Result<()> {
    let npix = detection.npix();
    if npix > config.max_object_pixels {
        return Err(DeblendError::ObjectTooLarge {
            npix,
            max: config.max_object_pixels,
        });
    }
    let b = detection.bbox();
    let distance = grid
        .edge_distance(b.row0, b.col0)
        .min(grid.edge_distance(b.row1, b.col1));
    if distance < config.edge_margin {
        return Err(DeblendError::OffRaster {
            row: detection.row_c.round() as i32,
            col: detection.col_c.round() as i32,
            margin: config.edge_margin,
        });
    }
    Ok(())
}

/// Turn the surviving children and their shares into family nodes. Returns
/// the residual rasters.
fn build_family(
    family: &mut FamilyNode,
    blend: &Blend,
    alive: &[usize],
    red: Redistribution,
    grids: &[PixelGrid],
    contexts: &[BandContext],
    config: &DeblendConfig,
) -> Vec<Array2<f32>> {
    let Redistribution {
        shares, residual, ..
    } = red;

    let cutouts: Vec<Vec<Cutout>> = alive
        .iter()
        .zip(shares)
        .map(|(&k, bands)| {
            let child = &blend.children[k];
            bands
                .into_iter()
                .enumerate()
                .map(|(b, data)| {
                    let held = RunLengthMask::from_fn(blend.bbox, |r, c| {
                        blend.bbox.index(r, c).is_some_and(|idx| data[idx] != 0.0)
                    });
                    let mask = match child.masks.get(b) {
                        Some(m) => union(&intersect(&held, &blend.footprint), m),
                        None => intersect(&held, &blend.footprint),
                    };
                    Cutout {
                        band: b,
                        bbox: blend.bbox,
                        data,
                        mask,
                    }
                })
                .collect()
        })
        .collect();

    // Per child, the union of its support over all bands.
    let supports: Vec<RunLengthMask> = cutouts
        .iter()
        .map(|bands| {
            bands
                .iter()
                .fold(RunLengthMask::new(), |acc, c| union(&acc, &c.mask))
        })
        .collect();

    for (slot, (&k, child_cutouts)) in alive.iter().zip(cutouts).enumerate() {
        let child = &blend.children[k];
        let claimed = supports
            .iter()
            .enumerate()
            .filter(|&(o, _)| o != slot)
            .fold(RunLengthMask::new(), |acc, (_, m)| union(&acc, m));

        let mut node = FamilyNode::new(slot + 1, family.detection, child.row_c, child.col_c);
        node.parent_id = Some(family.id);
        node.peaks = child.peaks.clone();
        node.flags = child.flags | ObjectFlags::CHILD;
        node.weights = child.weights.clone();
        node.background = grids
            .iter()
            .zip(contexts)
            .enumerate()
            .map(|(b, (grid, ctx))| {
                let support = &child_cutouts[b].mask;
                local_background(grid, support, &claimed, child.centers[b], config, ctx.background)
            })
            .collect();
        for grid in grids {
            node.flags |= contamination(grid, &supports[slot]);
        }
        node.cutouts = child_cutouts;
        family.children.push(node);
    }
    residual
}
