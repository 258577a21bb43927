//! Flux redistribution.
//!
//! Each parent pixel is split among the children in proportion to
//! `w_k · T_k(p)`. Pixels where no template has support fall back to
//! B3-smoothed templates; anything still unclaimed is left in the residual
//! and may later be handed to the most likely child.

use ndarray::Array2;
use tracing::debug;

use crate::consts::{MIN_ASSIGN_DISTANCE_SQ, MIN_SHARE_SUM};

use super::blend::Blend;
use super::scratch::ScratchArena;
use super::solve::unit_scale;
use super::template::smooth_b3;

/// Per-child, per-band flux after redistribution.
pub(crate) struct Redistribution {
    /// `shares[slot][band]`; `slot` indexes the `alive` list given to
    /// [`redistribute`].
    pub shares: Vec<Vec<Array2<f32>>>,
    /// Parent flux no child received, per band.
    pub residual: Vec<Array2<f32>>,
    /// Flux handed out by [`assign_unassigned`], per band.
    pub reassigned: Vec<f64>,
    /// Total background-subtracted parent flux, per band.
    pub parent_flux: Vec<f64>,
}

impl Redistribution {
    pub fn unassigned_flux(&self) -> Vec<f64> {
        self.residual
            .iter()
            .map(|r| r.iter().map(|&v| v as f64).sum())
            .collect()
    }

    /// Largest per-band ratio of reassigned to total parent flux.
    pub fn reassigned_fraction(&self) -> f64 {
        self.reassigned
            .iter()
            .zip(&self.parent_flux)
            .map(|(&r, &p)| if p.abs() > 0.0 { r.abs() / p.abs() } else { 0.0 })
            .fold(0.0, f64::max)
    }
}

/// Split the parent among the children in `alive`. A lone survivor takes
/// the whole parent.
pub(crate) fn redistribute(
    blend: &Blend,
    alive: &[usize],
    arena: &mut ScratchArena,
) -> Redistribution {
    let nbands = blend.nbands();
    let shape = (blend.bbox.height(), blend.bbox.width());
    let mut shares: Vec<Vec<Array2<f32>>> = alive
        .iter()
        .map(|_| (0..nbands).map(|_| arena.take(shape)).collect())
        .collect();
    let mut residual = Vec::with_capacity(nbands);
    let mut parent_flux = Vec::with_capacity(nbands);
    let mut weights: Vec<f64> = vec![0.0; alive.len()];
    let mut fallback_pixels = 0usize;

    for b in 0..nbands {
        let parent = &blend.parent[b];
        let mut left = arena.take(shape);
        parent_flux.push(blend.pixel_indices().map(|idx| parent[idx] as f64).sum());
        match alive.len() {
            0 => {
                left.assign(parent);
                residual.push(left);
                continue;
            }
            1 => {
                shares[0][b].assign(parent);
                residual.push(left);
                continue;
            }
            _ => {}
        }
        for (slot, &k) in alive.iter().enumerate() {
            let child = &blend.children[k];
            weights[slot] = child.weights[b] * unit_scale(&child.templates[b]);
        }

        let mut pending = Vec::new();
        for idx in blend.pixel_indices() {
            let value = parent[idx];
            let split = split_pixel(alive.len(), value, |slot| {
                weights[slot] * blend.children[alive[slot]].templates[b][idx] as f64
            });
            match split {
                Some(parts) => {
                    for (slot, part) in parts {
                        shares[slot][b][idx] = part;
                    }
                }
                None => pending.push(idx),
            }
        }

        if !pending.is_empty() {
            fallback_pixels += pending.len();
            let smoothed: Vec<Array2<f32>> = alive
                .iter()
                .map(|&k| smooth_b3(&blend.children[k].templates[b]))
                .collect();
            for idx in pending {
                let value = parent[idx];
                let split = split_pixel(alive.len(), value, |slot| {
                    weights[slot] * smoothed[slot][idx] as f64
                });
                match split {
                    Some(parts) => {
                        for (slot, part) in parts {
                            shares[slot][b][idx] = part;
                        }
                    }
                    None => left[idx] = value,
                }
            }
        }

        residual.push(left);
    }

    debug!(
        children = alive.len(),
        bands = nbands,
        fallback_pixels,
        "Flux redistributed"
    );
    Redistribution {
        shares,
        residual,
        reassigned: vec![0.0; nbands],
        parent_flux,
    }
}

/// Divide `value` among `n` children in proportion to `share(slot)`. The
/// last claimant takes the remainder so the parts sum to `value` exactly.
/// Returns `None` when the shares sum to (almost) nothing.
fn split_pixel<F>(n: usize, value: f32, mut share: F) -> Option<Vec<(usize, f32)>>
where
    F: FnMut(usize) -> f64,
{
    let claims: Vec<(usize, f64)> = (0..n)
        .map(|slot| (slot, share(slot)))
        .filter(|&(_, s)| s > 0.0)
        .collect();
    let total: f64 = claims.iter().map(|&(_, s)| s).sum();
    if claims.is_empty() || total <= MIN_SHARE_SUM {
        return None;
    }

    let mut parts = Vec::with_capacity(claims.len());
    let mut given = 0.0f32;
    for (i, &(slot, s)) in claims.iter().enumerate() {
        let part = if i + 1 == claims.len() {
            value - given
        } else {
            (value as f64 * s / total) as f32
        };
        given += part;
        parts.push((slot, part));
    }
    Some(parts)
}

/// Hand each residual pixel to the child with the largest `M_k / d²`, where
/// `M_k` is the child's second moment about its centre and `d` the pixel's
/// distance from that centre. Ties go to the nearer child.
pub(crate) fn assign_unassigned(blend: &Blend, alive: &[usize], red: &mut Redistribution) {
    if alive.is_empty() {
        return;
    }
    for b in 0..blend.nbands() {
        let centers: Vec<(f64, f64)> = alive
            .iter()
            .map(|&k| blend.children[k].centers[b])
            .collect();
        let moments: Vec<f64> = (0..alive.len())
            .map(|slot| second_moment(&red.shares[slot][b], blend, centers[slot]))
            .collect();

        let mut moved = 0.0f64;
        for idx in blend.pixel_indices() {
            let value = red.residual[b][idx];
            if value == 0.0 {
                continue;
            }
            let row = (blend.bbox.row0 + idx[0] as i32) as f64;
            let col = (blend.bbox.col0 + idx[1] as i32) as f64;
            let best = (0..alive.len())
                .map(|slot| {
                    let d2 = ((row - centers[slot].0).powi(2) + (col - centers[slot].1).powi(2))
                        .max(MIN_ASSIGN_DISTANCE_SQ);
                    (slot, moments[slot] / d2, d2)
                })
                .max_by(|x, y| x.1.total_cmp(&y.1).then(y.2.total_cmp(&x.2)))
                .map(|(slot, _, _)| slot);
            if let Some(slot) = best {
                red.shares[slot][b][idx] += value;
                red.residual[b][idx] = 0.0;
                moved += value as f64;
            }
        }
        red.reassigned[b] += moved;
    }
    debug!(reassigned = ?red.reassigned, "Unassigned flux reassigned");
}

fn second_moment(share: &Array2<f32>, blend: &Blend, center: (f64, f64)) -> f64 {
    share
        .indexed_iter()
        .map(|((i, j), &v)| {
            let dr = (blend.bbox.row0 + i as i32) as f64 - center.0;
            let dc = (blend.bbox.col0 + j as i32) as f64 - center.1;
            v.max(0.0) as f64 * (dr * dr + dc * dc)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_conserves_value() {
        let parts = split_pixel(3, 10.0, |slot| [1.0, 0.0, 3.0][slot]).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], (0, 2.5));
        assert_eq!(parts[1].0, 2);
        let total: f32 = parts.iter().map(|p| p.1).sum();
        assert_eq!(total, 10.0);
    }

    #[test]
    fn test_split_without_support() {
        assert!(split_pixel(2, 5.0, |_| 0.0).is_none());
    }
}
