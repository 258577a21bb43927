//! Template weight solve.
//!
//! Per band, the parent is modelled as `Σ w_k T_k` with unit-peak templates
//! `T_k`. The normal equations are solved through the eigendecomposition of
//! the Gram matrix, and children that make the system ill-posed are removed
//! one at a time until it is well conditioned.

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use ndarray::Array2;
use tracing::debug;

use crate::band::BandContext;
use crate::cancel::CancelToken;
use crate::error::Result;
use crate::flags::ObjectFlags;

use super::blend::Blend;
use super::config::DeblendConfig;

/// Why a child was removed from the solve.
#[derive(Clone, Debug, PartialEq)]
pub enum Rejection {
    /// Template is zero in every band.
    NoSupport,
    /// Template duplicates a surviving child's template.
    Duplicate { into: usize, similarity: f64 },
    /// Child dominates an eigenvector whose eigenvalue fell below the floor.
    Degenerate { eigenvalue: f64, into: Option<usize> },
    /// Solved amplitude clears the detection threshold in too few bands.
    Undetectable { bands: usize },
}

impl Rejection {
    pub fn flag(&self) -> ObjectFlags {
        match self {
            Rejection::NoSupport | Rejection::Degenerate { .. } => ObjectFlags::DEGENERATE_TEMPLATE,
            Rejection::Duplicate { .. } => ObjectFlags::PEAKS_TRANSFERRED,
            Rejection::Undetectable { .. } => ObjectFlags::UNDETECTABLE_CHILD,
        }
    }
}

/// `1 / max(template)`, or zero for an empty template.
pub fn unit_scale(template: &Array2<f32>) -> f64 {
    let peak = template.iter().copied().fold(0.0f32, f32::max);
    if peak > 0.0 {
        1.0 / peak as f64
    } else {
        0.0
    }
}

/// Normal equations for one band over the children in `alive`.
struct BandSystem {
    gram: DMatrix<f64>,
    rhs: DVector<f64>,
}

impl BandSystem {
    fn build(blend: &Blend, alive: &[usize], band: usize) -> Self {
        let n = alive.len();
        let scales: Vec<f64> = alive
            .iter()
            .map(|&k| unit_scale(&blend.children[k].templates[band]))
            .collect();
        let mut gram = DMatrix::<f64>::zeros(n, n);
        let mut rhs = DVector::<f64>::zeros(n);
        let data = &blend.parent[band];
        let mut vals: Vec<(usize, f64)> = Vec::with_capacity(n);

        for idx in blend.pixel_indices() {
            vals.clear();
            for (a, &k) in alive.iter().enumerate() {
                let t = blend.children[k].templates[band][idx] as f64 * scales[a];
                if t != 0.0 {
                    vals.push((a, t));
                }
            }
            let d = data[idx] as f64;
            for (x, &(a, ta)) in vals.iter().enumerate() {
                rhs[a] += ta * d;
                for &(b, tb) in &vals[x..] {
                    gram[(a, b)] += ta * tb;
                }
            }
        }
        gram.fill_lower_triangle_with_upper_triangle();
        Self { gram, rhs }
    }

    /// Indices with a non-zero diagonal.
    fn active(&self) -> Vec<usize> {
        (0..self.rhs.len())
            .filter(|&k| self.gram[(k, k)] > 0.0)
            .collect()
    }

    fn restrict(&self, active: &[usize]) -> (DMatrix<f64>, DVector<f64>) {
        let m = active.len();
        let gram = DMatrix::from_fn(m, m, |i, j| self.gram[(active[i], active[j])]);
        let rhs = DVector::from_fn(m, |i, _| self.rhs[active[i]]);
        (gram, rhs)
    }
}

/// Solve `gram · w = rhs` through the eigendecomposition, skipping
/// non-positive eigenvalues.
fn eigen_solve(eigen: &SymmetricEigen<f64, nalgebra::Dyn>, rhs: &DVector<f64>) -> DVector<f64> {
    let mut w = DVector::<f64>::zeros(rhs.len());
    for (k, &lambda) in eigen.eigenvalues.iter().enumerate() {
        if lambda <= f64::EPSILON {
            continue;
        }
        let v = eigen.eigenvectors.column(k);
        let coef = v.dot(rhs) / lambda;
        w.axpy(coef, &v, 1.0);
    }
    w
}

/// Band-summed cosine similarity of two children's templates.
fn similarity(systems: &[BandSystem], i: usize, j: usize) -> f64 {
    let (mut cross, mut ii, mut jj) = (0.0, 0.0, 0.0);
    for s in systems {
        cross += s.gram[(i, j)];
        ii += s.gram[(i, i)];
        jj += s.gram[(j, j)];
    }
    let denom = (ii * jj).sqrt();
    if denom > 0.0 {
        cross / denom
    } else {
        0.0
    }
}

/// Solve for every live child's per-band weight, rejecting children until
/// the system is well posed. Negative weights are clipped to zero.
pub(crate) fn solve_weights(
    blend: &mut Blend,
    contexts: &[BandContext],
    config: &DeblendConfig,
    cancel: &CancelToken,
) -> Result<Vec<(usize, Rejection)>> {
    let nbands = blend.nbands();
    let mut rejected = Vec::new();

    loop {
        cancel.check()?;
        let alive = blend.alive();
        if alive.is_empty() {
            break;
        }
        let systems: Vec<BandSystem> = (0..nbands)
            .map(|b| BandSystem::build(blend, &alive, b))
            .collect();

        if let Some(a) =
            (0..alive.len()).find(|&a| systems.iter().all(|s| s.gram[(a, a)] <= 0.0))
        {
            reject(blend, &mut rejected, alive[a], Rejection::NoSupport);
            continue;
        }

        if alive.len() > 1 {
            if let Some((drop, keep, sim)) = most_similar(blend, &systems, &alive, config) {
                blend.transfer_peaks(drop, keep);
                reject(
                    blend,
                    &mut rejected,
                    drop,
                    Rejection::Duplicate {
                        into: keep,
                        similarity: sim,
                    },
                );
                continue;
            }
        }

        let mut weights = vec![vec![0.0f64; nbands]; alive.len()];
        let mut degenerate = None;
        for (b, sys) in systems.iter().enumerate() {
            let active = sys.active();
            if active.is_empty() {
                continue;
            }
            let (gram, rhs) = sys.restrict(&active);
            let eigen = SymmetricEigen::new(gram);

            if active.len() > 1 {
                let (kmin, &lambda) = eigen
                    .eigenvalues
                    .iter()
                    .enumerate()
                    .min_by(|x, y| x.1.total_cmp(y.1))
                    .unwrap_or((0, &f64::INFINITY));
                if lambda < config.min_eigenvalue {
                    let v = eigen.eigenvectors.column(kmin);
                    let vmax = v.iter().fold(0.0f64, |m, x| m.max(x.abs()));
                    let faintest = (0..active.len())
                        .filter(|&i| v[i].abs() >= 0.5 * vmax)
                        .map(|i| alive[active[i]])
                        .min_by(|&x, &y| {
                            blend.children[x]
                                .brightness
                                .total_cmp(&blend.children[y].brightness)
                        });
                    if let Some(child) = faintest {
                        degenerate = Some((child, lambda));
                        break;
                    }
                }
            }

            let w = eigen_solve(&eigen, &rhs);
            for (i, &a) in active.iter().enumerate() {
                weights[a][b] = w[i];
            }
        }

        if let Some((child, eigenvalue)) = degenerate {
            let a = alive.iter().position(|&k| k == child).unwrap_or(0);
            let into = (0..alive.len())
                .filter(|&o| o != a)
                .max_by(|&x, &y| similarity(&systems, a, x).total_cmp(&similarity(&systems, a, y)))
                .map(|o| alive[o]);
            if let Some(keep) = into {
                blend.transfer_peaks(child, keep);
            }
            reject(
                blend,
                &mut rejected,
                child,
                Rejection::Degenerate { eigenvalue, into },
            );
            continue;
        }

        if alive.len() > 1 {
            if let Some((child, bands)) = least_detectable(&alive, &weights, contexts, config) {
                reject(blend, &mut rejected, child, Rejection::Undetectable { bands });
                continue;
            }
        }

        for (a, &k) in alive.iter().enumerate() {
            blend.children[k].weights = weights[a].iter().map(|&w| w.max(0.0)).collect();
        }
        break;
    }

    debug!(
        survivors = blend.alive().len(),
        rejected = rejected.len(),
        "Template weights solved"
    );
    Ok(rejected)
}

fn reject(blend: &mut Blend, log: &mut Vec<(usize, Rejection)>, child: usize, why: Rejection) {
    let c = &mut blend.children[child];
    c.alive = false;
    c.weights.iter_mut().for_each(|w| *w = 0.0);
    debug!(child, reason = ?why, "Child rejected");
    log.push((child, why));
}

/// The most similar pair above the similarity cap, as `(drop, keep, sim)`.
/// A point-source child is kept over an extended one, otherwise the brighter.
fn most_similar(
    blend: &Blend,
    systems: &[BandSystem],
    alive: &[usize],
    config: &DeblendConfig,
) -> Option<(usize, usize, f64)> {
    let mut best: Option<(usize, usize, f64)> = None;
    for i in 0..alive.len() {
        for j in i + 1..alive.len() {
            let sim = similarity(systems, i, j);
            if sim > config.max_template_similarity && best.map_or(true, |(_, _, s)| sim > s) {
                best = Some((i, j, sim));
            }
        }
    }
    let (i, j, sim) = best?;
    let (ci, cj) = (&blend.children[alive[i]], &blend.children[alive[j]]);
    let keep_i = match (ci.is_psf(), cj.is_psf()) {
        (true, false) => true,
        (false, true) => false,
        _ => ci.brightness >= cj.brightness,
    };
    Some(if keep_i {
        (alive[j], alive[i], sim)
    } else {
        (alive[i], alive[j], sim)
    })
}

/// The child with the weakest detection among those detected in too few
/// bands, with its detected-band count.
fn least_detectable(
    alive: &[usize],
    weights: &[Vec<f64>],
    contexts: &[BandContext],
    config: &DeblendConfig,
) -> Option<(usize, usize)> {
    let mut worst: Option<(usize, usize, f64)> = None;
    for (a, &k) in alive.iter().enumerate() {
        let mut detected = 0;
        let mut best_ratio = f64::NEG_INFINITY;
        for (b, ctx) in contexts.iter().enumerate() {
            let threshold = (ctx.detection_threshold as f64).max(f64::MIN_POSITIVE);
            let ratio = weights[a][b] / threshold;
            if ratio >= 1.0 {
                detected += 1;
            }
            best_ratio = best_ratio.max(ratio);
        }
        if detected < config.min_detected_bands
            && worst.map_or(true, |(_, _, r)| best_ratio < r)
        {
            worst = Some((k, detected, best_ratio));
        }
    }
    worst.map(|(k, detected, _)| (k, detected))
}
