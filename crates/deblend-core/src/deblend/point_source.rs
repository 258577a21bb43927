//! Point-source pre-subtraction.
//!
//! Faint children that look like unresolved stars are fitted with the band's
//! PSF and removed from the working image before symmetric templates are
//! built, so the stars do not leak into their neighbours' templates.

use ndarray::Array2;
use tracing::debug;

use crate::band::BandContext;
use crate::flags::{ObjectFlags, PeakFlags};
use crate::mask::BBox;
use crate::psf::Psf;

use super::blend::Blend;
use super::config::DeblendConfig;

/// Linear amplitude fit of a unit-peak PSF to one band.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointSourceFit {
    pub amplitude: f64,
    pub amplitude_err: f64,
    pub reduced_chi2: f64,
    /// `exp(-(χ²_ν - 1)/2)`, clamped to 1 for χ²_ν ≤ 1.
    pub likelihood: f64,
    pub npix: usize,
}

impl PointSourceFit {
    pub fn snr(&self) -> f64 {
        if self.amplitude_err > 0.0 {
            self.amplitude / self.amplitude_err
        } else {
            0.0
        }
    }
}

/// Fit `psf` centred at `center` to the footprint pixels of `data` within the
/// PSF radius. `data` is background-subtracted and indexed over `bbox`.
pub fn fit_point_source(
    data: &Array2<f32>,
    inside: &Array2<bool>,
    bbox: &BBox,
    psf: &Psf,
    center: (f64, f64),
    ctx: &BandContext,
) -> Option<PointSourceFit> {
    let samples = stamp(data, inside, bbox, psf, center);
    if samples.len() < 2 {
        return None;
    }

    let var = |d: f64| ctx.pixel_variance(d);
    let spp: f64 = samples.iter().map(|&(p, d)| p * p / var(d)).sum();
    if spp <= 0.0 {
        return None;
    }
    let spd: f64 = samples.iter().map(|&(p, d)| p * d / var(d)).sum();
    let amplitude = spd / spp;
    let chi2: f64 = samples
        .iter()
        .map(|&(p, d)| (d - amplitude * p).powi(2) / var(d))
        .sum();
    let reduced_chi2 = chi2 / (samples.len() - 1) as f64;

    Some(PointSourceFit {
        amplitude,
        amplitude_err: spp.sqrt().recip(),
        reduced_chi2,
        likelihood: (-0.5 * (reduced_chi2 - 1.0).max(0.0)).exp(),
        npix: samples.len(),
    })
}

/// `(model, data)` pairs over the footprint pixels inside the PSF stamp.
fn stamp(
    data: &Array2<f32>,
    inside: &Array2<bool>,
    bbox: &BBox,
    psf: &Psf,
    center: (f64, f64),
) -> Vec<(f64, f64)> {
    let r = psf.radius();
    let (rc, cc) = (center.0.round() as i32, center.1.round() as i32);
    let mut out = Vec::new();
    for row in (rc - r).max(bbox.row0)..=(rc + r).min(bbox.row1) {
        for col in (cc - r).max(bbox.col0)..=(cc + r).min(bbox.col1) {
            let Some(idx) = bbox.index(row, col) else {
                continue;
            };
            if !inside[idx] {
                continue;
            }
            let p = psf.value(row as f64 - center.0, col as f64 - center.1);
            out.push((p, data[idx] as f64));
        }
    }
    out
}

fn subtract(
    data: &mut Array2<f32>,
    inside: &Array2<bool>,
    bbox: &BBox,
    psf: &Psf,
    center: (f64, f64),
    amplitude: f64,
) {
    let r = psf.radius();
    let (rc, cc) = (center.0.round() as i32, center.1.round() as i32);
    for row in (rc - r).max(bbox.row0)..=(rc + r).min(bbox.row1) {
        for col in (cc - r).max(bbox.col0)..=(cc + r).min(bbox.col1) {
            if let Some(idx) = bbox.index(row, col) {
                if inside[idx] {
                    let p = psf.value(row as f64 - center.0, col as f64 - center.1);
                    data[idx] -= (amplitude * p) as f32;
                }
            }
        }
    }
}

/// Fit every child other than the brightest with the PSF. Children that are
/// significant in some band and stellar in every significant band are
/// flagged as point sources and subtracted from the working image.
pub(crate) fn subtract_point_sources(
    blend: &mut Blend,
    contexts: &[BandContext],
    config: &DeblendConfig,
) -> usize {
    let dominant = blend
        .alive()
        .into_iter()
        .max_by(|&a, &b| {
            blend.children[a]
                .brightness
                .total_cmp(&blend.children[b].brightness)
                .then(b.cmp(&a))
        });

    let mut count = 0;
    for ci in blend.alive() {
        if Some(ci) == dominant || blend.children[ci].is_moving() {
            continue;
        }
        let centers = blend.children[ci].centers.clone();
        let fits: Vec<Option<PointSourceFit>> = contexts
            .iter()
            .enumerate()
            .map(|(b, ctx)| {
                fit_point_source(&blend.work[b], &blend.inside, &blend.bbox, &ctx.psf, centers[b], ctx)
            })
            .collect();

        let significant: Vec<&PointSourceFit> = fits
            .iter()
            .flatten()
            .filter(|f| f.snr() >= config.psf_min_snr)
            .collect();
        let stellar = !significant.is_empty()
            && significant
                .iter()
                .all(|f| f.likelihood >= config.psf_min_likelihood);
        if !stellar {
            continue;
        }

        let amplitudes: Vec<f64> = fits
            .iter()
            .map(|f| f.map_or(0.0, |f| f.amplitude.max(0.0)))
            .collect();
        for (b, ctx) in contexts.iter().enumerate() {
            if amplitudes[b] > 0.0 {
                subtract(
                    &mut blend.work[b],
                    &blend.inside,
                    &blend.bbox,
                    &ctx.psf,
                    centers[b],
                    amplitudes[b],
                );
            }
        }

        let child = &mut blend.children[ci];
        child.psf_amplitude = amplitudes;
        child.flags |= ObjectFlags::PSF_DEBLENDED;
        for p in &mut child.peaks {
            p.flags |= PeakFlags::PSF;
        }
        count += 1;
    }

    if count > 0 {
        debug!(point_sources = count, "Point sources subtracted");
    }
    count
}
