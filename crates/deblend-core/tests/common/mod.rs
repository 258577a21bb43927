#![allow(dead_code)]

use deblend_core::deblend::DeblendConfig;
use deblend_core::detection::FindConfig;
use deblend_core::peaks::{PeakCapPolicy, PeakConfig, PeakDelta};
use deblend_core::pipeline::PipelineConfig;
use deblend_core::psf::Psf;
use deblend_core::{BandContext, PixelGrid};
use ndarray::Array2;

pub const BACKGROUND: f32 = 100.0;

/// Flat image at `level`.
pub fn flat(height: usize, width: usize, level: f32) -> Array2<f32> {
    Array2::from_elem((height, width), level)
}

/// Add a circular Gaussian of peak `amplitude` centred on `(row, col)`.
pub fn add_gaussian(data: &mut Array2<f32>, row: f64, col: f64, amplitude: f32, sigma: f64) {
    let two_s2 = 2.0 * sigma * sigma;
    for ((r, c), v) in data.indexed_iter_mut() {
        let d2 = (r as f64 - row).powi(2) + (c as f64 - col).powi(2);
        *v += (amplitude as f64 * (-d2 / two_s2).exp()) as f32;
    }
}

/// Same as [`add_gaussian`] but only within a `(2 * half + 1)²` stamp.
pub fn add_gaussian_stamp(
    data: &mut Array2<f32>,
    row: usize,
    col: usize,
    amplitude: f32,
    sigma: f64,
    half: usize,
) {
    let two_s2 = 2.0 * sigma * sigma;
    for r in row.saturating_sub(half)..=(row + half).min(data.nrows() - 1) {
        for c in col.saturating_sub(half)..=(col + half).min(data.ncols() - 1) {
            let d2 = (r as f64 - row as f64).powi(2) + (c as f64 - col as f64).powi(2);
            data[[r, c]] += (amplitude as f64 * (-d2 / two_s2).exp()) as f32;
        }
    }
}

/// Two peaks of raw value 1000 at `(10, 5)` and `(10, 25)` joined along row
/// 10 by a ridge that dips linearly to `dip` at column 15. Off the ridge row
/// the profile falls off as a Gaussian of sigma 1.
pub fn ridge(dip: f32) -> Array2<f32> {
    let mut data = flat(21, 31, BACKGROUND);
    let top = 1000.0f32;
    for ((r, c), v) in data.indexed_iter_mut() {
        let along = if (5..=25).contains(&c) {
            dip + (top - dip) * (c as f32 - 15.0).abs() / 10.0
        } else {
            let beyond = if c < 5 { 5 - c } else { c - 25 } as f32;
            BACKGROUND + (top - BACKGROUND) * (-beyond * beyond / 8.0).exp()
        };
        let dr = r as f32 - 10.0;
        *v = BACKGROUND + (along - BACKGROUND) * (-dr * dr / 2.0).exp();
    }
    data
}

pub fn grid(data: Array2<f32>) -> PixelGrid {
    PixelGrid::new(data)
}

pub fn context(psf_sigma: f32) -> BandContext {
    BandContext {
        background: BACKGROUND,
        gain: 1.0,
        dark_variance: 1.0,
        psf: Psf::Gaussian { sigma: psf_sigma },
        detection_threshold: 50.0,
        min_peak_separation: 2.0,
        max_children: 10,
        offset: (0.0, 0.0),
        epoch: 0.0,
    }
}

pub fn find_config(level: f32) -> FindConfig {
    FindConfig {
        levels: vec![level],
        min_level: 0,
        min_pixels: 1,
        max_detections: None,
        max_not_checked_fraction: 0.5,
    }
}

pub fn peak_config(delta: f32) -> PeakConfig {
    PeakConfig {
        min_margin: 0.0,
        saddle_delta: PeakDelta::Absolute(delta),
        saddle_radius: 2,
        npeak_max: 20,
        cap_policy: PeakCapPolicy::KeepBrightest,
    }
}

pub fn deblend_config() -> DeblendConfig {
    DeblendConfig {
        max_object_pixels: 100_000,
        edge_margin: 0,
        min_detected_bands: 1,
        min_eigenvalue: 1e-9,
        max_template_similarity: 0.9,
        template_threshold_sigma: 3.0,
        template_margin: 1,
        average_templates: true,
        psf_min_snr: 5.0,
        psf_min_likelihood: 0.5,
        moving_min_bands: 3,
        moving_max_chi2: 4.0,
        moving_min_speed: 1.0,
        moving_position_error: 0.5,
        reassign_unassigned: true,
        max_unassigned_fraction: 0.1,
        background_margin: 4,
        background_disk_radius: 5,
    }
}

pub fn pipeline_config(level: f32, delta: f32) -> PipelineConfig {
    PipelineConfig {
        reference_band: 0,
        find: find_config(level),
        peaks: peak_config(delta),
        deblend: deblend_config(),
    }
}
