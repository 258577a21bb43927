use serde::{Deserialize, Serialize};

use crate::consts::MIN_VARIANCE;
use crate::psf::Psf;

/// Per-band calibration supplied by the caller for one processing pass.
/// Read-only inside the core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BandContext {
    /// Sky background level in DN.
    pub background: f32,
    /// Electrons per DN.
    pub gain: f32,
    /// Read-noise plus dark-current variance in DN².
    pub dark_variance: f32,
    pub psf: Psf,
    /// Minimum peak height above background for a source to count as detected.
    pub detection_threshold: f32,
    /// Peaks closer than this (pixels) are the same source.
    pub min_peak_separation: f32,
    /// Upper bound on the number of children per parent.
    pub max_children: usize,
    /// `(drow, dcol)` of this band relative to the reference band.
    pub offset: (f64, f64),
    /// Exposure time of this band, used to fit moving objects.
    pub epoch: f64,
}

impl BandContext {
    /// Per-pixel variance of the sky in DN².
    pub fn sky_variance(&self) -> f64 {
        let gain = (self.gain as f64).max(MIN_VARIANCE);
        (self.background as f64 / gain + self.dark_variance as f64).max(MIN_VARIANCE)
    }

    /// Variance of a pixel holding `signal` DN above background.
    pub fn pixel_variance(&self, signal: f64) -> f64 {
        let gain = (self.gain as f64).max(MIN_VARIANCE);
        self.sky_variance() + signal.max(0.0) / gain
    }

    pub fn noise_model(&self) -> NoiseModel {
        NoiseModel {
            background: self.background,
            sky_variance: self.sky_variance(),
            gain: self.gain as f64,
            effective_area: self.psf.effective_area(),
        }
    }

    /// Map a reference-frame position into this band.
    pub fn to_band(&self, row: f64, col: f64) -> (f64, f64) {
        (row + self.offset.0, col + self.offset.1)
    }

    /// Map a position in this band into the reference frame.
    pub fn to_reference(&self, row: f64, col: f64) -> (f64, f64) {
        (row - self.offset.0, col - self.offset.1)
    }
}

/// Noise quantities needed to turn a noise-relative peak delta into counts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoiseModel {
    pub background: f32,
    pub sky_variance: f64,
    pub gain: f64,
    pub effective_area: f64,
}

impl NoiseModel {
    /// `sqrt(sky_variance + signal / (gain * effective_area))` for a peak of
    /// raw value `value`.
    pub fn peak_sigma(&self, value: f32) -> f64 {
        let signal = (value - self.background).max(0.0) as f64;
        let denom = (self.gain * self.effective_area).max(MIN_VARIANCE);
        (self.sky_variance + signal / denom).sqrt()
    }
}
