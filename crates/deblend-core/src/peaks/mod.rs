pub mod cull;
pub mod extract;
pub mod merge;

pub use cull::{cull_band_peaks, cull_peaks, CulledPeaks};
pub use extract::{find_peaks, ExtractedPeaks};
pub use merge::merge_band_peaks;

use serde::{Deserialize, Serialize};

use crate::band::NoiseModel;
use crate::flags::PeakFlags;

/// Set of band indices, one bit per band.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BandSet(u32);

impl BandSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn single(band: usize) -> Self {
        let mut set = Self::empty();
        set.insert(band);
        set
    }

    pub fn insert(&mut self, band: usize) {
        assert!(band < 32, "at most 32 bands are supported");
        self.0 |= 1 << band;
    }

    pub fn contains(&self, band: usize) -> bool {
        band < 32 && self.0 & (1 << band) != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn is_disjoint(&self, other: &BandSet) -> bool {
        self.0 & other.0 == 0
    }

    pub fn union(&self, other: &BandSet) -> BandSet {
        BandSet(self.0 | other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..32).filter(move |&b| self.contains(b))
    }
}

/// A peak as seen in one band.
#[derive(Clone, Debug, PartialEq)]
pub struct BandPeak {
    pub band: usize,
    pub row: i32,
    pub col: i32,
    pub value: f32,
    /// Sub-pixel centroid in the reference frame.
    pub row_c: f64,
    pub col_c: f64,
}

/// A local maximum or maximal plateau.
///
/// After cross-band merging `merged` holds the same physical peak as seen in
/// every band, and `bands` records which bands those are.
#[derive(Clone, Debug, PartialEq)]
pub struct Peak {
    pub row: i32,
    pub col: i32,
    pub value: f32,
    pub row_c: f64,
    pub col_c: f64,
    pub row_err: f64,
    pub col_err: f64,
    pub bands: BandSet,
    pub flags: PeakFlags,
    pub merged: Vec<BandPeak>,
}

impl Peak {
    pub fn new(row: i32, col: i32, value: f32) -> Self {
        Self {
            row,
            col,
            value,
            row_c: row as f64,
            col_c: col as f64,
            row_err: 0.0,
            col_err: 0.0,
            bands: BandSet::empty(),
            flags: PeakFlags::empty(),
            merged: Vec::new(),
        }
    }

    pub fn distance_to(&self, other: &Peak) -> f64 {
        ((self.row_c - other.row_c).powi(2) + (self.col_c - other.col_c).powi(2)).sqrt()
    }

    /// The sub-peak seen in `band`, if any.
    pub fn in_band(&self, band: usize) -> Option<&BandPeak> {
        self.merged.iter().find(|p| p.band == band)
    }
}

/// Minimum saddle depth separating two peaks.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum PeakDelta {
    /// Fixed depth in DN.
    Absolute(f32),
    /// Depth as a multiple of the local noise at the peak.
    NoiseMultiple(f32),
}

impl PeakDelta {
    /// Legacy encoding: non-negative values are absolute, negative values are
    /// noise multiples.
    pub fn from_raw(raw: f32) -> Self {
        if raw < 0.0 {
            PeakDelta::NoiseMultiple(-raw)
        } else {
            PeakDelta::Absolute(raw)
        }
    }

    /// Depth in DN for a peak of raw value `value`.
    ///
    /// Panics if a noise-relative delta is used without a noise model.
    pub fn resolve(&self, value: f32, noise: Option<&NoiseModel>) -> f32 {
        match *self {
            PeakDelta::Absolute(d) => d,
            PeakDelta::NoiseMultiple(m) => match noise {
                Some(n) => (m.abs() as f64 * n.peak_sigma(value)) as f32,
                None => panic!("noise-relative peak delta requires a noise model"),
            },
        }
    }
}

/// What to do once more than `npeak_max` peaks are found.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeakCapPolicy {
    /// Stop scanning at the cap and keep the peaks found so far, which are not
    /// necessarily the brightest.
    StopEarly,
    /// Scan the whole region and keep the `npeak_max` brightest.
    KeepBrightest,
}

/// Configuration for peak extraction and culling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeakConfig {
    /// A strict maximum must exceed all 8 neighbours by at least this much.
    pub min_margin: f32,
    /// Saddle depth required to keep a fainter peak.
    pub saddle_delta: PeakDelta,
    /// Half-size of the local saddle search window (2 ⇒ 5×5).
    pub saddle_radius: u32,
    /// Maximum peaks per detection.
    pub npeak_max: usize,
    pub cap_policy: PeakCapPolicy,
}
