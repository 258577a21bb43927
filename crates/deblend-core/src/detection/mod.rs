pub mod config;
pub mod disjoint_set;
pub mod finder;

pub use config::FindConfig;
pub use disjoint_set::DisjointSet;
pub use finder::find_detections;

use crate::flags::ObjectFlags;
use crate::mask::{BBox, RunLengthMask};
use crate::peaks::Peak;

/// One connected region found by the labeler.
///
/// `masks[0]` is the footprint at the lowest level; `masks[k]` holds the
/// pixels of the same region at `levels[k]`, so each mask is nested in the
/// one before it.
#[derive(Clone, Debug)]
pub struct Detection {
    /// Sequential id in scan order.
    pub id: usize,
    pub levels: Vec<f32>,
    pub masks: Vec<RunLengthMask>,
    /// Intensity-weighted centroid row.
    pub row_c: f64,
    /// Intensity-weighted centroid column.
    pub col_c: f64,
    pub row_err: f64,
    pub col_err: f64,
    /// Peaks, brightest first. Empty until peak extraction runs.
    pub peaks: Vec<Peak>,
    pub flags: ObjectFlags,
}

impl Detection {
    /// Base-level footprint.
    pub fn footprint(&self) -> &RunLengthMask {
        &self.masks[0]
    }

    pub fn npix(&self) -> usize {
        self.footprint().npix()
    }

    pub fn bbox(&self) -> BBox {
        // Detections are never built from an empty footprint.
        self.footprint().bounding_box().unwrap_or(BBox {
            row0: 0,
            row1: -1,
            col0: 0,
            col1: -1,
        })
    }

    /// Mask at threshold level `k`.
    pub fn mask_at(&self, k: usize) -> Option<&RunLengthMask> {
        self.masks.get(k)
    }
}
