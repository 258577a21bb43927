use serde::{Deserialize, Serialize};

/// Configuration for multi-threshold connected-component labeling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FindConfig {
    /// Strictly ascending intensity levels; pixels at or above a level belong
    /// to that level's masks.
    pub levels: Vec<f32>,
    /// Index into `levels` at which `min_pixels` is enforced.
    pub min_level: usize,
    /// Minimum pixel count at `min_level` for a detection to be kept.
    pub min_pixels: usize,
    /// Maximum number of detections returned; the remainder is dropped with a warning.
    pub max_detections: Option<usize>,
    /// Detections whose base mask has at least this fraction of `NOT_CHECKED`
    /// pixels are discarded.
    pub max_not_checked_fraction: f32,
}

impl FindConfig {
    /// Panics on malformed levels; these are programmer errors.
    pub fn validate(&self) {
        assert!(!self.levels.is_empty(), "at least one threshold level is required");
        assert!(
            self.levels.windows(2).all(|w| w[0] < w[1]),
            "threshold levels must be strictly ascending: {:?}",
            self.levels
        );
        assert!(
            self.min_level < self.levels.len(),
            "min_level {} out of range for {} levels",
            self.min_level,
            self.levels.len()
        );
    }

    /// Single-level configuration used for restricted re-labeling.
    pub fn single_level(level: f32) -> Self {
        Self {
            levels: vec![level],
            min_level: 0,
            min_pixels: 1,
            max_detections: None,
            max_not_checked_fraction: f32::INFINITY,
        }
    }
}
