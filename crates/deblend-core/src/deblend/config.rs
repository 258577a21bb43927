use serde::{Deserialize, Serialize};

/// Tunables for the deblender. Every value comes from the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeblendConfig {
    /// Parents with more footprint pixels than this are left unblended.
    pub max_object_pixels: usize,
    /// Minimum distance (pixels) between the footprint and the raster edge.
    pub edge_margin: i32,
    /// A child must be detectable in at least this many bands to survive.
    pub min_detected_bands: usize,
    /// Gram-matrix eigenvalues below this floor mark a degenerate system.
    pub min_eigenvalue: f64,
    /// Band-summed cosine similarity above which two templates are duplicates.
    pub max_template_similarity: f64,
    /// Template cleanup threshold in units of the sky noise.
    pub template_threshold_sigma: f32,
    /// Dilation applied to the cleaned template mask.
    pub template_margin: u32,
    /// Average each child's templates across bands.
    pub average_templates: bool,
    /// Minimum amplitude signal-to-noise for a point-source fit.
    pub psf_min_snr: f64,
    /// Minimum stellar likelihood for a point-source fit, in `[0, 1]`.
    pub psf_min_likelihood: f64,
    /// Minimum number of bands a moving-object fit must span.
    pub moving_min_bands: usize,
    /// Maximum reduced chi-square of the moving-object line fit.
    pub moving_max_chi2: f64,
    /// Minimum speed, in pixels per epoch unit, to call an object moving.
    pub moving_min_speed: f64,
    /// Floor on per-band position errors in the moving fit (pixels).
    pub moving_position_error: f64,
    /// Hand still-unassigned pixels to the most likely child.
    pub reassign_unassigned: bool,
    /// Fraction of parent flux that may be reassigned before the parent is flagged.
    pub max_unassigned_fraction: f64,
    /// Padding around a child's support searched for local background pixels.
    pub background_margin: i32,
    /// Fallback background disk radius around the child's centre.
    pub background_disk_radius: i32,
}
