/// Minimum detection count to process detections with Rayon parallelism.
pub const PARALLEL_DETECTION_THRESHOLD: usize = 4;

/// B3 spline 1D kernel coefficients: [1, 4, 6, 4, 1] / 16.
pub const B3_KERNEL: [f32; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];

/// Share sum below which a pixel is treated as carrying no template signal.
pub const MIN_SHARE_SUM: f64 = 1e-6;

/// Fraction of a PSF child's peak value above which its pixels count as the
/// star's core and are excluded from neighbouring symmetric templates.
pub const PSF_CORE_FRACTION: f32 = 0.1;

/// PSF footprint radius, in units of the model's characteristic width.
pub const PSF_RADIUS_SIGMAS: f32 = 4.0;

/// Floor on the squared distance used when handing unassigned pixels to the
/// nearest child, so a pixel on a child's centre does not divide by zero.
pub const MIN_ASSIGN_DISTANCE_SQ: f64 = 0.25;

/// Lowest variance accepted by the noise model.
pub const MIN_VARIANCE: f64 = 1e-12;
