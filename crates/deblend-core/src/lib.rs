//! Multi-band source detection and deblending.
//!
//! Connected regions are found above one or more thresholds, their peaks are
//! extracted, culled by saddle depth and merged across bands, and blended
//! parents are split into per-child flux cutouts.

pub mod band;
pub mod cancel;
pub mod consts;
pub mod deblend;
pub mod detection;
pub mod error;
pub mod flags;
pub mod grid;
pub mod mask;
pub mod peaks;
pub mod pipeline;
pub mod psf;

pub use band::{BandContext, NoiseModel};
pub use cancel::CancelToken;
pub use error::{DeblendError, Result};
pub use grid::PixelGrid;
