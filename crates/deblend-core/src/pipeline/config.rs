use serde::{Deserialize, Serialize};

use crate::deblend::DeblendConfig;
use crate::detection::FindConfig;
use crate::peaks::PeakConfig;

/// Everything one exposure pass needs besides the rasters and band contexts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Band whose raster is searched for detections.
    pub reference_band: usize,
    pub find: FindConfig,
    pub peaks: PeakConfig,
    pub deblend: DeblendConfig,
}
