use thiserror::Error;

/// Recoverable runtime conditions. Precondition violations (malformed
/// thresholds, inconsistent band counts) are programmer errors and panic
/// instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeblendError {
    #[error("Processing cancelled: time budget exhausted")]
    Cancelled,

    #[error("Object too large: {npix} pixels (limit {max})")]
    ObjectTooLarge { npix: usize, max: usize },

    #[error("Object at ({row}, {col}) lies within {margin} pixels of the raster edge")]
    OffRaster { row: i32, col: i32, margin: i32 },
}

pub type Result<T> = std::result::Result<T, DeblendError>;
