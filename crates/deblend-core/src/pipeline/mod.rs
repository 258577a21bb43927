pub mod config;
mod orchestrator;
mod types;

pub use config::PipelineConfig;
pub use orchestrator::{process_detection, process_exposure, process_exposure_reported};
pub use types::{ExposureOutput, PipelineStage, ProcessedDetection, ProgressReporter};
