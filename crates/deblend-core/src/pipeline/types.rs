use crate::deblend::DeblendOutcome;
use crate::detection::Detection;

/// Pipeline processing stage, used for progress reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    Detecting,
    Deblending,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Detecting => write!(f, "Detecting sources"),
            Self::Deblending => write!(f, "Deblending"),
        }
    }
}

/// One detection after peak finding and deblending.
#[derive(Clone, Debug)]
pub struct ProcessedDetection {
    /// The detection with its merged peaks and flags filled in.
    pub detection: Detection,
    /// `None` when processing was cancelled before the deblender finished.
    pub outcome: Option<DeblendOutcome>,
}

impl ProcessedDetection {
    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Result of processing one exposure.
#[derive(Clone, Debug, Default)]
pub struct ExposureOutput {
    /// Detections in scan order.
    pub detections: Vec<ProcessedDetection>,
    /// Number of detections flagged `INCOMPLETE`.
    pub incomplete: usize,
}

/// Thread-safe progress reporting for the pipeline.
///
/// Implementors can use this to drive progress bars, logging, or any other
/// UI feedback. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A new pipeline stage has started. `total_items` is the number of
    /// work items in this stage (e.g., detection count), if known.
    fn begin_stage(&self, _stage: PipelineStage, _total_items: Option<usize>) {}

    /// One work item within the current stage has completed.
    fn advance(&self, _items_done: usize) {}

    /// The current stage is finished.
    fn finish_stage(&self) {}
}

/// No-op progress reporter, used when `process_exposure` delegates.
pub(super) struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}
