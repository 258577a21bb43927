use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::band::BandContext;
use crate::cancel::CancelToken;
use crate::consts::PARALLEL_DETECTION_THRESHOLD;
use crate::deblend::{deblend, DeblendOutcome, ScratchArena};
use crate::detection::{find_detections, Detection};
use crate::error::Result;
use crate::flags::ObjectFlags;
use crate::grid::PixelGrid;
use crate::peaks::{cull_band_peaks, cull_peaks, find_peaks, merge_band_peaks};

use super::config::PipelineConfig;
use super::types::{
    ExposureOutput, NoOpReporter, PipelineStage, ProcessedDetection, ProgressReporter,
};

/// Detect, find peaks in, and deblend every source of one exposure.
pub fn process_exposure(
    grids: &[PixelGrid],
    contexts: &[BandContext],
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<ExposureOutput> {
    process_exposure_reported(grids, contexts, config, cancel, Arc::new(NoOpReporter))
}

/// [`process_exposure`] with a thread-safe progress reporter.
///
/// Detections are processed in parallel, each rayon worker reusing its own
/// [`ScratchArena`]. Cancellation during labeling returns
/// [`DeblendError::Cancelled`](crate::error::DeblendError::Cancelled);
/// after that, finished detections are kept and the rest are flagged
/// `INCOMPLETE`.
///
/// Panics if the band slices differ in length, are empty, or
/// `reference_band` is out of range.
pub fn process_exposure_reported(
    grids: &[PixelGrid],
    contexts: &[BandContext],
    config: &PipelineConfig,
    cancel: &CancelToken,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<ExposureOutput> {
    assert!(!grids.is_empty(), "at least one band is required");
    assert_eq!(
        grids.len(),
        contexts.len(),
        "one band context per raster is required"
    );
    assert!(
        config.reference_band < grids.len(),
        "reference band {} out of range for {} bands",
        config.reference_band,
        grids.len()
    );

    reporter.begin_stage(PipelineStage::Detecting, Some(1));
    let detections = find_detections(&grids[config.reference_band], None, &config.find, cancel)?;
    reporter.advance(1);
    reporter.finish_stage();
    info!(
        detections = detections.len(),
        bands = grids.len(),
        "Detections found"
    );

    let total = detections.len();
    reporter.begin_stage(PipelineStage::Deblending, Some(total));
    let counter = AtomicUsize::new(0);
    let run = |arena: &mut ScratchArena, detection: Detection| {
        let processed = process_detection(grids, contexts, detection, config, arena, cancel);
        let done = counter.fetch_add(1, Ordering::Relaxed) + 1;
        reporter.advance(done);
        processed
    };

    let processed: Vec<ProcessedDetection> = if total >= PARALLEL_DETECTION_THRESHOLD {
        detections
            .into_par_iter()
            .map_init(ScratchArena::new, run)
            .collect()
    } else {
        let mut arena = ScratchArena::new();
        detections
            .into_iter()
            .map(|d| run(&mut arena, d))
            .collect()
    };
    reporter.finish_stage();

    let incomplete = processed.iter().filter(|p| !p.is_complete()).count();
    let deblended = processed
        .iter()
        .filter(|p| p.detection.flags.contains(ObjectFlags::DEBLENDED))
        .count();
    info!(
        detections = total,
        deblended, incomplete, "Exposure processed"
    );
    Ok(ExposureOutput {
        detections: processed,
        incomplete,
    })
}

/// Find, cull and merge one detection's peaks, then deblend it.
///
/// Never fails: if `cancel` fires first the detection comes back flagged
/// `INCOMPLETE` with no outcome.
pub fn process_detection(
    grids: &[PixelGrid],
    contexts: &[BandContext],
    mut detection: Detection,
    config: &PipelineConfig,
    arena: &mut ScratchArena,
    cancel: &CancelToken,
) -> ProcessedDetection {
    match run_detection(grids, contexts, &mut detection, config, arena, cancel) {
        Ok(outcome) => ProcessedDetection {
            detection,
            outcome: Some(outcome),
        },
        Err(err) => {
            detection.flags |= ObjectFlags::INCOMPLETE;
            debug!(detection = detection.id, %err, "Detection left incomplete");
            ProcessedDetection {
                detection,
                outcome: None,
            }
        }
    }
}

fn run_detection(
    grids: &[PixelGrid],
    contexts: &[BandContext],
    detection: &mut Detection,
    config: &PipelineConfig,
    arena: &mut ScratchArena,
    cancel: &CancelToken,
) -> Result<DeblendOutcome> {
    cancel.check()?;

    let mut per_band = Vec::with_capacity(grids.len());
    for (band, (grid, ctx)) in grids.iter().zip(contexts).enumerate() {
        let noise = ctx.noise_model();
        let found = find_peaks(grid, detection.footprint(), &config.peaks, Some(&noise));
        if found.truncated {
            detection.flags |= ObjectFlags::TOO_MANY_PEAKS;
        }
        // Only the labeled band's contours describe this grid.
        let cull = if band == config.reference_band {
            cull_peaks
        } else {
            cull_band_peaks
        };
        let culled = cull(
            grid,
            detection,
            found.peaks,
            &config.peaks,
            Some(&noise),
            cancel,
        )?;
        per_band.push(culled.peaks);
    }

    detection.peaks = merge_band_peaks(&per_band, contexts);
    if detection.peaks.len() >= 2 {
        detection.flags |= ObjectFlags::BLENDED;
    }

    let outcome = deblend(
        grids,
        contexts,
        detection,
        &detection.peaks,
        &config.deblend,
        arena,
        cancel,
    )?;
    detection.flags |= outcome.family.flags;
    Ok(outcome)
}
