mod common;

use approx::{assert_abs_diff_eq, assert_relative_eq};
use deblend_core::deblend::{
    deblend, fit_motion, DeblendConfig, DeblendOutcome, DeblendStatus, FamilyNode, MotionPoint,
    ScratchArena, Uncleanable,
};
use deblend_core::detection::{find_detections, Detection};
use deblend_core::error::DeblendError;
use deblend_core::flags::{ObjectFlags, PeakFlags};
use deblend_core::grid::DefectBits;
use deblend_core::peaks::{merge_band_peaks, Peak};
use deblend_core::pipeline::process_exposure;
use deblend_core::{BandContext, CancelToken, PixelGrid};
use ndarray::Array2;

use common::*;

fn only_detection(grid: &PixelGrid, level: f32) -> Detection {
    let dets = find_detections(grid, None, &find_config(level), &CancelToken::unlimited()).unwrap();
    assert_eq!(dets.len(), 1);
    dets.into_iter().next().unwrap()
}

fn run(
    grids: &[PixelGrid],
    contexts: &[BandContext],
    detection: &Detection,
    peaks: &[Peak],
    config: &DeblendConfig,
) -> DeblendOutcome {
    let mut arena = ScratchArena::new();
    deblend(
        grids,
        contexts,
        detection,
        peaks,
        config,
        &mut arena,
        &CancelToken::unlimited(),
    )
    .unwrap()
}

fn nearest_child<'a>(outcome: &'a DeblendOutcome, row: f64, col: f64) -> &'a FamilyNode {
    outcome
        .children()
        .iter()
        .min_by(|a, b| {
            let da = (a.row_c - row).powi(2) + (a.col_c - col).powi(2);
            let db = (b.row_c - row).powi(2) + (b.col_c - col).powi(2);
            da.total_cmp(&db)
        })
        .unwrap()
}

/// Every footprint pixel's children plus residual equals the
/// background-subtracted parent.
fn assert_flux_conserved(outcome: &DeblendOutcome, grid: &PixelGrid, detection: &Detection) {
    for (r, c) in detection.footprint().pixels() {
        let parent = grid.value(r, c).unwrap() - BACKGROUND;
        let given: f32 = outcome
            .children()
            .iter()
            .map(|child| child.cutout(0).unwrap().value(r, c))
            .sum();
        let left = outcome
            .bbox
            .index(r, c)
            .map_or(0.0, |idx| outcome.residual[0][idx]);
        assert_abs_diff_eq!(given + left, parent, epsilon = 1e-2);
    }
}

/// Deblend settings with point-source fitting switched off.
fn extended_only() -> DeblendConfig {
    DeblendConfig {
        psf_min_likelihood: 2.0,
        ..deblend_config()
    }
}

fn two_blobs() -> Array2<f32> {
    let mut data = flat(64, 64, BACKGROUND);
    add_gaussian(&mut data, 32.0, 22.0, 1000.0, 3.07);
    add_gaussian(&mut data, 32.0, 42.0, 1000.0, 3.07);
    data
}

// ---------------------------------------------------------------------------
// Single sources
// ---------------------------------------------------------------------------

#[test]
fn test_isolated_source_not_deblended() {
    let mut data = flat(64, 64, BACKGROUND);
    add_gaussian_stamp(&mut data, 32, 32, 1000.0, 1.5, 4);
    let grids = vec![grid(data)];
    let contexts = vec![context(1.5)];
    let out = process_exposure(
        &grids,
        &contexts,
        &pipeline_config(150.0, 5.0),
        &CancelToken::unlimited(),
    )
    .unwrap();

    assert_eq!(out.detections.len(), 1);
    assert_eq!(out.incomplete, 0);
    let processed = &out.detections[0];
    assert_eq!(processed.detection.peaks.len(), 1);
    assert_eq!(
        (processed.detection.peaks[0].row, processed.detection.peaks[0].col),
        (32, 32)
    );
    assert!(!processed.detection.flags.contains(ObjectFlags::BLENDED));

    let outcome = processed.outcome.as_ref().unwrap();
    assert_eq!(outcome.status, DeblendStatus::NotDeblended);
    assert!(outcome.family.flags.contains(ObjectFlags::NOT_DEBLENDED));
    assert_eq!(outcome.children().len(), 1);
    let child = &outcome.children()[0];
    assert_relative_eq!(child.row_c, outcome.family.row_c);
    assert_relative_eq!(child.col_c, outcome.family.col_c);
    assert_abs_diff_eq!(child.cutout(0).unwrap().value(32, 32), 1000.0, epsilon = 1e-3);
    assert_flux_conserved(outcome, &grids[0], &processed.detection);
}

#[test]
fn test_shallow_dip_is_not_deblended() {
    let grids = vec![grid(ridge(995.0))];
    let contexts = vec![context(1.0)];
    let out = process_exposure(
        &grids,
        &contexts,
        &pipeline_config(150.0, 5.0),
        &CancelToken::unlimited(),
    )
    .unwrap();

    assert_eq!(out.detections.len(), 1);
    let processed = &out.detections[0];
    assert_eq!(processed.detection.peaks.len(), 1);
    let outcome = processed.outcome.as_ref().unwrap();
    assert_eq!(outcome.status, DeblendStatus::NotDeblended);
    assert_eq!(outcome.children().len(), 1);
    assert_flux_conserved(outcome, &grids[0], &processed.detection);
}

// ---------------------------------------------------------------------------
// Two resolved sources
// ---------------------------------------------------------------------------

#[test]
fn test_two_separated_blobs_deblend() {
    let grids = vec![grid(two_blobs())];
    let contexts = vec![context(1.0)];
    let out = process_exposure(
        &grids,
        &contexts,
        &pipeline_config(105.0, 5.0),
        &CancelToken::unlimited(),
    )
    .unwrap();

    assert_eq!(out.detections.len(), 1);
    let processed = &out.detections[0];
    assert_eq!(processed.detection.peaks.len(), 2);
    assert!(processed.detection.flags.contains(ObjectFlags::BLENDED));
    assert!(processed.detection.flags.contains(ObjectFlags::DEBLENDED));

    let outcome = processed.outcome.as_ref().unwrap();
    assert_eq!(outcome.status, DeblendStatus::Deblended);
    assert_eq!(outcome.children().len(), 2);

    for (own, other) in [((32, 22), (32, 42)), ((32, 42), (32, 22))] {
        let child = nearest_child(outcome, own.0 as f64, own.1 as f64);
        assert_abs_diff_eq!(child.row_c, own.0 as f64, epsilon = 1e-3);
        assert_abs_diff_eq!(child.col_c, own.1 as f64, epsilon = 1e-3);
        assert!(!child.flags.contains(ObjectFlags::PSF_DEBLENDED));
        assert_relative_eq!(child.weights[0], 1000.0, max_relative = 0.05);

        let cutout = child.cutout(0).unwrap();
        let parent = grids[0].value(own.0, own.1).unwrap() - BACKGROUND;
        assert!(cutout.value(own.0, own.1) > 0.99 * parent);
        assert!(cutout.value(other.0, other.1) < 0.01 * parent);
        assert_eq!(child.parent_id, Some(outcome.family.id));
        assert!(child.flags.contains(ObjectFlags::CHILD));
        assert!(!child.flags.contains(ObjectFlags::EDGE_TRIMMED));
    }

    let fluxes: Vec<f64> = outcome
        .children()
        .iter()
        .map(|c| c.cutout(0).unwrap().flux())
        .collect();
    assert_relative_eq!(fluxes[0], fluxes[1], max_relative = 0.05);
    assert_flux_conserved(outcome, &grids[0], &processed.detection);
}

#[test]
fn test_weights_never_negative() {
    let mut data = two_blobs();
    add_gaussian(&mut data, 36.0, 32.0, 300.0, 2.0);
    let grids = vec![grid(data)];
    let contexts = vec![context(1.0)];
    let out = process_exposure(
        &grids,
        &contexts,
        &pipeline_config(105.0, 5.0),
        &CancelToken::unlimited(),
    )
    .unwrap();
    for processed in &out.detections {
        let outcome = processed.outcome.as_ref().unwrap();
        for child in outcome.children() {
            assert!(child.weights.iter().all(|&w| w >= 0.0));
        }
        assert_flux_conserved(outcome, &grids[0], &processed.detection);
    }
}

#[test]
fn test_unassigned_flux_stays_in_residual_when_disabled() {
    let grid = grid(two_blobs());
    let det = only_detection(&grid, 105.0);
    let peaks = vec![
        Peak::new(32, 22, grid.value(32, 22).unwrap()),
        Peak::new(32, 42, grid.value(32, 42).unwrap()),
    ];
    let config = DeblendConfig {
        reassign_unassigned: false,
        ..deblend_config()
    };
    let outcome = run(&[grid.clone()], &[context(1.0)], &det, &peaks, &config);

    assert_eq!(outcome.status, DeblendStatus::Deblended);
    assert!(outcome.reassigned_flux.iter().all(|&f| f == 0.0));
    assert_flux_conserved(&outcome, &grid, &det);
}

#[test]
fn test_unassigned_flux_over_limit_is_flagged() {
    // A patch of flux with no peak of its own, out of reach of both templates.
    let mut data = two_blobs();
    add_gaussian(&mut data, 44.0, 32.0, 300.0, 2.5);
    let grid = grid(data);
    let det = only_detection(&grid, 101.0);
    let peaks = vec![
        Peak::new(32, 22, grid.value(32, 22).unwrap()),
        Peak::new(32, 42, grid.value(32, 42).unwrap()),
    ];

    let strict = DeblendConfig {
        max_unassigned_fraction: 0.0,
        ..extended_only()
    };
    let outcome = run(&[grid.clone()], &[context(1.0)], &det, &peaks, &strict);
    assert_eq!(outcome.status, DeblendStatus::Deblended);
    assert!(outcome.reassigned_flux[0] > 0.0);
    assert!(outcome
        .family
        .flags
        .contains(ObjectFlags::UNASSIGNED_FLUX_EXCEEDED));
    assert_flux_conserved(&outcome, &grid, &det);

    let lenient = DeblendConfig {
        max_unassigned_fraction: 1.0,
        ..extended_only()
    };
    let outcome = run(&[grid.clone()], &[context(1.0)], &det, &peaks, &lenient);
    assert!(!outcome
        .family
        .flags
        .contains(ObjectFlags::UNASSIGNED_FLUX_EXCEEDED));
}

#[test]
fn test_templates_clipped_at_raster_edge() {
    let mut data = flat(40, 64, BACKGROUND);
    add_gaussian(&mut data, 2.0, 22.0, 1000.0, 3.07);
    add_gaussian(&mut data, 2.0, 42.0, 1000.0, 3.07);
    let grid = grid(data);
    let det = only_detection(&grid, 105.0);
    assert!(det.flags.contains(ObjectFlags::EDGE));
    let peaks = vec![
        Peak::new(2, 22, grid.value(2, 22).unwrap()),
        Peak::new(2, 42, grid.value(2, 42).unwrap()),
    ];
    let outcome = run(&[grid.clone()], &[context(1.0)], &det, &peaks, &extended_only());

    assert_eq!(outcome.status, DeblendStatus::Deblended);
    assert_eq!(outcome.children().len(), 2);
    for child in outcome.children() {
        assert!(child.flags.contains(ObjectFlags::EDGE_TRIMMED));
    }
    assert_flux_conserved(&outcome, &grid, &det);
}

#[test]
fn test_defect_flags_reach_the_child_covering_them() {
    let mut defects = Array2::<u16>::zeros((64, 64));
    defects[[32, 22]] = DefectBits::COSMIC_RAY.bits();
    defects[[32, 42]] = DefectBits::SATURATED.bits();
    defects[[33, 42]] = DefectBits::INTERPOLATED.bits();
    let grid = grid(two_blobs()).with_defects(defects);
    let det = only_detection(&grid, 105.0);
    let peaks = vec![
        Peak::new(32, 22, grid.value(32, 22).unwrap()),
        Peak::new(32, 42, grid.value(32, 42).unwrap()),
    ];
    let outcome = run(&[grid.clone()], &[context(1.0)], &det, &peaks, &extended_only());

    assert_eq!(outcome.status, DeblendStatus::Deblended);
    let left = nearest_child(&outcome, 32.0, 22.0);
    assert!(left.flags.contains(ObjectFlags::COSMIC_RAY));
    assert!(!left.flags.contains(ObjectFlags::SATURATED));
    assert!(!left.flags.contains(ObjectFlags::INTERPOLATED));

    let right = nearest_child(&outcome, 32.0, 42.0);
    assert!(right.flags.contains(ObjectFlags::SATURATED));
    assert!(right.flags.contains(ObjectFlags::INTERPOLATED));
    assert!(!right.flags.contains(ObjectFlags::COSMIC_RAY));

    let all = ObjectFlags::COSMIC_RAY | ObjectFlags::SATURATED | ObjectFlags::INTERPOLATED;
    assert!(outcome.family.flags.contains(all));
}

// ---------------------------------------------------------------------------
// Rejected children
// ---------------------------------------------------------------------------

#[test]
fn test_child_without_template_is_dropped() {
    // (32, 13) lies on the faint rim of the left blob, too faint for a
    // template of its own.
    let grid = grid(two_blobs());
    let det = only_detection(&grid, 105.0);
    assert!(det.footprint().contains(32, 13));
    let peaks = vec![
        Peak::new(32, 22, grid.value(32, 22).unwrap()),
        Peak::new(32, 42, grid.value(32, 42).unwrap()),
        Peak::new(32, 13, grid.value(32, 13).unwrap()),
    ];
    let outcome = run(&[grid.clone()], &[context(1.0)], &det, &peaks, &extended_only());

    assert_eq!(outcome.status, DeblendStatus::Deblended);
    assert_eq!(outcome.children().len(), 2);
    assert!(outcome.family.flags.contains(ObjectFlags::DEGENERATE_TEMPLATE));
    // Nothing was transferred: the rim peak had no template to compare.
    assert!(outcome.children().iter().all(|c| c.peaks.len() == 1));
    assert_flux_conserved(&outcome, &grid, &det);
}

#[test]
fn test_eigenvalue_floor_drops_a_child() {
    let mut data = flat(64, 64, BACKGROUND);
    add_gaussian(&mut data, 32.0, 22.0, 1000.0, 3.07);
    add_gaussian(&mut data, 32.0, 42.0, 800.0, 3.07);
    let grid = grid(data);
    let det = only_detection(&grid, 105.0);
    let peaks = vec![
        Peak::new(32, 22, grid.value(32, 22).unwrap()),
        Peak::new(32, 42, grid.value(32, 42).unwrap()),
    ];
    // Every eigenvalue is under the floor, and similarity never trips first.
    let config = DeblendConfig {
        min_eigenvalue: 1e9,
        max_template_similarity: 1.0,
        ..extended_only()
    };
    let outcome = run(&[grid.clone()], &[context(1.0)], &det, &peaks, &config);

    assert_eq!(outcome.status, DeblendStatus::NotDeblended);
    assert!(outcome.family.flags.contains(ObjectFlags::DEGENERATE_TEMPLATE));
    assert_eq!(outcome.children().len(), 1);
    let survivor = &outcome.children()[0];
    assert_eq!(survivor.peaks.len(), 2);
    assert!(survivor.flags.contains(ObjectFlags::PEAKS_TRANSFERRED));
    assert_flux_conserved(&outcome, &grid, &det);
}

#[test]
fn test_child_below_detection_threshold_is_dropped() {
    // The faint source peaks at 40 DN, under the 50 DN detection threshold.
    let mut data = flat(64, 64, BACKGROUND);
    add_gaussian(&mut data, 32.0, 22.0, 1000.0, 3.07);
    add_gaussian(&mut data, 32.0, 36.0, 40.0, 3.07);
    let grid = grid(data);
    let det = only_detection(&grid, 101.0);
    let peaks = vec![
        Peak::new(32, 22, grid.value(32, 22).unwrap()),
        Peak::new(32, 36, grid.value(32, 36).unwrap()),
    ];
    let outcome = run(&[grid.clone()], &[context(1.0)], &det, &peaks, &extended_only());

    assert_eq!(outcome.status, DeblendStatus::NotDeblended);
    assert!(outcome.family.flags.contains(ObjectFlags::UNDETECTABLE_CHILD));
    assert_eq!(outcome.children().len(), 1);
    let survivor = &outcome.children()[0];
    assert_eq!((survivor.peaks[0].row, survivor.peaks[0].col), (32, 22));
    assert_flux_conserved(&outcome, &grid, &det);
}

// ---------------------------------------------------------------------------
// Rejection of duplicate templates
// ---------------------------------------------------------------------------

#[test]
fn test_adjacent_peaks_collapse_to_one_child() {
    let mut data = flat(41, 41, BACKGROUND);
    add_gaussian(&mut data, 20.0, 20.0, 1000.0, 3.0);
    let grid = grid(data);
    let det = only_detection(&grid, 130.0);
    let peaks = vec![
        Peak::new(20, 20, grid.value(20, 20).unwrap()),
        Peak::new(20, 21, grid.value(20, 21).unwrap()),
    ];
    let config = DeblendConfig {
        psf_min_likelihood: 2.0,
        ..deblend_config()
    };
    let outcome = run(&[grid.clone()], &[context(1.0)], &det, &peaks, &config);

    assert_eq!(outcome.status, DeblendStatus::NotDeblended);
    assert_eq!(outcome.children().len(), 1);
    let survivor = &outcome.children()[0];
    assert_eq!(survivor.peaks.len(), 2);
    assert_eq!((survivor.peaks[0].row, survivor.peaks[0].col), (20, 20));
    assert!(survivor.peaks[1].flags.contains(PeakFlags::TRANSFERRED));
    assert!(survivor.flags.contains(ObjectFlags::PEAKS_TRANSFERRED));
    assert_relative_eq!(outcome.family.row_c, survivor.row_c);
    assert_relative_eq!(outcome.family.col_c, survivor.col_c);

    // The survivor takes the whole parent.
    assert_abs_diff_eq!(outcome.unassigned_flux[0], 0.0, epsilon = 1e-6);
    assert_flux_conserved(&outcome, &grid, &det);
}

// ---------------------------------------------------------------------------
// Point sources
// ---------------------------------------------------------------------------

#[test]
fn test_star_next_to_galaxy_is_psf_deblended() {
    let mut data = flat(64, 64, BACKGROUND);
    add_gaussian(&mut data, 32.0, 20.0, 1000.0, 3.0);
    add_gaussian(&mut data, 32.0, 33.0, 500.0, 1.0);
    let grids = vec![grid(data)];
    let contexts = vec![context(1.0)];
    let out = process_exposure(
        &grids,
        &contexts,
        &pipeline_config(105.0, 5.0),
        &CancelToken::unlimited(),
    )
    .unwrap();

    assert_eq!(out.detections.len(), 1);
    let outcome = out.detections[0].outcome.as_ref().unwrap();
    assert_eq!(outcome.status, DeblendStatus::Deblended);
    assert_eq!(outcome.children().len(), 2);

    let star = nearest_child(outcome, 32.0, 33.0);
    let galaxy = nearest_child(outcome, 32.0, 20.0);
    assert!(star.flags.contains(ObjectFlags::PSF_DEBLENDED));
    assert!(star.peaks[0].flags.contains(PeakFlags::PSF));
    assert!(!galaxy.flags.contains(ObjectFlags::PSF_DEBLENDED));
    assert!(star.cutout(0).unwrap().value(32, 33) > 450.0);
    assert!(galaxy.cutout(0).unwrap().value(32, 20) > 950.0);
    assert_flux_conserved(outcome, &grids[0], &out.detections[0].detection);
}

// ---------------------------------------------------------------------------
// Moving objects
// ---------------------------------------------------------------------------

#[test]
fn test_moving_object_single_child_with_sibling() {
    let mut grids = Vec::new();
    let mut contexts = Vec::new();
    let mut sum = flat(40, 40, 0.0);
    for b in 0..3 {
        let mut data = flat(40, 40, BACKGROUND);
        add_gaussian(&mut data, 20.0, 14.0 + 3.0 * b as f64, 1000.0, 1.5);
        sum += &data;
        grids.push(grid(data));
        let mut ctx = context(1.5);
        ctx.epoch = b as f64;
        contexts.push(ctx);
    }
    let det = only_detection(&PixelGrid::new(sum), 350.0);
    let per_band: Vec<Vec<Peak>> = (0..3)
        .map(|b| vec![Peak::new(20, 14 + 3 * b, 1100.0)])
        .collect();
    let peaks = merge_band_peaks(&per_band, &contexts);
    assert_eq!(peaks.len(), 3);

    let outcome = run(&grids, &contexts, &det, &peaks, &deblend_config());

    assert_eq!(outcome.status, DeblendStatus::NotDeblended);
    assert_eq!(outcome.children().len(), 1);
    let mover = &outcome.children()[0];
    assert!(mover.flags.contains(ObjectFlags::MOVING));
    assert_eq!(mover.peaks.len(), 3);
    assert!(mover.peaks.iter().all(|p| p.flags.contains(PeakFlags::MOVING)));
    assert_abs_diff_eq!(mover.row_c, 20.0, epsilon = 1e-9);
    assert_abs_diff_eq!(mover.col_c, 17.0, epsilon = 1e-9);

    assert_eq!(outcome.family.siblings.len(), 1);
    let static_hypothesis = &outcome.family.siblings[0];
    assert_eq!(static_hypothesis.children.len(), 3);
    assert!(static_hypothesis
        .children
        .iter()
        .all(|c| !c.flags.contains(ObjectFlags::MOVING)));
    assert_eq!(outcome.family.iter().count(), 1 + 1 + 1 + 3);
}

#[test]
fn test_two_static_colours_are_not_a_moving_object() {
    // One source seen only in band 0, another only in band 1. Two positions
    // always fit a line, so they must stay two static children.
    let mut red = flat(40, 40, BACKGROUND);
    add_gaussian(&mut red, 20.0, 12.0, 1000.0, 3.07);
    let mut blue = flat(40, 40, BACKGROUND);
    add_gaussian(&mut blue, 20.0, 28.0, 1000.0, 3.07);
    let det = only_detection(&PixelGrid::new(&red + &blue), 2.0 * BACKGROUND + 5.0);

    let mut contexts = vec![context(1.0), context(1.0)];
    contexts[1].epoch = 1.0;
    let per_band = vec![
        vec![Peak::new(20, 12, 1100.0)],
        vec![Peak::new(20, 28, 1100.0)],
    ];
    let peaks = merge_band_peaks(&per_band, &contexts);
    assert_eq!(peaks.len(), 2);

    let config = DeblendConfig {
        moving_min_bands: 2,
        ..extended_only()
    };
    let grids = vec![grid(red), grid(blue)];
    let outcome = run(&grids, &contexts, &det, &peaks, &config);

    assert_eq!(outcome.status, DeblendStatus::Deblended);
    assert_eq!(outcome.children().len(), 2);
    assert!(outcome
        .children()
        .iter()
        .all(|c| !c.flags.contains(ObjectFlags::MOVING)));
    assert!(outcome.family.siblings.is_empty());
    let red_child = nearest_child(&outcome, 20.0, 12.0);
    assert_abs_diff_eq!(red_child.col_c, 12.0, epsilon = 1e-9);
    assert_flux_conserved(&outcome, &grids[0], &det);
}

#[test]
fn test_peephole_pair_merges_into_moving_child() {
    // Bands 0 and 1 share an epoch and see the source at column 12; band 2
    // sees it one epoch later at column 24.
    let mut grids = Vec::new();
    let mut contexts = Vec::new();
    let mut sum = flat(40, 48, 0.0);
    for (col, epoch) in [(12.0, 0.0), (12.0, 0.0), (24.0, 1.0)] {
        let mut data = flat(40, 48, BACKGROUND);
        add_gaussian(&mut data, 20.0, col, 1000.0, 3.07);
        sum += &data;
        grids.push(grid(data));
        let mut ctx = context(1.0);
        ctx.epoch = epoch;
        contexts.push(ctx);
    }
    let det = only_detection(&PixelGrid::new(sum), 3.0 * BACKGROUND + 5.0);
    let per_band = vec![
        vec![Peak::new(20, 12, 1100.0)],
        vec![Peak::new(20, 12, 1100.0)],
        vec![Peak::new(20, 24, 1100.0)],
    ];
    let peaks = merge_band_peaks(&per_band, &contexts);
    assert_eq!(peaks.len(), 2);
    assert_eq!(peaks[0].bands.len(), 2);

    let outcome = run(&grids, &contexts, &det, &peaks, &extended_only());

    assert_eq!(outcome.status, DeblendStatus::NotDeblended);
    assert_eq!(outcome.children().len(), 1);
    let mover = &outcome.children()[0];
    assert!(mover.flags.contains(ObjectFlags::MOVING));
    assert_eq!(mover.peaks.len(), 2);
    assert!(mover.peaks.iter().all(|p| p.flags.contains(PeakFlags::MOVING)));
    assert_abs_diff_eq!(mover.row_c, 20.0, epsilon = 1e-9);
    assert_abs_diff_eq!(mover.col_c, 16.0, epsilon = 1e-9);
    assert_abs_diff_eq!(mover.cutout(2).unwrap().value(20, 24), 1000.0, epsilon = 1e-2);

    // The two static children survive as one alternative hypothesis.
    assert_eq!(outcome.family.siblings.len(), 1);
    let pair = &outcome.family.siblings[0];
    assert_eq!(pair.children.len(), 2);
    assert!(pair
        .children
        .iter()
        .all(|c| !c.flags.contains(ObjectFlags::MOVING)));
}

#[test]
fn test_fit_motion_recovers_rate() {
    let points: Vec<MotionPoint> = (0..4)
        .map(|i| MotionPoint {
            epoch: i as f64,
            row: 5.0 + 0.5 * i as f64,
            col: 10.0 - 2.0 * i as f64,
            sigma: 0.3,
        })
        .collect();
    let fit = fit_motion(&points).unwrap();
    assert_abs_diff_eq!(fit.row_rate, 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(fit.col_rate, -2.0, epsilon = 1e-12);
    assert_abs_diff_eq!(fit.chi2, 0.0, epsilon = 1e-12);
    let (r, c) = fit.position(3.0);
    assert_abs_diff_eq!(r, 6.5, epsilon = 1e-12);
    assert_abs_diff_eq!(c, 4.0, epsilon = 1e-12);
}

// ---------------------------------------------------------------------------
// Preconditions and cancellation
// ---------------------------------------------------------------------------

#[test]
fn test_oversized_parent_is_uncleanable() {
    let grid = grid(two_blobs());
    let det = only_detection(&grid, 105.0);
    let peaks = vec![Peak::new(32, 22, 1100.0), Peak::new(32, 42, 1100.0)];
    let config = DeblendConfig {
        max_object_pixels: 10,
        ..deblend_config()
    };
    let outcome = run(&[grid], &[context(1.0)], &det, &peaks, &config);

    assert_eq!(outcome.status, DeblendStatus::Uncleanable(Uncleanable::TooLarge));
    assert!(outcome.family.flags.contains(ObjectFlags::TOO_LARGE));
    assert!(outcome.family.flags.contains(ObjectFlags::UNCLEANABLE));
    assert!(outcome.children().is_empty());
    assert!(outcome.residual.is_empty());
}

#[test]
fn test_parent_near_edge_is_uncleanable() {
    let mut data = flat(40, 40, BACKGROUND);
    add_gaussian(&mut data, 3.0, 20.0, 1000.0, 1.5);
    let grid = grid(data);
    let det = only_detection(&grid, 150.0);
    let peaks = vec![Peak::new(3, 20, 1100.0)];
    let config = DeblendConfig {
        edge_margin: 5,
        ..deblend_config()
    };
    let outcome = run(&[grid], &[context(1.5)], &det, &peaks, &config);
    assert_eq!(outcome.status, DeblendStatus::Uncleanable(Uncleanable::OffRaster));
    assert!(!outcome.family.flags.contains(ObjectFlags::TOO_LARGE));
}

#[test]
fn test_too_many_peaks_truncated() {
    let grid = grid(two_blobs());
    let det = only_detection(&grid, 105.0);
    let peaks = vec![
        Peak::new(32, 22, grid.value(32, 22).unwrap()),
        Peak::new(32, 42, grid.value(32, 42).unwrap()),
    ];
    let mut ctx = context(1.0);
    ctx.max_children = 1;
    let outcome = run(&[grid], &[ctx], &det, &peaks, &deblend_config());
    assert!(outcome.family.flags.contains(ObjectFlags::TOO_MANY_PEAKS));
    assert_eq!(outcome.status, DeblendStatus::NotDeblended);
    assert_eq!(outcome.children().len(), 1);
}

#[test]
fn test_cancelled_deblend_errors() {
    let grid = grid(two_blobs());
    let det = only_detection(&grid, 105.0);
    let peaks = vec![Peak::new(32, 22, 1100.0), Peak::new(32, 42, 1100.0)];
    let cancel = CancelToken::new(1);
    cancel.cancel();
    let mut arena = ScratchArena::new();
    let result = deblend(
        &[grid],
        &[context(1.0)],
        &det,
        &peaks,
        &deblend_config(),
        &mut arena,
        &cancel,
    );
    assert!(matches!(result, Err(DeblendError::Cancelled)));
}
