//! Moving-object hypotheses.
//!
//! A source that moves between band exposures shows up as one peak per band
//! at positions that lie on a line in `(epoch, row, col)`. Those peaks are
//! fitted with a constant-velocity track and, if the fit is good and fast
//! enough, treated as one child.

use tracing::debug;

use crate::band::BandContext;
use crate::flags::{ObjectFlags, PeakFlags};
use crate::peaks::{BandSet, Peak};

use super::blend::{Blend, Child, Hypothesis};
use super::config::DeblendConfig;

/// One band's position measurement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionPoint {
    pub epoch: f64,
    pub row: f64,
    pub col: f64,
    /// Position uncertainty in pixels.
    pub sigma: f64,
}

/// Weighted constant-velocity fit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionFit {
    /// Weighted mean epoch; positions below refer to it.
    pub epoch0: f64,
    pub row0: f64,
    pub col0: f64,
    pub row_rate: f64,
    pub col_rate: f64,
    pub chi2: f64,
    pub dof: usize,
}

impl MotionFit {
    pub fn position(&self, epoch: f64) -> (f64, f64) {
        let dt = epoch - self.epoch0;
        (self.row0 + self.row_rate * dt, self.col0 + self.col_rate * dt)
    }

    /// Pixels per epoch unit.
    pub fn speed(&self) -> f64 {
        self.row_rate.hypot(self.col_rate)
    }

    /// `chi2 / dof`; infinite when the fit has no degrees of freedom, since
    /// two positions always lie on a line.
    pub fn reduced_chi2(&self) -> f64 {
        if self.dof == 0 {
            f64::INFINITY
        } else {
            self.chi2 / self.dof as f64
        }
    }

    pub fn accepted(&self, nbands: usize, config: &DeblendConfig) -> bool {
        nbands >= config.moving_min_bands.max(2)
            && self.reduced_chi2() <= config.moving_max_chi2
            && self.speed() >= config.moving_min_speed
    }
}

/// Least-squares line through `points`. Returns `None` with fewer than two
/// points or when every point shares one epoch.
pub fn fit_motion(points: &[MotionPoint]) -> Option<MotionFit> {
    if points.len() < 2 {
        return None;
    }
    let weight = |p: &MotionPoint| 1.0 / (p.sigma * p.sigma).max(1e-12);

    let sw: f64 = points.iter().map(weight).sum();
    let epoch0 = points.iter().map(|p| weight(p) * p.epoch).sum::<f64>() / sw;
    let row0 = points.iter().map(|p| weight(p) * p.row).sum::<f64>() / sw;
    let col0 = points.iter().map(|p| weight(p) * p.col).sum::<f64>() / sw;

    let stt: f64 = points
        .iter()
        .map(|p| weight(p) * (p.epoch - epoch0).powi(2))
        .sum();
    if stt <= 1e-12 {
        return None;
    }
    let row_rate = points
        .iter()
        .map(|p| weight(p) * (p.epoch - epoch0) * p.row)
        .sum::<f64>()
        / stt;
    let col_rate = points
        .iter()
        .map(|p| weight(p) * (p.epoch - epoch0) * p.col)
        .sum::<f64>()
        / stt;

    let mut fit = MotionFit {
        epoch0,
        row0,
        col0,
        row_rate,
        col_rate,
        chi2: 0.0,
        dof: (2 * points.len()).saturating_sub(4),
    };
    fit.chi2 = points
        .iter()
        .map(|p| {
            let (r, c) = fit.position(p.epoch);
            weight(p) * ((p.row - r).powi(2) + (p.col - c).powi(2))
        })
        .sum();
    Some(fit)
}

/// Position measurements for the given peaks, one per band. `None` if two
/// measurements share a band.
fn motion_points(
    peaks: &[&Peak],
    contexts: &[BandContext],
    config: &DeblendConfig,
) -> Option<Vec<MotionPoint>> {
    let mut seen = BandSet::empty();
    let mut points = Vec::new();
    for peak in peaks {
        let sigma = peak
            .row_err
            .max(peak.col_err)
            .max(config.moving_position_error);
        for sub in &peak.merged {
            if seen.contains(sub.band) {
                return None;
            }
            seen.insert(sub.band);
            points.push(MotionPoint {
                epoch: contexts[sub.band].epoch,
                row: sub.row_c,
                col: sub.col_c,
                sigma,
            });
        }
    }
    Some(points)
}

/// Fit a track through the children if every one of them was seen in
/// exactly one band.
pub(crate) fn detect_moving(
    children: &[Child],
    contexts: &[BandContext],
    config: &DeblendConfig,
) -> Option<MotionFit> {
    if children.len() < 2 || children.iter().any(|c| c.bands.len() != 1) {
        return None;
    }
    let heads: Vec<&Peak> = children.iter().flat_map(|c| c.peaks.iter()).collect();
    let points = motion_points(&heads, contexts, config)?;
    let fit = fit_motion(&points)?;
    fit.accepted(points.len(), config).then_some(fit)
}

/// Collapse all children into one moving child following `fit`.
pub(crate) fn moving_child(
    children: Vec<Child>,
    fit: &MotionFit,
    contexts: &[BandContext],
) -> Option<Child> {
    let mut iter = children.into_iter();
    let mut head = iter.next()?;
    for other in iter {
        head.brightness += other.brightness;
        head.bands = head.bands.union(&other.bands);
        head.peaks.extend(other.peaks);
    }
    set_track(&mut head, fit, contexts);
    Some(head)
}

fn set_track(child: &mut Child, fit: &MotionFit, contexts: &[BandContext]) {
    for p in &mut child.peaks {
        p.flags |= PeakFlags::MOVING;
    }
    child.flags |= ObjectFlags::MOVING;
    (child.row_c, child.col_c) = fit.position(fit.epoch0);
    child.centers = contexts
        .iter()
        .map(|ctx| {
            let (r, c) = fit.position(ctx.epoch);
            ctx.to_band(r, c)
        })
        .collect();
}

/// Merge pairs of children seen in disjoint bands that together trace an
/// acceptable track. Returns the replaced pairs, which become sibling
/// hypotheses.
pub(crate) fn merge_peepholes(
    blend: &mut Blend,
    contexts: &[BandContext],
    config: &DeblendConfig,
) -> Vec<(Hypothesis, Hypothesis)> {
    let mut replaced = Vec::new();
    loop {
        let alive = blend.alive();
        let mut found = None;
        'search: for (a, &i) in alive.iter().enumerate() {
            for &j in &alive[a + 1..] {
                let (ci, cj) = (&blend.children[i], &blend.children[j]);
                if ci.is_psf() || cj.is_psf() || ci.is_moving() || cj.is_moving() {
                    continue;
                }
                if !ci.bands.is_disjoint(&cj.bands) {
                    continue;
                }
                let peaks: Vec<&Peak> = ci.peaks.iter().chain(cj.peaks.iter()).collect();
                let Some(points) = motion_points(&peaks, contexts, config) else {
                    continue;
                };
                if let Some(fit) = fit_motion(&points) {
                    if fit.accepted(points.len(), config) {
                        found = Some((i, j, fit));
                        break 'search;
                    }
                }
            }
        }
        let Some((i, j, fit)) = found else {
            break;
        };

        let (keep, drop) = if blend.children[j].brightness > blend.children[i].brightness {
            (j, i)
        } else {
            (i, j)
        };
        replaced.push((
            blend.children[keep].hypothesis(),
            blend.children[drop].hypothesis(),
        ));
        absorb(blend, keep, drop);
        set_track(&mut blend.children[keep], &fit, contexts);
        debug!(
            keep,
            drop,
            speed = fit.speed(),
            "Children merged into moving object"
        );
    }
    replaced
}

/// Fold `drop` into `keep`, taking `drop`'s template in the bands it was
/// seen in.
fn absorb(blend: &mut Blend, keep: usize, drop: usize) {
    let (lo, hi) = (keep.min(drop), keep.max(drop));
    let (left, right) = blend.children.split_at_mut(hi);
    let (k, d) = if keep < drop {
        (&mut left[lo], &mut right[0])
    } else {
        (&mut right[0], &mut left[lo])
    };

    for band in d.bands.iter() {
        if band < k.templates.len() && band < d.templates.len() {
            std::mem::swap(&mut k.templates[band], &mut d.templates[band]);
            std::mem::swap(&mut k.masks[band], &mut d.masks[band]);
            k.weights[band] = d.weights[band];
        }
    }
    k.peaks.append(&mut d.peaks);
    k.bands = k.bands.union(&d.bands);
    k.brightness += d.brightness;
    d.alive = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn point(epoch: f64, row: f64, col: f64) -> MotionPoint {
        MotionPoint {
            epoch,
            row,
            col,
            sigma: 0.5,
        }
    }

    #[test]
    fn test_straight_track() {
        let fit = fit_motion(&[
            point(0.0, 10.0, 10.0),
            point(1.0, 12.0, 11.0),
            point(2.0, 14.0, 12.0),
        ])
        .unwrap();
        assert_relative_eq!(fit.row_rate, 2.0, epsilon = 1e-9);
        assert_relative_eq!(fit.col_rate, 1.0, epsilon = 1e-9);
        assert_relative_eq!(fit.chi2, 0.0, epsilon = 1e-9);
        let (r, c) = fit.position(3.0);
        assert_relative_eq!(r, 16.0, epsilon = 1e-9);
        assert_relative_eq!(c, 13.0, epsilon = 1e-9);
    }

    #[test]
    fn test_single_epoch_has_no_track() {
        assert!(fit_motion(&[point(1.0, 0.0, 0.0), point(1.0, 3.0, 3.0)]).is_none());
        assert!(fit_motion(&[point(1.0, 0.0, 0.0)]).is_none());
    }

    #[test]
    fn test_two_points_cannot_be_judged() {
        let fit = fit_motion(&[point(0.0, 10.0, 10.0), point(1.0, 10.0, 26.0)]).unwrap();
        assert_eq!(fit.dof, 0);
        assert!(fit.reduced_chi2().is_infinite());
    }

    #[test]
    fn test_scattered_points_fit_badly() {
        let fit = fit_motion(&[
            point(0.0, 10.0, 10.0),
            point(1.0, 20.0, 10.0),
            point(2.0, 10.0, 10.0),
            point(3.0, 20.0, 10.0),
        ])
        .unwrap();
        assert!(fit.reduced_chi2() > 10.0);
    }
}
