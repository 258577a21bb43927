use tracing::debug;

use crate::band::BandContext;

use super::{BandPeak, BandSet, Peak};

/// Merge per-band peak lists into one list of logical peaks.
///
/// Each band's peaks are shifted into the reference frame with that band's
/// offset. Working brightest-first (height above each band's background), a
/// peak joins the first merged peak within the band's minimum separation that
/// has not already taken a peak from the same band; otherwise it starts a new
/// one. The result is sorted brightest first.
pub fn merge_band_peaks(per_band: &[Vec<Peak>], contexts: &[BandContext]) -> Vec<Peak> {
    assert_eq!(
        per_band.len(),
        contexts.len(),
        "one peak list per band is required"
    );

    let mut candidates: Vec<(f32, usize, &Peak)> = per_band
        .iter()
        .enumerate()
        .flat_map(|(band, peaks)| {
            let bg = contexts[band].background;
            peaks.iter().map(move |p| (p.value - bg, band, p))
        })
        .collect();
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut merged: Vec<(f32, Peak)> = Vec::new();
    for (height, band, peak) in candidates {
        let ctx = &contexts[band];
        let (row_c, col_c) = ctx.to_reference(peak.row_c, peak.col_c);
        let sub = BandPeak {
            band,
            row: peak.row,
            col: peak.col,
            value: peak.value,
            row_c,
            col_c,
        };

        let tolerance = ctx.min_peak_separation as f64;
        let target = merged.iter_mut().find(|(_, m)| {
            !m.bands.contains(band)
                && ((m.row_c - row_c).powi(2) + (m.col_c - col_c).powi(2)).sqrt() <= tolerance
        });

        match target {
            Some((_, m)) => {
                m.bands.insert(band);
                m.flags |= peak.flags;
                m.merged.push(sub);
            }
            None => {
                let mut head = peak.clone();
                head.row_c = row_c;
                head.col_c = col_c;
                head.row = row_c.round() as i32;
                head.col = col_c.round() as i32;
                head.bands = BandSet::single(band);
                head.merged = vec![sub];
                merged.push((height, head));
            }
        }
    }

    debug!(
        bands = contexts.len(),
        merged = merged.len(),
        "Cross-band peaks merged"
    );
    merged.into_iter().map(|(_, p)| p).collect()
}
