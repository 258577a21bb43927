use ndarray::Array2;

use crate::band::BandContext;
use crate::flags::ObjectFlags;
use crate::grid::PixelGrid;
use crate::mask::{BBox, RunLengthMask};
use crate::peaks::{BandSet, Peak};

use super::scratch::ScratchArena;

/// Working state of one child hypothesis while a parent is deblended.
#[derive(Clone, Debug)]
pub(crate) struct Child {
    /// `peaks[0]` is the peak the child was seeded from.
    pub peaks: Vec<Peak>,
    /// Centre in the reference frame.
    pub row_c: f64,
    pub col_c: f64,
    /// Centre in each band's own frame.
    pub centers: Vec<(f64, f64)>,
    /// Bands the child's peaks were seen in.
    pub bands: BandSet,
    /// Summed peak height above background; orders children by brightness.
    pub brightness: f64,
    pub flags: ObjectFlags,
    /// Fitted point-source amplitude per band; empty unless a PSF child.
    pub psf_amplitude: Vec<f64>,
    pub templates: Vec<Array2<f32>>,
    pub masks: Vec<RunLengthMask>,
    pub weights: Vec<f64>,
    pub alive: bool,
}

impl Child {
    pub fn from_peak(peak: Peak, contexts: &[BandContext]) -> Self {
        let nbands = contexts.len();
        let centers = contexts
            .iter()
            .enumerate()
            .map(|(b, ctx)| match peak.in_band(b) {
                Some(sub) => ctx.to_band(sub.row_c, sub.col_c),
                None => ctx.to_band(peak.row_c, peak.col_c),
            })
            .collect();

        // Peaks that never went through cross-band merging count as seen in
        // every band.
        let (bands, brightness) = if peak.merged.is_empty() {
            let mut all = BandSet::empty();
            (0..nbands).for_each(|b| all.insert(b));
            let bg = contexts.iter().map(|c| c.background as f64).sum::<f64>() / nbands as f64;
            (all, (peak.value as f64 - bg).max(0.0))
        } else {
            let height = peak
                .merged
                .iter()
                .map(|s| (s.value - contexts[s.band].background).max(0.0) as f64)
                .sum();
            (peak.bands, height)
        };

        Self {
            row_c: peak.row_c,
            col_c: peak.col_c,
            peaks: vec![peak],
            centers,
            bands,
            brightness,
            flags: ObjectFlags::CHILD,
            psf_amplitude: Vec::new(),
            templates: Vec::new(),
            masks: Vec::new(),
            weights: vec![0.0; nbands],
            alive: true,
        }
    }

    pub fn is_psf(&self) -> bool {
        self.flags.contains(ObjectFlags::PSF_DEBLENDED)
    }

    pub fn is_moving(&self) -> bool {
        self.flags.contains(ObjectFlags::MOVING)
    }

    /// Template-free snapshot kept when the child is replaced by another
    /// hypothesis.
    pub fn hypothesis(&self) -> Hypothesis {
        Hypothesis {
            peaks: self.peaks.clone(),
            row_c: self.row_c,
            col_c: self.col_c,
            flags: self.flags,
            weights: self.weights.clone(),
        }
    }
}

/// A child as it stood before another hypothesis replaced it.
#[derive(Clone, Debug)]
pub(crate) struct Hypothesis {
    pub peaks: Vec<Peak>,
    pub row_c: f64,
    pub col_c: f64,
    pub flags: ObjectFlags,
    pub weights: Vec<f64>,
}

/// Private copy of one parent's pixels plus its children.
pub(crate) struct Blend {
    pub bbox: BBox,
    pub footprint: RunLengthMask,
    pub inside: Array2<bool>,
    /// Background-subtracted parent flux per band, zero off the footprint.
    pub parent: Vec<Array2<f32>>,
    /// Parent flux with fitted point sources removed.
    pub work: Vec<Array2<f32>>,
    pub children: Vec<Child>,
}

impl Blend {
    pub fn new(
        grids: &[PixelGrid],
        contexts: &[BandContext],
        footprint: &RunLengthMask,
        bbox: BBox,
        peaks: Vec<Peak>,
        arena: &mut ScratchArena,
    ) -> Self {
        let shape = (bbox.height(), bbox.width());
        let inside = footprint.to_array(&bbox);
        let mut parent = Vec::with_capacity(grids.len());
        let mut work = Vec::with_capacity(grids.len());
        for (grid, ctx) in grids.iter().zip(contexts) {
            let mut data = arena.take(shape);
            for (r, c) in footprint.pixels() {
                if let (Some(idx), Some(v)) = (bbox.index(r, c), grid.value(r, c)) {
                    data[idx] = v - ctx.background;
                }
            }
            let mut copy = arena.take(shape);
            copy.assign(&data);
            parent.push(data);
            work.push(copy);
        }
        let children = peaks
            .into_iter()
            .map(|p| Child::from_peak(p, contexts))
            .collect();
        Self {
            bbox,
            footprint: footprint.clone(),
            inside,
            parent,
            work,
            children,
        }
    }

    pub fn nbands(&self) -> usize {
        self.parent.len()
    }

    pub fn alive(&self) -> Vec<usize> {
        (0..self.children.len())
            .filter(|&i| self.children[i].alive)
            .collect()
    }

    /// Local `[row, col]` index of every footprint pixel.
    pub fn pixel_indices(&self) -> impl Iterator<Item = [usize; 2]> + '_ {
        self.footprint
            .pixels()
            .filter_map(|(r, c)| self.bbox.index(r, c))
    }

    /// Move `from`'s peaks onto `to`.
    pub fn transfer_peaks(&mut self, from: usize, to: usize) {
        use crate::flags::PeakFlags;

        let mut moved = std::mem::take(&mut self.children[from].peaks);
        for p in &mut moved {
            p.flags |= PeakFlags::TRANSFERRED;
        }
        let bands = self.children[from].bands;
        let target = &mut self.children[to];
        target.peaks.extend(moved);
        target.bands = target.bands.union(&bands);
        target.flags |= ObjectFlags::PEAKS_TRANSFERRED;
    }

    /// Hand every buffer back to the arena.
    pub fn release(self, arena: &mut ScratchArena) {
        arena.give_all(self.parent);
        arena.give_all(self.work);
        for child in self.children {
            arena.give_all(child.templates);
        }
    }
}
