use bitflags::bitflags;
use ndarray::Array2;

bitflags! {
    /// Per-pixel defect / classification bits carried alongside a band's data.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DefectBits: u16 {
        /// Pixel value was interpolated over a defect.
        const INTERPOLATED = 1 << 0;
        /// Pixel is saturated.
        const SATURATED = 1 << 1;
        /// Pixel was repaired as part of a cosmic ray.
        const COSMIC_RAY = 1 << 2;
        /// Pixel lies in a region the detector should not search.
        const NOT_CHECKED = 1 << 3;
        /// Pixel is within the unusable border of the exposure.
        const EDGE = 1 << 4;
    }
}

/// A single band's calibrated pixel raster.
///
/// `row0`/`col0` give the absolute coordinate of element `[0, 0]`, so that
/// sub-rasters keep the coordinates of the exposure they were cut from.
#[derive(Clone, Debug)]
pub struct PixelGrid {
    /// Pixel data, row-major, shape = (height, width)
    pub data: Array2<f32>,
    /// Defect bits, same shape as `data`
    pub defects: Array2<u16>,
    pub row0: i32,
    pub col0: i32,
}

impl PixelGrid {
    pub fn new(data: Array2<f32>) -> Self {
        let defects = Array2::zeros(data.dim());
        Self {
            data,
            defects,
            row0: 0,
            col0: 0,
        }
    }

    pub fn with_origin(mut self, row0: i32, col0: i32) -> Self {
        self.row0 = row0;
        self.col0 = col0;
        self
    }

    pub fn with_defects(mut self, defects: Array2<u16>) -> Self {
        assert_eq!(
            defects.dim(),
            self.data.dim(),
            "defect mask shape must match pixel data"
        );
        self.defects = defects;
        self
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// Last absolute row (inclusive).
    pub fn row1(&self) -> i32 {
        self.row0 + self.height() as i32 - 1
    }

    /// Last absolute column (inclusive).
    pub fn col1(&self) -> i32 {
        self.col0 + self.width() as i32 - 1
    }

    pub fn in_bounds(&self, row: i32, col: i32) -> bool {
        row >= self.row0 && row <= self.row1() && col >= self.col0 && col <= self.col1()
    }

    fn index(&self, row: i32, col: i32) -> Option<[usize; 2]> {
        if self.in_bounds(row, col) {
            Some([(row - self.row0) as usize, (col - self.col0) as usize])
        } else {
            None
        }
    }

    /// Pixel value at an absolute coordinate.
    pub fn value(&self, row: i32, col: i32) -> Option<f32> {
        self.index(row, col).map(|idx| self.data[idx])
    }

    /// Defect bits at an absolute coordinate; out-of-bounds pixels read as `EDGE`.
    pub fn defect(&self, row: i32, col: i32) -> DefectBits {
        match self.index(row, col) {
            Some(idx) => DefectBits::from_bits_truncate(self.defects[idx]),
            None => DefectBits::EDGE,
        }
    }

    /// Distance in pixels from `(row, col)` to the nearest raster edge.
    /// Negative when the pixel lies outside.
    pub fn edge_distance(&self, row: i32, col: i32) -> i32 {
        (row - self.row0)
            .min(self.row1() - row)
            .min(col - self.col0)
            .min(self.col1() - col)
    }

    /// Shape and origin agree with `other`.
    pub fn is_aligned_with(&self, other: &PixelGrid) -> bool {
        self.data.dim() == other.data.dim() && self.row0 == other.row0 && self.col0 == other.col0
    }
}
