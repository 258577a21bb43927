//! Run-length pixel masks.
//!
//! A [`RunLengthMask`] stores a pixel set as horizontal [`Span`]s. In canonical
//! form spans are sorted by `(row, col0)` and no two spans in the same row
//! overlap or touch. The bounding box and pixel count are caches recomputed
//! whenever the span list changes.

pub mod algebra;

use std::borrow::Cow;

use ndarray::Array2;

pub use algebra::{canonicalize, dilate, intersect, subtract, union};

/// A horizontal run of pixels in one row; columns are inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    pub row: i32,
    pub col0: i32,
    pub col1: i32,
}

impl Span {
    pub fn new(row: i32, col0: i32, col1: i32) -> Self {
        debug_assert!(col0 <= col1, "span ({row}, {col0}, {col1}) is inverted");
        Self { row, col0, col1 }
    }

    pub fn len(&self) -> usize {
        (self.col1 - self.col0 + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.col1 < self.col0
    }

    pub fn contains_col(&self, col: i32) -> bool {
        col >= self.col0 && col <= self.col1
    }

    /// True if the spans are in the same row and overlap or touch.
    pub fn touches(&self, other: &Span) -> bool {
        self.row == other.row && self.col0 <= other.col1 + 1 && other.col0 <= self.col1 + 1
    }

    /// True if `other` lies in an adjacent row and shares a column or a corner.
    pub fn connects_8(&self, other: &Span) -> bool {
        (self.row - other.row).abs() == 1
            && self.col0 <= other.col1 + 1
            && other.col0 <= self.col1 + 1
    }
}

/// Inclusive pixel bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BBox {
    pub row0: i32,
    pub row1: i32,
    pub col0: i32,
    pub col1: i32,
}

impl BBox {
    pub fn height(&self) -> usize {
        (self.row1 - self.row0 + 1) as usize
    }

    pub fn width(&self) -> usize {
        (self.col1 - self.col0 + 1) as usize
    }

    pub fn contains(&self, row: i32, col: i32) -> bool {
        row >= self.row0 && row <= self.row1 && col >= self.col0 && col <= self.col1
    }

    pub fn grow(&self, n: i32) -> BBox {
        BBox {
            row0: self.row0 - n,
            row1: self.row1 + n,
            col0: self.col0 - n,
            col1: self.col1 + n,
        }
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            row0: self.row0.min(other.row0),
            row1: self.row1.max(other.row1),
            col0: self.col0.min(other.col0),
            col1: self.col1.max(other.col1),
        }
    }

    /// Array index of an absolute coordinate inside the box.
    pub fn index(&self, row: i32, col: i32) -> Option<[usize; 2]> {
        if self.contains(row, col) {
            Some([(row - self.row0) as usize, (col - self.col0) as usize])
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunLengthMask {
    spans: Vec<Span>,
    bbox: Option<BBox>,
    npix: usize,
}

impl RunLengthMask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mask from arbitrary spans. Spans are sorted but not merged;
    /// call [`canonicalize`] to merge overlapping or touching runs.
    pub fn from_spans(mut spans: Vec<Span>) -> Self {
        spans.sort_unstable();
        let mut mask = Self {
            spans,
            bbox: None,
            npix: 0,
        };
        mask.refresh();
        mask
    }

    /// Canonical mask of every pixel in `bbox` for which `pred(row, col)` holds.
    pub fn from_fn<F>(bbox: BBox, mut pred: F) -> Self
    where
        F: FnMut(i32, i32) -> bool,
    {
        let mut spans = Vec::new();
        for row in bbox.row0..=bbox.row1 {
            let mut start: Option<i32> = None;
            for col in bbox.col0..=bbox.col1 {
                match (pred(row, col), start) {
                    (true, None) => start = Some(col),
                    (false, Some(s)) => {
                        spans.push(Span::new(row, s, col - 1));
                        start = None;
                    }
                    _ => {}
                }
            }
            if let Some(s) = start {
                spans.push(Span::new(row, s, bbox.col1));
            }
        }
        Self::from_canonical(spans)
    }

    /// Wrap spans already known to be canonical.
    pub(crate) fn from_canonical(spans: Vec<Span>) -> Self {
        let mut mask = Self {
            spans,
            bbox: None,
            npix: 0,
        };
        mask.refresh();
        debug_assert!(mask.is_canonical());
        mask
    }

    fn refresh(&mut self) {
        self.npix = self.spans.iter().map(Span::len).sum();
        self.bbox = self.spans.iter().fold(None, |acc, s| {
            let b = BBox {
                row0: s.row,
                row1: s.row,
                col0: s.col0,
                col1: s.col1,
            };
            Some(match acc {
                Some(a) => a.union(&b),
                None => b,
            })
        });
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Pixel count; exact once the mask is canonical.
    pub fn npix(&self) -> usize {
        self.npix
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn bounding_box(&self) -> Option<BBox> {
        self.bbox
    }

    pub fn is_canonical(&self) -> bool {
        self.spans
            .windows(2)
            .all(|w| w[0].row < w[1].row || (w[0].row == w[1].row && w[0].col1 + 1 < w[1].col0))
    }

    /// Spans in canonical order, borrowing when no work is needed.
    pub(crate) fn canonical_spans(&self) -> Cow<'_, [Span]> {
        if self.is_canonical() {
            Cow::Borrowed(&self.spans)
        } else {
            Cow::Owned(canonicalize(self).spans)
        }
    }

    /// Index range of the spans lying in `row`.
    fn row_range(&self, row: i32) -> std::ops::Range<usize> {
        let lo = self.spans.partition_point(|s| s.row < row);
        let hi = lo + self.spans[lo..].partition_point(|s| s.row == row);
        lo..hi
    }

    /// Spans lying in `row`.
    pub fn row_spans(&self, row: i32) -> &[Span] {
        &self.spans[self.row_range(row)]
    }

    pub fn contains(&self, row: i32, col: i32) -> bool {
        match self.bbox {
            Some(b) if b.contains(row, col) => {
                self.row_spans(row).iter().any(|s| s.contains_col(col))
            }
            _ => false,
        }
    }

    /// The 8-connected piece of the mask holding `(row, col)`, or `None` if
    /// that pixel is not in the mask.
    pub fn component_at(&self, row: i32, col: i32) -> Option<RunLengthMask> {
        let spans: &[Span] = &self.canonical_spans();
        let in_row = |r: i32| {
            let lo = spans.partition_point(|s| s.row < r);
            lo..lo + spans[lo..].partition_point(|s| s.row == r)
        };
        let seed = in_row(row).find(|&i| spans[i].contains_col(col))?;

        let mut seen = vec![false; spans.len()];
        seen[seed] = true;
        let mut stack = vec![seed];
        let mut piece = Vec::new();
        while let Some(i) = stack.pop() {
            let s = spans[i];
            piece.push(s);
            for r in [s.row - 1, s.row + 1] {
                for j in in_row(r) {
                    if !seen[j] && s.connects_8(&spans[j]) {
                        seen[j] = true;
                        stack.push(j);
                    }
                }
            }
        }
        piece.sort_unstable();
        Some(Self::from_canonical(piece))
    }

    /// Iterate every `(row, col)` covered by the mask, in span order.
    pub fn pixels(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.spans
            .iter()
            .flat_map(|s| (s.col0..=s.col1).map(move |col| (s.row, col)))
    }

    /// Rasterize into a boolean window covering `bbox`; pixels outside the
    /// window are dropped.
    pub fn to_array(&self, bbox: &BBox) -> Array2<bool> {
        let mut out = Array2::from_elem((bbox.height(), bbox.width()), false);
        for s in &self.spans {
            if s.row < bbox.row0 || s.row > bbox.row1 {
                continue;
            }
            let c0 = s.col0.max(bbox.col0);
            let c1 = s.col1.min(bbox.col1);
            for col in c0..=c1 {
                out[[(s.row - bbox.row0) as usize, (col - bbox.col0) as usize]] = true;
            }
        }
        out
    }
}
