//! Parent / child / sibling hierarchy produced by deblending.
//!
//! Ownership is strictly top-down: a parent owns its children and its
//! sibling hypotheses. Children refer back to their parent by id only.

use ndarray::Array2;

use crate::flags::ObjectFlags;
use crate::mask::{BBox, RunLengthMask};
use crate::peaks::Peak;

/// One child's pixels in one band.
#[derive(Clone, Debug)]
pub struct Cutout {
    pub band: usize,
    /// Window covered by `data`; the parent footprint's bounding box.
    pub bbox: BBox,
    /// Background-subtracted flux allotted to this child.
    pub data: Array2<f32>,
    /// Pixels where the child holds flux or template support.
    pub mask: RunLengthMask,
}

impl Cutout {
    pub fn value(&self, row: i32, col: i32) -> f32 {
        self.bbox.index(row, col).map_or(0.0, |idx| self.data[idx])
    }

    pub fn flux(&self) -> f64 {
        self.data.iter().map(|&v| v as f64).sum()
    }
}

#[derive(Clone, Debug)]
pub struct FamilyNode {
    /// Family-local id; the parent is 0.
    pub id: usize,
    /// Id of the detection this family came from.
    pub detection: usize,
    /// Back-reference to the owning node's `id`.
    pub parent_id: Option<usize>,
    pub row_c: f64,
    pub col_c: f64,
    pub peaks: Vec<Peak>,
    pub flags: ObjectFlags,
    /// Solved template weight per band; empty for parents.
    pub weights: Vec<f64>,
    /// Local background estimate per band; empty for parents.
    pub background: Vec<f32>,
    pub cutouts: Vec<Cutout>,
    pub children: Vec<FamilyNode>,
    /// Alternate decompositions of this node; each holds its own children.
    pub siblings: Vec<FamilyNode>,
}

impl FamilyNode {
    pub fn new(id: usize, detection: usize, row_c: f64, col_c: f64) -> Self {
        Self {
            id,
            detection,
            parent_id: None,
            row_c,
            col_c,
            peaks: Vec::new(),
            flags: ObjectFlags::empty(),
            weights: Vec::new(),
            background: Vec::new(),
            cutouts: Vec::new(),
            children: Vec::new(),
            siblings: Vec::new(),
        }
    }

    /// Cutout for `band`, if populated.
    pub fn cutout(&self, band: usize) -> Option<&Cutout> {
        self.cutouts.iter().find(|c| c.band == band)
    }

    /// Depth-first traversal over this node, its children and its siblings.
    pub fn iter(&self) -> FamilyIter<'_> {
        FamilyIter {
            stack: vec![(0, self)],
        }
    }

    /// Total number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty() && self.siblings.is_empty()
    }
}

/// Re-entrant depth-first iterator yielding `(depth, node)`. Children are
/// visited before sibling hypotheses.
pub struct FamilyIter<'a> {
    stack: Vec<(usize, &'a FamilyNode)>,
}

impl<'a> Iterator for FamilyIter<'a> {
    type Item = (usize, &'a FamilyNode);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, node) = self.stack.pop()?;
        for s in node.siblings.iter().rev() {
            self.stack.push((depth + 1, s));
        }
        for c in node.children.iter().rev() {
            self.stack.push((depth + 1, c));
        }
        Some((depth, node))
    }
}
