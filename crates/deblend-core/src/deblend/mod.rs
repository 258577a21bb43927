//! Template-based splitting of blended parents into children.
//!
//! [`deblend`] runs the whole sequence for one parent: moving-object check,
//! point-source pre-subtraction, symmetric templates, weight solve with
//! degeneracy rejection, moving-object peephole merge, flux redistribution
//! and per-child bookkeeping.

pub(crate) mod blend;
pub mod bookkeeping;
pub mod config;
pub mod engine;
pub mod family;
pub mod moving;
pub mod point_source;
pub(crate) mod redistribute;
pub mod scratch;
pub mod solve;
pub mod template;

pub use config::DeblendConfig;
pub use engine::{deblend, DeblendOutcome, DeblendStatus, Uncleanable};
pub use family::{Cutout, FamilyIter, FamilyNode};
pub use moving::{fit_motion, MotionFit, MotionPoint};
pub use point_source::{fit_point_source, PointSourceFit};
pub use scratch::ScratchArena;
pub use solve::Rejection;
