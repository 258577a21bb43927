use bitflags::bitflags;

bitflags! {
    /// Provenance and status bits carried by detections and deblended children.
    ///
    /// Every rejection or limit hit inside the core sets one of these, so
    /// downstream measurement can tell a clean single-source detection from a
    /// low-confidence blend.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ObjectFlags: u32 {
        /// Pixel count exceeded the configured cap; left unblended.
        const TOO_LARGE = 1 << 0;
        /// Footprint touches the edge of the supplied raster.
        const EDGE = 1 << 1;
        /// More peaks than the configured cap were found.
        const TOO_MANY_PEAKS = 1 << 2;
        /// Detection has two or more surviving peaks.
        const BLENDED = 1 << 3;
        /// Deblending ran and produced two or more children.
        const DEBLENDED = 1 << 4;
        /// Deblending ran but at most one child survived.
        const NOT_DEBLENDED = 1 << 5;
        /// A size or position precondition failed; deblending was not attempted.
        const UNCLEANABLE = 1 << 6;
        /// Processing was cancelled before this detection completed.
        const INCOMPLETE = 1 << 7;
        /// Child was deblended with an analytic point-source template.
        const PSF_DEBLENDED = 1 << 8;
        /// Child is a moving-object hypothesis.
        const MOVING = 1 << 9;
        /// Child template was clipped at the raster edge.
        const EDGE_TRIMMED = 1 << 10;
        /// A template was rejected as degenerate.
        const DEGENERATE_TEMPLATE = 1 << 11;
        /// Reassigned unassigned flux exceeded the configured fraction.
        const UNASSIGNED_FLUX_EXCEEDED = 1 << 12;
        /// Peaks from a rejected child were folded into this one.
        const PEAKS_TRANSFERRED = 1 << 13;
        /// Footprint intersects a cosmic-ray pixel.
        const COSMIC_RAY = 1 << 14;
        /// Footprint intersects a saturated pixel.
        const SATURATED = 1 << 15;
        /// Footprint intersects an interpolated pixel.
        const INTERPOLATED = 1 << 16;
        /// Node is a child produced by deblending.
        const CHILD = 1 << 17;
        /// A child was dropped because it would not have been detected alone.
        const UNDETECTABLE_CHILD = 1 << 18;
    }
}

bitflags! {
    /// Bits describing how a peak was found or altered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PeakFlags: u16 {
        /// Peak is a maximal plateau of equal-valued pixels.
        const PLATEAU = 1 << 0;
        /// Peak was force-inserted as the region's true maximum.
        const FORCED_MAXIMUM = 1 << 1;
        /// Peak belongs to a point-source child.
        const PSF = 1 << 2;
        /// Peak belongs to a moving-object child.
        const MOVING = 1 << 3;
        /// Peak was transferred from a rejected child.
        const TRANSFERRED = 1 << 4;
    }
}
