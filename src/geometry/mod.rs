//! Geometry used by identity passes: bounding boxes and the Hilbert-curve
//! spatial hash.

pub mod bbox;
pub mod hilbert;

pub use bbox::BoundingBox;
pub use hilbert::SpatialHashIndex;
