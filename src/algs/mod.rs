//! Re-export public algorithms.

pub mod communicator;
pub mod identity;
pub mod reconcile;
pub mod verify;
pub mod wire;

pub use identity::{RebuildReport, renumber, structural_rebuild};
pub use verify::verify_identity;
