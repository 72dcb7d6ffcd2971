//! Ghost lookup and halo exchange.
//!
//! [`ghost::GhostSynchronizer`] owns the per-kind global → local lookup and
//! caches the [`halo::HaloSchedule`] produced by a [`halo::FieldSync`]
//! collaborator.

pub mod ghost;
pub mod halo;

pub use ghost::GhostSynchronizer;
pub use halo::{CommFieldSync, FieldSync, HaloSchedule};
