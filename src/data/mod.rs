//! Data module: per-rank entity stores and the global → local lookup.

pub mod dof_store;
pub mod element_store;
pub mod global_map;

pub use dof_store::{DofStore, GlobalIndex, UNSET_INDEX};
pub use element_store::{ElementStore, IndexSpace};
pub use global_map::GlobalToLocalMap;
