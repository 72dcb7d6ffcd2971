//! Entity kinds of a distributed mesh.
//!
//! Nodes (DOFs) and elements are plain integer slots in per-rank arrays; the
//! enums here name which array a slot belongs to and which shape an element
//! row has.

pub mod cell_type;

pub use cell_type::ElementKind;

/// Which entity array a slot refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub enum EntityKind {
    /// A node / degree of freedom.
    Node,
    /// A mesh element.
    Element,
}
