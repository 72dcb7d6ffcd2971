//! # mesh-identity
//!
//! Distributed identity for unstructured meshes. Each rank holds a fragment
//! of the mesh plus ghost copies of entities shared with its neighbours; this
//! crate gives every node and element a process-wide unique global index and
//! a single owner rank, without a central coordinator, and keeps both correct
//! while the topology is mutated.
//!
//! ## Pipeline
//! - [`geometry`]: the global bounding box and a Hilbert-curve spatial hash,
//!   so identical coordinates hash identically on every rank.
//! - [`algs::identity`]: structural rebuild (deduplicate, resolve owners,
//!   number owned entities, fill ghosts) and the combined node + element
//!   renumbering.
//! - [`overlap`]: global → local lookups and cached halo schedules.
//! - [`adapt`]: buffered add/remove/migrate sessions that end in a renumber.
//!
//! All collective work goes through [`algs::communicator::Communicator`];
//! every rank must call the collective entry points in the same order.
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! mesh-identity = "0.3"
//! # features = ["mpi-support"]
//! ```
//!
//! ```
//! use mesh_identity::prelude::*;
//!
//! let mut mesh = DistributedMesh::new(0, 2, 0, IdentityConfig::default())?;
//! let a = mesh.add_node(&[0.0, 0.0])?;
//! let b = mesh.add_node(&[1.0, 0.0])?;
//! let c = mesh.add_node(&[0.0, 1.0])?;
//! mesh.add_element(ElementKind::Triangle3, &[a, b, c])?;
//! let report = mesh.renumber(&NoComm)?;
//! assert_eq!(report.global_nodes, 3);
//! assert_eq!(mesh.elements().glb_idx(0), 3);
//! # Ok::<(), MeshIdentityError>(())
//! ```

pub mod adapt;
pub mod algs;
pub mod config;
pub mod data;
pub mod debug_invariants;
pub mod geometry;
pub mod mesh;
pub mod mesh_error;
pub mod overlap;
pub mod topology;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::adapt::{
        AdaptorState, ChangeSet, ElementRecord, MeshAdaptor, NodeRecord, NodeRef,
    };
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, NoComm, ThreadComm};
    pub use crate::algs::identity::RebuildReport;
    pub use crate::config::{IdentityConfig, LookupStrategy, NumberingMode};
    pub use crate::data::{DofStore, ElementStore, GlobalIndex, IndexSpace, UNSET_INDEX};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::mesh::DistributedMesh;
    pub use crate::mesh_error::{ErrorKind, MeshIdentityError};
    pub use crate::overlap::{CommFieldSync, FieldSync, HaloSchedule};
    pub use crate::topology::{ElementKind, EntityKind};
}
