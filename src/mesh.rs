//! The per-rank fragment of a distributed mesh.

use log::debug;

use crate::adapt::MeshAdaptor;
use crate::algs::communicator::Communicator;
use crate::algs::identity::{self, RebuildReport};
use crate::algs::verify::verify_identity;
use crate::config::IdentityConfig;
use crate::data::dof_store::{DofStore, GlobalIndex, UNSET_INDEX};
use crate::data::element_store::{ElementStore, IndexSpace};
use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshIdentityError;
use crate::overlap::ghost::GhostSynchronizer;
use crate::overlap::halo::{FieldSync, HaloSchedule};
use crate::topology::cell_type::ElementKind;
use crate::topology::EntityKind;

/// Channel name used for the node field array.
pub const NODE_FIELDS_CHANNEL: &str = "node_fields";

/// Nodes, elements and their ghost bookkeeping on one rank.
#[derive(Clone, Debug)]
pub struct DistributedMesh {
    config: IdentityConfig,
    nodes: DofStore,
    elements: ElementStore,
    node_sync: GhostSynchronizer,
    element_sync: GhostSynchronizer,
}

impl DistributedMesh {
    /// Empty mesh fragment on `my_rank`.
    pub fn new(
        my_rank: usize,
        dimension: usize,
        n_fields: usize,
        config: IdentityConfig,
    ) -> Result<Self, MeshIdentityError> {
        config.validate(dimension)?;
        Ok(Self {
            nodes: DofStore::with_dimension(my_rank, dimension, n_fields)?,
            elements: ElementStore::new(my_rank),
            node_sync: GhostSynchronizer::new(EntityKind::Node, config.lookup),
            element_sync: GhostSynchronizer::new(EntityKind::Element, config.lookup),
            config,
        })
    }

    /// Wrap existing stores. Both must belong to the same rank.
    pub fn from_stores(
        nodes: DofStore,
        elements: ElementStore,
        config: IdentityConfig,
    ) -> Result<Self, MeshIdentityError> {
        config.validate(nodes.dimension()?)?;
        if nodes.my_rank() != elements.my_rank() {
            return Err(MeshIdentityError::IdentityMismatch(format!(
                "node store belongs to rank {}, element store to rank {}",
                nodes.my_rank(),
                elements.my_rank()
            )));
        }
        elements.validate_against(nodes.len())?;
        Ok(Self {
            node_sync: GhostSynchronizer::new(EntityKind::Node, config.lookup),
            element_sync: GhostSynchronizer::new(EntityKind::Element, config.lookup),
            nodes,
            elements,
            config,
        })
    }

    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    pub fn my_rank(&self) -> usize {
        self.nodes.my_rank()
    }

    pub fn nodes(&self) -> &DofStore {
        &self.nodes
    }

    pub fn elements(&self) -> &ElementStore {
        &self.elements
    }

    /// Mutable node store. Ghost lookups are dropped until the next rebuild.
    pub fn nodes_mut(&mut self) -> &mut DofStore {
        self.invalidate_ghosts();
        &mut self.nodes
    }

    /// Mutable element store. Ghost lookups are dropped until the next rebuild.
    pub fn elements_mut(&mut self) -> &mut ElementStore {
        self.invalidate_ghosts();
        &mut self.elements
    }

    pub(crate) fn stores_mut(&mut self) -> (&IdentityConfig, &mut DofStore, &mut ElementStore) {
        (&self.config, &mut self.nodes, &mut self.elements)
    }

    /// Append a node owned by this rank.
    pub fn add_node(&mut self, coords: &[f64]) -> Result<usize, MeshIdentityError> {
        self.invalidate_ghosts();
        self.nodes.push_local(coords)
    }

    /// Append a node with explicit fields, owner and global index.
    pub fn add_node_with(
        &mut self,
        coords: &[f64],
        fields: &[f64],
        rank: usize,
        gid: GlobalIndex,
    ) -> Result<usize, MeshIdentityError> {
        self.invalidate_ghosts();
        self.nodes.push(coords, fields, rank, gid)
    }

    /// Append an element owned by this rank over local node slots.
    pub fn add_element(
        &mut self,
        kind: ElementKind,
        nodes: &[usize],
    ) -> Result<usize, MeshIdentityError> {
        self.add_element_with(kind, nodes, self.my_rank())
    }

    /// Append an element owned by `rank` over local node slots. It has no
    /// global index until the next [`renumber`](Self::renumber).
    pub fn add_element_with(
        &mut self,
        kind: ElementKind,
        nodes: &[usize],
        rank: usize,
    ) -> Result<usize, MeshIdentityError> {
        self.elements.require_space(IndexSpace::Local)?;
        if let Some(&bad) = nodes.iter().find(|&&n| n >= self.nodes.len()) {
            return Err(MeshIdentityError::DanglingConnectivity {
                element: self.elements.len(),
                node: bad as u64,
            });
        }
        self.invalidate_ghosts();
        let row: Vec<u64> = nodes.iter().map(|&n| n as u64).collect();
        self.elements.push(kind, &row, rank, UNSET_INDEX)
    }

    /// Vertex-average centroid of element `e`.
    pub fn element_centroid(&self, e: usize) -> Result<Vec<f64>, MeshIdentityError> {
        self.elements.require_space(IndexSpace::Local)?;
        let d = self.nodes.dimension()?;
        Ok(self
            .elements
            .kind(e)
            .centroid(d, self.elements.local_nodes(e).map(|s| self.nodes.coords(s))))
    }

    pub(crate) fn invalidate_ghosts(&mut self) {
        self.node_sync.invalidate();
        self.element_sync.invalidate();
    }

    /// Rebuild both global → local lookups from the current indices.
    pub fn rebuild_ghost_maps(&mut self) -> Result<(), MeshIdentityError> {
        self.node_sync.rebuild(self.nodes.glb_indices())?;
        self.element_sync.rebuild(self.elements.glb_indices())
    }

    /// Re-derive node identities after a topology change. Collective.
    pub fn structural_rebuild<C: Communicator + ?Sized>(
        &mut self,
        comm: &C,
    ) -> Result<RebuildReport, MeshIdentityError> {
        self.invalidate_ghosts();
        let report =
            identity::structural_rebuild(&mut self.nodes, &mut self.elements, &self.config, comm)?;
        self.rebuild_ghost_maps()?;
        self.debug_assert_invariants();
        Ok(report)
    }

    /// Renumber nodes and elements. Collective when more than one rank runs.
    pub fn renumber<C: Communicator + ?Sized>(
        &mut self,
        comm: &C,
    ) -> Result<RebuildReport, MeshIdentityError> {
        self.invalidate_ghosts();
        let report = identity::renumber(&mut self.nodes, &mut self.elements, &self.config, comm)?;
        self.rebuild_ghost_maps()?;
        self.debug_assert_invariants();
        debug!(
            "[rank {}] mesh renumbered: {} nodes, {} elements",
            comm.rank(),
            report.global_nodes,
            report.global_elements
        );
        Ok(report)
    }

    /// Local slot of the node with global index `gid`.
    pub fn node_slot(&self, gid: GlobalIndex) -> Option<usize> {
        self.node_sync.lookup(gid)
    }

    /// Local slot of the element with global index `gid`.
    pub fn element_slot(&self, gid: GlobalIndex) -> Option<usize> {
        self.element_sync.lookup(gid)
    }

    /// Halo schedule of the nodes, computed through `sync` on first use.
    pub fn node_halo<F: FieldSync + ?Sized>(
        &mut self,
        sync: &mut F,
    ) -> Result<&HaloSchedule, MeshIdentityError> {
        self.node_sync
            .schedule(self.nodes.glb_indices(), self.nodes.ranks(), sync)
    }

    /// Halo schedule of the elements, computed through `sync` on first use.
    pub fn element_halo<F: FieldSync + ?Sized>(
        &mut self,
        sync: &mut F,
    ) -> Result<&HaloSchedule, MeshIdentityError> {
        self.element_sync
            .schedule(self.elements.glb_indices(), self.elements.ranks(), sync)
    }

    /// Copy owner field values into ghost nodes. Collective.
    pub fn synchronize_node_fields<F: FieldSync + ?Sized>(
        &mut self,
        sync: &mut F,
    ) -> Result<(), MeshIdentityError> {
        let width = self.nodes.n_fields();
        let schedule = self
            .node_sync
            .schedule(self.nodes.glb_indices(), self.nodes.ranks(), sync)?;
        sync.synchronize(
            EntityKind::Node,
            schedule,
            NODE_FIELDS_CHANNEL,
            width,
            self.nodes.field_array_mut(),
        )
    }

    /// Synchronize an element-wise array (`width` values per element). Collective.
    pub fn synchronize_element_values<F: FieldSync + ?Sized>(
        &mut self,
        sync: &mut F,
        channel: &str,
        width: usize,
        values: &mut [f64],
    ) -> Result<(), MeshIdentityError> {
        self.element_sync.synchronize(
            self.elements.glb_indices(),
            self.elements.ranks(),
            sync,
            channel,
            width,
            values,
        )
    }

    /// Start an adaptation session.
    pub fn adaptor(&mut self) -> MeshAdaptor<'_> {
        MeshAdaptor::new(self)
    }

    /// Collective consistency check; see [`verify_identity`].
    pub fn verify<C: Communicator + ?Sized>(&self, comm: &C) -> Result<(), MeshIdentityError> {
        verify_identity(self, comm)
    }
}

impl DebugInvariants for DistributedMesh {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "DistributedMesh");
    }

    fn validate_invariants(&self) -> Result<(), MeshIdentityError> {
        self.nodes.validate_invariants()?;
        self.elements.validate_invariants()?;
        self.elements.validate_against(self.nodes.len())
    }
}
