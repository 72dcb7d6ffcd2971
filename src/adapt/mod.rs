//! Two-phase mesh adaptation sessions.
//!
//! A [`MeshAdaptor`] borrows a [`DistributedMesh`] mutably for the whole
//! session and walks the state machine
//!
//! ```text
//! Idle --prepare--> Preparing --(first mutation)--> Mutating --finish--> Idle
//! ```
//!
//! During the session element connectivity is kept in global DOF indices so
//! that local slots may be compacted freely at `finish`. Nodes added in the
//! session are addressed by provisional [`NodeRef`]s until they receive a
//! global index from the renumbering pass that closes the session.
//!
//! Dropping or [`abandon`](MeshAdaptor::abandon)ing an unfinished session
//! discards the queued mutations and restores local connectivity.

pub mod buffer;
pub mod migrate;

pub use buffer::{ElementRecord, NodeRecord, NodeRef, PendingMutationBuffer, PROVISIONAL_BIT};
pub use migrate::{ChangeSet, MigrationSummary};

use std::collections::BTreeSet;

use hashbrown::HashMap;
use log::{debug, warn};

use crate::algs::communicator::{Communicator, agree, all_gather_pod, check_per_rank};
use crate::algs::identity::{RebuildReport, renumber};
use crate::algs::wire::WireHandoff;
use crate::config::LookupStrategy;
use crate::data::dof_store::{GlobalIndex, UNSET_INDEX};
use crate::data::element_store::IndexSpace;
use crate::data::global_map::GlobalToLocalMap;
use crate::mesh::DistributedMesh;
use crate::mesh_error::MeshIdentityError;
use crate::topology::cell_type::ElementKind;
use crate::topology::EntityKind;

/// Adaptor session state.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum AdaptorState {
    #[default]
    Idle,
    Preparing,
    Mutating,
    Finishing,
}

/// Mutation session over a [`DistributedMesh`].
pub struct MeshAdaptor<'m> {
    mesh: &'m mut DistributedMesh,
    state: AdaptorState,
    pending: PendingMutationBuffer,
    node_lookup: GlobalToLocalMap,
}

impl<'m> MeshAdaptor<'m> {
    pub fn new(mesh: &'m mut DistributedMesh) -> Self {
        Self {
            mesh,
            state: AdaptorState::Idle,
            pending: PendingMutationBuffer::default(),
            node_lookup: GlobalToLocalMap::default(),
        }
    }

    pub fn state(&self) -> AdaptorState {
        self.state
    }

    pub fn mesh(&self) -> &DistributedMesh {
        self.mesh
    }

    pub fn pending(&self) -> &PendingMutationBuffer {
        &self.pending
    }

    fn require(&self, op: &'static str, allowed: &[AdaptorState]) -> Result<(), MeshIdentityError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(MeshIdentityError::InvalidAdaptorState {
                op,
                state: self.state,
            })
        }
    }

    fn begin_mutation(&mut self, op: &'static str) -> Result<(), MeshIdentityError> {
        self.require(op, &[AdaptorState::Preparing, AdaptorState::Mutating])?;
        self.state = AdaptorState::Mutating;
        Ok(())
    }

    fn check_slot(kind: EntityKind, index: usize, len: usize) -> Result<(), MeshIdentityError> {
        if index < len {
            Ok(())
        } else {
            Err(MeshIdentityError::IndexOutOfRange { kind, index, len })
        }
    }

    /// Open the session: index local nodes by global index and switch
    /// element connectivity to global DOF indices.
    pub fn prepare(&mut self) -> Result<(), MeshIdentityError> {
        self.require("prepare", &[AdaptorState::Idle])?;
        let (_, nodes, elements) = self.mesh.stores_mut();
        elements.require_space(IndexSpace::Local)?;
        elements.validate_against(nodes.len())?;
        let glb = nodes.glb_indices();
        if let Some(slot) = glb.iter().position(|&g| g == UNSET_INDEX || g & PROVISIONAL_BIT != 0) {
            return Err(MeshIdentityError::IdentityMismatch(format!(
                "node slot {slot} has no usable global index; renumber before adapting"
            )));
        }
        self.node_lookup = GlobalToLocalMap::build(EntityKind::Node, glb, LookupStrategy::Hashed)?;
        for entry in elements.all_nodes_mut() {
            *entry = glb[*entry as usize];
        }
        elements.set_index_space(IndexSpace::Global);
        self.pending.clear();
        self.state = AdaptorState::Preparing;
        Ok(())
    }

    /// Queue a new node; the returned reference is valid in element records
    /// of this session.
    pub fn add_node(&mut self, record: NodeRecord) -> Result<NodeRef, MeshIdentityError> {
        self.begin_mutation("add_node")?;
        let nodes = self.mesh.nodes();
        let d = nodes.dimension()?;
        if record.coords.len() != d {
            return Err(MeshIdentityError::CoordinateLengthMismatch {
                expected: d,
                found: record.coords.len(),
            });
        }
        if record.fields.len() != nodes.n_fields() {
            return Err(MeshIdentityError::FieldWidthMismatch {
                expected: nodes.n_fields(),
                found: record.fields.len(),
            });
        }
        Ok(NodeRef::provisional(self.pending.push_node(record, None)))
    }

    /// Queue removal of local node `slot`.
    pub fn remove_node(&mut self, slot: usize) -> Result<(), MeshIdentityError> {
        self.begin_mutation("remove_node")?;
        Self::check_slot(EntityKind::Node, slot, self.mesh.nodes().len())?;
        self.pending.removed_nodes.insert(slot);
        Ok(())
    }

    /// Queue a new element. Re-adding the packed content of an element
    /// removed in this session cancels the removal instead.
    pub fn add_element(&mut self, record: ElementRecord) -> Result<(), MeshIdentityError> {
        self.begin_mutation("add_element")?;
        record.kind.check_row(record.nodes.len())?;
        let cancelled = self
            .pending
            .removed_elements
            .iter()
            .copied()
            .find(|&e| self.packed_element(e) == record);
        match cancelled {
            Some(e) => {
                self.pending.removed_elements.remove(&e);
            }
            None => self.pending.added_elements.push(record),
        }
        Ok(())
    }

    /// Queue removal of local element `slot`.
    pub fn remove_element(&mut self, slot: usize) -> Result<(), MeshIdentityError> {
        self.begin_mutation("remove_element")?;
        Self::check_slot(EntityKind::Element, slot, self.mesh.elements().len())?;
        self.pending.removed_elements.insert(slot);
        Ok(())
    }

    /// Self-describing copy of local node `slot`.
    pub fn pack_node(&self, slot: usize) -> Result<NodeRecord, MeshIdentityError> {
        self.require("pack_node", &[AdaptorState::Preparing, AdaptorState::Mutating])?;
        let nodes = self.mesh.nodes();
        Self::check_slot(EntityKind::Node, slot, nodes.len())?;
        Ok(NodeRecord {
            gid: nodes.glb_idx(slot),
            rank: nodes.rank(slot),
            coords: nodes.coords(slot).to_vec(),
            fields: nodes.fields(slot).to_vec(),
        })
    }

    /// Self-describing copy of local element `slot` (global connectivity).
    pub fn pack_element(&self, slot: usize) -> Result<ElementRecord, MeshIdentityError> {
        self.require("pack_element", &[AdaptorState::Preparing, AdaptorState::Mutating])?;
        Self::check_slot(EntityKind::Element, slot, self.mesh.elements().len())?;
        Ok(self.packed_element(slot))
    }

    fn packed_element(&self, slot: usize) -> ElementRecord {
        let elements = self.mesh.elements();
        ElementRecord {
            kind: elements.kind(slot),
            gid: elements.glb_idx(slot),
            rank: elements.rank(slot),
            nodes: elements.nodes(slot).to_vec(),
        }
    }

    /// Move entities between ranks. Collective.
    ///
    /// Each element in `change_set.elements[dest]` is sent to `dest` together
    /// with copies of its nodes, takes `dest` as its owner, and is queued for
    /// removal here. Nodes in `change_set.nodes[dest]` are sent and removed.
    /// Received entities are queued as additions. The new owner of every
    /// moved entity is announced to all ranks, so ghost copies held elsewhere
    /// follow it at `finish`.
    pub fn migrate<C: Communicator + ?Sized>(
        &mut self,
        change_set: &ChangeSet,
        comm: &C,
    ) -> Result<MigrationSummary, MeshIdentityError> {
        let me = comm.rank();
        let outgoing = agree(comm, self.pack_outgoing(change_set, comm))?;
        self.state = AdaptorState::Mutating;
        let mut summary = outgoing.summary;
        self.pending.removed_elements.extend(outgoing.removed_elements);
        self.pending.removed_nodes.extend(outgoing.removed_nodes);

        for h in all_gather_pod(comm, &outgoing.handoffs)?.into_iter().flatten() {
            let owners = if h.is_element() {
                &mut self.pending.reassigned_elements
            } else {
                &mut self.pending.reassigned_nodes
            };
            owners.insert(h.gid(), h.rank());
        }

        let recv = comm.all_to_all(outgoing.send)?;
        let decoded = recv
            .iter()
            .enumerate()
            .filter(|&(src, _)| src != me)
            .map(|(src, bytes)| migrate::decode_message(src, bytes).map(|m| (src, m)))
            .collect::<Result<Vec<_>, _>>();
        for (src, (nodes, elements)) in agree(comm, decoded)? {
            summary.received_nodes += nodes.len();
            summary.received_elements += elements.len();
            for n in nodes {
                self.pending.push_node(n, Some(src));
            }
            self.pending.added_elements.extend(elements);
        }
        debug!("[rank {me}] migrate: {summary:?}");
        Ok(summary)
    }

    /// Encode one message per destination; nothing is queued yet.
    fn pack_outgoing<C: Communicator + ?Sized>(
        &self,
        change_set: &ChangeSet,
        comm: &C,
    ) -> Result<Outgoing, MeshIdentityError> {
        self.require("migrate", &[AdaptorState::Preparing, AdaptorState::Mutating])?;
        check_per_rank(comm, change_set.elements.len())?;
        check_per_rank(comm, change_set.nodes.len())?;
        let me = comm.rank();
        let mut out = Outgoing::default();
        for dest in 0..comm.size() {
            if dest == me {
                out.send.push(Vec::new());
                continue;
            }
            let mut node_slots: BTreeSet<usize> = BTreeSet::new();
            let mut element_records = Vec::with_capacity(change_set.elements[dest].len());
            for &e in &change_set.elements[dest] {
                let mut rec = self.pack_element(e)?;
                for &g in &rec.nodes {
                    let slot = self.node_lookup.get(g).ok_or(
                        MeshIdentityError::DanglingConnectivity { element: e, node: g },
                    )?;
                    node_slots.insert(slot);
                }
                if rec.gid != UNSET_INDEX {
                    out.handoffs.push(WireHandoff::element(rec.gid, dest));
                }
                rec.rank = dest;
                element_records.push(rec);
            }
            for &n in &change_set.nodes[dest] {
                Self::check_slot(EntityKind::Node, n, self.mesh.nodes().len())?;
                node_slots.insert(n);
                let gid = self.mesh.nodes().glb_idx(n);
                if gid != UNSET_INDEX {
                    out.handoffs.push(WireHandoff::node(gid, dest));
                }
            }
            let node_records = node_slots
                .iter()
                .map(|&n| self.pack_node(n))
                .collect::<Result<Vec<_>, _>>()?;
            out.summary.sent_nodes += node_records.len();
            out.summary.sent_elements += element_records.len();
            out.send
                .push(migrate::encode_message(&node_records, &element_records));
            out.removed_elements
                .extend(change_set.elements[dest].iter().copied());
            out.removed_nodes.extend(change_set.nodes[dest].iter().copied());
        }
        Ok(out)
    }

    /// Apply the queued mutations, restore local connectivity and renumber.
    /// Collective.
    ///
    /// A failure on any rank makes `finish` fail on every rank.
    pub fn finish<C: Communicator + ?Sized>(
        &mut self,
        comm: &C,
    ) -> Result<RebuildReport, MeshIdentityError> {
        let applied = self
            .require("finish", &[AdaptorState::Preparing, AdaptorState::Mutating])
            .and_then(|()| {
                self.state = AdaptorState::Finishing;
                self.mesh.invalidate_ghosts();
                let pending = std::mem::take(&mut self.pending);
                let applied = apply_pending(self.mesh, &pending)?;
                Ok((pending, applied))
            });
        let (pending, applied) = agree(comm, applied)?;

        let (config, nodes, elements) = self.mesh.stores_mut();
        let report = renumber(nodes, elements, config, comm)?;
        self.mesh.rebuild_ghost_maps()?;
        self.node_lookup = GlobalToLocalMap::default();
        self.state = AdaptorState::Idle;
        debug!(
            "[rank {}] adaptor finish: -{} elements, -{} nodes, +{} elements ({} replaced), +{} nodes ({} reused, {} overwritten), {} owners reassigned; {report:?}",
            comm.rank(),
            pending.removed_elements.len(),
            pending.removed_nodes.len(),
            pending.added_elements.len(),
            applied.replaced,
            pending.added_nodes.len(),
            applied.reused,
            applied.overwritten,
            applied.reassigned,
        );
        Ok(report)
    }

    /// Discard queued mutations and restore local connectivity.
    pub fn abandon(mut self) -> Result<(), MeshIdentityError> {
        self.restore()
    }

    fn restore(&mut self) -> Result<(), MeshIdentityError> {
        if self.state == AdaptorState::Idle {
            return Ok(());
        }
        warn!(
            "[rank {}] abandoning adaptor session in state {:?} ({} queued additions)",
            self.mesh.my_rank(),
            self.state,
            self.pending.added_nodes.len() + self.pending.added_elements.len()
        );
        self.pending.clear();
        self.node_lookup = GlobalToLocalMap::default();
        self.state = AdaptorState::Idle;
        let (_, nodes, elements) = self.mesh.stores_mut();
        if elements.index_space() == IndexSpace::Global {
            let map = GlobalToLocalMap::build(
                EntityKind::Node,
                nodes.glb_indices(),
                LookupStrategy::Hashed,
            )?;
            let mut local = Vec::with_capacity(elements.all_nodes_mut().len());
            for e in 0..elements.len() {
                for &g in elements.nodes(e) {
                    let slot = map
                        .get(g)
                        .ok_or(MeshIdentityError::DanglingConnectivity { element: e, node: g })?;
                    local.push(slot as u64);
                }
            }
            elements.all_nodes_mut().copy_from_slice(&local);
            elements.set_index_space(IndexSpace::Local);
        }
        Ok(())
    }
}

/// Messages and queue entries produced by packing a change set.
#[derive(Default)]
struct Outgoing {
    send: Vec<Vec<u8>>,
    handoffs: Vec<WireHandoff>,
    removed_elements: Vec<usize>,
    removed_nodes: Vec<usize>,
    summary: MigrationSummary,
}

/// What `apply_pending` did besides plain additions and removals.
#[derive(Debug, Default)]
struct Applied {
    replaced: usize,
    reused: usize,
    overwritten: usize,
    reassigned: usize,
}

/// Rank-local part of `finish`: apply removals, additions and announced
/// owner changes, and switch connectivity back to local slots.
fn apply_pending(
    mesh: &mut DistributedMesh,
    pending: &PendingMutationBuffer,
) -> Result<Applied, MeshIdentityError> {
    let (_, nodes, elements) = mesh.stores_mut();
    let mut applied = Applied::default();

    let removed: Vec<usize> = pending.removed_elements.iter().copied().collect();
    elements.remove_many(&removed);
    if !pending.removed_nodes.is_empty() {
        let keep: Vec<usize> = (0..nodes.len())
            .filter(|i| !pending.removed_nodes.contains(i))
            .collect();
        nodes.retain_slots(&keep);
    }

    let mut by_gid: HashMap<GlobalIndex, usize> = nodes
        .glb_indices()
        .iter()
        .enumerate()
        .filter(|&(_, &g)| g != UNSET_INDEX)
        .map(|(slot, &g)| (g, slot))
        .collect();
    let mut added_slots = Vec::with_capacity(pending.added_nodes.len());
    for (i, rec) in pending.added_nodes.iter().enumerate() {
        let existing = (rec.gid != UNSET_INDEX)
            .then(|| by_gid.get(&rec.gid).copied())
            .flatten();
        let slot = match existing {
            Some(slot) => {
                // a copy sent by the node's owner carries the current values
                if pending.node_source(i) == Some(nodes.rank(slot)) {
                    nodes.overwrite(slot, &rec.coords, &rec.fields)?;
                    applied.overwritten += 1;
                }
                applied.reused += 1;
                slot
            }
            None => {
                let slot = nodes.push(&rec.coords, &rec.fields, rec.rank, rec.gid)?;
                if rec.gid != UNSET_INDEX {
                    by_gid.insert(rec.gid, slot);
                }
                slot
            }
        };
        added_slots.push(slot);
    }
    let resolve = |entry: u64| -> Option<usize> {
        match NodeRef::global(entry).provisional_index() {
            Some(i) => added_slots.get(i).copied(),
            None => by_gid.get(&entry).copied(),
        }
    };

    let mut local = Vec::with_capacity(elements.all_nodes_mut().len());
    for e in 0..elements.len() {
        for &g in elements.nodes(e) {
            let slot =
                resolve(g).ok_or(MeshIdentityError::DanglingConnectivity { element: e, node: g })?;
            local.push(slot as u64);
        }
    }
    elements.all_nodes_mut().copy_from_slice(&local);
    elements.set_index_space(IndexSpace::Local);

    let mut live: HashMap<(ElementKind, Vec<usize>), usize> = (0..elements.len())
        .map(|e| ((elements.kind(e), elements.local_nodes(e).collect()), e))
        .collect();
    for rec in &pending.added_elements {
        let row = rec
            .nodes
            .iter()
            .map(|&g| {
                resolve(g).ok_or(MeshIdentityError::DanglingConnectivity {
                    element: elements.len(),
                    node: g,
                })
            })
            .collect::<Result<Vec<usize>, _>>()?;
        match live.get(&(rec.kind, row.clone())) {
            Some(&e) => {
                elements.set_rank(e, rec.rank);
                if rec.gid != UNSET_INDEX {
                    elements.set_glb_idx(e, rec.gid);
                }
                applied.replaced += 1;
            }
            None => {
                let row64: Vec<u64> = row.iter().map(|&s| s as u64).collect();
                let e = elements.push(rec.kind, &row64, rec.rank, rec.gid)?;
                live.insert((rec.kind, row), e);
            }
        }
    }

    for e in 0..elements.len() {
        if let Some(r) = pending.reassigned_owner(EntityKind::Element, elements.glb_idx(e)) {
            elements.set_rank(e, r);
            applied.reassigned += 1;
        }
    }
    for i in 0..nodes.len() {
        if let Some(r) = pending.reassigned_owner(EntityKind::Node, nodes.glb_idx(i)) {
            nodes.set_rank(i, r);
            applied.reassigned += 1;
        }
    }
    elements.validate_against(nodes.len())?;
    Ok(applied)
}

impl Drop for MeshAdaptor<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!("adaptor session dropped with unrecoverable mesh state: {e}");
        }
    }
}
