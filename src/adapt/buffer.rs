//! Self-describing node/element records and the pending mutation queue.
//!
//! Records encode to little-endian byte streams (`bytes::BufMut`) so a
//! receiving rank can rebuild the entity without any shared state.
//!
//! Node record:    `gid u64 | rank u32 | dim u16 | n_fields u16 | coords f64* | fields f64*`
//! Element record: `tag u8 | rank u32 | gid u64 | n u16 | nodes u64*`

use std::collections::{BTreeMap, BTreeSet};

use bytes::{Buf, BufMut};

use crate::data::dof_store::{GlobalIndex, UNSET_INDEX};
use crate::mesh_error::MeshIdentityError;
use crate::topology::cell_type::ElementKind;
use crate::topology::EntityKind;

/// Bit marking a session-local reference to a node added in this session.
pub const PROVISIONAL_BIT: u64 = 1 << 63;

/// Reference to a node inside an adaptor session: either a global DOF index
/// or a provisional id handed out by `add_node`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct NodeRef(u64);

impl NodeRef {
    pub fn global(gid: GlobalIndex) -> Self {
        NodeRef(gid)
    }

    pub(crate) fn provisional(index: usize) -> Self {
        NodeRef(PROVISIONAL_BIT | index as u64)
    }

    pub fn is_provisional(self) -> bool {
        self.0 & PROVISIONAL_BIT != 0
    }

    /// Index into the session's added nodes, for provisional references.
    pub fn provisional_index(self) -> Option<usize> {
        self.is_provisional()
            .then(|| (self.0 & !PROVISIONAL_BIT) as usize)
    }

    /// Raw connectivity entry.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl From<NodeRef> for u64 {
    fn from(r: NodeRef) -> u64 {
        r.0
    }
}

fn short(what: &str) -> MeshIdentityError {
    MeshIdentityError::Decode(format!("truncated {what} record"))
}

/// A node with everything needed to recreate it elsewhere.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeRecord {
    /// `UNSET_INDEX` for nodes that never had an identity.
    pub gid: GlobalIndex,
    pub rank: usize,
    pub coords: Vec<f64>,
    pub fields: Vec<f64>,
}

impl NodeRecord {
    /// A brand-new node owned by `rank`.
    pub fn new(coords: Vec<f64>, fields: Vec<f64>, rank: usize) -> Self {
        Self {
            gid: UNSET_INDEX,
            rank,
            coords,
            fields,
        }
    }

    pub fn encoded_len(&self) -> usize {
        16 + 8 * (self.coords.len() + self.fields.len())
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(self.gid);
        buf.put_u32_le(self.rank as u32);
        buf.put_u16_le(self.coords.len() as u16);
        buf.put_u16_le(self.fields.len() as u16);
        for &x in self.coords.iter().chain(&self.fields) {
            buf.put_f64_le(x);
        }
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, MeshIdentityError> {
        if buf.remaining() < 16 {
            return Err(short("node"));
        }
        let gid = buf.get_u64_le();
        let rank = buf.get_u32_le() as usize;
        let d = buf.get_u16_le() as usize;
        let w = buf.get_u16_le() as usize;
        if buf.remaining() < 8 * (d + w) {
            return Err(short("node"));
        }
        let coords = (0..d).map(|_| buf.get_f64_le()).collect();
        let fields = (0..w).map(|_| buf.get_f64_le()).collect();
        Ok(Self {
            gid,
            rank,
            coords,
            fields,
        })
    }
}

/// An element whose connectivity is in global (or provisional) node ids.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ElementRecord {
    pub kind: ElementKind,
    pub gid: GlobalIndex,
    pub rank: usize,
    pub nodes: Vec<u64>,
}

impl ElementRecord {
    /// A brand-new element owned by `rank`.
    pub fn new(kind: ElementKind, nodes: &[NodeRef], rank: usize) -> Self {
        Self {
            kind,
            gid: UNSET_INDEX,
            rank,
            nodes: nodes.iter().map(|&n| n.raw()).collect(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        15 + 8 * self.nodes.len()
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.kind.wire_tag());
        buf.put_u32_le(self.rank as u32);
        buf.put_u64_le(self.gid);
        buf.put_u16_le(self.nodes.len() as u16);
        for &n in &self.nodes {
            buf.put_u64_le(n);
        }
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, MeshIdentityError> {
        if buf.remaining() < 15 {
            return Err(short("element"));
        }
        let kind = ElementKind::from_wire_tag(buf.get_u8())?;
        let rank = buf.get_u32_le() as usize;
        let gid = buf.get_u64_le();
        let n = buf.get_u16_le() as usize;
        kind.check_row(n)?;
        if buf.remaining() < 8 * n {
            return Err(short("element"));
        }
        let nodes = (0..n).map(|_| buf.get_u64_le()).collect();
        Ok(Self {
            kind,
            gid,
            rank,
            nodes,
        })
    }
}

/// Queued additions and removals of one adaptor session.
///
/// Added node `i` is addressed by `NodeRef::provisional(i)`. `node_sources[i]`
/// is the rank that sent it, `None` for nodes added locally.
#[derive(Clone, Debug, Default)]
pub struct PendingMutationBuffer {
    pub(crate) added_nodes: Vec<NodeRecord>,
    pub(crate) node_sources: Vec<Option<usize>>,
    pub(crate) added_elements: Vec<ElementRecord>,
    pub(crate) removed_nodes: BTreeSet<usize>,
    pub(crate) removed_elements: BTreeSet<usize>,
    /// New owners of migrated entities, by global index.
    pub(crate) reassigned_nodes: BTreeMap<GlobalIndex, usize>,
    pub(crate) reassigned_elements: BTreeMap<GlobalIndex, usize>,
}

impl PendingMutationBuffer {
    pub fn is_empty(&self) -> bool {
        self.added_nodes.is_empty()
            && self.added_elements.is_empty()
            && self.removed_nodes.is_empty()
            && self.removed_elements.is_empty()
            && self.reassigned_nodes.is_empty()
            && self.reassigned_elements.is_empty()
    }

    pub(crate) fn push_node(&mut self, record: NodeRecord, source: Option<usize>) -> usize {
        self.added_nodes.push(record);
        self.node_sources.push(source);
        self.added_nodes.len() - 1
    }

    pub fn added_nodes(&self) -> &[NodeRecord] {
        &self.added_nodes
    }

    /// Rank that sent added node `i`, if it arrived through a migration.
    pub fn node_source(&self, i: usize) -> Option<usize> {
        self.node_sources.get(i).copied().flatten()
    }

    pub fn added_elements(&self) -> &[ElementRecord] {
        &self.added_elements
    }

    pub fn removed_nodes(&self) -> impl Iterator<Item = usize> + '_ {
        self.removed_nodes.iter().copied()
    }

    pub fn removed_elements(&self) -> impl Iterator<Item = usize> + '_ {
        self.removed_elements.iter().copied()
    }

    /// Owner rank announced for a migrated entity with global index `gid`.
    pub fn reassigned_owner(&self, kind: EntityKind, gid: GlobalIndex) -> Option<usize> {
        match kind {
            EntityKind::Node => self.reassigned_nodes.get(&gid).copied(),
            EntityKind::Element => self.reassigned_elements.get(&gid).copied(),
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
