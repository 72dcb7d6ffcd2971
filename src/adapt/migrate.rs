//! Change sets and the migration message format.
//!
//! One message per destination rank:
//! `WireHdr(Migration, n_nodes + n_elements) | n_nodes u32 | node records | element records`.

use bytes::{Buf, BufMut, BytesMut};

use crate::adapt::buffer::{ElementRecord, NodeRecord};
use crate::algs::wire::{WireHdr, WireKind};
use crate::mesh_error::MeshIdentityError;

/// Entities to move, indexed by destination rank.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub nodes: Vec<Vec<usize>>,
    pub elements: Vec<Vec<usize>>,
}

impl ChangeSet {
    /// Empty change set for a communicator of `size` ranks.
    pub fn new(size: usize) -> Self {
        Self {
            nodes: vec![Vec::new(); size],
            elements: vec![Vec::new(); size],
        }
    }

    /// Move local element `slot` (with copies of its nodes) to `dest`.
    pub fn move_element(&mut self, slot: usize, dest: usize) -> &mut Self {
        self.elements[dest].push(slot);
        self
    }

    /// Move local node `slot` to `dest`; the local copy is removed.
    pub fn move_node(&mut self, slot: usize, dest: usize) -> &mut Self {
        self.nodes[dest].push(slot);
        self
    }

    pub fn size(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.iter().chain(&self.elements).all(Vec::is_empty)
    }
}

/// What one rank sent and received in a migration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct MigrationSummary {
    pub sent_nodes: usize,
    pub sent_elements: usize,
    pub received_nodes: usize,
    pub received_elements: usize,
}

pub(crate) fn encode_message(nodes: &[NodeRecord], elements: &[ElementRecord]) -> Vec<u8> {
    let body: usize = nodes.iter().map(NodeRecord::encoded_len).sum::<usize>()
        + elements.iter().map(ElementRecord::encoded_len).sum::<usize>();
    let mut buf = BytesMut::with_capacity(WireHdr::SIZE + 4 + body);
    let hdr = WireHdr::new(WireKind::Migration, nodes.len() + elements.len());
    buf.put_slice(bytemuck::bytes_of(&hdr));
    buf.put_u32_le(nodes.len() as u32);
    for n in nodes {
        n.encode(&mut buf);
    }
    for e in elements {
        e.encode(&mut buf);
    }
    buf.to_vec()
}

/// Decode a message from `src`. An empty buffer carries nothing.
pub(crate) fn decode_message(
    src: usize,
    bytes: &[u8],
) -> Result<(Vec<NodeRecord>, Vec<ElementRecord>), MeshIdentityError> {
    if bytes.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }
    if bytes.len() < WireHdr::SIZE + 4 {
        return Err(MeshIdentityError::BufferSizeMismatch {
            neighbor: src,
            expected: WireHdr::SIZE + 4,
            got: bytes.len(),
        });
    }
    let hdr: WireHdr = bytemuck::pod_read_unaligned(&bytes[..WireHdr::SIZE]);
    hdr.expect(WireKind::Migration)?;
    let mut rd = &bytes[WireHdr::SIZE..];
    let n_nodes = rd.get_u32_le() as usize;
    let total = hdr.count();
    if n_nodes > total {
        return Err(MeshIdentityError::Decode(format!(
            "rank {src}: {n_nodes} node records in a message of {total}"
        )));
    }
    let nodes = (0..n_nodes)
        .map(|_| NodeRecord::decode(&mut rd))
        .collect::<Result<Vec<_>, _>>()?;
    let elements = (n_nodes..total)
        .map(|_| ElementRecord::decode(&mut rd))
        .collect::<Result<Vec<_>, _>>()?;
    if rd.has_remaining() {
        return Err(MeshIdentityError::Decode(format!(
            "rank {src}: {} trailing bytes after migration records",
            rd.remaining()
        )));
    }
    Ok((nodes, elements))
}
