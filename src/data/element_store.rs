//! Per-rank storage of element connectivity rows.
//!
//! Rows are kept in CSR form (`offsets` + flat `nodes`) so element kinds can
//! be mixed. Entries are local DOF slots while the store is in
//! [`IndexSpace::Local`]; a mesh adaptor session temporarily switches them to
//! global DOF indices ([`IndexSpace::Global`]).

use crate::data::dof_store::{GlobalIndex, UNSET_INDEX};
use crate::debug_invariants::{DebugInvariants, check_identity_arrays};
use crate::mesh_error::MeshIdentityError;
use crate::topology::cell_type::ElementKind;
use crate::topology::EntityKind;

/// Which index space connectivity entries currently refer to.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub enum IndexSpace {
    /// Entries are slots of the local `DofStore`.
    #[default]
    Local,
    /// Entries are global DOF indices (or provisional references).
    Global,
}

/// Element rows with kind, owner rank and global index.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ElementStore {
    my_rank: usize,
    space: IndexSpace,
    kinds: Vec<ElementKind>,
    offsets: Vec<usize>,
    nodes: Vec<u64>,
    rank: Vec<usize>,
    glb_idx: Vec<GlobalIndex>,
}

impl ElementStore {
    pub fn new(my_rank: usize) -> Self {
        Self {
            my_rank,
            space: IndexSpace::Local,
            kinds: Vec::new(),
            offsets: vec![0],
            nodes: Vec::new(),
            rank: Vec::new(),
            glb_idx: Vec::new(),
        }
    }

    pub fn my_rank(&self) -> usize {
        self.my_rank
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn index_space(&self) -> IndexSpace {
        self.space
    }

    pub(crate) fn set_index_space(&mut self, space: IndexSpace) {
        self.space = space;
    }

    /// Fail unless connectivity is in `expected` space.
    pub fn require_space(&self, expected: IndexSpace) -> Result<(), MeshIdentityError> {
        if self.space == expected {
            Ok(())
        } else {
            Err(MeshIdentityError::ConnectivitySpace {
                expected,
                found: self.space,
            })
        }
    }

    /// Append one element row and return its slot.
    pub fn push(
        &mut self,
        kind: ElementKind,
        nodes: &[u64],
        rank: usize,
        gid: GlobalIndex,
    ) -> Result<usize, MeshIdentityError> {
        kind.check_row(nodes.len())?;
        let slot = self.len();
        self.kinds.push(kind);
        self.nodes.extend_from_slice(nodes);
        self.offsets.push(self.nodes.len());
        self.rank.push(rank);
        self.glb_idx.push(gid);
        Ok(slot)
    }

    /// Append an element owned by this rank, with a serial default index.
    pub fn push_local(
        &mut self,
        kind: ElementKind,
        nodes: &[usize],
    ) -> Result<usize, MeshIdentityError> {
        let row: Vec<u64> = nodes.iter().map(|&n| n as u64).collect();
        let gid = self.len() as GlobalIndex;
        self.push(kind, &row, self.my_rank, gid)
    }

    #[inline]
    fn check(&self, e: usize) {
        assert!(
            e < self.len(),
            "element index {e} out of range (len {})",
            self.len()
        );
    }

    pub fn kind(&self, e: usize) -> ElementKind {
        self.check(e);
        self.kinds[e]
    }

    /// Connectivity row of element `e`. Panics if out of range.
    pub fn nodes(&self, e: usize) -> &[u64] {
        self.check(e);
        &self.nodes[self.offsets[e]..self.offsets[e + 1]]
    }

    /// Connectivity row of element `e` as local slots.
    pub fn local_nodes(&self, e: usize) -> impl Iterator<Item = usize> + '_ {
        debug_assert_eq!(self.space, IndexSpace::Local);
        self.nodes(e).iter().map(|&n| n as usize)
    }

    /// Every connectivity entry, row after row.
    pub(crate) fn all_nodes_mut(&mut self) -> &mut [u64] {
        &mut self.nodes
    }

    pub fn rank(&self, e: usize) -> usize {
        self.check(e);
        self.rank[e]
    }

    pub fn set_rank(&mut self, e: usize, rank: usize) {
        self.check(e);
        self.rank[e] = rank;
    }

    pub fn ranks(&self) -> &[usize] {
        &self.rank
    }

    pub fn glb_idx(&self, e: usize) -> GlobalIndex {
        self.check(e);
        self.glb_idx[e]
    }

    pub fn set_glb_idx(&mut self, e: usize, gid: GlobalIndex) {
        self.check(e);
        self.glb_idx[e] = gid;
    }

    pub fn glb_indices(&self) -> &[GlobalIndex] {
        &self.glb_idx
    }

    pub fn is_ghost(&self, e: usize) -> bool {
        self.rank(e) != self.my_rank
    }

    pub fn owned_count(&self) -> usize {
        self.rank.iter().filter(|&&r| r == self.my_rank).count()
    }

    /// Mark every element index as unassigned.
    pub(crate) fn clear_indices(&mut self) {
        self.glb_idx.fill(UNSET_INDEX);
    }

    /// Drop the listed element slots, keeping the relative order of the rest.
    pub fn remove_many(&mut self, remove: &[usize]) {
        if remove.is_empty() {
            return;
        }
        let mut drop = vec![false; self.len()];
        for &e in remove {
            self.check(e);
            drop[e] = true;
        }
        let mut kinds = Vec::with_capacity(self.len());
        let mut offsets = vec![0];
        let mut nodes = Vec::with_capacity(self.nodes.len());
        let mut rank = Vec::with_capacity(self.len());
        let mut glb_idx = Vec::with_capacity(self.len());
        for e in (0..self.len()).filter(|&e| !drop[e]) {
            kinds.push(self.kinds[e]);
            nodes.extend_from_slice(&self.nodes[self.offsets[e]..self.offsets[e + 1]]);
            offsets.push(nodes.len());
            rank.push(self.rank[e]);
            glb_idx.push(self.glb_idx[e]);
        }
        self.kinds = kinds;
        self.offsets = offsets;
        self.nodes = nodes;
        self.rank = rank;
        self.glb_idx = glb_idx;
    }

    /// Check that every local connectivity entry is a valid DOF slot.
    pub fn validate_against(&self, n_dofs: usize) -> Result<(), MeshIdentityError> {
        if self.space != IndexSpace::Local {
            return Ok(());
        }
        for e in 0..self.len() {
            if let Some(&bad) = self.nodes(e).iter().find(|&&n| n as usize >= n_dofs) {
                return Err(MeshIdentityError::DanglingConnectivity {
                    element: e,
                    node: bad,
                });
            }
        }
        Ok(())
    }
}

impl DebugInvariants for ElementStore {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "ElementStore");
    }

    fn validate_invariants(&self) -> Result<(), MeshIdentityError> {
        if self.offsets.len() != self.len() + 1 {
            return Err(MeshIdentityError::IndexOutOfRange {
                kind: EntityKind::Element,
                index: self.offsets.len(),
                len: self.len() + 1,
            });
        }
        check_identity_arrays(EntityKind::Element, self.len(), &self.rank, &self.glb_idx)?;
        for e in 0..self.len() {
            let row = self.offsets[e + 1] - self.offsets[e];
            self.kinds[e].check_row(row)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_triangles() -> ElementStore {
        let mut s = ElementStore::new(0);
        s.push_local(ElementKind::Triangle3, &[0, 1, 2]).unwrap();
        s.push_local(ElementKind::Triangle3, &[1, 3, 2]).unwrap();
        s
    }

    #[test]
    fn push_checks_row_length() {
        let mut s = ElementStore::new(0);
        assert!(s.push_local(ElementKind::Quad4, &[0, 1, 2]).is_err());
        assert!(s.is_empty());
    }

    #[test]
    fn remove_many_keeps_order() {
        let mut s = two_triangles();
        s.push_local(ElementKind::Line2, &[0, 3]).unwrap();
        s.remove_many(&[0]);
        assert_eq!(s.len(), 2);
        assert_eq!(s.nodes(0), &[1, 3, 2]);
        assert_eq!(s.kind(1), ElementKind::Line2);
        assert_eq!(s.glb_indices(), &[1, 2]);
        s.validate_invariants().unwrap();
    }

    #[test]
    fn dangling_local_entry_detected() {
        let s = two_triangles();
        assert!(s.validate_against(4).is_ok());
        assert_eq!(
            s.validate_against(3),
            Err(MeshIdentityError::DanglingConnectivity { element: 1, node: 3 })
        );
    }

    #[test]
    fn space_guard() {
        let mut s = two_triangles();
        assert!(s.require_space(IndexSpace::Local).is_ok());
        s.set_index_space(IndexSpace::Global);
        assert!(matches!(
            s.require_space(IndexSpace::Local),
            Err(MeshIdentityError::ConnectivitySpace { .. })
        ));
    }
}
