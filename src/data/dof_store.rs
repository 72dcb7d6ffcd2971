//! Per-rank storage of nodes / degrees of freedom.
//!
//! A [`DofStore`] holds flat coordinate and field arrays plus the owner rank
//! and global index of every local slot. Slots are plain `usize` handles and
//! are *not* stable across structural rebuilds.

use crate::debug_invariants::{DebugInvariants, check_identity_arrays};
use crate::geometry::bbox::BoundingBox;
use crate::mesh_error::MeshIdentityError;
use crate::topology::EntityKind;

/// Global index of a node or element.
pub type GlobalIndex = u64;

/// Marker for a global index that has not been assigned yet.
pub const UNSET_INDEX: GlobalIndex = GlobalIndex::MAX;

/// Flat arrays of DOF coordinates, field values, owner rank and global index.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct DofStore {
    my_rank: usize,
    dimension: Option<usize>,
    n_fields: usize,
    coords: Vec<f64>,
    fields: Vec<f64>,
    rank: Vec<usize>,
    glb_idx: Vec<GlobalIndex>,
}

impl DofStore {
    /// Empty store on `my_rank` with no dimension set yet.
    pub fn new(my_rank: usize) -> Self {
        Self {
            my_rank,
            ..Self::default()
        }
    }

    /// Empty store with a fixed spatial dimension and field width.
    pub fn with_dimension(
        my_rank: usize,
        dimension: usize,
        n_fields: usize,
    ) -> Result<Self, MeshIdentityError> {
        let mut s = Self::new(my_rank);
        s.set_dimension(dimension)?;
        s.n_fields = n_fields;
        Ok(s)
    }

    /// Set the spatial dimension. Only allowed while the store is empty.
    pub fn set_dimension(&mut self, dimension: usize) -> Result<(), MeshIdentityError> {
        if !(1..=3).contains(&dimension) {
            return Err(MeshIdentityError::InvalidDimension(dimension));
        }
        if !self.is_empty() && self.dimension != Some(dimension) {
            return Err(MeshIdentityError::CoordinateLengthMismatch {
                expected: self.dimension.unwrap_or(0),
                found: dimension,
            });
        }
        self.dimension = Some(dimension);
        Ok(())
    }

    /// Spatial dimension, or `DimensionUnset`.
    pub fn dimension(&self) -> Result<usize, MeshIdentityError> {
        self.dimension.ok_or(MeshIdentityError::DimensionUnset)
    }

    /// Number of field values carried per DOF.
    pub fn n_fields(&self) -> usize {
        self.n_fields
    }

    pub fn my_rank(&self) -> usize {
        self.my_rank
    }

    pub fn len(&self) -> usize {
        self.rank.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rank.is_empty()
    }

    /// Grow to `n` slots, preserving existing entries.
    ///
    /// New slots get serial defaults: `glb_idx[i] = i`, `rank[i] = my_rank`,
    /// zero coordinates and fields. Never shrinks.
    pub fn resize(&mut self, n: usize) -> Result<(), MeshIdentityError> {
        let d = self.dimension()?;
        let old = self.len();
        if n <= old {
            return Ok(());
        }
        self.coords.resize(n * d, 0.0);
        self.fields.resize(n * self.n_fields, 0.0);
        self.rank.resize(n, self.my_rank);
        self.glb_idx.extend((old as GlobalIndex)..(n as GlobalIndex));
        Ok(())
    }

    /// Append one DOF and return its slot.
    pub fn push(
        &mut self,
        coords: &[f64],
        fields: &[f64],
        rank: usize,
        gid: GlobalIndex,
    ) -> Result<usize, MeshIdentityError> {
        self.check_widths(coords, fields)?;
        let slot = self.len();
        self.coords.extend_from_slice(coords);
        self.fields.extend_from_slice(fields);
        self.rank.push(rank);
        self.glb_idx.push(gid);
        Ok(slot)
    }

    fn check_widths(&self, coords: &[f64], fields: &[f64]) -> Result<(), MeshIdentityError> {
        let d = self.dimension()?;
        if coords.len() != d {
            return Err(MeshIdentityError::CoordinateLengthMismatch {
                expected: d,
                found: coords.len(),
            });
        }
        if fields.len() != self.n_fields {
            return Err(MeshIdentityError::FieldWidthMismatch {
                expected: self.n_fields,
                found: fields.len(),
            });
        }
        Ok(())
    }

    /// Append a DOF owned by this rank with a serial default index.
    pub fn push_local(&mut self, coords: &[f64]) -> Result<usize, MeshIdentityError> {
        let zeros = vec![0.0; self.n_fields];
        let gid = self.len() as GlobalIndex;
        self.push(coords, &zeros, self.my_rank, gid)
    }

    #[inline]
    fn check(&self, i: usize) {
        assert!(
            i < self.len(),
            "DOF index {i} out of range (len {})",
            self.len()
        );
    }

    /// Coordinates of slot `i`. Panics if out of range.
    pub fn coords(&self, i: usize) -> &[f64] {
        self.check(i);
        let d = self.dimension.unwrap_or(0);
        &self.coords[i * d..(i + 1) * d]
    }

    /// Fallible variant of [`coords`](Self::coords).
    pub fn try_coords(&self, i: usize) -> Result<&[f64], MeshIdentityError> {
        let d = self.dimension()?;
        if i >= self.len() {
            return Err(MeshIdentityError::IndexOutOfRange {
                kind: EntityKind::Node,
                index: i,
                len: self.len(),
            });
        }
        Ok(&self.coords[i * d..(i + 1) * d])
    }

    /// Field values of slot `i`. Panics if out of range.
    pub fn fields(&self, i: usize) -> &[f64] {
        self.check(i);
        &self.fields[i * self.n_fields..(i + 1) * self.n_fields]
    }

    /// Mutable field values of slot `i`. Panics if out of range.
    pub fn fields_mut(&mut self, i: usize) -> &mut [f64] {
        self.check(i);
        let w = self.n_fields;
        &mut self.fields[i * w..(i + 1) * w]
    }

    /// All field values, `n_fields` per slot.
    pub fn field_array_mut(&mut self) -> &mut [f64] {
        &mut self.fields
    }

    /// Flat coordinate array, `dimension` per slot.
    pub fn coord_array(&self) -> &[f64] {
        &self.coords
    }

    pub fn rank(&self, i: usize) -> usize {
        self.check(i);
        self.rank[i]
    }

    pub fn set_rank(&mut self, i: usize, rank: usize) {
        self.check(i);
        self.rank[i] = rank;
    }

    pub fn ranks(&self) -> &[usize] {
        &self.rank
    }

    pub fn glb_idx(&self, i: usize) -> GlobalIndex {
        self.check(i);
        self.glb_idx[i]
    }

    pub fn set_glb_idx(&mut self, i: usize, gid: GlobalIndex) {
        self.check(i);
        self.glb_idx[i] = gid;
    }

    pub fn glb_indices(&self) -> &[GlobalIndex] {
        &self.glb_idx
    }

    /// `true` if slot `i` is a copy owned by another rank.
    pub fn is_ghost(&self, i: usize) -> bool {
        self.rank(i) != self.my_rank
    }

    /// Number of slots owned by this rank.
    pub fn owned_count(&self) -> usize {
        self.rank.iter().filter(|&&r| r == self.my_rank).count()
    }

    /// Bounding box of all local coordinates.
    pub fn local_box(&self) -> Result<BoundingBox, MeshIdentityError> {
        let d = self.dimension()?;
        Ok(BoundingBox::from_coords(d, &self.coords))
    }

    /// Keep only the slots listed in `keep` (strictly increasing), in that order.
    pub(crate) fn retain_slots(&mut self, keep: &[usize]) {
        debug_assert!(keep.windows(2).all(|w| w[0] < w[1]));
        let d = self.dimension.unwrap_or(0);
        let w = self.n_fields;
        for (new, &old) in keep.iter().enumerate() {
            if new == old {
                continue;
            }
            self.coords.copy_within(old * d..(old + 1) * d, new * d);
            self.fields.copy_within(old * w..(old + 1) * w, new * w);
            self.rank[new] = self.rank[old];
            self.glb_idx[new] = self.glb_idx[old];
        }
        let n = keep.len();
        self.coords.truncate(n * d);
        self.fields.truncate(n * w);
        self.rank.truncate(n);
        self.glb_idx.truncate(n);
    }

    /// Overwrite coordinates and fields of slot `i`; owner and global
    /// index stay.
    pub(crate) fn overwrite(
        &mut self,
        i: usize,
        coords: &[f64],
        fields: &[f64],
    ) -> Result<(), MeshIdentityError> {
        self.check(i);
        self.check_widths(coords, fields)?;
        let (d, w) = (coords.len(), fields.len());
        self.coords[i * d..(i + 1) * d].copy_from_slice(coords);
        self.fields[i * w..(i + 1) * w].copy_from_slice(fields);
        Ok(())
    }
}

impl DebugInvariants for DofStore {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "DofStore");
    }

    fn validate_invariants(&self) -> Result<(), MeshIdentityError> {
        let n = self.len();
        let d = self.dimension.unwrap_or(0);
        if self.coords.len() != n * d {
            return Err(MeshIdentityError::CoordinateLengthMismatch {
                expected: n * d,
                found: self.coords.len(),
            });
        }
        if self.fields.len() != n * self.n_fields {
            return Err(MeshIdentityError::FieldWidthMismatch {
                expected: n * self.n_fields,
                found: self.fields.len(),
            });
        }
        check_identity_arrays(EntityKind::Node, n, &self.rank, &self.glb_idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_seeds_serial_defaults_and_only_grows() {
        let mut s = DofStore::with_dimension(2, 3, 1).unwrap();
        s.resize(4).unwrap();
        assert_eq!(s.glb_indices(), &[0, 1, 2, 3]);
        assert!(s.ranks().iter().all(|&r| r == 2));
        s.set_glb_idx(1, 42);
        s.resize(2).unwrap();
        assert_eq!(s.len(), 4);
        s.resize(5).unwrap();
        assert_eq!(s.glb_idx(1), 42);
        assert_eq!(s.glb_idx(4), 4);
        assert_eq!(s.coords(4), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn dimension_must_be_set() {
        let mut s = DofStore::new(0);
        assert_eq!(s.resize(3), Err(MeshIdentityError::DimensionUnset));
        assert_eq!(s.push_local(&[1.0]), Err(MeshIdentityError::DimensionUnset));
        assert!(s.local_box().is_err());
    }

    #[test]
    fn ghost_flag_follows_rank() {
        let mut s = DofStore::with_dimension(1, 1, 0).unwrap();
        let a = s.push_local(&[0.0]).unwrap();
        let b = s.push(&[1.0], &[], 0, 7).unwrap();
        assert!(!s.is_ghost(a));
        assert!(s.is_ghost(b));
        assert_eq!(s.owned_count(), 1);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_panics() {
        let s = DofStore::with_dimension(0, 2, 0).unwrap();
        let _ = s.coords(0);
    }

    #[test]
    fn try_coords_reports_range() {
        let s = DofStore::with_dimension(0, 2, 0).unwrap();
        assert!(matches!(
            s.try_coords(3),
            Err(MeshIdentityError::IndexOutOfRange { index: 3, len: 0, .. })
        ));
    }

    #[test]
    fn retain_slots_compacts() {
        let mut s = DofStore::with_dimension(0, 1, 1).unwrap();
        for i in 0..4 {
            let slot = s.push_local(&[i as f64]).unwrap();
            s.fields_mut(slot)[0] = 10.0 * i as f64;
        }
        s.retain_slots(&[1, 3]);
        assert_eq!(s.len(), 2);
        assert_eq!(s.coords(0), &[1.0]);
        assert_eq!(s.fields(1), &[30.0]);
        assert_eq!(s.glb_indices(), &[1, 3]);
        s.validate_invariants().unwrap();
    }

    #[test]
    fn overwrite_keeps_identity() {
        let mut s = DofStore::with_dimension(1, 2, 1).unwrap();
        let a = s.push(&[1.0, 0.0], &[0.0], 0, 9).unwrap();
        s.overwrite(a, &[1.0, 0.0], &[42.0]).unwrap();
        assert_eq!(s.fields(a), &[42.0]);
        assert_eq!((s.rank(a), s.glb_idx(a)), (0, 9));
        assert!(matches!(
            s.overwrite(a, &[1.0], &[0.0]),
            Err(MeshIdentityError::CoordinateLengthMismatch { expected: 2, found: 1 })
        ));
    }
}
