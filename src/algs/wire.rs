//! Fixed, versioned, little-endian wire types for identity exchanges.

use crate::mesh_error::MeshIdentityError;
use bytemuck::{Pod, Zeroable};
use std::mem::{align_of, size_of};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Copy a received byte buffer into a freshly allocated record vector.
///
/// Received buffers carry no alignment guarantee, so records are copied
/// rather than reinterpreted in place.
pub fn decode_records<T: Pod>(src: usize, bytes: &[u8]) -> Result<Vec<T>, MeshIdentityError> {
    let sz = size_of::<T>();
    if sz == 0 || bytes.len() % sz != 0 {
        return Err(MeshIdentityError::BufferSizeMismatch {
            neighbor: src,
            expected: bytes.len() - bytes.len() % sz.max(1),
            got: bytes.len(),
        });
    }
    let mut out = vec![T::zeroed(); bytes.len() / sz];
    cast_slice_mut(&mut out).copy_from_slice(bytes);
    Ok(out)
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// All multi-byte integers in these structs are **little-endian** on the wire.
/// We store them pre-LE with `.to_le()` and decode with `.from_le()`.

// ===== Common records ======================================================

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16, // = WIRE_VERSION.to_le()
    pub kind_le: u16,    // see `WireKind`
    pub count_le: u32,   // number of following records
}

/// Payload kinds carried behind a [`WireHdr`].
#[repr(u16)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WireKind {
    /// Packed node and element records of a migration.
    Migration = 1,
}

impl WireHdr {
    pub const SIZE: usize = 8;

    pub fn new(kind: WireKind, count: usize) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: (kind as u16).to_le(),
            count_le: (count as u32).to_le(),
        }
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn count(&self) -> usize {
        u32::from_le(self.count_le) as usize
    }

    /// Check version and kind of a decoded header.
    pub fn expect(&self, kind: WireKind) -> Result<(), MeshIdentityError> {
        if self.version() != WIRE_VERSION {
            return Err(MeshIdentityError::WireVersion {
                found: self.version(),
                expected: WIRE_VERSION,
            });
        }
        if self.kind() != kind as u16 {
            return Err(MeshIdentityError::Decode(format!(
                "expected payload kind {}, got {}",
                kind as u16,
                self.kind()
            )));
        }
        Ok(())
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u64,
}
impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

/// A `(spatial hash, candidate owner rank)` pair used by rank reconciliation.
/// NOTE: `rank_le` is u32 (never usize) on the wire.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireHashRank {
    pub hash_le: u64,
    pub rank_le: u32,
    pub _pad: u32, // pad to 8-byte alignment (explicit)
}
impl WireHashRank {
    pub const SIZE: usize = 16;
    pub fn new(hash: u64, rank: usize) -> Self {
        Self {
            hash_le: hash.to_le(),
            rank_le: (rank as u32).to_le(),
            _pad: 0,
        }
    }
    pub fn hash(&self) -> u64 {
        u64::from_le(self.hash_le)
    }
    pub fn rank(&self) -> usize {
        u32::from_le(self.rank_le) as usize
    }
}

/// A `(spatial hash, global index)` pair published by an owning rank.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHashIndex {
    pub hash_le: u64,
    pub gid_le: u64,
}
impl WireHashIndex {
    pub fn new(hash: u64, gid: u64) -> Self {
        Self {
            hash_le: hash.to_le(),
            gid_le: gid.to_le(),
        }
    }
    pub fn hash(&self) -> u64 {
        u64::from_le(self.hash_le)
    }
    pub fn gid(&self) -> u64 {
        u64::from_le(self.gid_le)
    }
}

/// A `(global index, owner rank, ghost flag)` triple used by verification.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireOwnership {
    pub gid_le: u64,
    pub rank_le: u32,
    pub ghost_le: u32,
}
impl WireOwnership {
    pub fn new(gid: u64, rank: usize, ghost: bool) -> Self {
        Self {
            gid_le: gid.to_le(),
            rank_le: (rank as u32).to_le(),
            ghost_le: u32::from(ghost).to_le(),
        }
    }
    pub fn gid(&self) -> u64 {
        u64::from_le(self.gid_le)
    }
    pub fn rank(&self) -> usize {
        u32::from_le(self.rank_le) as usize
    }
    pub fn is_ghost(&self) -> bool {
        u32::from_le(self.ghost_le) != 0
    }
}

/// A `(global index, new owner)` pair announced after a migration so that
/// ranks holding ghost copies drop the previous owner.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireHandoff {
    pub gid_le: u64,
    pub rank_le: u32,
    pub element_le: u32, // 1 for an element, 0 for a node
}
impl WireHandoff {
    pub fn node(gid: u64, rank: usize) -> Self {
        Self::new(gid, rank, false)
    }
    pub fn element(gid: u64, rank: usize) -> Self {
        Self::new(gid, rank, true)
    }
    fn new(gid: u64, rank: usize, element: bool) -> Self {
        Self {
            gid_le: gid.to_le(),
            rank_le: (rank as u32).to_le(),
            element_le: u32::from(element).to_le(),
        }
    }
    pub fn gid(&self) -> u64 {
        u64::from_le(self.gid_le)
    }
    pub fn rank(&self) -> usize {
        u32::from_le(self.rank_le) as usize
    }
    pub fn is_element(&self) -> bool {
        u32::from_le(self.element_le) != 0
    }
}

// ===== Compile-time sanity checks =========================================

static_assertions::assert_eq_size!(WireHdr, [u8; WireHdr::SIZE]);
static_assertions::assert_eq_size!(WireHashRank, [u8; WireHashRank::SIZE]);

const _: () = {
    // Pod/Zeroable ensures no padding contains uninit when cast to bytes.
    assert!(size_of::<WireCount>() == 8);
    assert!(size_of::<WireHashIndex>() == 16);
    assert!(size_of::<WireOwnership>() == 16);
    assert!(size_of::<WireHandoff>() == 16);
    assert!(align_of::<WireHashRank>() == 8);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_rank_decodes_from_unaligned_bytes() {
        let v = vec![WireHashRank::new(0xABCD, 3), WireHashRank::new(7, 0)];
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(cast_slice(&v));
        let out: Vec<WireHashRank> = decode_records(1, &bytes[1..]).unwrap();
        assert_eq!(out[0].hash(), 0xABCD);
        assert_eq!(out[0].rank(), 3);
        assert_eq!(out[1].rank(), 0);
    }

    #[test]
    fn ragged_buffer_rejected() {
        let err = decode_records::<WireHashIndex>(2, &[0u8; 17]).unwrap_err();
        assert!(matches!(
            err,
            MeshIdentityError::BufferSizeMismatch { neighbor: 2, got: 17, .. }
        ));
    }

    #[test]
    fn version_guard() {
        let hdr = WireHdr::new(WireKind::Migration, 4);
        assert_eq!(hdr.version(), WIRE_VERSION);
        assert_eq!(hdr.count(), 4);
        assert!(hdr.expect(WireKind::Migration).is_ok());
        let mut bad = hdr;
        bad.version_le = 9u16.to_le();
        assert!(matches!(
            bad.expect(WireKind::Migration),
            Err(MeshIdentityError::WireVersion { found: 9, .. })
        ));
    }
}
