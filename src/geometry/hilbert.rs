//! Spatial hashing of coordinates onto a Hilbert curve.
//!
//! A [`SpatialHashIndex`] splits the process-wide bounding box into `2^bits`
//! cells per axis and maps a coordinate to the Hilbert index of the cell that
//! contains it. Two bit-identical coordinates hash identically on every rank,
//! because every rank holds the same reduced box. Coordinates closer than one
//! cell may alias; callers treat the hash as a fingerprint, never as identity.
//!
//! The cell → curve mapping follows J. Skilling, "Programming the Hilbert
//! curve", AIP Conf. Proc. 707 (2004): axes are converted to the transposed
//! Hilbert representation in place and the bits are then interleaved.

use crate::geometry::bbox::BoundingBox;
use crate::mesh_error::MeshIdentityError;

/// Upper bound on bits per axis regardless of dimension.
pub const MAX_BITS_PER_AXIS: u32 = 32;

/// Largest precision usable in `dimension` axes with a 64-bit index.
pub const fn max_bits(dimension: usize) -> u32 {
    if dimension == 0 {
        return 0;
    }
    let b = 64 / dimension as u32;
    if b > MAX_BITS_PER_AXIS {
        MAX_BITS_PER_AXIS
    } else {
        b
    }
}

/// Deterministic coordinate → `u64` fingerprint over a fixed box.
#[derive(Clone, Debug)]
pub struct SpatialHashIndex {
    origin: Vec<f64>,
    // cells per unit length on each axis; 0 for a degenerate axis
    scale: Vec<f64>,
    bits: u32,
}

impl SpatialHashIndex {
    /// Build an index over `bbox` with `bits` of precision per axis.
    pub fn new(bbox: &BoundingBox, bits: u32) -> Result<Self, MeshIdentityError> {
        let dimension = bbox.dimension();
        if !(1..=3).contains(&dimension) {
            return Err(MeshIdentityError::InvalidDimension(dimension));
        }
        let max = max_bits(dimension);
        if bits == 0 || bits > max {
            return Err(MeshIdentityError::InvalidHashPrecision {
                bits,
                dimension,
                max,
            });
        }
        let cells = (1u64 << bits) as f64;
        let mut origin = Vec::with_capacity(dimension);
        let mut scale = Vec::with_capacity(dimension);
        for (&lo, &hi) in bbox.min().iter().zip(bbox.max()) {
            let extent = hi - lo;
            if bbox.is_empty() || !(extent > 0.0) || !extent.is_finite() {
                origin.push(if lo.is_finite() { lo } else { 0.0 });
                scale.push(0.0);
            } else {
                origin.push(lo);
                scale.push(cells / extent);
            }
        }
        Ok(Self {
            origin,
            scale,
            bits,
        })
    }

    /// Index with the default precision for the box's dimension.
    pub fn with_default_bits(bbox: &BoundingBox) -> Result<Self, MeshIdentityError> {
        Self::new(bbox, max_bits(bbox.dimension()))
    }

    pub fn dimension(&self) -> usize {
        self.origin.len()
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Integer cell coordinates of `x`, clamped into the grid.
    pub fn cell(&self, x: &[f64]) -> Vec<u64> {
        debug_assert_eq!(x.len(), self.dimension());
        let top = (1u64 << self.bits) - 1;
        x.iter()
            .zip(self.origin.iter().zip(&self.scale))
            .map(|(&v, (&o, &s))| {
                let t = (v - o) * s;
                if t.is_nan() || t <= 0.0 {
                    0
                } else if t >= top as f64 {
                    top
                } else {
                    t as u64
                }
            })
            .collect()
    }

    /// Hilbert index of the cell containing `x`.
    pub fn hash(&self, x: &[f64]) -> u64 {
        let mut cell = self.cell(x);
        hilbert_index(&mut cell, self.bits)
    }
}

/// Hilbert index of integer cell coordinates with `bits` bits per axis.
///
/// `axes` is consumed as scratch space.
pub fn hilbert_index(axes: &mut [u64], bits: u32) -> u64 {
    axes_to_transpose(axes, bits);
    let mut h = 0u64;
    for b in (0..bits).rev() {
        for x in axes.iter() {
            h = (h << 1) | ((x >> b) & 1);
        }
    }
    h
}

fn axes_to_transpose(x: &mut [u64], bits: u32) {
    let n = x.len();
    if n == 0 || bits == 0 {
        return;
    }
    let m = 1u64 << (bits - 1);

    // inverse undo
    let mut q = m;
    while q > 1 {
        let p = q - 1;
        for i in 0..n {
            if x[i] & q != 0 {
                x[0] ^= p;
            } else {
                let t = (x[0] ^ x[i]) & p;
                x[0] ^= t;
                x[i] ^= t;
            }
        }
        q >>= 1;
    }

    // gray encode
    for i in 1..n {
        x[i] ^= x[i - 1];
    }
    let mut t = 0u64;
    let mut q = m;
    while q > 1 {
        if x[n - 1] & q != 0 {
            t ^= q - 1;
        }
        q >>= 1;
    }
    for v in x.iter_mut() {
        *v ^= t;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn grid_2d(bits: u32) -> Vec<(u64, u64, u64)> {
        let n = 1u64 << bits;
        let mut out = Vec::new();
        for i in 0..n {
            for j in 0..n {
                let mut a = [i, j];
                out.push((hilbert_index(&mut a, bits), i, j));
            }
        }
        out.sort_unstable();
        out
    }

    #[test]
    fn first_order_curve() {
        let cells = grid_2d(1);
        let order: Vec<(u64, u64)> = cells.iter().map(|&(_, i, j)| (i, j)).collect();
        assert_eq!(order, vec![(0, 0), (0, 1), (1, 1), (1, 0)]);
    }

    #[test]
    fn bijective_and_continuous_in_2d() {
        let cells = grid_2d(3);
        for (k, &(h, _, _)) in cells.iter().enumerate() {
            assert_eq!(h, k as u64);
        }
        for w in cells.windows(2) {
            let (_, i0, j0) = w[0];
            let (_, i1, j1) = w[1];
            assert_eq!(i0.abs_diff(i1) + j0.abs_diff(j1), 1);
        }
    }

    #[test]
    fn bijective_and_continuous_in_3d() {
        let bits = 2;
        let n = 1u64 << bits;
        let mut cells = Vec::new();
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    let mut a = [i, j, k];
                    cells.push((hilbert_index(&mut a, bits), [i, j, k]));
                }
            }
        }
        cells.sort_unstable();
        let distinct: HashSet<u64> = cells.iter().map(|c| c.0).collect();
        assert_eq!(distinct.len(), cells.len());
        for w in cells.windows(2) {
            let d: u64 = (0..3).map(|a| w[0].1[a].abs_diff(w[1].1[a])).sum();
            assert_eq!(d, 1);
        }
    }

    #[test]
    fn identical_coordinates_hash_identically() {
        let bbox = BoundingBox::new(vec![0.0, 0.0, 0.0], vec![1.0, 2.0, 3.0]);
        let idx = SpatialHashIndex::with_default_bits(&bbox).unwrap();
        assert_eq!(idx.bits(), 21);
        let x = [0.25, 1.125, 2.0];
        assert_eq!(idx.hash(&x), idx.clone().hash(&x.to_vec()));
        assert_ne!(idx.hash(&x), idx.hash(&[0.75, 1.125, 2.0]));
    }

    #[test]
    fn degenerate_axis_and_clamping() {
        let bbox = BoundingBox::new(vec![0.0, 5.0], vec![1.0, 5.0]);
        let idx = SpatialHashIndex::new(&bbox, 4).unwrap();
        assert_eq!(idx.cell(&[0.5, 5.0]), vec![8, 0]);
        assert_eq!(idx.cell(&[-3.0, 9.0]), vec![0, 0]);
        assert_eq!(idx.cell(&[1.0, 5.0]), vec![15, 0]);
    }

    #[test]
    fn precision_bounds() {
        let bbox = BoundingBox::new(vec![0.0; 3], vec![1.0; 3]);
        assert!(SpatialHashIndex::new(&bbox, 22).is_err());
        assert!(SpatialHashIndex::new(&bbox, 0).is_err());
        assert_eq!(max_bits(1), 32);
        assert_eq!(max_bits(2), 32);
    }
}
