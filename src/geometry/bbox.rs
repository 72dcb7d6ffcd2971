//! Axis-aligned bounding boxes and their collective reduction.

use crate::algs::communicator::{Communicator, all_gather_pod};
use crate::mesh_error::MeshIdentityError;

/// Axis-aligned box in `dimension` coordinates.
///
/// An empty box has `min = +inf`, `max = -inf` on every axis and is the
/// identity of [`extend`](Self::extend) and of the global reduction.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BoundingBox {
    min: Vec<f64>,
    max: Vec<f64>,
}

impl BoundingBox {
    /// An empty box in `dimension` coordinates.
    pub fn empty(dimension: usize) -> Self {
        Self {
            min: vec![f64::INFINITY; dimension],
            max: vec![f64::NEG_INFINITY; dimension],
        }
    }

    /// Box spanning the given corners.
    pub fn new(min: Vec<f64>, max: Vec<f64>) -> Self {
        assert_eq!(min.len(), max.len(), "corner dimensions differ");
        Self { min, max }
    }

    /// Smallest box holding every point of a flat coordinate array.
    pub fn from_coords(dimension: usize, flat: &[f64]) -> Self {
        let mut b = Self::empty(dimension);
        if dimension > 0 {
            for x in flat.chunks_exact(dimension) {
                b.extend(x);
            }
        }
        b
    }

    pub fn dimension(&self) -> usize {
        self.min.len()
    }

    pub fn min(&self) -> &[f64] {
        &self.min
    }

    pub fn max(&self) -> &[f64] {
        &self.max
    }

    /// `true` if no point was ever added.
    pub fn is_empty(&self) -> bool {
        self.min.iter().zip(&self.max).any(|(lo, hi)| lo > hi)
    }

    /// Grow the box to include `x`.
    pub fn extend(&mut self, x: &[f64]) {
        for ((lo, hi), v) in self.min.iter_mut().zip(self.max.iter_mut()).zip(x) {
            *lo = lo.min(*v);
            *hi = hi.max(*v);
        }
    }

    /// Grow the box to include `other`.
    pub fn merge(&mut self, other: &BoundingBox) {
        for (lo, v) in self.min.iter_mut().zip(&other.min) {
            *lo = lo.min(*v);
        }
        for (hi, v) in self.max.iter_mut().zip(&other.max) {
            *hi = hi.max(*v);
        }
    }

    /// Union of every rank's box.
    ///
    /// Collective. Boxes are merged in rank order so the result is
    /// bit-identical on every rank.
    pub fn make_global<C: Communicator + ?Sized>(
        &self,
        comm: &C,
    ) -> Result<BoundingBox, MeshIdentityError> {
        if !comm.is_active() {
            return Ok(self.clone());
        }
        let d = self.dimension();
        let mut packed = Vec::with_capacity(2 * d);
        packed.extend_from_slice(&self.min);
        packed.extend_from_slice(&self.max);
        let all = all_gather_pod(comm, &packed)?;
        let mut global = BoundingBox::empty(d);
        for (src, v) in all.iter().enumerate() {
            if v.len() != 2 * d {
                return Err(MeshIdentityError::BufferSizeMismatch {
                    neighbor: src,
                    expected: 2 * d * std::mem::size_of::<f64>(),
                    got: v.len() * std::mem::size_of::<f64>(),
                });
            }
            global.merge(&BoundingBox::new(v[..d].to_vec(), v[d..].to_vec()));
        }
        Ok(global)
    }
}
