//! Element kind metadata for mesh elements.
//!
//! The set of supported kinds is closed; node count, topological dimension and
//! centroid evaluation are resolved from the variant rather than looked up by
//! name at runtime.

use crate::mesh_error::MeshIdentityError;

/// Supported element kinds (linear Lagrange shapes).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ElementKind {
    /// 0D point element.
    Point1,
    /// 1D segment with 2 nodes.
    Line2,
    /// 2D triangle with 3 nodes.
    Triangle3,
    /// 2D quadrilateral with 4 nodes.
    Quad4,
    /// 3D tetrahedron with 4 nodes.
    Tetra4,
    /// 3D pyramid with 5 nodes.
    Pyramid5,
    /// 3D wedge/prism with 6 nodes.
    Prism6,
    /// 3D hexahedron with 8 nodes.
    Hexa8,
}

impl Default for ElementKind {
    fn default() -> Self {
        ElementKind::Point1
    }
}

impl ElementKind {
    /// All kinds, in wire-tag order.
    pub const ALL: [ElementKind; 8] = [
        ElementKind::Point1,
        ElementKind::Line2,
        ElementKind::Triangle3,
        ElementKind::Quad4,
        ElementKind::Tetra4,
        ElementKind::Pyramid5,
        ElementKind::Prism6,
        ElementKind::Hexa8,
    ];

    /// Number of nodes in one element row.
    pub const fn node_count(self) -> usize {
        match self {
            ElementKind::Point1 => 1,
            ElementKind::Line2 => 2,
            ElementKind::Triangle3 => 3,
            ElementKind::Quad4 | ElementKind::Tetra4 => 4,
            ElementKind::Pyramid5 => 5,
            ElementKind::Prism6 => 6,
            ElementKind::Hexa8 => 8,
        }
    }

    /// Returns the topological dimension of the element.
    pub const fn dimension(self) -> usize {
        match self {
            ElementKind::Point1 => 0,
            ElementKind::Line2 => 1,
            ElementKind::Triangle3 | ElementKind::Quad4 => 2,
            ElementKind::Tetra4
            | ElementKind::Pyramid5
            | ElementKind::Prism6
            | ElementKind::Hexa8 => 3,
        }
    }

    /// Stable one-byte tag used in packed records.
    pub const fn wire_tag(self) -> u8 {
        match self {
            ElementKind::Point1 => 0,
            ElementKind::Line2 => 1,
            ElementKind::Triangle3 => 2,
            ElementKind::Quad4 => 3,
            ElementKind::Tetra4 => 4,
            ElementKind::Pyramid5 => 5,
            ElementKind::Prism6 => 6,
            ElementKind::Hexa8 => 7,
        }
    }

    /// Inverse of [`wire_tag`](Self::wire_tag).
    pub fn from_wire_tag(tag: u8) -> Result<Self, MeshIdentityError> {
        Self::ALL
            .get(tag as usize)
            .copied()
            .ok_or_else(|| MeshIdentityError::Decode(format!("unknown element tag {tag}")))
    }

    /// Vertex-average centroid of an element.
    ///
    /// `node_coords` yields one coordinate slice per node, in connectivity
    /// order. Summation follows that order, so two ranks holding the same
    /// element with the same connectivity obtain bit-identical centroids.
    pub fn centroid<'a, I>(self, dimension: usize, node_coords: I) -> Vec<f64>
    where
        I: IntoIterator<Item = &'a [f64]>,
    {
        let mut c = vec![0.0; dimension];
        let mut n = 0usize;
        for x in node_coords {
            for (acc, v) in c.iter_mut().zip(x) {
                *acc += *v;
            }
            n += 1;
        }
        debug_assert_eq!(n, self.node_count());
        if n > 0 {
            let inv = 1.0 / n as f64;
            for acc in &mut c {
                *acc *= inv;
            }
        }
        c
    }

    /// Check that a connectivity row has the expected length.
    pub fn check_row(self, len: usize) -> Result<(), MeshIdentityError> {
        if len == self.node_count() {
            Ok(())
        } else {
            Err(MeshIdentityError::NodeCountMismatch {
                kind: self,
                expected: self.node_count(),
                found: len,
            })
        }
    }
}
