//! Configuration of identity passes.

use crate::geometry::hilbert::max_bits;
use crate::mesh_error::MeshIdentityError;

/// How node and element global indices share the index space.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberingMode {
    /// One contiguous space: each rank's block holds its owned nodes, then its
    /// owned elements. Node and element indices never coincide.
    #[default]
    Combined,
    /// Nodes and elements are numbered independently from zero.
    Separate,
}

/// Layout of the global → local lookup.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStrategy {
    /// Sorted `(gid, slot)` vector searched by bisection.
    #[default]
    Sorted,
    /// Hash map.
    Hashed,
}

/// Options for structural rebuilds and renumbering.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Hilbert precision per axis; `None` picks the largest that fits 64 bits.
    pub hash_bits: Option<u32>,
    pub numbering: NumberingMode,
    /// Reject distinct entities that share a spatial hash.
    pub debug_duplicate_check: bool,
    pub lookup: LookupStrategy,
    /// Upper bound on ownership reconciliation rounds.
    pub max_reconcile_rounds: usize,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            hash_bits: None,
            numbering: NumberingMode::Combined,
            debug_duplicate_check: false,
            lookup: LookupStrategy::Sorted,
            max_reconcile_rounds: 8,
        }
    }
}

impl IdentityConfig {
    pub fn with_hash_bits(mut self, bits: u32) -> Self {
        self.hash_bits = Some(bits);
        self
    }

    pub fn with_numbering(mut self, numbering: NumberingMode) -> Self {
        self.numbering = numbering;
        self
    }

    pub fn with_debug_duplicate_check(mut self, on: bool) -> Self {
        self.debug_duplicate_check = on;
        self
    }

    pub fn with_lookup(mut self, lookup: LookupStrategy) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn with_max_reconcile_rounds(mut self, rounds: usize) -> Self {
        self.max_reconcile_rounds = rounds;
        self
    }

    /// Hash precision for `dimension`, validated.
    pub fn bits_for(&self, dimension: usize) -> Result<u32, MeshIdentityError> {
        if !(1..=3).contains(&dimension) {
            return Err(MeshIdentityError::InvalidDimension(dimension));
        }
        let max = max_bits(dimension);
        let bits = self.hash_bits.unwrap_or(max);
        if bits == 0 || bits > max {
            return Err(MeshIdentityError::InvalidHashPrecision {
                bits,
                dimension,
                max,
            });
        }
        Ok(bits)
    }

    /// Report configuration errors for a mesh of `dimension`.
    pub fn validate(&self, dimension: usize) -> Result<(), MeshIdentityError> {
        self.bits_for(dimension)?;
        if self.max_reconcile_rounds == 0 {
            return Err(MeshIdentityError::ReconcileDidNotConverge { rounds: 0 });
        }
        Ok(())
    }
}
