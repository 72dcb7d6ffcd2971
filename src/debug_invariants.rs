//! Invariant checks for the local stores and the mesh fragment.

use crate::mesh_error::MeshIdentityError;
use crate::topology::EntityKind;

/// Trait for validating data structure invariants.
pub trait DebugInvariants {
    /// Assert invariants in debug builds or when `strict-invariants` is enabled.
    fn debug_assert_invariants(&self);
    /// Validate invariants and return the first error encountered.
    fn validate_invariants(&self) -> Result<(), MeshIdentityError>;
}

/// Every per-entity identity array must hold exactly `len` entries.
pub(crate) fn check_identity_arrays(
    kind: EntityKind,
    len: usize,
    ranks: &[usize],
    glb_idx: &[u64],
) -> Result<(), MeshIdentityError> {
    for n in [ranks.len(), glb_idx.len()] {
        if n != len {
            return Err(MeshIdentityError::IndexOutOfRange {
                kind,
                index: n,
                len,
            });
        }
    }
    Ok(())
}

/// Run a fallible check and panic on error when invariant checking is enabled.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "strict-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("[invariants] ", $($ctx)*, ": {}"), e);
        }
    };
}
