//! MeshIdentityError: unified error type for mesh-identity public APIs
//!
//! Every failure in this crate is treated as an unrecoverable defect: identity
//! errors propagate silently into wrong simulation results if tolerated, and a
//! failed collective has already advanced communication on the other ranks.
//! [`ErrorKind`] classifies variants for callers that want to report them.

use crate::adapt::AdaptorState;
use crate::data::element_store::IndexSpace;
use crate::topology::cell_type::ElementKind;
use crate::topology::EntityKind;
use thiserror::Error;

/// Coarse classification of a [`MeshIdentityError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// An operation was invoked before the required setup.
    Configuration,
    /// Distributed identity state is inconsistent; the job must abort.
    Consistency,
    /// The API was misused (bad index, wrong state-machine state).
    Programmer,
}

/// Unified error type for mesh-identity operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshIdentityError {
    // ----- configuration ---------------------------------------------------
    /// Coordinates were accessed before the spatial dimension was set.
    #[error("spatial dimension is not set")]
    DimensionUnset,
    /// Spatial dimension outside the supported range.
    #[error("invalid spatial dimension {0}; expected 1..=3")]
    InvalidDimension(usize),
    /// Hash precision does not fit the 64-bit curve index.
    #[error("invalid hash precision: {bits} bits per axis in dimension {dimension} (max {max})")]
    InvalidHashPrecision {
        bits: u32,
        dimension: usize,
        max: u32,
    },
    /// Connectivity was in the wrong index space for the requested operation.
    #[error("element connectivity is in {found:?} index space, expected {expected:?}")]
    ConnectivitySpace {
        expected: IndexSpace,
        found: IndexSpace,
    },
    /// An element row does not match its kind's node count.
    #[error("element kind {kind:?} expects {expected} nodes, got {found}")]
    NodeCountMismatch {
        kind: ElementKind,
        expected: usize,
        found: usize,
    },
    /// A coordinate slice had the wrong length.
    #[error("coordinate has {found} components, store dimension is {expected}")]
    CoordinateLengthMismatch { expected: usize, found: usize },
    /// A field-value slice had the wrong length.
    #[error("field slice has {found} values, store width is {expected}")]
    FieldWidthMismatch { expected: usize, found: usize },
    /// A per-rank list did not have one entry per rank.
    #[error("expected one entry per rank ({expected}), got {found}")]
    RankCountMismatch { expected: usize, found: usize },

    // ----- consistency -----------------------------------------------------
    /// Two physically distinct entities produced the same spatial hash.
    #[error("spatial hash collision: {kind:?} slots {first} and {second} share hash {hash:#018x}")]
    DuplicateHash {
        kind: EntityKind,
        hash: u64,
        first: usize,
        second: usize,
    },
    /// An element references a node that no longer exists.
    #[error("element {element} references node {node} which was removed or never existed")]
    DanglingConnectivity { element: usize, node: u64 },
    /// A ghost copy did not receive a global index from its owner.
    #[error("{kind:?} slot {slot} (hash {hash:#018x}, owner {owner}) has no global index after reconciliation")]
    UnresolvedGhost {
        kind: EntityKind,
        slot: usize,
        hash: u64,
        owner: usize,
    },
    /// The same global index is held by two local slots.
    #[error("global index {gid} held by both {kind:?} slots {first} and {second}")]
    DuplicateGlobalIndex {
        kind: EntityKind,
        gid: u64,
        first: usize,
        second: usize,
    },
    /// The adaptor's queued edits disagree with the store at `finish()`.
    #[error("adaptor buffer mismatch: {0}")]
    AdaptorBufferMismatch(String),
    /// Ownership reconciliation kept changing after the configured round limit.
    #[error("ownership reconciliation did not converge after {rounds} rounds")]
    ReconcileDidNotConverge { rounds: usize },
    /// A rank value outside `0..size` was found.
    #[error("{kind:?} slot {slot} has owner rank {rank}, communicator size is {size}")]
    RankOutOfRange {
        kind: EntityKind,
        slot: usize,
        rank: usize,
        size: usize,
    },
    /// Communication with a peer failed.
    #[error("communication error with rank {neighbor}: {reason}")]
    CommError { neighbor: usize, reason: String },
    /// A received buffer had an unexpected size.
    #[error("buffer size mismatch from rank {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// A packed buffer carried an unknown wire version.
    #[error("wire version {found} not supported (expected {expected})")]
    WireVersion { found: u16, expected: u16 },
    /// A packed record could not be decoded.
    #[error("failed to decode packed record: {0}")]
    Decode(String),
    /// Collective identity verification found a violation.
    #[error("identity verification failed: {0}")]
    IdentityMismatch(String),
    /// A collective step failed on another rank; this rank stops with it.
    #[error("collective step failed on rank {rank}")]
    RemoteFailure { rank: usize },

    // ----- programmer ------------------------------------------------------
    /// An entity slot was out of range.
    #[error("{kind:?} index {index} out of range (len {len})")]
    IndexOutOfRange {
        kind: EntityKind,
        index: usize,
        len: usize,
    },
    /// An adaptor operation was called in the wrong state.
    #[error("adaptor operation `{op}` is not allowed in state {state:?}")]
    InvalidAdaptorState {
        op: &'static str,
        state: AdaptorState,
    },
}

impl MeshIdentityError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        use MeshIdentityError::*;
        match self {
            DimensionUnset
            | InvalidDimension(_)
            | InvalidHashPrecision { .. }
            | ConnectivitySpace { .. }
            | NodeCountMismatch { .. }
            | CoordinateLengthMismatch { .. }
            | FieldWidthMismatch { .. }
            | RankCountMismatch { .. } => ErrorKind::Configuration,
            DuplicateHash { .. }
            | DanglingConnectivity { .. }
            | UnresolvedGhost { .. }
            | DuplicateGlobalIndex { .. }
            | AdaptorBufferMismatch(_)
            | ReconcileDidNotConverge { .. }
            | RankOutOfRange { .. }
            | CommError { .. }
            | BufferSizeMismatch { .. }
            | WireVersion { .. }
            | Decode(_)
            | IdentityMismatch(_)
            | RemoteFailure { .. } => ErrorKind::Consistency,
            IndexOutOfRange { .. } | InvalidAdaptorState { .. } => ErrorKind::Programmer,
        }
    }

    /// Every error aborts the job; there is no retryable category.
    pub fn is_fatal(&self) -> bool {
        true
    }
}
