//! Collective stages of an identity pass.
//!
//! 1. [`reconcile_ranks`]: every rank publishes `(hash, candidate rank)` for
//!    its entities; each entity's owner becomes the minimum rank reported for
//!    its hash by any participant. Rounds repeat until no rank changes.
//! 2. [`exchange_owned_counts`] + [`block_offsets`]: prefix sums over lower
//!    ranks give each rank the start of its owned block.
//! 3. [`resolve_ghost_indices`]: owners publish `(hash, gid)`; ghost copies
//!    pick up the index announced by their owner.
//!
//! Every function here is collective when the communicator is active.

use itertools::Itertools;
use log::trace;
use std::collections::HashMap;
use std::mem::size_of;

use crate::algs::communicator::{Communicator, agree, all_gather_pod, any_rank};
use crate::algs::wire::{WireCount, WireHashIndex, WireHashRank};
use crate::config::NumberingMode;
use crate::data::dof_store::{GlobalIndex, UNSET_INDEX};
use crate::mesh_error::MeshIdentityError;
use crate::topology::EntityKind;

/// Local hash → slots lookup (hashes may alias, so several slots per hash).
fn slots_by_hash<I>(hashes: I) -> HashMap<u64, Vec<usize>>
where
    I: IntoIterator<Item = (usize, u64)>,
{
    hashes.into_iter().map(|(slot, h)| (h, slot)).into_group_map()
}

/// Lower every candidate rank to the minimum reported for the same hash.
///
/// Ties always go to the smallest rank, independent of message order.
/// Returns the number of rounds run (0 when the communicator is inactive).
pub fn reconcile_ranks<C: Communicator + ?Sized>(
    comm: &C,
    kind: EntityKind,
    hashes: &[u64],
    ranks: &mut [usize],
    max_rounds: usize,
) -> Result<usize, MeshIdentityError> {
    debug_assert_eq!(hashes.len(), ranks.len());
    if !comm.is_active() {
        return Ok(0);
    }
    let me = comm.rank();
    let index = slots_by_hash(hashes.iter().copied().enumerate());
    let mut rounds = 0;
    loop {
        if rounds >= max_rounds {
            return Err(MeshIdentityError::ReconcileDidNotConverge { rounds });
        }
        rounds += 1;
        let pairs: Vec<WireHashRank> = hashes
            .iter()
            .zip(ranks.iter())
            .map(|(&h, &r)| WireHashRank::new(h, r))
            .collect();
        let all = all_gather_pod(comm, &pairs)?;
        let mut lowered = 0usize;
        for (src, list) in all.iter().enumerate() {
            if src == me {
                continue;
            }
            for p in list {
                if let Some(slots) = index.get(&p.hash()) {
                    for &s in slots {
                        if p.rank() < ranks[s] {
                            ranks[s] = p.rank();
                            lowered += 1;
                        }
                    }
                }
            }
        }
        trace!("[rank {me}] {kind:?} reconcile round {rounds}: lowered {lowered} owners");
        if !any_rank(comm, lowered > 0)? {
            return Ok(rounds);
        }
    }
}

/// Fail if any owner rank lies outside the communicator.
pub fn check_rank_range(
    kind: EntityKind,
    ranks: &[usize],
    size: usize,
) -> Result<(), MeshIdentityError> {
    match ranks.iter().position(|&r| r >= size) {
        Some(slot) => Err(MeshIdentityError::RankOutOfRange {
            kind,
            slot,
            rank: ranks[slot],
            size,
        }),
        None => Ok(()),
    }
}

/// All-gather `[owned nodes, owned elements]` from every rank.
pub fn exchange_owned_counts<C: Communicator + ?Sized>(
    comm: &C,
    owned_nodes: usize,
    owned_elements: usize,
) -> Result<Vec<[u64; 2]>, MeshIdentityError> {
    if !comm.is_active() {
        return Ok(vec![[owned_nodes as u64, owned_elements as u64]]);
    }
    let mine = [WireCount::new(owned_nodes), WireCount::new(owned_elements)];
    let all = all_gather_pod(comm, &mine)?;
    all.into_iter()
        .enumerate()
        .map(|(src, v)| match v.as_slice() {
            [n, e] => Ok([n.get() as u64, e.get() as u64]),
            _ => Err(MeshIdentityError::BufferSizeMismatch {
                neighbor: src,
                expected: 2 * size_of::<WireCount>(),
                got: v.len() * size_of::<WireCount>(),
            }),
        })
        .collect()
}

/// Start of this rank's node and element blocks, plus global totals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockOffsets {
    pub node_start: GlobalIndex,
    pub element_start: GlobalIndex,
    pub node_total: u64,
    pub element_total: u64,
}

/// Prefix sums over lower ranks' owned counts.
pub fn block_offsets(counts: &[[u64; 2]], my_rank: usize, mode: NumberingMode) -> BlockOffsets {
    let below = &counts[..my_rank];
    let nodes_below: u64 = below.iter().map(|c| c[0]).sum();
    let elems_below: u64 = below.iter().map(|c| c[1]).sum();
    let node_total: u64 = counts.iter().map(|c| c[0]).sum();
    let element_total: u64 = counts.iter().map(|c| c[1]).sum();
    match mode {
        NumberingMode::Combined => {
            let start = nodes_below + elems_below;
            BlockOffsets {
                node_start: start,
                element_start: start + counts[my_rank][0],
                node_total,
                element_total,
            }
        }
        NumberingMode::Separate => BlockOffsets {
            node_start: nodes_below,
            element_start: elems_below,
            node_total,
            element_total,
        },
    }
}

/// Sequential indices for owned slots starting at `start`; ghosts unset.
pub fn number_owned(ranks: &[usize], my_rank: usize, start: GlobalIndex) -> Vec<GlobalIndex> {
    let mut next = start;
    ranks
        .iter()
        .map(|&r| {
            if r == my_rank {
                next += 1;
                next - 1
            } else {
                UNSET_INDEX
            }
        })
        .collect()
}

/// Fill ghost indices from the `(hash, gid)` pairs published by owners.
///
/// A ghost that no owner announces is an `UnresolvedGhost` error; the other
/// ranks then fail with `RemoteFailure` instead of moving on alone.
pub fn resolve_ghost_indices<C: Communicator + ?Sized>(
    comm: &C,
    kind: EntityKind,
    hashes: &[u64],
    ranks: &[usize],
    gids: &mut [GlobalIndex],
) -> Result<(), MeshIdentityError> {
    let me = comm.rank();
    if comm.is_active() {
        let owned: Vec<WireHashIndex> = hashes
            .iter()
            .zip(ranks)
            .zip(gids.iter())
            .filter(|&((_, &r), _)| r == me)
            .map(|((&h, _), &g)| WireHashIndex::new(h, g))
            .collect();
        let all = all_gather_pod(comm, &owned)?;
        let ghosts = slots_by_hash(
            hashes
                .iter()
                .copied()
                .enumerate()
                .filter(|&(s, _)| ranks[s] != me),
        );
        for (src, list) in all.iter().enumerate() {
            if src == me {
                continue;
            }
            for p in list {
                if let Some(slots) = ghosts.get(&p.hash()) {
                    for &s in slots.iter().filter(|&&s| ranks[s] == src) {
                        gids[s] = p.gid();
                    }
                }
            }
        }
    }
    let unresolved = match gids.iter().position(|&g| g == UNSET_INDEX) {
        Some(slot) => Err(MeshIdentityError::UnresolvedGhost {
            kind,
            slot,
            hash: hashes[slot],
            owner: ranks[slot],
        }),
        None => Ok(()),
    };
    agree(comm, unresolved)
}
