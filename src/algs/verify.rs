//! Collective consistency check of assigned identities.
//!
//! Every rank publishes `(gid, owner rank, ghost flag)` for all of its nodes
//! and elements; each rank then checks, for the whole mesh:
//!
//! - no slot is left without a global index and no owner lies outside the
//!   communicator,
//! - every global index has exactly one non-ghost copy, on its owner rank,
//! - all copies of a global index agree on the owner,
//! - owned indices are dense: `0..n` per entity kind, or one `0..n_nodes +
//!   n_elements` range with nodes and elements disjoint under
//!   [`NumberingMode::Combined`].
//!
//! This gathers the full ownership table on every rank, so it is intended
//! for tests and debugging runs.

use std::collections::BTreeMap;

use crate::algs::communicator::{Communicator, all_gather_pod};
use crate::algs::wire::WireOwnership;
use crate::config::NumberingMode;
use crate::data::dof_store::{GlobalIndex, UNSET_INDEX};
use crate::mesh::DistributedMesh;
use crate::mesh_error::MeshIdentityError;
use crate::topology::EntityKind;

fn mismatch(msg: String) -> MeshIdentityError {
    MeshIdentityError::IdentityMismatch(msg)
}

fn local_table(
    kind: EntityKind,
    ranks: &[usize],
    gids: &[GlobalIndex],
    my_rank: usize,
    size: usize,
) -> Result<Vec<WireOwnership>, MeshIdentityError> {
    ranks
        .iter()
        .zip(gids)
        .enumerate()
        .map(|(slot, (&r, &g))| {
            if g == UNSET_INDEX {
                return Err(mismatch(format!(
                    "rank {my_rank}: {kind:?} slot {slot} has no global index"
                )));
            }
            if r >= size {
                return Err(MeshIdentityError::RankOutOfRange {
                    kind,
                    slot,
                    rank: r,
                    size,
                });
            }
            Ok(WireOwnership::new(g, r, r != my_rank))
        })
        .collect()
}

/// Check one entity kind; returns the sorted owned global indices.
fn check_kind(
    kind: EntityKind,
    tables: &[Vec<WireOwnership>],
) -> Result<Vec<GlobalIndex>, MeshIdentityError> {
    // gid -> (owner rank seen first, non-ghost holders)
    let mut seen: BTreeMap<GlobalIndex, (usize, Vec<usize>)> = BTreeMap::new();
    for (src, table) in tables.iter().enumerate() {
        for rec in table {
            let entry = seen.entry(rec.gid()).or_insert((rec.rank(), Vec::new()));
            if entry.0 != rec.rank() {
                return Err(mismatch(format!(
                    "{kind:?} {} has owners {} and {} on different ranks",
                    rec.gid(),
                    entry.0,
                    rec.rank()
                )));
            }
            if !rec.is_ghost() {
                entry.1.push(src);
            }
        }
    }
    for (gid, (owner, holders)) in &seen {
        match holders.as_slice() {
            [h] if h == owner => {}
            [] => {
                return Err(mismatch(format!(
                    "{kind:?} {gid} has no owned copy (owner {owner})"
                )));
            }
            _ => {
                return Err(mismatch(format!(
                    "{kind:?} {gid} is owned on ranks {holders:?}, expected only {owner}"
                )));
            }
        }
    }
    Ok(seen.into_keys().collect())
}

fn check_dense(kind: &str, gids: &[GlobalIndex]) -> Result<(), MeshIdentityError> {
    match gids.iter().enumerate().find(|&(i, &g)| g != i as GlobalIndex) {
        Some((i, &g)) => Err(mismatch(format!(
            "{kind} indices are not dense: expected {i}, found {g}"
        ))),
        None => Ok(()),
    }
}

/// Verify uniqueness, completeness and ownership agreement of `mesh`.
///
/// Collective when the communicator is active.
pub fn verify_identity<C: Communicator + ?Sized>(
    mesh: &DistributedMesh,
    comm: &C,
) -> Result<(), MeshIdentityError> {
    let me = comm.rank();
    let size = comm.size();
    let nodes = mesh.nodes();
    let elements = mesh.elements();
    let node_table = local_table(EntityKind::Node, nodes.ranks(), nodes.glb_indices(), me, size)?;
    let elem_table = local_table(
        EntityKind::Element,
        elements.ranks(),
        elements.glb_indices(),
        me,
        size,
    )?;

    let (node_tables, elem_tables) = if comm.is_active() {
        (
            all_gather_pod(comm, &node_table)?,
            all_gather_pod(comm, &elem_table)?,
        )
    } else {
        (vec![node_table], vec![elem_table])
    };

    let node_gids = check_kind(EntityKind::Node, &node_tables)?;
    let elem_gids = check_kind(EntityKind::Element, &elem_tables)?;
    match mesh.config().numbering {
        NumberingMode::Separate => {
            check_dense("node", &node_gids)?;
            check_dense("element", &elem_gids)
        }
        NumberingMode::Combined => {
            let mut all = node_gids;
            all.extend(elem_gids);
            all.sort_unstable();
            if let Some(w) = all.windows(2).find(|w| w[0] == w[1]) {
                return Err(mismatch(format!(
                    "index {} is used by both a node and an element",
                    w[0]
                )));
            }
            check_dense("combined", &all)
        }
    }
}
