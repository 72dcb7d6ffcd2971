//! Global identity assignment for nodes and elements.
//!
//! [`structural_rebuild`] re-derives node identity after a topology change:
//! spatial hashing over the global bounding box, rank-local deduplication,
//! owner resolution (minimum touching element rank, then minimum over all
//! ranks sharing the hash), and prefix-sum numbering of owned nodes with
//! ghosts filled in from their owners.
//!
//! [`renumber`] runs the same pipeline for nodes and for elements (hashed by
//! centroid) and numbers both, in one contiguous space or in two separate
//! ranges depending on [`NumberingMode`]. With a single rank it reduces to
//! sequential numbering in slot order without any communication.
//!
//! Checks that can fail on one rank alone go through [`agree`] before the
//! next exchange, so a failed pass returns an error on every rank.

use hashbrown::HashMap;
use hashbrown::hash_map::Entry;
use itertools::Itertools;
use log::debug;

use crate::algs::communicator::{Communicator, agree};
use crate::algs::reconcile::{
    BlockOffsets, block_offsets, check_rank_range, exchange_owned_counts, number_owned,
    reconcile_ranks, resolve_ghost_indices,
};
use crate::config::{IdentityConfig, NumberingMode};
use crate::data::dof_store::{DofStore, GlobalIndex};
use crate::data::element_store::{ElementStore, IndexSpace};
use crate::geometry::bbox::BoundingBox;
use crate::geometry::hilbert::SpatialHashIndex;
use crate::mesh_error::MeshIdentityError;
use crate::topology::EntityKind;

/// Summary of one identity pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct RebuildReport {
    /// Local node count after deduplication.
    pub nodes: usize,
    /// Local element count.
    pub elements: usize,
    pub owned_nodes: usize,
    pub owned_elements: usize,
    /// Local nodes folded into an earlier node with the same hash.
    pub merged_nodes: usize,
    /// Local nodes dropped because no element references them.
    pub dropped_nodes: usize,
    pub node_rounds: usize,
    pub element_rounds: usize,
    /// Number of distinct nodes mesh-wide.
    pub global_nodes: u64,
    /// Number of distinct elements mesh-wide (0 after a node-only rebuild).
    pub global_elements: u64,
}

/// Result of hashing, deduplicating and reconciling the node store.
struct NodeStage {
    hashes: Vec<u64>,
    merged: usize,
    dropped: usize,
    rounds: usize,
}

/// Connectivity checks, hash precision and local bounding box: everything
/// a rank can get wrong on its own before the first collective.
fn local_setup(
    nodes: &DofStore,
    elements: &ElementStore,
    config: &IdentityConfig,
) -> Result<(u32, BoundingBox), MeshIdentityError> {
    elements.require_space(IndexSpace::Local)?;
    elements.validate_against(nodes.len())?;
    let bits = config.bits_for(nodes.dimension()?)?;
    Ok((bits, nodes.local_box()?))
}

/// Build the spatial hash index over the process-wide bounding box.
fn hash_index<C: Communicator + ?Sized>(
    nodes: &DofStore,
    elements: &ElementStore,
    config: &IdentityConfig,
    comm: &C,
) -> Result<SpatialHashIndex, MeshIdentityError> {
    let (bits, local) = agree(comm, local_setup(nodes, elements, config))?;
    let global = if comm.is_active() {
        local.make_global(comm)?
    } else {
        local
    };
    SpatialHashIndex::new(&global, bits)
}

/// Hash referenced nodes, fold duplicates, compact the store and rewrite
/// connectivity. Returns the hashes of the surviving slots.
fn deduplicate(
    nodes: &mut DofStore,
    elements: &mut ElementStore,
    index: &SpatialHashIndex,
    check: bool,
) -> Result<(Vec<u64>, usize, usize), MeshIdentityError> {
    let n = nodes.len();
    let referenced = if elements.is_empty() {
        vec![true; n]
    } else {
        let mut r = vec![false; n];
        for e in 0..elements.len() {
            for s in elements.local_nodes(e) {
                r[s] = true;
            }
        }
        r
    };

    let mut first: HashMap<u64, usize> = HashMap::with_capacity(n);
    let mut remap = vec![usize::MAX; n];
    let mut keep = Vec::with_capacity(n);
    let mut hashes = Vec::with_capacity(n);
    let (mut merged, mut dropped) = (0usize, 0usize);
    for i in 0..n {
        if !referenced[i] {
            dropped += 1;
            continue;
        }
        let h = index.hash(nodes.coords(i));
        match first.entry(h) {
            Entry::Occupied(o) => {
                let kept = *o.get();
                if check && nodes.coords(keep[kept]) != nodes.coords(i) {
                    return Err(MeshIdentityError::DuplicateHash {
                        kind: EntityKind::Node,
                        hash: h,
                        first: keep[kept],
                        second: i,
                    });
                }
                remap[i] = kept;
                merged += 1;
            }
            Entry::Vacant(v) => {
                v.insert(keep.len());
                remap[i] = keep.len();
                keep.push(i);
                hashes.push(h);
            }
        }
    }

    if keep.len() != n {
        nodes.retain_slots(&keep);
        for entry in elements.all_nodes_mut() {
            *entry = remap[*entry as usize] as u64;
        }
    }
    Ok((hashes, merged, dropped))
}

/// Owner candidate of each node: the minimum rank among local elements
/// touching it; untouched nodes keep their stored rank.
fn candidate_ranks(nodes: &DofStore, elements: &ElementStore) -> Vec<usize> {
    let mut cand = vec![usize::MAX; nodes.len()];
    for e in 0..elements.len() {
        let r = elements.rank(e);
        for s in elements.local_nodes(e) {
            cand[s] = cand[s].min(r);
        }
    }
    for (i, c) in cand.iter_mut().enumerate() {
        if *c == usize::MAX {
            *c = nodes.rank(i);
        }
    }
    cand
}

fn node_stage<C: Communicator + ?Sized>(
    nodes: &mut DofStore,
    elements: &mut ElementStore,
    index: &SpatialHashIndex,
    config: &IdentityConfig,
    comm: &C,
) -> Result<NodeStage, MeshIdentityError> {
    let (hashes, merged, dropped) = agree(
        comm,
        deduplicate(nodes, elements, index, config.debug_duplicate_check),
    )?;
    let mut ranks = candidate_ranks(nodes, elements);
    let rounds = reconcile_ranks(
        comm,
        EntityKind::Node,
        &hashes,
        &mut ranks,
        config.max_reconcile_rounds,
    )?;
    agree(comm, check_rank_range(EntityKind::Node, &ranks, comm.size()))?;
    for (i, r) in ranks.into_iter().enumerate() {
        nodes.set_rank(i, r);
    }
    Ok(NodeStage {
        hashes,
        merged,
        dropped,
        rounds,
    })
}

/// Centroid hash of every element.
fn element_hashes(
    nodes: &DofStore,
    elements: &ElementStore,
    index: &SpatialHashIndex,
    check: bool,
) -> Result<Vec<u64>, MeshIdentityError> {
    let d = nodes.dimension()?;
    let centroid_hash = |e: usize| {
        let c = elements
            .kind(e)
            .centroid(d, elements.local_nodes(e).map(|s| nodes.coords(s)));
        index.hash(&c)
    };
    #[cfg(feature = "rayon")]
    let hashes: Vec<u64> = {
        use rayon::prelude::*;
        (0..elements.len()).into_par_iter().map(centroid_hash).collect()
    };
    #[cfg(not(feature = "rayon"))]
    let hashes: Vec<u64> = (0..elements.len()).map(centroid_hash).collect();
    if check {
        let groups = hashes.iter().copied().enumerate().map(|(e, h)| (h, e)).into_group_map();
        if let Some((&h, slots)) = groups
            .iter()
            .filter(|(_, v)| v.len() > 1)
            .min_by_key(|(_, v)| v[0])
        {
            return Err(MeshIdentityError::DuplicateHash {
                kind: EntityKind::Element,
                hash: h,
                first: slots[0],
                second: slots[1],
            });
        }
    }
    Ok(hashes)
}

fn element_stage<C: Communicator + ?Sized>(
    nodes: &DofStore,
    elements: &mut ElementStore,
    index: &SpatialHashIndex,
    config: &IdentityConfig,
    comm: &C,
) -> Result<(Vec<u64>, usize), MeshIdentityError> {
    let hashes = agree(
        comm,
        element_hashes(nodes, elements, index, config.debug_duplicate_check),
    )?;
    let mut ranks = elements.ranks().to_vec();
    let rounds = reconcile_ranks(
        comm,
        EntityKind::Element,
        &hashes,
        &mut ranks,
        config.max_reconcile_rounds,
    )?;
    agree(comm, check_rank_range(EntityKind::Element, &ranks, comm.size()))?;
    for (e, r) in ranks.into_iter().enumerate() {
        elements.set_rank(e, r);
    }
    Ok((hashes, rounds))
}

fn apply_node_indices<C: Communicator + ?Sized>(
    nodes: &mut DofStore,
    hashes: &[u64],
    start: GlobalIndex,
    comm: &C,
) -> Result<(), MeshIdentityError> {
    let mut gids = number_owned(nodes.ranks(), comm.rank(), start);
    resolve_ghost_indices(comm, EntityKind::Node, hashes, nodes.ranks(), &mut gids)?;
    for (i, g) in gids.into_iter().enumerate() {
        nodes.set_glb_idx(i, g);
    }
    Ok(())
}

fn apply_element_indices<C: Communicator + ?Sized>(
    elements: &mut ElementStore,
    hashes: &[u64],
    start: GlobalIndex,
    comm: &C,
) -> Result<(), MeshIdentityError> {
    elements.clear_indices();
    let mut gids = number_owned(elements.ranks(), comm.rank(), start);
    resolve_ghost_indices(comm, EntityKind::Element, hashes, elements.ranks(), &mut gids)?;
    for (e, g) in gids.into_iter().enumerate() {
        elements.set_glb_idx(e, g);
    }
    Ok(())
}

/// Re-derive node ownership and global indices after a topology change.
///
/// Collective. Node indices are numbered from zero mesh-wide; element
/// indices are left untouched (see [`renumber`]).
pub fn structural_rebuild<C: Communicator + ?Sized>(
    nodes: &mut DofStore,
    elements: &mut ElementStore,
    config: &IdentityConfig,
    comm: &C,
) -> Result<RebuildReport, MeshIdentityError> {
    let index = hash_index(nodes, elements, config, comm)?;
    let stage = node_stage(nodes, elements, &index, config, comm)?;

    let counts = exchange_owned_counts(comm, nodes.owned_count(), 0)?;
    let offsets = block_offsets(&counts, comm.rank(), NumberingMode::Separate);
    apply_node_indices(nodes, &stage.hashes, offsets.node_start, comm)?;

    let report = RebuildReport {
        nodes: nodes.len(),
        elements: elements.len(),
        owned_nodes: nodes.owned_count(),
        owned_elements: elements.owned_count(),
        merged_nodes: stage.merged,
        dropped_nodes: stage.dropped,
        node_rounds: stage.rounds,
        element_rounds: 0,
        global_nodes: offsets.node_total,
        global_elements: 0,
    };
    debug!("[rank {}] structural rebuild: {report:?}", comm.rank());
    Ok(report)
}

/// Renumber nodes and elements mesh-wide.
///
/// Collective when more than one rank participates; with a single rank the
/// indices are the slot order and no collective is issued.
pub fn renumber<C: Communicator + ?Sized>(
    nodes: &mut DofStore,
    elements: &mut ElementStore,
    config: &IdentityConfig,
    comm: &C,
) -> Result<RebuildReport, MeshIdentityError> {
    let index = hash_index(nodes, elements, config, comm)?;

    if !comm.is_active() {
        return renumber_serial(nodes, elements, &index, config, comm.rank());
    }

    let node = node_stage(nodes, elements, &index, config, comm)?;
    let (element_hashes, element_rounds) = element_stage(nodes, elements, &index, config, comm)?;

    let counts = exchange_owned_counts(comm, nodes.owned_count(), elements.owned_count())?;
    let offsets = block_offsets(&counts, comm.rank(), config.numbering);
    apply_node_indices(nodes, &node.hashes, offsets.node_start, comm)?;
    apply_element_indices(elements, &element_hashes, offsets.element_start, comm)?;

    let report = report_for(nodes, elements, &node, element_rounds, offsets);
    debug!("[rank {}] renumber ({:?}): {report:?}", comm.rank(), config.numbering);
    Ok(report)
}

fn renumber_serial(
    nodes: &mut DofStore,
    elements: &mut ElementStore,
    index: &SpatialHashIndex,
    config: &IdentityConfig,
    my_rank: usize,
) -> Result<RebuildReport, MeshIdentityError> {
    let (hashes, merged, dropped) =
        deduplicate(nodes, elements, index, config.debug_duplicate_check)?;
    element_hashes(nodes, elements, index, config.debug_duplicate_check)?;
    let n = nodes.len();
    for i in 0..n {
        nodes.set_rank(i, my_rank);
        nodes.set_glb_idx(i, i as GlobalIndex);
    }
    let base = match config.numbering {
        NumberingMode::Combined => n as GlobalIndex,
        NumberingMode::Separate => 0,
    };
    for e in 0..elements.len() {
        elements.set_rank(e, my_rank);
        elements.set_glb_idx(e, base + e as GlobalIndex);
    }
    let stage = NodeStage {
        hashes,
        merged,
        dropped,
        rounds: 0,
    };
    let offsets = BlockOffsets {
        node_start: 0,
        element_start: base,
        node_total: n as u64,
        element_total: elements.len() as u64,
    };
    let report = report_for(nodes, elements, &stage, 0, offsets);
    debug!("[rank {my_rank}] serial renumber: {report:?}");
    Ok(report)
}

fn report_for(
    nodes: &DofStore,
    elements: &ElementStore,
    node: &NodeStage,
    element_rounds: usize,
    offsets: BlockOffsets,
) -> RebuildReport {
    RebuildReport {
        nodes: nodes.len(),
        elements: elements.len(),
        owned_nodes: nodes.owned_count(),
        owned_elements: elements.owned_count(),
        merged_nodes: node.merged,
        dropped_nodes: node.dropped,
        node_rounds: node.rounds,
        element_rounds,
        global_nodes: offsets.node_total,
        global_elements: offsets.element_total,
    }
}
