mod util;

use std::cell::Cell;

use mesh_identity::prelude::*;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use util::*;

#[test]
fn interface_node_owned_by_lower_rank() {
    let out = run_ranks(2, |c| {
        let mut m = quad_strip(c.rank(), 1, IdentityConfig::default());
        m.renumber(c).unwrap();
        m.verify(c).unwrap();
        identity_of(&m)
    });
    // rank 0 block: 4 nodes then 1 element; rank 1 block starts at 5
    assert_eq!(out[0].0, vec![0, 1, 2, 3]);
    assert_eq!(out[0].1, vec![0, 0, 0, 0]);
    assert_eq!(out[0].2, vec![4]);
    assert_eq!(out[1].0, vec![2, 3, 5, 6]);
    assert_eq!(out[1].1, vec![0, 0, 1, 1]);
    assert_eq!(out[1].2, vec![7]);
}

#[test]
fn separate_numbering_restarts_each_kind() {
    let cfg = IdentityConfig::default().with_numbering(NumberingMode::Separate);
    let out = run_ranks(2, |c| {
        let mut m = quad_strip(c.rank(), 2, cfg.clone());
        let report = m.renumber(c).unwrap();
        m.verify(c).unwrap();
        (identity_of(&m), report)
    });
    assert_eq!((out[0].0).2, vec![0, 1]);
    assert_eq!((out[1].0).2, vec![2, 3]);
    assert_eq!((out[1].0).0, vec![4, 5, 6, 7, 8, 9]);
    assert_eq!(out[0].1.global_nodes, 10);
    assert_eq!(out[1].1.global_elements, 4);
}

#[test]
fn corner_shared_by_three_ranks() {
    let tris: [[[f64; 2]; 3]; 3] = [
        [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
        [[0.0, 0.0], [0.0, 1.0], [-1.0, 0.0]],
        [[0.0, 0.0], [-1.0, 0.0], [0.0, -1.0]],
    ];
    let out = run_ranks(3, |c| {
        let mut m = DistributedMesh::new(c.rank(), 2, 0, IdentityConfig::default()).unwrap();
        let slots: Vec<usize> = tris[c.rank()]
            .iter()
            .map(|x| m.add_node(x).unwrap())
            .collect();
        m.add_element(ElementKind::Triangle3, &slots).unwrap();
        let report = m.renumber(c).unwrap();
        m.verify(c).unwrap();
        let owner = |x: [f64; 2]| node_at(&m, &x).map(|s| m.nodes().rank(s));
        (
            owner([0.0, 0.0]),
            owner([0.0, 1.0]),
            owner([-1.0, 0.0]),
            report.global_nodes,
            m.nodes().glb_idx(0),
        )
    });
    for (r, o) in out.iter().enumerate() {
        assert_eq!(o.0, Some(0), "rank {r}");
        assert_eq!(o.3, 5);
        // the shared corner has one global index everywhere
        assert_eq!(o.4, out[0].4);
    }
    assert_eq!(out[1].1, Some(0));
    assert_eq!(out[2].2, Some(1));
}

#[test]
fn ghost_elements_take_owner_index() {
    let out = run_ranks(3, |c| {
        let mut m = quad_strip_with_halo(c.rank(), 2, IdentityConfig::default());
        let report = m.renumber(c).unwrap();
        m.verify(c).unwrap();
        (identity_of(&m), report)
    });
    assert_eq!(out[0].1.global_elements, 6);
    assert_eq!(out[1].1.global_elements, 6);
    // rank 1's ghost quad is rank 0's second quad
    let (_, _, egids, eranks) = &out[1].0;
    assert_eq!(eranks[2], 0);
    assert_eq!(egids[2], (out[0].0).2[1]);
    assert_eq!(out[1].1.owned_elements, 2);
}

#[test]
fn renumber_is_deterministic_and_idempotent() {
    let run = || {
        run_ranks(3, |c| {
            let mut m = quad_strip_with_halo(c.rank(), 3, IdentityConfig::default());
            m.renumber(c).unwrap();
            let first = identity_of(&m);
            let again = m.renumber(c).unwrap();
            assert_eq!(again.merged_nodes, 0);
            assert_eq!(identity_of(&m), first);
            first
        })
    };
    assert_eq!(run(), run());
}

#[test]
fn structural_rebuild_numbers_nodes_only() {
    let out = run_ranks(2, |c| {
        let mut m = quad_strip(c.rank(), 2, IdentityConfig::default());
        let before = m.elements().glb_indices().to_vec();
        let report = m.structural_rebuild(c).unwrap();
        assert_eq!(m.elements().glb_indices(), &before[..]);
        (m.nodes().glb_indices().to_vec(), report)
    });
    assert_eq!(out[0].0, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(out[1].0, vec![4, 5, 6, 7, 8, 9]);
    assert_eq!(out[1].1.global_nodes, 10);
    assert_eq!(out[1].1.global_elements, 0);
}

/// Single-rank communicator that counts collective calls.
#[derive(Default)]
struct CountingComm {
    calls: Cell<usize>,
}

impl Communicator for CountingComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn all_to_all(&self, send: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, MeshIdentityError> {
        self.calls.set(self.calls.get() + 1);
        NoComm.all_to_all(send)
    }
    fn all_gather(&self, buf: &[u8]) -> Result<Vec<Vec<u8>>, MeshIdentityError> {
        self.calls.set(self.calls.get() + 1);
        NoComm.all_gather(buf)
    }
    fn broadcast(&self, data: Vec<u8>, root: usize) -> Result<Vec<u8>, MeshIdentityError> {
        self.calls.set(self.calls.get() + 1);
        NoComm.broadcast(data, root)
    }
}

#[test]
fn single_rank_is_sequential_without_collectives() {
    let comm = CountingComm::default();
    let mut m = quad_strip(0, 4, IdentityConfig::default());
    let report = m.renumber(&comm).unwrap();
    assert_eq!(comm.calls.get(), 0);
    assert_eq!(m.nodes().glb_indices(), &(0..10).collect::<Vec<u64>>()[..]);
    assert_eq!(m.elements().glb_indices(), &[10, 11, 12, 13]);
    assert_eq!(report.node_rounds + report.element_rounds, 0);
    m.structural_rebuild(&comm).unwrap();
    assert_eq!(comm.calls.get(), 0);
}

#[test]
fn shuffled_duplicates_collapse_to_first_copy() {
    // every corner of a 4x4 triangle grid pushed once per touching triangle
    let mut rng = SmallRng::seed_from_u64(7);
    let mut tris = Vec::new();
    for i in 0..4 {
        for j in 0..4 {
            let (x, y) = (i as f64, j as f64);
            tris.push([[x, y], [x + 1.0, y], [x + 1.0, y + 1.0]]);
            tris.push([[x, y], [x + 1.0, y + 1.0], [x, y + 1.0]]);
        }
    }
    tris.shuffle(&mut rng);
    let mut m = DistributedMesh::new(0, 2, 0, IdentityConfig::default()).unwrap();
    for t in &tris {
        let s: Vec<usize> = t.iter().map(|x| m.add_node(x).unwrap()).collect();
        m.add_element(ElementKind::Triangle3, &s).unwrap();
    }
    let report = m.renumber(&NoComm).unwrap();
    assert_eq!(report.nodes, 25);
    assert_eq!(report.merged_nodes, 3 * 32 - 25);
    assert_eq!(report.global_elements, 32);
    m.verify(&NoComm).unwrap();
    for e in 0..m.elements().len() {
        assert_eq!(m.element_centroid(e).unwrap(), {
            let t = tris[e];
            ElementKind::Triangle3.centroid(2, t.iter().map(|x| &x[..]))
        });
    }
}

#[test]
fn unresolvable_ghost_is_fatal() {
    // rank 1 claims a node owned by rank 0 that rank 0 never holds
    let out = run_ranks(2, |c| {
        let mut m = DistributedMesh::new(c.rank(), 1, 0, IdentityConfig::default()).unwrap();
        let a = m.add_node(&[c.rank() as f64]).unwrap();
        if c.rank() == 1 {
            m.nodes_mut().set_rank(a, 0);
        }
        m.structural_rebuild(c).err()
    });
    // rank 0 stops with it instead of moving on to the next exchange
    assert_eq!(out[0], Some(MeshIdentityError::RemoteFailure { rank: 1 }));
    assert!(matches!(
        out[1],
        Some(MeshIdentityError::UnresolvedGhost { kind: EntityKind::Node, owner: 0, .. })
    ));
}
