#![allow(dead_code)]
use mesh_identity::prelude::*;

/// Run `f` once per rank, each rank on its own thread with a connected
/// `ThreadComm`. Results are returned in rank order.
pub fn run_ranks<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&ThreadComm) -> T + Sync,
{
    let comms = ThreadComm::universe(n);
    std::thread::scope(|s| {
        let f = &f;
        let handles: Vec<_> = comms.iter().map(|c| s.spawn(move || f(c))).collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

/// Row of unit quads along x. Rank `r` holds columns `r*k .. (r+1)*k`, so
/// neighbouring ranks both hold the two nodes of their interface column.
pub fn quad_strip(rank: usize, k: usize, config: IdentityConfig) -> DistributedMesh {
    let mut m = DistributedMesh::new(rank, 2, 1, config).unwrap();
    let x0 = rank * k;
    for i in 0..=k {
        let x = (x0 + i) as f64;
        m.add_node(&[x, 0.0]).unwrap();
        m.add_node(&[x, 1.0]).unwrap();
    }
    for i in 0..k {
        m.add_element(ElementKind::Quad4, &[2 * i, 2 * i + 2, 2 * i + 3, 2 * i + 1])
            .unwrap();
    }
    m
}

/// [`quad_strip`] where every rank `r > 0` also holds a ghost copy of the
/// last quad of rank `r - 1`.
pub fn quad_strip_with_halo(rank: usize, k: usize, config: IdentityConfig) -> DistributedMesh {
    let mut m = quad_strip(rank, k, config);
    if rank > 0 {
        let x = (rank * k - 1) as f64;
        let a = m.add_node(&[x, 0.0]).unwrap();
        let b = m.add_node(&[x, 1.0]).unwrap();
        m.add_element_with(ElementKind::Quad4, &[a, 0, 1, b], rank - 1)
            .unwrap();
    }
    m
}

/// Snapshot of identity arrays: `(node gids, node ranks, element gids, element ranks)`.
pub fn identity_of(m: &DistributedMesh) -> (Vec<u64>, Vec<usize>, Vec<u64>, Vec<usize>) {
    (
        m.nodes().glb_indices().to_vec(),
        m.nodes().ranks().to_vec(),
        m.elements().glb_indices().to_vec(),
        m.elements().ranks().to_vec(),
    )
}

/// Local slot of the node at `coords`, if any.
pub fn node_at(m: &DistributedMesh, coords: &[f64]) -> Option<usize> {
    (0..m.nodes().len()).find(|&i| m.nodes().coords(i) == coords)
}

/// Local slot of the element whose centroid is `c`, if any.
pub fn element_at(m: &DistributedMesh, c: &[f64]) -> Option<usize> {
    (0..m.elements().len()).find(|&e| m.element_centroid(e).unwrap() == c)
}

/// Coordinates of the nodes of element `e`, in row order.
pub fn row_coords(m: &DistributedMesh, e: usize) -> Vec<Vec<f64>> {
    m.elements()
        .local_nodes(e)
        .map(|s| m.nodes().coords(s).to_vec())
        .collect()
}
