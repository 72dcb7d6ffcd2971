mod util;

use mesh_identity::prelude::*;
use util::*;

#[test]
fn empty_session_round_trips() {
    let out = run_ranks(2, |c| {
        let mut m = quad_strip_with_halo(c.rank(), 3, IdentityConfig::default());
        m.renumber(c).unwrap();
        let before = identity_of(&m);
        let rows: Vec<Vec<u64>> = (0..m.elements().len())
            .map(|e| m.elements().nodes(e).to_vec())
            .collect();
        let mut a = m.adaptor();
        a.prepare().unwrap();
        a.finish(c).unwrap();
        drop(a);
        let after_rows: Vec<Vec<u64>> = (0..m.elements().len())
            .map(|e| m.elements().nodes(e).to_vec())
            .collect();
        (before == identity_of(&m), rows == after_rows)
    });
    assert!(out.iter().all(|&(ids, rows)| ids && rows));
}

#[test]
fn migrate_element_four_to_rank_zero() {
    let out = run_ranks(2, |c| {
        let mut m = quad_strip(c.rank(), 5, IdentityConfig::default());
        m.renumber(c).unwrap();
        let n_before = m.elements().len();

        let mut cs = ChangeSet::new(c.size());
        if c.rank() == 1 {
            cs.move_element(4, 0);
        }
        let mut a = m.adaptor();
        a.prepare().unwrap();
        let summary = a.migrate(&cs, c).unwrap();
        let report = a.finish(c).unwrap();
        drop(a);
        m.verify(c).unwrap();

        let moved = element_at(&m, &[9.5, 0.5]).map(|e| {
            (m.elements().glb_idx(e), m.elements().rank(e))
        });
        (n_before, m.elements().len(), summary, report, moved)
    });
    let (before0, after0, sum0, rep0, moved0) = &out[0];
    let (before1, after1, sum1, rep1, moved1) = &out[1];
    assert_eq!(*after0, before0 + 1);
    assert_eq!(*after1, before1 - 1);
    assert_eq!(sum1.sent_elements, 1);
    assert_eq!(sum1.sent_nodes, 4);
    assert_eq!(sum0.received_elements, 1);
    // the moved element now lives on rank 0 only, owned there
    assert_eq!(moved0.map(|(_, r)| r), Some(0));
    assert!(moved1.is_none());
    // global totals do not change; rank 1 dropped the orphaned far column
    assert_eq!(rep0.global_elements, 10);
    assert_eq!(rep1.global_nodes, 22);
    assert_eq!(rep1.dropped_nodes, 2);
}

#[test]
fn added_entities_get_identities_on_every_rank() {
    let out = run_ranks(2, |c| {
        let mut m = quad_strip(c.rank(), 2, IdentityConfig::default());
        m.renumber(c).unwrap();
        let mut a = m.adaptor();
        a.prepare().unwrap();
        if c.rank() == 0 {
            // a triangle hanging below the first quad
            let n0 = a.pack_node(0).unwrap().gid;
            let n1 = a.pack_node(2).unwrap().gid;
            let p = a
                .add_node(NodeRecord::new(vec![0.5, -1.0], vec![0.0], 0))
                .unwrap();
            a.add_element(ElementRecord::new(
                ElementKind::Triangle3,
                &[NodeRef::global(n0), p, NodeRef::global(n1)],
                0,
            ))
            .unwrap();
        }
        let report = a.finish(c).unwrap();
        drop(a);
        m.verify(c).unwrap();
        report
    });
    assert_eq!(out[0].global_nodes, 11);
    assert_eq!(out[1].global_elements, 5);
    assert_eq!(out[0].elements, 3);
}

#[test]
fn removed_element_disappears_globally() {
    let out = run_ranks(2, |c| {
        let mut m = quad_strip(c.rank(), 3, IdentityConfig::default());
        m.renumber(c).unwrap();
        let mut a = m.adaptor();
        a.prepare().unwrap();
        if c.rank() == 1 {
            a.remove_element(2).unwrap();
        }
        let report = a.finish(c).unwrap();
        drop(a);
        m.verify(c).unwrap();
        report
    });
    assert_eq!(out[0].global_elements, 5);
    assert_eq!(out[1].global_nodes, 12);
}

#[test]
fn incoming_copy_of_held_node_reuses_slot() {
    // rank 1 hands over its only quad; rank 0 already holds the interface column
    let out = run_ranks(2, |c| {
        let mut m = quad_strip(c.rank(), 1, IdentityConfig::default());
        m.renumber(c).unwrap();
        let mut cs = ChangeSet::new(2);
        if c.rank() == 1 {
            cs.move_element(0, 0);
        }
        let mut a = m.adaptor();
        a.prepare().unwrap();
        a.migrate(&cs, c).unwrap();
        let report = a.finish(c).unwrap();
        drop(a);
        m.verify(c).unwrap();
        (m.nodes().len(), m.elements().len(), report)
    });
    assert_eq!((out[0].0, out[0].1), (6, 2));
    // without elements rank 1 keeps its nodes, now as ghosts of rank 0
    assert_eq!((out[1].0, out[1].1), (4, 0));
    assert_eq!(out[1].2.owned_nodes, 0);
    assert_eq!(out[0].2.global_nodes, 6);
}

#[test]
fn ghost_holders_follow_a_migrated_element() {
    // rank 1 ghosts rank 0's quad [1,2]; rank 0 hands that quad to rank 2
    let out = run_ranks(3, |c| {
        let mut m = quad_strip_with_halo(c.rank(), 2, IdentityConfig::default());
        m.renumber(c).unwrap();
        let mut cs = ChangeSet::new(3);
        if c.rank() == 0 {
            cs.move_element(1, 2);
        }
        let mut a = m.adaptor();
        a.prepare().unwrap();
        a.migrate(&cs, c).unwrap();
        a.finish(c).unwrap();
        drop(a);
        m.verify(c).unwrap();
        let moved = element_at(&m, &[1.5, 0.5]).map(|e| m.elements().rank(e));
        let owner_at = |x: f64| node_at(&m, &[x, 0.0]).map(|i| m.nodes().rank(i));
        (moved, owner_at(1.0), owner_at(2.0))
    });
    assert_eq!(out[0], (None, Some(0), None));
    // the ghost copy names the new owner; the interface passes to rank 1
    assert_eq!(out[1], (Some(2), Some(0), Some(1)));
    assert_eq!(out[2], (Some(2), Some(0), Some(1)));
}

#[test]
fn owner_values_replace_stale_ghost_copies() {
    // rank 1 ghosts rank 0's quad [1,2] and receives it with fresh values
    let out = run_ranks(2, |c| {
        let mut m = quad_strip_with_halo(c.rank(), 2, IdentityConfig::default());
        m.renumber(c).unwrap();
        for i in 0..m.nodes().len() {
            if !m.nodes().is_ghost(i) {
                m.nodes_mut().fields_mut(i)[0] = 42.0 + c.rank() as f64;
            }
        }
        let mut cs = ChangeSet::new(2);
        if c.rank() == 0 {
            cs.move_element(1, 1);
        }
        let mut a = m.adaptor();
        a.prepare().unwrap();
        a.migrate(&cs, c).unwrap();
        a.finish(c).unwrap();
        drop(a);
        m.verify(c).unwrap();
        [1.0, 2.0].map(|x| {
            node_at(&m, &[x, 0.0]).map(|i| (m.nodes().rank(i), m.nodes().fields(i)[0]))
        })
    });
    assert_eq!(out[0], [Some((0, 42.0)), None]);
    // (2,0) is owned by rank 1 now and carries rank 0's value
    assert_eq!(out[1], [Some((0, 42.0)), Some((1, 42.0))]);
}

#[test]
fn untouched_elements_keep_their_nodes() {
    let out = run_ranks(2, |c| {
        let mut m = quad_strip(c.rank(), 3, IdentityConfig::default());
        m.renumber(c).unwrap();
        let keep: Vec<(Vec<f64>, Vec<Vec<f64>>)> = (0..2)
            .map(|e| (m.element_centroid(e).unwrap(), row_coords(&m, e)))
            .collect();
        let mut cs = ChangeSet::new(2);
        if c.rank() == 0 {
            cs.move_element(2, 1);
        }
        let mut a = m.adaptor();
        a.prepare().unwrap();
        if c.rank() == 1 {
            a.remove_element(2).unwrap();
        }
        a.migrate(&cs, c).unwrap();
        a.finish(c).unwrap();
        drop(a);
        m.verify(c).unwrap();
        let same = keep.iter().all(|(centroid, rows)| {
            element_at(&m, centroid).is_some_and(|e| row_coords(&m, e) == *rows)
        });
        (same, m.elements().len())
    });
    assert_eq!(out[0], (true, 2));
    assert_eq!(out[1], (true, 3));
}

#[test]
fn abandoned_session_leaves_mesh_untouched() {
    let mut m = quad_strip(0, 2, IdentityConfig::default());
    m.renumber(&NoComm).unwrap();
    let before = identity_of(&m);
    let mut a = m.adaptor();
    a.prepare().unwrap();
    a.remove_element(0).unwrap();
    a.add_node(NodeRecord::new(vec![9.0, 9.0], vec![1.0], 0))
        .unwrap();
    a.abandon().unwrap();
    assert_eq!(identity_of(&m), before);
    assert_eq!(m.elements().index_space(), IndexSpace::Local);
    assert_eq!(m.node_slot(0), Some(0));
}
