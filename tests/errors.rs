mod util;

use mesh_identity::prelude::*;
use util::quad_strip;

#[test]
fn mutation_before_prepare_is_rejected() {
    let mut m = quad_strip(0, 1, IdentityConfig::default());
    m.renumber(&NoComm).unwrap();
    let mut a = m.adaptor();
    let err = a.remove_element(0).unwrap_err();
    assert_eq!(
        err,
        MeshIdentityError::InvalidAdaptorState {
            op: "remove_element",
            state: AdaptorState::Idle
        }
    );
    assert_eq!(err.kind(), ErrorKind::Programmer);
    assert!(a.finish(&NoComm).is_err());
}

#[test]
fn prepare_twice_is_rejected() {
    let mut m = quad_strip(0, 1, IdentityConfig::default());
    m.renumber(&NoComm).unwrap();
    let mut a = m.adaptor();
    a.prepare().unwrap();
    assert!(matches!(
        a.prepare(),
        Err(MeshIdentityError::InvalidAdaptorState {
            state: AdaptorState::Preparing,
            ..
        })
    ));
    a.finish(&NoComm).unwrap();
    assert_eq!(a.state(), AdaptorState::Idle);
}

#[test]
fn adapting_unnumbered_mesh_fails() {
    let mut m = quad_strip(0, 1, IdentityConfig::default());
    let mut a = m.adaptor();
    let err = a.prepare().unwrap_err();
    assert!(matches!(err, MeshIdentityError::IdentityMismatch(_)));
    assert_eq!(err.kind(), ErrorKind::Consistency);
}

#[test]
fn out_of_range_slots_are_programmer_errors() {
    let mut m = quad_strip(0, 1, IdentityConfig::default());
    m.renumber(&NoComm).unwrap();
    let mut a = m.adaptor();
    a.prepare().unwrap();
    assert_eq!(
        a.remove_node(99),
        Err(MeshIdentityError::IndexOutOfRange {
            kind: EntityKind::Node,
            index: 99,
            len: 4
        })
    );
    assert!(a.pack_element(1).is_err());
}

#[test]
fn element_record_with_wrong_arity() {
    let mut m = quad_strip(0, 1, IdentityConfig::default());
    m.renumber(&NoComm).unwrap();
    let mut a = m.adaptor();
    a.prepare().unwrap();
    let r = ElementRecord::new(ElementKind::Quad4, &[NodeRef::global(0), NodeRef::global(1)], 0);
    assert!(matches!(
        a.add_element(r),
        Err(MeshIdentityError::NodeCountMismatch {
            kind: ElementKind::Quad4,
            expected: 4,
            found: 2
        })
    ));
}

#[test]
fn store_without_dimension() {
    let nodes = DofStore::new(0);
    assert_eq!(nodes.dimension(), Err(MeshIdentityError::DimensionUnset));
    let err = DistributedMesh::from_stores(nodes, ElementStore::new(0), IdentityConfig::default())
        .unwrap_err();
    assert_eq!(err, MeshIdentityError::DimensionUnset);
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn stores_of_different_ranks_do_not_combine() {
    let nodes = DofStore::with_dimension(1, 2, 0).unwrap();
    assert!(matches!(
        DistributedMesh::from_stores(nodes, ElementStore::new(0), IdentityConfig::default()),
        Err(MeshIdentityError::IdentityMismatch(_))
    ));
}

#[test]
fn every_error_is_fatal_and_displays() {
    let errs = [
        MeshIdentityError::InvalidDimension(4),
        MeshIdentityError::ReconcileDidNotConverge { rounds: 8 },
        MeshIdentityError::Decode("truncated".into()),
    ];
    for e in errs {
        assert!(e.is_fatal());
        assert!(!e.to_string().is_empty());
    }
}
