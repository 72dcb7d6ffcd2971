use mesh_identity::prelude::*;

#[test]
fn empty_object_gives_defaults() {
    let cfg: IdentityConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(cfg, IdentityConfig::default());
}

#[test]
fn fields_parse_in_snake_case() {
    let cfg: IdentityConfig = serde_json::from_str(
        r#"{ "hash_bits": 16, "numbering": "separate", "lookup": "hashed",
             "debug_duplicate_check": true }"#,
    )
    .unwrap();
    assert_eq!(cfg.hash_bits, Some(16));
    assert_eq!(cfg.numbering, NumberingMode::Separate);
    assert_eq!(cfg.lookup, LookupStrategy::Hashed);
    assert!(cfg.debug_duplicate_check);
    assert_eq!(cfg.max_reconcile_rounds, 8);
    assert_eq!(cfg.bits_for(3).unwrap(), 16);
}

#[test]
fn serialized_config_reads_back() {
    let cfg = IdentityConfig::default()
        .with_numbering(NumberingMode::Separate)
        .with_max_reconcile_rounds(3);
    let text = serde_json::to_string(&cfg).unwrap();
    assert!(text.contains(r#""numbering":"separate""#));
    let back: IdentityConfig = serde_json::from_str(&text).unwrap();
    assert_eq!(back, cfg);
}

#[test]
fn unknown_enum_value_fails_to_parse() {
    assert!(serde_json::from_str::<IdentityConfig>(r#"{ "numbering": "interleaved" }"#).is_err());
}

#[test]
fn parsed_precision_is_validated_against_dimension() {
    let cfg: IdentityConfig = serde_json::from_str(r#"{ "hash_bits": 30 }"#).unwrap();
    assert!(cfg.validate(2).is_ok());
    assert!(matches!(
        DistributedMesh::new(0, 3, 0, cfg),
        Err(MeshIdentityError::InvalidHashPrecision { bits: 30, dimension: 3, max: 21 })
    ));
}

#[test]
fn report_serializes() {
    let mut m = DistributedMesh::new(0, 1, 0, IdentityConfig::default()).unwrap();
    let a = m.add_node(&[0.0]).unwrap();
    let b = m.add_node(&[1.0]).unwrap();
    m.add_element(ElementKind::Line2, &[a, b]).unwrap();
    let report = m.renumber(&NoComm).unwrap();
    let v: serde_json::Value = serde_json::to_value(&report).unwrap();
    assert_eq!(v["global_nodes"], 2);
    assert_eq!(v["global_elements"], 1);
}
