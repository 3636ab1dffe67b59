//! Single-node behaviour through the registry facade.

mod support;

use std::sync::Arc;

use schema_log::record::{RegistryRecord, SchemaRegistration};
use schema_log::log::LogProducer;
use schema_log::store::{CheckpointStore, InMemoryCheckpointStore, SchemaStore};
use schema_log::{
    CompatibilityMode, IncompatibilityKind, RegistryError, SchemaReference, SchemaType,
    VersionSpec,
};
use support::{init_tracing, wait_for, Cluster, ORDERS_V1, ORDERS_V2, ORDERS_V3};

#[test]
fn orders_value_scenario() {
    init_tracing();
    let cluster = Cluster::new();
    let node = cluster.start_writer(8081);

    let id1 = node
        .register("orders-value", ORDERS_V1, SchemaType::Avro, Vec::new())
        .unwrap();
    let id2 = node
        .register("orders-value", ORDERS_V2, SchemaType::Avro, Vec::new())
        .unwrap();
    assert_eq!((id1, id2), (1, 2));

    let latest = node.get_version("orders-value", VersionSpec::Latest).unwrap();
    assert_eq!((latest.version, latest.id), (2, 2));

    match node.register("orders-value", ORDERS_V3, SchemaType::Avro, Vec::new()) {
        Err(RegistryError::IncompatibleSchema { reasons, .. }) => {
            let removed: Vec<_> = reasons
                .iter()
                .filter(|r| r.kind == IncompatibilityKind::FieldRemovedWithoutDefault)
                .collect();
            assert!(removed.iter().any(|r| r.path.ends_with("/name")));
        }
        other => panic!("expected IncompatibleSchema, got {:?}", other),
    }
    assert_eq!(node.list_versions("orders-value", false).unwrap(), vec![1, 2]);

    node.shutdown();
}

#[test]
fn versions_are_gap_free_and_reregistration_is_idempotent() {
    let cluster = Cluster::new();
    let node = cluster.start_writer(8081);
    node.set_compatibility(Some("s"), CompatibilityMode::None).unwrap();

    let schemas = [r#""int""#, r#""long""#, r#""string""#];
    for schema in schemas {
        node.register("s", schema, SchemaType::Avro, Vec::new()).unwrap();
    }
    for schema in schemas {
        node.register("s", schema, SchemaType::Avro, Vec::new()).unwrap();
    }
    assert_eq!(node.list_versions("s", false).unwrap(), vec![1, 2, 3]);
    assert_eq!(node.get_by_id(2).unwrap().schema, r#""long""#);
    node.shutdown();
}

#[test]
fn replay_is_the_same_whether_interrupted_or_not() {
    let cluster = Cluster::new();
    let node = cluster.start_writer(8081);
    node.set_compatibility(None, CompatibilityMode::None).unwrap();
    for (subject, schema) in [
        ("a", r#""int""#),
        ("b", r#""long""#),
        ("a", r#""string""#),
        ("c", r#""int""#),
        ("b", r#""bytes""#),
    ] {
        node.register(subject, schema, SchemaType::Avro, Vec::new()).unwrap();
    }
    node.delete_version("a", VersionSpec::Number(1), false).unwrap();
    node.shutdown();

    let records = cluster.log.records();
    let whole = SchemaStore::default();
    for record in &records {
        whole.apply(record).unwrap();
    }

    // replay in chunks, snapshotting and restoring between them
    let chunked = SchemaStore::default();
    for chunk in records.chunks(2) {
        for record in chunk {
            chunked.apply(record).unwrap();
        }
        let (_, data) = chunked.snapshot().unwrap();
        let resumed = SchemaStore::default();
        resumed.restore(&data).unwrap();
        // replaying an already-applied prefix changes nothing
        for record in &records[..2] {
            resumed.apply(record).unwrap();
        }
        assert_eq!(resumed.offset().unwrap(), chunked.offset().unwrap());
    }

    for subject in ["a", "b", "c"] {
        assert_eq!(
            whole.list_versions(subject, true).unwrap(),
            chunked.list_versions(subject, true).unwrap()
        );
        assert_eq!(
            whole.lookup(subject, VersionSpec::Latest).unwrap(),
            chunked.lookup(subject, VersionSpec::Latest).unwrap()
        );
    }
    assert_eq!(whole.list_subjects(true).unwrap(), chunked.list_subjects(true).unwrap());
}

#[test]
fn restart_after_compaction_rebuilds_the_same_view() {
    let cluster = Cluster::new();
    let node = cluster.start_writer(8081);
    node.register("orders-value", ORDERS_V1, SchemaType::Avro, Vec::new())
        .unwrap();
    node.register("orders-value", ORDERS_V2, SchemaType::Avro, Vec::new())
        .unwrap();
    node.set_compatibility(Some("orders-value"), CompatibilityMode::Full)
        .unwrap();
    node.set_compatibility(Some("orders-value"), CompatibilityMode::Forward)
        .unwrap();
    node.delete_version("orders-value", VersionSpec::Number(1), false)
        .unwrap();
    node.shutdown();

    cluster.log.compact(true);
    let restarted = cluster.start(8081);
    assert_eq!(
        restarted.list_versions("orders-value", true).unwrap(),
        vec![1, 2]
    );
    assert_eq!(
        restarted.list_versions("orders-value", false).unwrap(),
        vec![2]
    );
    // only the soft-deleted record of version 1 survived compaction
    assert_eq!(restarted.get_by_id(1).unwrap().id, 1);
    assert_eq!(
        restarted.get_compatibility(Some("orders-value")).unwrap(),
        CompatibilityMode::Forward
    );
    assert_eq!(restarted.store().degraded_count().unwrap(), 0);
    restarted.shutdown();
}

#[test]
fn malformed_records_are_skipped_not_fatal() {
    init_tracing();
    let cluster = Cluster::new();
    cluster
        .log
        .append(b"garbage".to_vec(), Some(b"{}".to_vec()), Vec::new())
        .unwrap();
    // version 3 of a subject whose history says version 2 comes next
    for version in [1, 3] {
        let (key, value) = RegistryRecord::RegisterSchema(SchemaRegistration {
            subject: "s".into(),
            version,
            id: version,
            schema: format!(r#"{{"type":"fixed","name":"F","size":{}}}"#, version),
            schema_type: SchemaType::Avro,
            references: Vec::new(),
            deleted: false,
        })
        .encode()
        .unwrap();
        cluster.log.append(key, value, Vec::new()).unwrap();
    }

    let node = cluster.start(8081);
    assert_eq!(node.list_versions("s", false).unwrap(), vec![1]);
    assert_eq!(node.store().degraded_count().unwrap(), 2);
    assert_eq!(node.replication().current_offset(), 2);
    node.shutdown();
}

#[test]
fn references_across_formats() {
    let cluster = Cluster::new();
    let node = cluster.start_writer(8081);

    node.register(
        "customer.proto",
        r#"syntax = "proto3"; package shop; message Customer { string name = 1; }"#,
        SchemaType::Protobuf,
        Vec::new(),
    )
    .unwrap();
    let order = r#"syntax = "proto3";
        package shop;
        import "customer.proto";
        message Order { int64 id = 1; Customer customer = 2; }"#;
    let id = node
        .register(
            "order-value",
            order,
            SchemaType::Protobuf,
            vec![SchemaReference::new("customer.proto", "customer.proto", 1)],
        )
        .unwrap();
    assert_eq!(node.get_by_id(id).unwrap().references.len(), 1);

    // unresolved import
    assert!(matches!(
        node.register("other", order, SchemaType::Protobuf, Vec::new()),
        Err(RegistryError::InvalidSchema(_))
    ));

    node.register(
        "person-value",
        r#"{"type":"object","properties":{"name":{"type":"string"}},"additionalProperties":false}"#,
        SchemaType::Json,
        Vec::new(),
    )
    .unwrap();
    let verdict = node
        .check_compatibility(
            "person-value",
            r#"{"type":"object","properties":{},"additionalProperties":false}"#,
            SchemaType::Json,
            &[],
        )
        .unwrap();
    assert!(!verdict.is_compatible());
    node.shutdown();
}

#[test]
fn checkpoints_shorten_restart() {
    let cluster = Cluster::new();
    let checkpoints = InMemoryCheckpointStore::new();
    let config = schema_log::RegistryConfig {
        checkpoint_interval: 2,
        ..Cluster::config(8081)
    };

    let shared: Arc<dyn CheckpointStore> = Arc::new(checkpoints.clone());
    let node = cluster.start_with(config.clone(), Some(Arc::clone(&shared)));
    assert!(wait_for(|| node.is_writer()));
    node.register("orders-value", ORDERS_V1, SchemaType::Avro, Vec::new())
        .unwrap();
    node.register("orders-value", ORDERS_V2, SchemaType::Avro, Vec::new())
        .unwrap();
    let stats = node.shutdown();
    assert!(stats.replicator.checkpoints_saved >= 1);
    let saved = checkpoints.load("_schemas").unwrap().unwrap();
    assert_eq!(saved.offset as usize, cluster.log.len() - 1);

    let restarted = cluster.start_with(config, Some(shared));
    assert_eq!(
        restarted.list_versions("orders-value", false).unwrap(),
        vec![1, 2]
    );
    let stats = restarted.shutdown();
    assert_eq!(stats.replicator.records_applied, 0);
}

#[test]
fn deleted_topic_stops_the_node() {
    let cluster = Cluster::new();
    let node = cluster.start_writer(8081);
    node.register("orders-value", ORDERS_V1, SchemaType::Avro, Vec::new())
        .unwrap();

    cluster.log.delete_topic();
    assert!(wait_for(|| node.replication().is_stopped()));
    assert_eq!(
        node.get_version("orders-value", VersionSpec::Latest),
        Err(RegistryError::Stopped)
    );
    assert_eq!(
        node.register("orders-value", ORDERS_V2, SchemaType::Avro, Vec::new()),
        Err(RegistryError::Stopped)
    );
    node.shutdown();
}
