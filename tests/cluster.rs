//! Several nodes sharing one topic and one coordination group.

mod support;

use schema_log::{RegistryConfig, RegistryError, SchemaType, VersionSpec};
use support::{wait_for, Cluster, ORDERS_V1, ORDERS_V2};

#[test]
fn exactly_one_writer_and_followers_redirect() {
    let cluster = Cluster::new();
    let first = cluster.start(8081);
    let second = cluster.start(8082);

    // lowest url is elected
    assert!(wait_for(|| first.is_writer() && !second.is_writer()));
    assert!(wait_for(|| second.writer().as_deref() == Some("127.0.0.1:8081")));

    match second.register("orders-value", ORDERS_V1, SchemaType::Avro, Vec::new()) {
        Err(RegistryError::NotWriter { writer }) => {
            assert_eq!(writer.as_deref(), Some("127.0.0.1:8081"))
        }
        other => panic!("expected NotWriter, got {:?}", other),
    }
    // the rejected write left no trace
    assert!(cluster.log.is_empty());

    second.shutdown();
    first.shutdown();
}

#[test]
fn followers_serve_what_the_writer_wrote() {
    let cluster = Cluster::new();
    let writer = cluster.start_writer(8081);
    let follower = cluster.start(8082);

    writer
        .register("orders-value", ORDERS_V1, SchemaType::Avro, Vec::new())
        .unwrap();
    let end = cluster.log.end_offset() - 1;
    follower
        .replication()
        .wait_until_replicated(end, support::WAIT)
        .unwrap();
    let seen = follower
        .get_version("orders-value", VersionSpec::Latest)
        .unwrap();
    assert_eq!((seen.version, seen.id), (1, 1));

    follower.shutdown();
    writer.shutdown();
}

#[test]
fn failover_moves_the_role_to_a_new_epoch() {
    let cluster = Cluster::new();
    let first = cluster.start_writer(8081);
    let second = cluster.start(8082);
    assert!(wait_for(|| second.writer().is_some()));

    first
        .register("orders-value", ORDERS_V1, SchemaType::Avro, Vec::new())
        .unwrap();
    let old_epoch = first.coordinator().current_epoch();
    first.shutdown();

    assert!(wait_for(|| second.is_writer()));
    assert!(second.coordinator().current_epoch() > old_epoch);

    // the new writer continues the sequence it replicated
    let id = second
        .register("orders-value", ORDERS_V2, SchemaType::Avro, Vec::new())
        .unwrap();
    assert_eq!(id, 2);
    assert_eq!(
        second.list_versions("orders-value", false).unwrap(),
        vec![1, 2]
    );

    let epochs: Vec<u64> = cluster
        .log
        .records()
        .iter()
        .filter_map(|r| r.header("writer-epoch"))
        .filter_map(|e| e.parse().ok())
        .collect();
    assert!(epochs.windows(2).all(|w| w[0] <= w[1]), "epochs never go back: {:?}", epochs);
    second.shutdown();
}

#[test]
fn ineligible_nodes_never_write() {
    let cluster = Cluster::new();
    let config = RegistryConfig {
        master_eligibility: false,
        ..Cluster::config(8080)
    };
    let replica = cluster.start_with(config, None);
    let writer = cluster.start_writer(8081);

    assert!(wait_for(|| replica.writer().as_deref() == Some("127.0.0.1:8081")));
    assert!(!replica.is_writer());

    writer.shutdown();
    assert!(wait_for(|| replica.writer().is_none()));
    assert!(matches!(
        replica.register("orders-value", ORDERS_V1, SchemaType::Avro, Vec::new()),
        Err(RegistryError::NotWriter { writer: None })
    ));
    replica.shutdown();
}

#[test]
fn a_writer_cut_off_from_the_group_stops_writing() {
    let cluster = Cluster::new();
    let node = cluster.start_writer(8081);
    node.register("orders-value", ORDERS_V1, SchemaType::Avro, Vec::new())
        .unwrap();

    cluster.group.set_available(false);
    assert!(matches!(node.refresh_role(), Err(RegistryError::Coordination(_))));
    assert!(wait_for(|| !node.is_writer()));
    assert!(matches!(
        node.register("orders-value", ORDERS_V2, SchemaType::Avro, Vec::new()),
        Err(RegistryError::NotWriter { .. })
    ));
    // reads keep working from the local replica
    assert_eq!(node.list_versions("orders-value", false).unwrap(), vec![1]);

    cluster.group.set_available(true);
    assert!(wait_for(|| node.refresh_role().unwrap_or(false)));
    assert_eq!(
        node.register("orders-value", ORDERS_V2, SchemaType::Avro, Vec::new())
            .unwrap(),
        2
    );
    node.shutdown();
}
