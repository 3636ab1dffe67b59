//! Shared harness: an in-memory topic and coordination group that several
//! registry nodes can be started against.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use schema_log::store::CheckpointStore;
use schema_log::{InMemoryGroup, InMemoryLog, RegistryConfig, SchemaRegistry};

pub const WAIT: Duration = Duration::from_secs(5);

pub const ORDERS_V1: &str = r#"{"type":"record","name":"Order","fields":[
    {"name":"id","type":"int"},
    {"name":"name","type":"string"}]}"#;

pub const ORDERS_V2: &str = r#"{"type":"record","name":"Order","fields":[
    {"name":"id","type":"int"},
    {"name":"name","type":"string"},
    {"name":"note","type":"string","default":""}]}"#;

pub const ORDERS_V3: &str = r#"{"type":"record","name":"Order","fields":[
    {"name":"id","type":"int"}]}"#;

/// A topic and a group shared by every node started from it.
#[derive(Clone)]
pub struct Cluster {
    pub log: InMemoryLog,
    pub group: InMemoryGroup,
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            log: InMemoryLog::new("_schemas"),
            group: InMemoryGroup::new("schema-registry", Duration::from_millis(500)),
        }
    }

    pub fn config(port: u16) -> RegistryConfig {
        RegistryConfig {
            port,
            session_timeout_ms: 500,
            heartbeat_interval_ms: 10,
            poll_timeout_ms: 5,
            reconnect_backoff_ms: 5,
            reconnect_backoff_max_ms: 50,
            replication_timeout_ms: 2_000,
            ..RegistryConfig::default()
        }
    }

    /// Start a node and wait until it has replayed the topic.
    pub fn start(&self, port: u16) -> SchemaRegistry {
        self.start_with(Self::config(port), None)
    }

    pub fn start_with(
        &self,
        config: RegistryConfig,
        checkpoints: Option<Arc<dyn CheckpointStore>>,
    ) -> SchemaRegistry {
        let node = SchemaRegistry::start_with_checkpoints(
            config,
            Arc::new(self.log.clone()),
            self.log.new_consumer(),
            Arc::new(self.group.clone()),
            checkpoints,
        )
        .unwrap();
        node.wait_until_ready(WAIT).unwrap();
        node
    }

    /// Start a node and wait until it holds the writer role.
    pub fn start_writer(&self, port: u16) -> SchemaRegistry {
        let node = self.start(port);
        assert!(wait_for(|| node.is_writer()), "node never became writer");
        node
    }
}

/// Poll `condition` until it holds or `WAIT` elapses.
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
