//! Schema registry core for log-based messaging.
//!
//! A compacted topic is the only durable state. Every node replays it into
//! an in-memory [`SchemaStore`](store::SchemaStore); one elected node at a
//! time accepts writes, validates them with the
//! [`CompatibilityChecker`](compat::CompatibilityChecker), appends them to
//! the topic and waits until its own replica has applied them.
//!
//! ```text
//!              propose                      append
//!   caller ──> MutationGateway ─────────────────────> topic
//!                 │  is_writer?                         │
//!                 ├─> WriterCoordinator                 │ poll
//!                 │  wait_until_replicated              v
//!                 └─> ReplicationStatus <── LogReplicator ──apply──> SchemaStore
//! ```

pub mod compat;
pub mod config;
pub mod coordinator;
mod error;
pub mod gateway;
pub mod log;
pub mod record;
mod registry;
pub mod replicator;
pub mod store;
mod types;

pub use compat::{CompatibilityChecker, CompatibilityResult, Incompatibility, IncompatibilityKind};
pub use config::{ConfigError, RegistryConfig};
pub use coordinator::{InMemoryGroup, WriterCoordinator};
pub use error::{RegistryError, RegistryResult};
pub use gateway::{Mutation, MutationGateway, MutationOutcome};
pub use log::InMemoryLog;
pub use registry::{SchemaRegistry, ShutdownStats};
pub use replicator::{LogReplicator, ReplicatorState};
pub use store::{SchemaStore, SchemaVersion, StoredSchema};
pub use types::{CompatibilityMode, SchemaId, SchemaReference, SchemaType, Version, VersionSpec};
