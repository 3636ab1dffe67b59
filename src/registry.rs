//! SchemaRegistry - one node of the registry, wired together.
//!
//! Starting a registry spawns the replicator and the coordinator heartbeat;
//! reads go straight to the store, writes go through the gateway.

use std::sync::Arc;
use std::time::Duration;

use crate::compat::CompatibilityResult;
use crate::config::{ConfigError, RegistryConfig};
use crate::coordinator::{
    CoordinatorStats, CoordinatorThread, GroupMembership, MemberMetadata, WriterCoordinator,
};
use crate::error::{RegistryError, RegistryResult};
use crate::gateway::{Mutation, MutationGateway, MutationOutcome};
use crate::log::{LogConsumer, LogProducer};
use crate::replicator::{LogReplicator, ReplicationStatus, ReplicatorStats};
use crate::store::{CheckpointStore, SchemaStore, SchemaVersion, StoredSchema};
use crate::types::{CompatibilityMode, SchemaId, SchemaReference, SchemaType, Version, VersionSpec};

/// Statistics of the background threads, returned by `shutdown`.
#[derive(Debug, Default, Clone)]
pub struct ShutdownStats {
    pub replicator: ReplicatorStats,
    pub coordinator: CoordinatorStats,
}

pub struct SchemaRegistry {
    config: RegistryConfig,
    store: SchemaStore,
    status: ReplicationStatus,
    coordinator: Arc<WriterCoordinator>,
    gateway: Arc<MutationGateway>,
    replicator: LogReplicator,
    heartbeat: CoordinatorThread,
}

impl SchemaRegistry {
    /// Start a node that replays the whole retained topic.
    pub fn start<C>(
        config: RegistryConfig,
        producer: Arc<dyn LogProducer>,
        consumer: C,
        membership: Arc<dyn GroupMembership>,
    ) -> Result<Self, ConfigError>
    where
        C: LogConsumer + 'static,
    {
        Self::start_with_checkpoints(config, producer, consumer, membership, None)
    }

    pub fn start_with_checkpoints<C>(
        config: RegistryConfig,
        producer: Arc<dyn LogProducer>,
        consumer: C,
        membership: Arc<dyn GroupMembership>,
        checkpoints: Option<Arc<dyn CheckpointStore>>,
    ) -> Result<Self, ConfigError>
    where
        C: LogConsumer + 'static,
    {
        config.validate()?;

        let store = SchemaStore::new(config.compatibility);
        let replicator =
            LogReplicator::spawn_with_checkpoints(consumer, store.clone(), &config, checkpoints);
        let status = replicator.status();

        let member = MemberMetadata::new(
            config.node_url(),
            config.node_url(),
            config.master_eligibility,
        );
        let coordinator = Arc::new(WriterCoordinator::new(
            membership,
            member,
            config.session_timeout(),
        ));
        let heartbeat =
            CoordinatorThread::spawn(Arc::clone(&coordinator), config.heartbeat_interval());

        let gateway = Arc::new(MutationGateway::new(
            store.clone(),
            Arc::clone(&coordinator),
            producer,
            status.clone(),
            config.replication_timeout(),
        ));

        tracing::info!(
            node = %config.node_url(),
            topic = %config.topic_name,
            group = %config.group_id,
            "schema registry started"
        );
        Ok(Self {
            config,
            store,
            status,
            coordinator,
            gateway,
            replicator,
            heartbeat,
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn store(&self) -> &SchemaStore {
        &self.store
    }

    pub fn replication(&self) -> &ReplicationStatus {
        &self.status
    }

    pub fn coordinator(&self) -> &Arc<WriterCoordinator> {
        &self.coordinator
    }

    pub fn gateway(&self) -> &Arc<MutationGateway> {
        &self.gateway
    }

    pub fn is_ready(&self) -> bool {
        self.status.is_ready()
    }

    /// Block until the replicator has caught up with the topic.
    pub fn wait_until_ready(&self, timeout: Duration) -> RegistryResult<()> {
        self.status.wait_until_live(timeout)
    }

    pub fn is_writer(&self) -> bool {
        self.coordinator.is_writer()
    }

    /// URL of the current writer, where rejected writes should be sent.
    pub fn writer(&self) -> Option<String> {
        self.coordinator.writer().map(|w| w.url)
    }

    /// Heartbeat the group now instead of waiting for the next tick.
    /// Returns whether this node holds the writer role afterwards.
    pub fn refresh_role(&self) -> RegistryResult<bool> {
        Ok(self.coordinator.poll()?)
    }

    fn running(&self) -> RegistryResult<()> {
        if self.status.is_stopped() {
            Err(RegistryError::Stopped)
        } else {
            Ok(())
        }
    }

    pub fn propose(&self, mutation: Mutation) -> RegistryResult<MutationOutcome> {
        self.gateway.propose(mutation)
    }

    /// Register a schema and return its id.
    pub fn register(
        &self,
        subject: &str,
        schema: &str,
        schema_type: SchemaType,
        references: Vec<SchemaReference>,
    ) -> RegistryResult<SchemaId> {
        let outcome = self.propose(Mutation::Register {
            subject: subject.to_string(),
            schema: schema.to_string(),
            schema_type,
            references,
        })?;
        match outcome {
            MutationOutcome::Registered { id, .. } => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    pub fn get_version(&self, subject: &str, version: VersionSpec) -> RegistryResult<SchemaVersion> {
        self.running()?;
        self.store.lookup(subject, version)
    }

    pub fn get_by_id(&self, id: SchemaId) -> RegistryResult<StoredSchema> {
        self.running()?;
        self.store.lookup_by_id(id)
    }

    pub fn list_subjects(&self, include_deleted: bool) -> RegistryResult<Vec<String>> {
        self.running()?;
        self.store.list_subjects(include_deleted)
    }

    pub fn list_versions(&self, subject: &str, include_deleted: bool) -> RegistryResult<Vec<Version>> {
        self.running()?;
        self.store.list_versions(subject, include_deleted)
    }

    /// Soft-delete (or, once soft-deleted, permanently delete) a subject.
    /// Returns the versions deleted.
    pub fn delete_subject(&self, subject: &str, permanent: bool) -> RegistryResult<Vec<Version>> {
        let outcome = self.propose(Mutation::DeleteSubject {
            subject: subject.to_string(),
            permanent,
        })?;
        match outcome {
            MutationOutcome::SubjectDeleted { versions, .. } => Ok(versions),
            other => Err(unexpected(other)),
        }
    }

    pub fn delete_version(
        &self,
        subject: &str,
        version: VersionSpec,
        permanent: bool,
    ) -> RegistryResult<Version> {
        let outcome = self.propose(Mutation::DeleteVersion {
            subject: subject.to_string(),
            version,
            permanent,
        })?;
        match outcome {
            MutationOutcome::VersionDeleted { version, .. } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    /// `subject: None` sets the global mode.
    pub fn set_compatibility(&self, subject: Option<&str>, mode: CompatibilityMode) -> RegistryResult<()> {
        self.propose(Mutation::SetCompatibility {
            subject: subject.map(str::to_string),
            mode,
        })
        .map(|_| ())
    }

    pub fn clear_compatibility(&self, subject: &str) -> RegistryResult<()> {
        self.propose(Mutation::ClearCompatibility {
            subject: subject.to_string(),
        })
        .map(|_| ())
    }

    /// Effective mode of a subject, or the global mode for `None`.
    pub fn get_compatibility(&self, subject: Option<&str>) -> RegistryResult<CompatibilityMode> {
        self.running()?;
        match subject {
            Some(subject) => self.store.get_compatibility(subject),
            None => self.store.global_compatibility(),
        }
    }

    pub fn check_compatibility(
        &self,
        subject: &str,
        schema: &str,
        schema_type: SchemaType,
        references: &[SchemaReference],
    ) -> RegistryResult<CompatibilityResult> {
        self.running()?;
        self.gateway
            .check_compatibility(subject, schema, schema_type, references)
    }

    /// Stop the heartbeat (leaving the group) and the replicator.
    pub fn shutdown(self) -> ShutdownStats {
        let coordinator = self.heartbeat.stop();
        let replicator = self.replicator.stop();
        tracing::info!(node = %self.config.node_url(), "schema registry stopped");
        ShutdownStats {
            replicator,
            coordinator,
        }
    }
}

#[cfg(feature = "async")]
impl SchemaRegistry {
    pub async fn propose_async(&self, mutation: Mutation) -> RegistryResult<MutationOutcome> {
        self.gateway.propose_async(mutation).await
    }

    pub async fn register_async(
        &self,
        subject: &str,
        schema: &str,
        schema_type: SchemaType,
        references: Vec<SchemaReference>,
    ) -> RegistryResult<SchemaId> {
        let outcome = self
            .propose_async(Mutation::Register {
                subject: subject.to_string(),
                schema: schema.to_string(),
                schema_type,
                references,
            })
            .await?;
        match outcome {
            MutationOutcome::Registered { id, .. } => Ok(id),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(outcome: MutationOutcome) -> RegistryError {
    RegistryError::UnexpectedOutcome(format!("{:?}", outcome))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_outcomes_are_not_reported_as_log_failures() {
        let err = unexpected(MutationOutcome::CompatibilityCleared {
            subject: "orders-value".into(),
        });
        assert!(matches!(
            &err,
            RegistryError::UnexpectedOutcome(detail) if detail.contains("orders-value")
        ));
        assert!(!err.is_retriable());
    }
}
