//! MutationGateway - the write path.
//!
//! Every mutation goes through the same steps on the writer node:
//!
//! 1. refuse unless this node holds the writer role;
//! 2. take the node-wide append lock, so the checks below run against a
//!    store that already contains every earlier write from this node;
//! 3. refuse until the replicator is live;
//! 4. validate against the current store (references, compatibility,
//!    delete rules) and plan the records to append;
//! 5. append them stamped with the writer epoch;
//! 6. wait until the replicator has applied the last one, so the caller's
//!    next read sees its own write.
//!
//! A failed check appends nothing. A timeout in step 6 does not undo the
//! append; the write is durable, only its visibility is unconfirmed.

mod resolve;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::compat::{CompatibilityChecker, CompatibilityResult};
use crate::coordinator::WriterCoordinator;
use crate::error::{RegistryError, RegistryResult};
use crate::log::LogProducer;
use crate::record::{RegistryRecord, SchemaRegistration, WRITER_EPOCH_HEADER};
use crate::replicator::ReplicationStatus;
use crate::store::SchemaStore;
use crate::types::{CompatibilityMode, SchemaId, SchemaReference, SchemaType, Version, VersionSpec};

pub(crate) use resolve::Resolver;

/// A proposed change to registry state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Register {
        subject: String,
        schema: String,
        schema_type: SchemaType,
        references: Vec<SchemaReference>,
    },
    DeleteVersion {
        subject: String,
        version: VersionSpec,
        permanent: bool,
    },
    DeleteSubject {
        subject: String,
        permanent: bool,
    },
    /// `subject: None` sets the global mode.
    SetCompatibility {
        subject: Option<String>,
        mode: CompatibilityMode,
    },
    /// Drop a subject's override so it follows the global mode again.
    ClearCompatibility { subject: String },
}

impl Mutation {
    pub fn register(
        subject: impl Into<String>,
        schema: impl Into<String>,
        schema_type: SchemaType,
    ) -> Self {
        Mutation::Register {
            subject: subject.into(),
            schema: schema.into(),
            schema_type,
            references: Vec::new(),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Mutation::Register { .. } => "register",
            Mutation::DeleteVersion { .. } => "delete-version",
            Mutation::DeleteSubject { .. } => "delete-subject",
            Mutation::SetCompatibility { .. } => "set-compatibility",
            Mutation::ClearCompatibility { .. } => "clear-compatibility",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// `existing` is set when an identical schema was already registered
    /// and nothing was appended.
    Registered {
        subject: String,
        version: Version,
        id: SchemaId,
        existing: bool,
    },
    VersionDeleted {
        subject: String,
        version: Version,
    },
    SubjectDeleted {
        subject: String,
        versions: Vec<Version>,
    },
    CompatibilitySet {
        subject: Option<String>,
        mode: CompatibilityMode,
    },
    CompatibilityCleared {
        subject: String,
    },
}

/// Records to append and the outcome to report once they are applied.
struct Plan {
    records: Vec<RegistryRecord>,
    outcome: MutationOutcome,
}

impl Plan {
    fn single(record: RegistryRecord, outcome: MutationOutcome) -> Self {
        Self {
            records: vec![record],
            outcome,
        }
    }

    fn nothing(outcome: MutationOutcome) -> Self {
        Self {
            records: Vec::new(),
            outcome,
        }
    }
}

/// Serializes writes on this node and fences them with the writer epoch.
pub struct MutationGateway {
    store: SchemaStore,
    coordinator: Arc<WriterCoordinator>,
    producer: Arc<dyn LogProducer>,
    replication: ReplicationStatus,
    replication_timeout: Duration,
    /// Held across validate + append + wait. Holds the last epoch whose
    /// earlier records this node is known to have replayed.
    append_lock: Mutex<Option<u64>>,
}

impl MutationGateway {
    pub fn new(
        store: SchemaStore,
        coordinator: Arc<WriterCoordinator>,
        producer: Arc<dyn LogProducer>,
        replication: ReplicationStatus,
        replication_timeout: Duration,
    ) -> Self {
        Self {
            store,
            coordinator,
            producer,
            replication,
            replication_timeout,
            append_lock: Mutex::new(None),
        }
    }

    fn not_writer(&self) -> RegistryError {
        RegistryError::NotWriter {
            writer: self.coordinator.writer().map(|w| w.url),
        }
    }

    /// Validate, append and wait for `mutation` to become visible.
    pub fn propose(&self, mutation: Mutation) -> RegistryResult<MutationOutcome> {
        if !self.coordinator.is_writer() {
            tracing::debug!(mutation = mutation.kind_name(), "rejected: not the writer");
            return Err(self.not_writer());
        }

        let mut synced_epoch = self
            .append_lock
            .lock()
            .map_err(|_| RegistryError::LockPoisoned("gateway append"))?;

        // the role may have moved while waiting for the lock
        let epoch = self.coordinator.writer_epoch().ok_or_else(|| self.not_writer())?;
        if self.replication.is_stopped() {
            return Err(RegistryError::Stopped);
        }
        if !self.replication.is_ready() {
            return Err(RegistryError::NotReady);
        }

        // first write under a new epoch: make sure everything the previous
        // writer appended has been replayed before validating against it
        if *synced_epoch != Some(epoch) {
            let offset = self.append(&RegistryRecord::Noop, epoch)?;
            self.replication
                .wait_until_replicated(offset, self.replication_timeout)?;
            *synced_epoch = Some(epoch);
        }

        let plan = self.plan(&mutation).map_err(|err| {
            tracing::debug!(mutation = mutation.kind_name(), error = %err, "rejected mutation");
            err
        })?;

        let mut last_offset = None;
        for record in &plan.records {
            last_offset = Some(self.append(record, epoch)?);
        }
        if let Some(offset) = last_offset {
            tracing::info!(
                mutation = mutation.kind_name(),
                offset,
                epoch,
                records = plan.records.len(),
                "mutation appended"
            );
            self.replication
                .wait_until_replicated(offset, self.replication_timeout)?;
        }
        Ok(plan.outcome)
    }

    /// Check `schema` against the subject's live versions under the
    /// subject's mode, without registering it.
    pub fn check_compatibility(
        &self,
        subject: &str,
        schema: &str,
        schema_type: SchemaType,
        references: &[SchemaReference],
    ) -> RegistryResult<CompatibilityResult> {
        let mode = self.store.get_compatibility(subject)?;
        let resolver = Resolver::new(&self.store, mode);
        let candidate = resolver.parse_candidate(schema_type, schema, references)?;
        let existing = resolver.existing(subject)?;
        Ok(CompatibilityChecker::check(mode, &candidate, &existing))
    }

    fn append(&self, record: &RegistryRecord, epoch: u64) -> RegistryResult<u64> {
        let (key, value) = record
            .encode()
            .map_err(|e| RegistryError::Log(e.to_string()))?;
        let offset = self.producer.append(
            key,
            value,
            vec![(WRITER_EPOCH_HEADER.to_string(), epoch.to_string())],
        )?;
        Ok(offset)
    }

    fn plan(&self, mutation: &Mutation) -> RegistryResult<Plan> {
        match mutation {
            Mutation::Register {
                subject,
                schema,
                schema_type,
                references,
            } => self.plan_register(subject, schema, *schema_type, references),
            Mutation::DeleteVersion {
                subject,
                version,
                permanent,
            } => self.plan_delete_version(subject, *version, *permanent),
            Mutation::DeleteSubject { subject, permanent } => {
                self.plan_delete_subject(subject, *permanent)
            }
            Mutation::SetCompatibility { subject, mode } => Ok(Plan::single(
                RegistryRecord::SetCompatibility {
                    subject: subject.clone(),
                    mode: Some(*mode),
                },
                MutationOutcome::CompatibilitySet {
                    subject: subject.clone(),
                    mode: *mode,
                },
            )),
            Mutation::ClearCompatibility { subject } => {
                let outcome = MutationOutcome::CompatibilityCleared {
                    subject: subject.clone(),
                };
                if self.store.subject_compatibility(subject)?.is_none() {
                    return Ok(Plan::nothing(outcome));
                }
                Ok(Plan::single(
                    RegistryRecord::SetCompatibility {
                        subject: Some(subject.clone()),
                        mode: None,
                    },
                    outcome,
                ))
            }
        }
    }

    fn plan_register(
        &self,
        subject: &str,
        schema: &str,
        schema_type: SchemaType,
        references: &[SchemaReference],
    ) -> RegistryResult<Plan> {
        if subject.trim().is_empty() {
            return Err(RegistryError::InvalidSchema("subject must not be empty".into()));
        }

        let mode = self.store.get_compatibility(subject)?;
        let resolver = Resolver::new(&self.store, mode);
        let candidate = resolver.parse_candidate(schema_type, schema, references)?;

        if let Some(existing) =
            self.store
                .find_by_schema(subject, schema_type, candidate.canonical(), references)?
        {
            return Ok(Plan::nothing(MutationOutcome::Registered {
                subject: subject.to_string(),
                version: existing.version,
                id: existing.id,
                existing: true,
            }));
        }

        let previous = resolver.existing(subject)?;
        if let CompatibilityResult::Incompatible(reasons) =
            CompatibilityChecker::check(mode, &candidate, &previous)
        {
            return Err(RegistryError::IncompatibleSchema {
                subject: subject.to_string(),
                reasons,
            });
        }

        let id = match self
            .store
            .find_id(schema_type, candidate.canonical(), references)?
        {
            Some(id) => id,
            None => self.store.next_schema_id()?,
        };
        let version = self.store.next_version(subject)?;

        Ok(Plan::single(
            RegistryRecord::RegisterSchema(SchemaRegistration {
                subject: subject.to_string(),
                version,
                id,
                schema: schema.to_string(),
                schema_type,
                references: references.to_vec(),
                deleted: false,
            }),
            MutationOutcome::Registered {
                subject: subject.to_string(),
                version,
                id,
                existing: false,
            },
        ))
    }

    fn plan_delete_version(
        &self,
        subject: &str,
        spec: VersionSpec,
        permanent: bool,
    ) -> RegistryResult<Plan> {
        let target = if permanent {
            self.store.lookup_including_deleted(subject, spec)?
        } else {
            self.store.lookup(subject, spec)?
        };
        if permanent && !target.deleted {
            return Err(RegistryError::VersionNotSoftDeleted {
                subject: subject.to_string(),
                version: target.version,
            });
        }
        self.ensure_unreferenced(subject, target.version)?;

        let record = if permanent {
            RegistryRecord::hard_delete(subject, target.version)
        } else {
            RegistryRecord::soft_delete(&SchemaRegistration {
                subject: target.subject.clone(),
                version: target.version,
                id: target.id,
                schema: target.schema.clone(),
                schema_type: target.schema_type,
                references: target.references.clone(),
                deleted: true,
            })
        };
        Ok(Plan::single(
            record,
            MutationOutcome::VersionDeleted {
                subject: subject.to_string(),
                version: target.version,
            },
        ))
    }

    fn plan_delete_subject(&self, subject: &str, permanent: bool) -> RegistryResult<Plan> {
        if permanent {
            let versions = self.store.list_versions(subject, true)?;
            if !self.store.is_subject_soft_deleted(subject)? {
                return Err(RegistryError::SubjectNotSoftDeleted(subject.to_string()));
            }
            for version in &versions {
                self.ensure_unreferenced(subject, *version)?;
            }
            return Ok(Plan {
                records: versions
                    .iter()
                    .map(|v| RegistryRecord::hard_delete(subject, *v))
                    .collect(),
                outcome: MutationOutcome::SubjectDeleted {
                    subject: subject.to_string(),
                    versions,
                },
            });
        }

        let versions = self.store.list_versions(subject, false)?;
        for version in &versions {
            self.ensure_unreferenced(subject, *version)?;
        }
        let latest = versions.iter().copied().max().unwrap_or_default();
        Ok(Plan::single(
            RegistryRecord::DeleteSubject {
                subject: subject.to_string(),
                version: latest,
            },
            MutationOutcome::SubjectDeleted {
                subject: subject.to_string(),
                versions,
            },
        ))
    }

    fn ensure_unreferenced(&self, subject: &str, version: Version) -> RegistryResult<()> {
        let referenced_by = self.store.referenced_by(subject, version)?;
        if referenced_by.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::ReferenceExists {
                subject: subject.to_string(),
                version,
                referenced_by,
            })
        }
    }
}

#[cfg(feature = "async")]
impl MutationGateway {
    /// `propose` on the blocking pool.
    ///
    /// Dropping the returned future abandons the wait only; a mutation that
    /// was already appended still lands in the store.
    pub async fn propose_async(
        self: &Arc<Self>,
        mutation: Mutation,
    ) -> RegistryResult<MutationOutcome> {
        let gateway = Arc::clone(self);
        tokio::task::spawn_blocking(move || gateway.propose(mutation))
            .await
            .map_err(|err| task_failed("async propose", err))?
    }
}

#[cfg(feature = "async")]
fn task_failed(operation: &'static str, err: tokio::task::JoinError) -> RegistryError {
    RegistryError::TaskFailed {
        operation,
        reason: err.to_string(),
    }
}
