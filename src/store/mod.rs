//! SchemaStore - the in-memory projection of the backing topic.
//!
//! The store is a fold over log records: `apply` is its only mutator and is
//! called by the replicator alone. Every read takes a shared lock, so a
//! reader always sees a state between two records, never half of one.
//!
//! Version numbers and schema ids come from the records; the store never
//! invents them. Records that would break the projection's invariants are
//! skipped, counted and logged instead of stopping replay.

mod checkpoint;
mod state;

use std::sync::{Arc, RwLock, RwLockReadGuard};

use serde::{Deserialize, Serialize};

pub use checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore};

use crate::error::{RegistryError, RegistryResult};
use crate::log::LogRecord;
use crate::record::{RegistryRecord, WRITER_EPOCH_HEADER};
use crate::replicator::OffsetWatcher;
use crate::types::{CompatibilityMode, SchemaId, SchemaReference, SchemaType, Version, VersionSpec};
use state::{Fold, StoreState, SubjectState, VersionEntry};

/// A schema body known by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSchema {
    pub id: SchemaId,
    pub schema: String,
    pub schema_type: SchemaType,
    pub references: Vec<SchemaReference>,
    /// Normalized text used to detect identical bodies.
    pub canonical: String,
}

/// One version of a subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaVersion {
    pub subject: String,
    pub version: Version,
    pub id: SchemaId,
    pub schema: String,
    pub schema_type: SchemaType,
    pub references: Vec<SchemaReference>,
    pub deleted: bool,
}

/// What `apply` did with a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Valid record that changed nothing (a replayed duplicate).
    Unchanged,
    /// Offset at or below the store's offset; ignored.
    AlreadyApplied,
    /// Malformed or out-of-order record; the offset still advanced.
    /// Carries a `RegistryError::MalformedRecord`.
    Skipped(RegistryError),
}

/// In-memory projection of all subjects, versions, ids and config.
///
/// Clone-friendly: clones share the same state and offset watcher.
#[derive(Clone)]
pub struct SchemaStore {
    state: Arc<RwLock<StoreState>>,
    watcher: Arc<OffsetWatcher>,
    default_compatibility: CompatibilityMode,
}

impl Default for SchemaStore {
    fn default() -> Self {
        Self::new(CompatibilityMode::default())
    }
}

impl SchemaStore {
    /// `default_compatibility` applies until a global setting is replayed.
    pub fn new(default_compatibility: CompatibilityMode) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            watcher: Arc::new(OffsetWatcher::new()),
            default_compatibility,
        }
    }

    /// Watcher notified with every applied offset.
    pub fn watcher(&self) -> Arc<OffsetWatcher> {
        Arc::clone(&self.watcher)
    }

    fn read(&self) -> RegistryResult<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| RegistryError::LockPoisoned("store read"))
    }

    /// Fold one log record into the projection.
    pub fn apply(&self, record: &LogRecord) -> RegistryResult<ApplyOutcome> {
        let outcome = {
            let mut state = self
                .state
                .write()
                .map_err(|_| RegistryError::LockPoisoned("store apply"))?;
            if (record.offset as i64) <= state.offset {
                return Ok(ApplyOutcome::AlreadyApplied);
            }

            let folded = match RegistryRecord::decode(&record.key, record.value.as_deref()) {
                Ok(decoded) => {
                    tracing::debug!(
                        offset = record.offset,
                        kind = decoded.kind_name(),
                        subject = decoded.subject().unwrap_or("<global>"),
                        epoch = record.header(WRITER_EPOCH_HEADER).unwrap_or("-"),
                        "applying record"
                    );
                    state.fold(&decoded)
                }
                Err(err) => Err(err.to_string()),
            };
            state.offset = record.offset as i64;

            match folded {
                Ok(Fold::Changed) => ApplyOutcome::Applied,
                Ok(Fold::Unchanged) => ApplyOutcome::Unchanged,
                Err(reason) => {
                    state.degraded += 1;
                    ApplyOutcome::Skipped(RegistryError::MalformedRecord {
                        offset: record.offset,
                        reason,
                    })
                }
            }
        };

        if let ApplyOutcome::Skipped(err) = &outcome {
            tracing::warn!(
                offset = record.offset,
                error = %err,
                "skipped malformed record, consistency degraded"
            );
        }
        self.watcher.offset_seen(record.offset);
        Ok(outcome)
    }

    /// Offset of the last applied record, or `OFFSET_EMPTY`.
    pub fn offset(&self) -> RegistryResult<i64> {
        Ok(self.read()?.offset)
    }

    /// Number of records skipped as malformed.
    pub fn degraded_count(&self) -> RegistryResult<u64> {
        Ok(self.read()?.degraded)
    }

    /// A live (not soft-deleted) version of a subject.
    pub fn lookup(&self, subject: &str, version: VersionSpec) -> RegistryResult<SchemaVersion> {
        self.find_version(subject, version, false)
    }

    /// Like `lookup`, but soft-deleted versions are visible too.
    pub fn lookup_including_deleted(
        &self,
        subject: &str,
        version: VersionSpec,
    ) -> RegistryResult<SchemaVersion> {
        self.find_version(subject, version, true)
    }

    fn find_version(
        &self,
        subject: &str,
        spec: VersionSpec,
        include_deleted: bool,
    ) -> RegistryResult<SchemaVersion> {
        let state = self.read()?;
        let visible = |e: &VersionEntry| include_deleted || !e.deleted;

        let subject_state = state
            .subjects
            .get(subject)
            .filter(|s| s.versions.values().any(|e| visible(e)))
            .ok_or_else(|| RegistryError::SubjectNotFound(subject.to_string()))?;

        let found = match spec {
            VersionSpec::Latest => subject_state
                .versions
                .iter()
                .rev()
                .find(|(_, e)| visible(e)),
            VersionSpec::Number(v) => subject_state
                .versions
                .get_key_value(&v)
                .filter(|(_, e)| visible(e)),
        };
        found
            .and_then(|(v, e)| version_of(&state, subject, *v, e))
            .ok_or_else(|| RegistryError::VersionNotFound {
                subject: subject.to_string(),
                version: spec,
            })
    }

    pub fn lookup_by_id(&self, id: SchemaId) -> RegistryResult<StoredSchema> {
        self.read()?
            .schemas
            .get(&id)
            .cloned()
            .ok_or(RegistryError::SchemaNotFound(id))
    }

    /// Subjects in name order; soft-deleted ones only when asked for.
    pub fn list_subjects(&self, include_deleted: bool) -> RegistryResult<Vec<String>> {
        let state = self.read()?;
        Ok(state
            .subjects
            .iter()
            .filter(|(_, s)| {
                if include_deleted {
                    !s.versions.is_empty()
                } else {
                    s.has_live_versions()
                }
            })
            .map(|(name, _)| name.clone())
            .collect())
    }

    pub fn list_versions(&self, subject: &str, include_deleted: bool) -> RegistryResult<Vec<Version>> {
        let state = self.read()?;
        let versions: Vec<Version> = state
            .subjects
            .get(subject)
            .map(|s| {
                s.versions
                    .iter()
                    .filter(|(_, e)| include_deleted || !e.deleted)
                    .map(|(v, _)| *v)
                    .collect()
            })
            .unwrap_or_default();
        if versions.is_empty() {
            return Err(RegistryError::SubjectNotFound(subject.to_string()));
        }
        Ok(versions)
    }

    /// Live versions of a subject, oldest first. Empty for unknown subjects.
    pub fn live_versions(&self, subject: &str) -> RegistryResult<Vec<SchemaVersion>> {
        let state = self.read()?;
        Ok(state
            .subjects
            .get(subject)
            .map(|s| {
                s.versions
                    .iter()
                    .filter(|(_, e)| !e.deleted)
                    .filter_map(|(v, e)| version_of(&state, subject, *v, e))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Live `(subject, version)` pairs registered with `id`.
    pub fn subjects_for_id(&self, id: SchemaId) -> RegistryResult<Vec<(String, Version)>> {
        let state = self.read()?;
        Ok(state
            .subjects
            .iter()
            .flat_map(|(name, s)| {
                s.versions
                    .iter()
                    .filter(move |(_, e)| e.id == id && !e.deleted)
                    .map(move |(v, _)| (name.clone(), *v))
            })
            .collect())
    }

    /// Live version of `subject` whose body matches, if any.
    pub fn find_by_schema(
        &self,
        subject: &str,
        schema_type: SchemaType,
        canonical: &str,
        references: &[SchemaReference],
    ) -> RegistryResult<Option<SchemaVersion>> {
        let state = self.read()?;
        let Some(subject_state) = state.subjects.get(subject) else {
            return Ok(None);
        };
        Ok(subject_state
            .versions
            .iter()
            .filter(|(_, e)| !e.deleted)
            .find(|(_, e)| {
                state
                    .schemas
                    .get(&e.id)
                    .map(|s| same_body(s, schema_type, canonical, references))
                    .unwrap_or(false)
            })
            .and_then(|(v, e)| version_of(&state, subject, *v, e)))
    }

    /// Id already assigned to an identical body under any subject.
    pub fn find_id(
        &self,
        schema_type: SchemaType,
        canonical: &str,
        references: &[SchemaReference],
    ) -> RegistryResult<Option<SchemaId>> {
        Ok(self
            .read()?
            .schemas
            .values()
            .find(|s| same_body(s, schema_type, canonical, references))
            .map(|s| s.id))
    }

    /// Live versions whose references point at `subject`/`version`.
    pub fn referenced_by(&self, subject: &str, version: Version) -> RegistryResult<Vec<(String, Version)>> {
        let state = self.read()?;
        let mut referrers = Vec::new();
        for (name, s) in &state.subjects {
            for (v, e) in s.versions.iter().filter(|(_, e)| !e.deleted) {
                let refers = state
                    .schemas
                    .get(&e.id)
                    .map(|body| {
                        body.references
                            .iter()
                            .any(|r| r.subject == subject && r.version == version)
                    })
                    .unwrap_or(false);
                if refers {
                    referrers.push((name.clone(), *v));
                }
            }
        }
        Ok(referrers)
    }

    /// Subject-level override, if set.
    pub fn subject_compatibility(&self, subject: &str) -> RegistryResult<Option<CompatibilityMode>> {
        Ok(self
            .read()?
            .subjects
            .get(subject)
            .and_then(|s| s.compatibility))
    }

    /// Global mode, falling back to the configured default.
    pub fn global_compatibility(&self) -> RegistryResult<CompatibilityMode> {
        Ok(self
            .read()?
            .global_compatibility
            .unwrap_or(self.default_compatibility))
    }

    /// Effective mode for a subject: its override, else the global mode.
    pub fn get_compatibility(&self, subject: &str) -> RegistryResult<CompatibilityMode> {
        let state = self.read()?;
        Ok(state
            .subjects
            .get(subject)
            .and_then(|s| s.compatibility)
            .or(state.global_compatibility)
            .unwrap_or(self.default_compatibility))
    }

    /// Whether every version of the subject is soft-deleted.
    pub fn is_subject_soft_deleted(&self, subject: &str) -> RegistryResult<bool> {
        Ok(self
            .read()?
            .subjects
            .get(subject)
            .map(|s| !s.versions.is_empty() && !s.has_live_versions())
            .unwrap_or(false))
    }

    /// Version number the next registration under `subject` must use.
    pub fn next_version(&self, subject: &str) -> RegistryResult<Version> {
        Ok(self
            .read()?
            .subjects
            .get(subject)
            .map(SubjectState::next_version)
            .unwrap_or(1))
    }

    /// Smallest id never used.
    pub fn next_schema_id(&self) -> RegistryResult<SchemaId> {
        Ok(self.read()?.highest_id + 1)
    }

    /// Binary snapshot of the projection, with the offset it reflects.
    pub fn snapshot(&self) -> RegistryResult<(i64, Vec<u8>)> {
        let state = self.read()?;
        let data = bitcode::serialize(&*state)
            .map_err(|e| RegistryError::Checkpoint(e.to_string()))?;
        Ok((state.offset, data))
    }

    /// Replace the projection with a snapshot taken by `snapshot`.
    pub fn restore(&self, data: &[u8]) -> RegistryResult<i64> {
        let restored: StoreState =
            bitcode::deserialize(data).map_err(|e| RegistryError::Checkpoint(e.to_string()))?;
        let offset = restored.offset;
        {
            let mut state = self
                .state
                .write()
                .map_err(|_| RegistryError::LockPoisoned("store restore"))?;
            *state = restored;
        }
        if offset >= 0 {
            self.watcher.offset_seen(offset as u64);
        }
        Ok(offset)
    }
}

impl SubjectState {
    fn next_version(&self) -> Version {
        self.highest_version + 1
    }
}

fn same_body(
    stored: &StoredSchema,
    schema_type: SchemaType,
    canonical: &str,
    references: &[SchemaReference],
) -> bool {
    stored.schema_type == schema_type
        && stored.canonical == canonical
        && stored.references.as_slice() == references
}

fn version_of(
    state: &StoreState,
    subject: &str,
    version: Version,
    entry: &VersionEntry,
) -> Option<SchemaVersion> {
    state.schemas.get(&entry.id).map(|body| SchemaVersion {
        subject: subject.to_string(),
        version,
        id: entry.id,
        schema: body.schema.clone(),
        schema_type: body.schema_type,
        references: body.references.clone(),
        deleted: entry.deleted,
    })
}
