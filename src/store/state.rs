//! The fold: how each decoded record changes the projection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::StoredSchema;
use crate::compat::canonical_form;
use crate::record::{RegistryRecord, SchemaRegistration};
use crate::replicator::OFFSET_EMPTY;
use crate::types::{CompatibilityMode, SchemaId, Version};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct VersionEntry {
    pub id: SchemaId,
    pub deleted: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct SubjectState {
    pub versions: BTreeMap<Version, VersionEntry>,
    /// Highest version ever registered, hard-deleted ones included.
    pub highest_version: Version,
    pub compatibility: Option<CompatibilityMode>,
}

impl SubjectState {
    pub fn has_live_versions(&self) -> bool {
        self.versions.values().any(|e| !e.deleted)
    }
}

/// Result of folding one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fold {
    Changed,
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoreState {
    pub subjects: BTreeMap<String, SubjectState>,
    pub schemas: BTreeMap<SchemaId, StoredSchema>,
    pub global_compatibility: Option<CompatibilityMode>,
    /// Highest schema id ever seen; ids are never reused.
    pub highest_id: SchemaId,
    /// Offset of the last record folded in.
    pub offset: i64,
    pub degraded: u64,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            subjects: BTreeMap::new(),
            schemas: BTreeMap::new(),
            global_compatibility: None,
            highest_id: 0,
            offset: OFFSET_EMPTY,
            degraded: 0,
        }
    }
}

impl StoreState {
    /// Fold a record in. `Err` carries the reason the record was rejected;
    /// a rejected record leaves the state untouched.
    pub fn fold(&mut self, record: &RegistryRecord) -> Result<Fold, String> {
        match record {
            RegistryRecord::RegisterSchema(reg) => self.register(reg, false),
            RegistryRecord::DeleteVersion {
                permanent: false,
                registration: Some(reg),
                ..
            } => self.register(reg, true),
            RegistryRecord::DeleteVersion {
                permanent: false,
                registration: None,
                subject,
                version,
            } => Err(format!(
                "soft delete of {}/{} carries no schema",
                subject, version
            )),
            RegistryRecord::DeleteVersion {
                permanent: true,
                subject,
                version,
                ..
            } => Ok(self.hard_delete(subject, *version)),
            RegistryRecord::DeleteSubject { subject, version } => {
                Ok(self.delete_subject(subject, *version))
            }
            RegistryRecord::SetCompatibility { subject, mode } => {
                match subject {
                    None => self.global_compatibility = *mode,
                    Some(subject) => {
                        self.subjects.entry(subject.clone()).or_default().compatibility = *mode
                    }
                }
                Ok(Fold::Changed)
            }
            RegistryRecord::Noop => Ok(Fold::Unchanged),
        }
    }

    fn register(&mut self, reg: &SchemaRegistration, deleted: bool) -> Result<Fold, String> {
        let canonical =
            canonical_form(reg.schema_type, &reg.schema).unwrap_or_else(|_| reg.schema.clone());

        if let Some(existing) = self.schemas.get(&reg.id) {
            if existing.canonical != canonical
                || existing.schema_type != reg.schema_type
                || existing.references != reg.references
            {
                return Err(format!(
                    "schema id {} is already assigned to a different schema",
                    reg.id
                ));
            }
        }

        let subject = self.subjects.get(&reg.subject);
        if let Some(entry) = subject.and_then(|s| s.versions.get(&reg.version)) {
            if entry.id != reg.id {
                return Err(format!(
                    "version {} of {} is already registered with id {}",
                    reg.version, reg.subject, entry.id
                ));
            }
            if entry.deleted == deleted {
                return Ok(Fold::Unchanged);
            }
        } else {
            let highest = subject.map(|s| s.highest_version).unwrap_or(0);
            // compaction moves a soft-deleted version behind its successors
            let moved_by_compaction = deleted && reg.version < highest;
            if highest > 0 && reg.version != highest + 1 && !moved_by_compaction {
                return Err(format!(
                    "version {} of {} is out of order, expected {}",
                    reg.version,
                    reg.subject,
                    highest + 1
                ));
            }
        }

        self.schemas.entry(reg.id).or_insert_with(|| StoredSchema {
            id: reg.id,
            schema: reg.schema.clone(),
            schema_type: reg.schema_type,
            references: reg.references.clone(),
            canonical,
        });
        self.highest_id = self.highest_id.max(reg.id);

        let subject = self.subjects.entry(reg.subject.clone()).or_default();
        subject.versions.insert(
            reg.version,
            VersionEntry {
                id: reg.id,
                deleted,
            },
        );
        subject.highest_version = subject.highest_version.max(reg.version);
        Ok(Fold::Changed)
    }

    fn hard_delete(&mut self, subject: &str, version: Version) -> Fold {
        let removed = self
            .subjects
            .get_mut(subject)
            .and_then(|s| s.versions.remove(&version));
        match removed {
            Some(entry) => {
                self.release_id(entry.id);
                Fold::Changed
            }
            None => {
                tracing::warn!(
                    "Hard delete: version: {} for subject: '{}' did not exist, should have",
                    version,
                    subject
                );
                Fold::Unchanged
            }
        }
    }

    fn delete_subject(&mut self, subject: &str, up_to: Version) -> Fold {
        let Some(state) = self.subjects.get_mut(subject) else {
            tracing::warn!(subject = %subject, "delete of unknown subject ignored");
            return Fold::Unchanged;
        };
        let mut changed = false;
        for entry in state.versions.range_mut(..=up_to).map(|(_, e)| e) {
            changed |= !entry.deleted;
            entry.deleted = true;
        }
        if changed {
            Fold::Changed
        } else {
            Fold::Unchanged
        }
    }

    /// Drops a schema body once no version uses its id.
    fn release_id(&mut self, id: SchemaId) {
        let in_use = self
            .subjects
            .values()
            .any(|s| s.versions.values().any(|e| e.id == id));
        if !in_use {
            self.schemas.remove(&id);
        }
    }
}
