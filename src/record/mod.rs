//! Record codec for the backing topic.
//!
//! Every registry mutation is one record. Keys identify what a record is
//! about and stay stable so compaction keeps exactly the records that still
//! matter: one per schema version, one per config scope, one per deleted
//! subject. Values are JSON.
//!
//! | kind              | key                                   | value                       |
//! |-------------------|---------------------------------------|-----------------------------|
//! | register schema   | `SCHEMA` subject + version            | schema body, `deleted=false`|
//! | soft delete       | `SCHEMA` subject + version            | schema body, `deleted=true` |
//! | hard delete       | `SCHEMA` subject + version            | tombstone                   |
//! | delete subject    | `DELETE_SUBJECT` subject              | subject + latest version    |
//! | set compatibility | `CONFIG` subject or null (global)     | `compatibilityLevel`        |
//! | clear override    | `CONFIG` subject                      | tombstone                   |
//! | noop / heartbeat  | `NOOP`                                | tombstone                   |

mod key;
mod value;

use thiserror::Error;

pub use key::{KeyType, RecordKey};
pub use value::{ConfigValue, DeleteSubjectValue, SchemaRegistration};

use crate::types::{CompatibilityMode, Version};

/// Header carrying the writer epoch a record was appended under.
pub const WRITER_EPOCH_HEADER: &str = "writer-epoch";

/// Errors decoding or encoding a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("invalid record key: {0}")]
    InvalidKey(String),
    #[error("invalid record value: {0}")]
    InvalidValue(String),
    #[error("cannot encode record: {0}")]
    Unencodable(String),
}

/// A decoded registry mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryRecord {
    RegisterSchema(SchemaRegistration),
    /// Soft deletes carry the registration so compaction keeps the body;
    /// hard deletes are tombstones and carry nothing.
    DeleteVersion {
        subject: String,
        version: Version,
        permanent: bool,
        registration: Option<SchemaRegistration>,
    },
    /// Soft-deletes every version up to and including `version`.
    DeleteSubject { subject: String, version: Version },
    /// `subject: None` targets the global default; `mode: None` clears the
    /// setting.
    SetCompatibility {
        subject: Option<String>,
        mode: Option<CompatibilityMode>,
    },
    Noop,
}

impl RegistryRecord {
    /// Soft delete of a registered version.
    pub fn soft_delete(registration: &SchemaRegistration) -> Self {
        let mut registration = registration.clone();
        registration.deleted = true;
        RegistryRecord::DeleteVersion {
            subject: registration.subject.clone(),
            version: registration.version,
            permanent: false,
            registration: Some(registration),
        }
    }

    /// Hard delete (tombstone) of a version.
    pub fn hard_delete(subject: impl Into<String>, version: Version) -> Self {
        RegistryRecord::DeleteVersion {
            subject: subject.into(),
            version,
            permanent: true,
            registration: None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            RegistryRecord::RegisterSchema(_) => "REGISTER_SCHEMA",
            RegistryRecord::DeleteVersion { .. } => "DELETE_VERSION",
            RegistryRecord::DeleteSubject { .. } => "DELETE_SUBJECT",
            RegistryRecord::SetCompatibility { .. } => "SET_COMPATIBILITY",
            RegistryRecord::Noop => "NOOP",
        }
    }

    /// The subject this record is about, if any.
    pub fn subject(&self) -> Option<&str> {
        match self {
            RegistryRecord::RegisterSchema(reg) => Some(&reg.subject),
            RegistryRecord::DeleteVersion { subject, .. } => Some(subject),
            RegistryRecord::DeleteSubject { subject, .. } => Some(subject),
            RegistryRecord::SetCompatibility { subject, .. } => subject.as_deref(),
            RegistryRecord::Noop => None,
        }
    }

    pub fn key(&self) -> RecordKey {
        match self {
            RegistryRecord::RegisterSchema(reg) => RecordKey::schema(&reg.subject, reg.version),
            RegistryRecord::DeleteVersion {
                subject, version, ..
            } => RecordKey::schema(subject, *version),
            RegistryRecord::DeleteSubject { subject, .. } => RecordKey::delete_subject(subject),
            RegistryRecord::SetCompatibility { subject, .. } => {
                RecordKey::config(subject.as_deref())
            }
            RegistryRecord::Noop => RecordKey::noop(),
        }
    }

    /// Encode to `(key, value)` bytes. A `None` value is a tombstone.
    pub fn encode(&self) -> Result<(Vec<u8>, Option<Vec<u8>>), RecordError> {
        let key = self.key().encode()?;
        let value = match self {
            RegistryRecord::RegisterSchema(reg) => {
                let mut reg = reg.clone();
                reg.deleted = false;
                Some(to_json(&reg)?)
            }
            RegistryRecord::DeleteVersion {
                permanent: false,
                registration: Some(reg),
                ..
            } => {
                let mut reg = reg.clone();
                reg.deleted = true;
                Some(to_json(&reg)?)
            }
            RegistryRecord::DeleteVersion {
                permanent: false,
                registration: None,
                subject,
                version,
            } => {
                return Err(RecordError::Unencodable(format!(
                    "soft delete of {}/{} needs the registered body",
                    subject, version
                )))
            }
            RegistryRecord::DeleteVersion {
                permanent: true, ..
            } => None,
            RegistryRecord::DeleteSubject { subject, version } => Some(to_json(
                &DeleteSubjectValue {
                    subject: subject.clone(),
                    version: *version,
                },
            )?),
            RegistryRecord::SetCompatibility { mode, .. } => match mode {
                Some(mode) => Some(to_json(&ConfigValue {
                    compatibility_level: *mode,
                })?),
                None => None,
            },
            RegistryRecord::Noop => None,
        };
        Ok((key, value))
    }

    /// Decode a record from raw key/value bytes.
    pub fn decode(key: &[u8], value: Option<&[u8]>) -> Result<Self, RecordError> {
        let key = RecordKey::decode(key)?;
        match key.keytype {
            KeyType::Schema => {
                let subject = key.require_subject()?;
                let version = key
                    .version
                    .filter(|v| *v > 0)
                    .ok_or_else(|| RecordError::InvalidKey("schema key without version".into()))?;
                let Some(value) = value else {
                    return Ok(RegistryRecord::hard_delete(subject, version));
                };
                let mut reg: SchemaRegistration = from_json(value)?;
                // The key is authoritative for what the record is about.
                reg.subject = subject;
                reg.version = version;
                if reg.id == 0 {
                    return Err(RecordError::InvalidValue("schema id must be positive".into()));
                }
                if reg.deleted {
                    Ok(RegistryRecord::DeleteVersion {
                        subject: reg.subject.clone(),
                        version,
                        permanent: false,
                        registration: Some(reg),
                    })
                } else {
                    Ok(RegistryRecord::RegisterSchema(reg))
                }
            }
            KeyType::Config => {
                let mode = match value {
                    Some(value) => {
                        let config: ConfigValue = from_json(value)?;
                        Some(config.compatibility_level)
                    }
                    None => None,
                };
                Ok(RegistryRecord::SetCompatibility {
                    subject: key.subject,
                    mode,
                })
            }
            KeyType::DeleteSubject => {
                let subject = key.require_subject()?;
                let value = value.ok_or_else(|| {
                    RecordError::InvalidValue("delete-subject record without value".into())
                })?;
                let body: DeleteSubjectValue = from_json(value)?;
                Ok(RegistryRecord::DeleteSubject {
                    subject,
                    version: body.version,
                })
            }
            KeyType::Noop => Ok(RegistryRecord::Noop),
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, RecordError> {
    serde_json::to_vec(value).map_err(|e| RecordError::Unencodable(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, RecordError> {
    serde_json::from_slice(bytes).map_err(|e| RecordError::InvalidValue(e.to_string()))
}
