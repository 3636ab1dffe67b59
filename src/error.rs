use thiserror::Error;

use crate::compat::Incompatibility;
use crate::coordinator::CoordinationError;
use crate::log::LogError;
use crate::types::{SchemaId, SchemaReference, Version, VersionSpec};

/// Result alias used across the registry core.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors surfaced by the registry core to its callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A mutation reached a node that does not hold the writer role.
    #[error("this node is not the writer (writer: {})", .writer.as_deref().unwrap_or("unknown"))]
    NotWriter { writer: Option<String> },

    /// The candidate schema violates the subject's compatibility mode.
    #[error(
        "schema is incompatible with an earlier version of {subject}: {}",
        format_reasons(.reasons)
    )]
    IncompatibleSchema {
        subject: String,
        reasons: Vec<Incompatibility>,
    },

    /// A log record could not be folded into the store.
    #[error("malformed record at offset {offset}: {reason}")]
    MalformedRecord { offset: u64, reason: String },

    /// The mutation was appended but not observed by the replicator in time.
    /// The record is durable; only its visibility is unconfirmed.
    #[error("record at offset {offset} appended but not replicated within {waited_ms}ms")]
    ReplicationTimeout { offset: u64, waited_ms: u64 },

    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("unknown reference {} -> {}/{}: {reason}", .reference.name, .reference.subject, .reference.version)]
    UnknownReference {
        reference: SchemaReference,
        reason: String,
    },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("subject not found: {0}")]
    SubjectNotFound(String),

    #[error("version {version} not found for subject {subject}")]
    VersionNotFound { subject: String, version: VersionSpec },

    #[error("schema id {0} not found")]
    SchemaNotFound(SchemaId),

    #[error("version {version} of subject {subject} must be soft-deleted first")]
    VersionNotSoftDeleted { subject: String, version: Version },

    #[error("subject {0} must be soft-deleted first")]
    SubjectNotSoftDeleted(String),

    #[error("version {version} of subject {subject} is referenced by {}", format_referrers(.referenced_by))]
    ReferenceExists {
        subject: String,
        version: Version,
        referenced_by: Vec<(String, Version)>,
    },

    /// The replicator has not yet caught up with the log.
    #[error("registry is still catching up with the log")]
    NotReady,

    /// The replicator stopped on an unrecoverable topic change.
    #[error("registry stopped; restart required")]
    Stopped,

    #[error("registry lock poisoned during {0}")]
    LockPoisoned(&'static str),

    #[error("log error: {0}")]
    Log(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("coordination error: {0}")]
    Coordination(String),

    /// A mutation produced an outcome the calling helper cannot use.
    #[error("unexpected mutation outcome: {0}")]
    UnexpectedOutcome(String),

    /// A blocking task backing an async call failed to complete.
    #[error("background task failed during {operation}: {reason}")]
    TaskFailed {
        operation: &'static str,
        reason: String,
    },
}

impl RegistryError {
    /// Errors worth retrying, either later or on another node.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            RegistryError::NotWriter { .. }
                | RegistryError::NotReady
                | RegistryError::BrokerUnavailable(_)
                | RegistryError::ReplicationTimeout { .. }
        )
    }
}

impl From<LogError> for RegistryError {
    fn from(err: LogError) -> Self {
        match err {
            LogError::Unavailable(msg) => RegistryError::BrokerUnavailable(msg),
            LogError::TopicDeleted(_) => RegistryError::Stopped,
            other => RegistryError::Log(other.to_string()),
        }
    }
}

impl From<CoordinationError> for RegistryError {
    fn from(err: CoordinationError) -> Self {
        RegistryError::Coordination(err.to_string())
    }
}

fn format_reasons(reasons: &[Incompatibility]) -> String {
    reasons
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_referrers(referrers: &[(String, Version)]) -> String {
    referrers
        .iter()
        .map(|(subject, version)| format!("{}/{}", subject, version))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::IncompatibilityKind;

    #[test]
    fn incompatible_schema_lists_every_reason() {
        let err = RegistryError::IncompatibleSchema {
            subject: "orders-value".into(),
            reasons: vec![
                Incompatibility::new(
                    IncompatibilityKind::FieldRemovedWithoutDefault,
                    "/fields/name",
                    "field 'name' removed without default",
                ),
                Incompatibility::new(
                    IncompatibilityKind::TypeMismatch,
                    "/fields/id",
                    "int cannot be read as string",
                ),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("orders-value"));
        assert!(text.contains("field 'name' removed without default"));
        assert!(text.contains("int cannot be read as string"));
    }

    #[test]
    fn log_errors_map_onto_the_taxonomy() {
        assert_eq!(
            RegistryError::from(LogError::Unavailable("down".into())),
            RegistryError::BrokerUnavailable("down".into())
        );
        assert_eq!(
            RegistryError::from(LogError::TopicDeleted("_schemas".into())),
            RegistryError::Stopped
        );
    }

    #[test]
    fn coordination_errors_keep_their_detail() {
        let err = RegistryError::from(CoordinationError::Unavailable("group down".into()));
        assert_eq!(
            err,
            RegistryError::Coordination("coordinator unavailable: group down".into())
        );
        assert_eq!(
            RegistryError::from(CoordinationError::UnknownMember("a".into())).to_string(),
            "coordination error: unknown member: a"
        );
    }

    #[test]
    fn task_failures_name_the_operation() {
        let err = RegistryError::TaskFailed {
            operation: "async propose",
            reason: "task panicked".into(),
        };
        assert_eq!(
            err.to_string(),
            "background task failed during async propose: task panicked"
        );
        assert!(!matches!(err, RegistryError::LockPoisoned(_)));
    }

    #[test]
    fn retriable_errors() {
        assert!(RegistryError::NotWriter { writer: None }.is_retriable());
        assert!(RegistryError::ReplicationTimeout {
            offset: 3,
            waited_ms: 10
        }
        .is_retriable());
        assert!(!RegistryError::InvalidSchema("x".into()).is_retriable());
        assert!(!RegistryError::Stopped.is_retriable());
    }
}
