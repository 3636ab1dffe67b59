use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity a node joins the coordination group with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberMetadata {
    pub member_id: String,
    /// Advertised `host:port`; writer election orders on it.
    pub url: String,
    /// Whether the member may be elected writer.
    pub eligible: bool,
}

impl MemberMetadata {
    pub fn new(member_id: impl Into<String>, url: impl Into<String>, eligible: bool) -> Self {
        Self {
            member_id: member_id.into(),
            url: url.into(),
            eligible,
        }
    }
}

/// The group's view after a join or heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupAssignment {
    /// Bumped on every membership change.
    pub generation: u64,
    pub writer: Option<MemberMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinationError {
    /// The coordination service cannot be reached.
    #[error("coordinator unavailable: {0}")]
    Unavailable(String),
    /// The member is not (or no longer) part of the group, e.g. after its
    /// session expired. It has to join again.
    #[error("unknown member: {0}")]
    UnknownMember(String),
    #[error("coordination error: {0}")]
    Other(String),
}

/// A group-membership primitive: the mutual-exclusion token the writer
/// role hangs off.
///
/// Implementations might include:
/// - `InMemoryGroup` - for tests and single-process clusters
/// - a Kafka consumer group with a custom assignor
pub trait GroupMembership: Send + Sync {
    fn join(&self, member: MemberMetadata) -> Result<GroupAssignment, CoordinationError>;

    /// Keep the member's session alive and fetch the current assignment.
    fn heartbeat(&self, member_id: &str) -> Result<GroupAssignment, CoordinationError>;

    fn leave(&self, member_id: &str) -> Result<(), CoordinationError>;
}
