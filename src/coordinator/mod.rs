//! WriterCoordinator - single-writer election on top of a group-membership
//! primitive.
//!
//! Holding the writer role means being the elected member of the current
//! group generation. The generation doubles as the writer epoch: it is
//! stamped on every record the gateway appends and it only moves forward.
//!
//! Nodes learn about role changes when they heartbeat. A node that cannot
//! reach the group for longer than the session timeout gives up the role
//! locally, since the group will have evicted it by then.

mod in_memory;
mod membership;
mod thread;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[cfg(feature = "emitter")]
use event_emitter_rs::EventEmitter;
use serde::{Deserialize, Serialize};

pub use in_memory::InMemoryGroup;
pub use membership::{CoordinationError, GroupAssignment, GroupMembership, MemberMetadata};
pub use thread::{CoordinatorStats, CoordinatorThread};

/// Event name role changes are emitted under.
pub const ROLE_CHANGED: &str = "role-changed";

/// Payload of a role-change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleChange {
    pub is_writer: bool,
    pub epoch: u64,
    pub writer_url: Option<String>,
}

#[derive(Default)]
struct Lease {
    joined: bool,
    generation: u64,
    writer: Option<MemberMetadata>,
    last_contact: Option<Instant>,
    /// Role last announced, so a change is reported exactly once.
    announced_writer: bool,
}

pub struct WriterCoordinator {
    membership: Arc<dyn GroupMembership>,
    member: MemberMetadata,
    session_timeout: Duration,
    lease: Mutex<Lease>,
    #[cfg(feature = "emitter")]
    emitter: Mutex<EventEmitter>,
}

impl WriterCoordinator {
    pub fn new(
        membership: Arc<dyn GroupMembership>,
        member: MemberMetadata,
        session_timeout: Duration,
    ) -> Self {
        Self {
            membership,
            member,
            session_timeout,
            lease: Mutex::new(Lease::default()),
            #[cfg(feature = "emitter")]
            emitter: Mutex::new(EventEmitter::new()),
        }
    }

    fn lease(&self) -> MutexGuard<'_, Lease> {
        self.lease.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn member(&self) -> &MemberMetadata {
        &self.member
    }

    /// Join the group (first call, or after eviction) or heartbeat, and
    /// refresh the local view of the writer role.
    ///
    /// Returns whether this node is the writer afterwards.
    pub fn poll(&self) -> Result<bool, CoordinationError> {
        let joined = self.lease().joined;
        let result = if joined {
            self.membership.heartbeat(&self.member.member_id)
        } else {
            self.membership.join(self.member.clone())
        };

        {
            let mut lease = self.lease();
            match &result {
                Ok(assignment) => {
                    lease.joined = true;
                    lease.generation = lease.generation.max(assignment.generation);
                    lease.writer = assignment.writer.clone();
                    lease.last_contact = Some(Instant::now());
                }
                Err(CoordinationError::UnknownMember(_)) => {
                    tracing::warn!(member = %self.member.member_id, "evicted from group, rejoining");
                    lease.joined = false;
                    lease.writer = None;
                }
                Err(err) => {
                    tracing::warn!(member = %self.member.member_id, error = %err, "group heartbeat failed");
                }
            }
        }

        let is_writer = self.announce_role();
        result.map(|_| is_writer)
    }

    /// Leave the group, giving up the writer role if held.
    pub fn resign(&self) -> Result<(), CoordinationError> {
        let result = self.membership.leave(&self.member.member_id);
        {
            let mut lease = self.lease();
            lease.joined = false;
            lease.writer = None;
            lease.last_contact = None;
        }
        self.announce_role();
        result
    }

    /// Whether this node holds the writer role right now.
    pub fn is_writer(&self) -> bool {
        Self::holds_role(&self.lease(), &self.member, self.session_timeout)
    }

    /// Writer epoch: the group generation last observed.
    pub fn current_epoch(&self) -> u64 {
        self.lease().generation
    }

    /// The member elected writer, as last observed.
    pub fn writer(&self) -> Option<MemberMetadata> {
        self.lease().writer.clone()
    }

    /// Epoch, if this node holds the writer role. Read under one lock so
    /// the pair is consistent.
    pub fn writer_epoch(&self) -> Option<u64> {
        let lease = self.lease();
        Self::holds_role(&lease, &self.member, self.session_timeout).then_some(lease.generation)
    }

    /// Register a listener fired on every change of this node's role.
    /// Listeners run on their own threads.
    #[cfg(feature = "emitter")]
    pub fn on_role_change<F>(&self, listener: F) -> String
    where
        F: Fn(RoleChange) + Send + Sync + 'static,
    {
        let mut emitter = self.emitter.lock().unwrap_or_else(PoisonError::into_inner);
        emitter.on(ROLE_CHANGED, listener)
    }

    fn holds_role(lease: &Lease, member: &MemberMetadata, session_timeout: Duration) -> bool {
        let elected = lease
            .writer
            .as_ref()
            .map(|w| w.member_id == member.member_id)
            .unwrap_or(false);
        let in_session = lease
            .last_contact
            .map(|t| t.elapsed() <= session_timeout)
            .unwrap_or(false);
        elected && in_session
    }

    fn announce_role(&self) -> bool {
        let change = {
            let mut lease = self.lease();
            let is_writer = Self::holds_role(&lease, &self.member, self.session_timeout);
            if is_writer == lease.announced_writer {
                return is_writer;
            }
            lease.announced_writer = is_writer;
            RoleChange {
                is_writer,
                epoch: lease.generation,
                writer_url: lease.writer.as_ref().map(|w| w.url.clone()),
            }
        };

        if change.is_writer {
            tracing::info!(member = %self.member.member_id, epoch = change.epoch, "gained writer role");
        } else {
            tracing::info!(
                member = %self.member.member_id,
                epoch = change.epoch,
                writer = change.writer_url.as_deref().unwrap_or("none"),
                "lost writer role"
            );
        }
        let is_writer = change.is_writer;
        #[cfg(feature = "emitter")]
        {
            let mut emitter = self.emitter.lock().unwrap_or_else(PoisonError::into_inner);
            emitter.emit(ROLE_CHANGED, change);
        }
        is_writer
    }
}
