//! In-memory coordination group.
//!
//! Models a broker-side consumer group: members join and heartbeat,
//! members that stay silent longer than the session timeout are evicted,
//! and every membership change starts a new generation. The writer is the
//! eligible member with the lowest URL.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{CoordinationError, GroupAssignment, GroupMembership, MemberMetadata};

struct Member {
    metadata: MemberMetadata,
    last_seen: Instant,
}

struct GroupState {
    name: String,
    members: BTreeMap<String, Member>,
    generation: u64,
    available: bool,
}

impl GroupState {
    fn check(&self) -> Result<(), CoordinationError> {
        if self.available {
            Ok(())
        } else {
            Err(CoordinationError::Unavailable(format!(
                "group {} is unreachable",
                self.name
            )))
        }
    }

    fn expire(&mut self, session_timeout: Duration) {
        let now = Instant::now();
        let before = self.members.len();
        self.members
            .retain(|_, m| now.duration_since(m.last_seen) <= session_timeout);
        if self.members.len() != before {
            self.generation += 1;
        }
    }

    fn assignment(&self) -> GroupAssignment {
        let writer = self
            .members
            .values()
            .map(|m| &m.metadata)
            .filter(|m| m.eligible)
            .min_by(|a, b| a.url.cmp(&b.url).then_with(|| a.member_id.cmp(&b.member_id)))
            .cloned();
        GroupAssignment {
            generation: self.generation,
            writer,
        }
    }
}

/// In-memory group membership.
///
/// Clone-friendly: clones are handles to the same group, one per node.
#[derive(Clone)]
pub struct InMemoryGroup {
    state: Arc<Mutex<GroupState>>,
    session_timeout: Duration,
}

impl InMemoryGroup {
    pub fn new(name: impl Into<String>, session_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(GroupState {
                name: name.into(),
                members: BTreeMap::new(),
                generation: 0,
                available: true,
            })),
            session_timeout,
        }
    }

    /// Simulate losing (`false`) or regaining (`true`) the coordinator.
    pub fn set_available(&self, available: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.available = available;
        }
    }

    /// Evict a member as if its session had timed out.
    pub fn expire_member(&self, member_id: &str) {
        if let Ok(mut state) = self.state.lock() {
            if state.members.remove(member_id).is_some() {
                state.generation += 1;
            }
        }
    }

    /// Current assignment, without touching any session.
    pub fn assignment(&self) -> Result<GroupAssignment, CoordinationError> {
        let mut state = self.lock()?;
        state.expire(self.session_timeout);
        Ok(state.assignment())
    }

    pub fn member_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.members.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, GroupState>, CoordinationError> {
        self.state
            .lock()
            .map_err(|_| CoordinationError::Other("group lock poisoned".into()))
    }
}

impl GroupMembership for InMemoryGroup {
    fn join(&self, member: MemberMetadata) -> Result<GroupAssignment, CoordinationError> {
        let mut state = self.lock()?;
        state.check()?;
        state.expire(self.session_timeout);

        let changed = state
            .members
            .get(&member.member_id)
            .map(|m| m.metadata != member)
            .unwrap_or(true);
        state.members.insert(
            member.member_id.clone(),
            Member {
                metadata: member,
                last_seen: Instant::now(),
            },
        );
        if changed {
            state.generation += 1;
        }
        Ok(state.assignment())
    }

    fn heartbeat(&self, member_id: &str) -> Result<GroupAssignment, CoordinationError> {
        let mut state = self.lock()?;
        state.check()?;
        state.expire(self.session_timeout);

        match state.members.get_mut(member_id) {
            Some(member) => member.last_seen = Instant::now(),
            None => return Err(CoordinationError::UnknownMember(member_id.to_string())),
        }
        Ok(state.assignment())
    }

    fn leave(&self, member_id: &str) -> Result<(), CoordinationError> {
        let mut state = self.lock()?;
        state.check()?;
        if state.members.remove(member_id).is_some() {
            state.generation += 1;
        }
        Ok(())
    }
}
