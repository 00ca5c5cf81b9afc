//! Named connection groups and broadcast fan-out.
//!
//! A broadcast encodes its message once and hands the same [`Bytes`] to
//! every member's [`QueuedResponseWriter`]. Each member receives
//! broadcasts in the order they were issued to it; there is no ordering
//! across members and no all-or-nothing delivery.

use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use ntex_bytes::Bytes;
use parking_lot::RwLock;

use stratus_codec::{MethodArgs, hub};
use stratus_core::{CodecError, ConnectionId};

use crate::writer::QueuedResponseWriter;

/// A connection as seen by a group.
#[derive(Clone)]
pub struct GroupMember {
    pub id: ConnectionId,
    pub writer: QueuedResponseWriter,
}

impl GroupMember {
    #[must_use]
    pub fn new(id: ConnectionId, writer: QueuedResponseWriter) -> Self {
        Self { id, writer }
    }
}

impl fmt::Debug for GroupMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupMember").field("id", &self.id).finish()
    }
}

/// Creates the group repository of a hub.
pub trait GroupRepositoryFactory: Send + Sync + 'static {
    fn create_repository(&self, hub: &str) -> Arc<dyn GroupRepository>;
}

/// The groups of one hub, by name.
pub trait GroupRepository: Send + Sync {
    /// Get a group, creating it if it doesn't exist.
    fn get_or_add(&self, name: &str) -> Arc<dyn Group>;

    fn try_get(&self, name: &str) -> Option<Arc<dyn Group>>;

    fn try_remove(&self, name: &str) -> bool;
}

/// A named set of connections.
///
/// The `write_*` methods never block on the network; they return the
/// number of members whose writer accepted the message.
pub trait Group: Send + Sync {
    fn name(&self) -> &str;

    /// Add a member. Returns `false` if the group has been removed from its
    /// repository and must not be used anymore; get a fresh one instead.
    fn add(&self, member: GroupMember) -> bool;

    /// Remove a member. Removing the last member removes the group from
    /// its repository.
    fn remove(&self, id: ConnectionId) -> bool;

    fn contains(&self, id: ConnectionId) -> bool;

    fn member_count(&self) -> usize;

    fn write_all(&self, message: Bytes) -> usize;

    fn write_except(&self, message: Bytes, except: &[ConnectionId]) -> usize;

    fn write_to(&self, message: Bytes, targets: &[ConnectionId]) -> usize;
}

/// Factory for [`InMemoryGroupRepository`], the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryGroupRepositoryFactory;

impl GroupRepositoryFactory for InMemoryGroupRepositoryFactory {
    fn create_repository(&self, _hub: &str) -> Arc<dyn GroupRepository> {
        Arc::new(InMemoryGroupRepository::new())
    }
}

type GroupMap = DashMap<String, Arc<InMemoryGroup>>;

/// Process-local groups.
#[derive(Default)]
pub struct InMemoryGroupRepository {
    groups: Arc<GroupMap>,
}

impl InMemoryGroupRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl GroupRepository for InMemoryGroupRepository {
    fn get_or_add(&self, name: &str) -> Arc<dyn Group> {
        if let Some(group) = self.groups.get(name) {
            return group.clone();
        }
        self.groups
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(InMemoryGroup::new(name, Arc::downgrade(&self.groups))))
            .clone()
    }

    fn try_get(&self, name: &str) -> Option<Arc<dyn Group>> {
        self.groups.get(name).map(|g| g.clone() as Arc<dyn Group>)
    }

    fn try_remove(&self, name: &str) -> bool {
        self.groups.remove(name).is_some()
    }
}

impl fmt::Debug for InMemoryGroupRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryGroupRepository")
            .field("groups", &self.groups.len())
            .finish()
    }
}

#[derive(Default)]
struct Members {
    snapshot: Arc<Vec<GroupMember>>,
    removed: bool,
}

/// Copy-on-write group: writers iterate an immutable member snapshot,
/// membership changes swap in a new one.
pub struct InMemoryGroup {
    name: String,
    members: RwLock<Members>,
    repository: Weak<GroupMap>,
}

impl InMemoryGroup {
    fn new(name: &str, repository: Weak<GroupMap>) -> Self {
        Self {
            name: name.to_string(),
            members: RwLock::new(Members::default()),
            repository,
        }
    }

    fn snapshot(&self) -> Arc<Vec<GroupMember>> {
        self.members.read().snapshot.clone()
    }

    fn write_where(&self, message: Bytes, include: impl Fn(ConnectionId) -> bool) -> usize {
        self.snapshot()
            .iter()
            .filter(|member| include(member.id))
            .filter(|member| member.writer.write(message.clone()))
            .count()
    }
}

impl Group for InMemoryGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn add(&self, member: GroupMember) -> bool {
        let mut members = self.members.write();
        if members.removed {
            return false;
        }
        if members.snapshot.iter().any(|m| m.id == member.id) {
            return true;
        }
        let mut next = Vec::with_capacity(members.snapshot.len() + 1);
        next.extend(members.snapshot.iter().cloned());
        next.push(member);
        members.snapshot = Arc::new(next);
        true
    }

    fn remove(&self, id: ConnectionId) -> bool {
        let mut members = self.members.write();
        if !members.snapshot.iter().any(|m| m.id == id) {
            return false;
        }
        let next: Vec<_> = members.snapshot.iter().filter(|m| m.id != id).cloned().collect();
        members.snapshot = Arc::new(next);

        if members.snapshot.is_empty() {
            members.removed = true;
            drop(members);
            if let Some(groups) = self.repository.upgrade() {
                groups.remove_if(&self.name, |_, group| std::ptr::eq(Arc::as_ptr(group), self));
            }
        }
        true
    }

    fn contains(&self, id: ConnectionId) -> bool {
        self.snapshot().iter().any(|m| m.id == id)
    }

    fn member_count(&self) -> usize {
        self.members.read().snapshot.len()
    }

    fn write_all(&self, message: Bytes) -> usize {
        self.write_where(message, |_| true)
    }

    fn write_except(&self, message: Bytes, except: &[ConnectionId]) -> usize {
        self.write_where(message, |id| !except.contains(&id))
    }

    fn write_to(&self, message: Bytes, targets: &[ConnectionId]) -> usize {
        self.write_where(message, |id| targets.contains(&id))
    }
}

impl fmt::Debug for InMemoryGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryGroup")
            .field("name", &self.name)
            .field("members", &self.member_count())
            .finish()
    }
}

fn broadcast_bytes<A: MethodArgs>(method_id: i32, args: &A) -> Result<Bytes, CodecError> {
    let payload = args.encode_payload()?;
    Ok(hub::broadcast_message(method_id, payload.as_deref()))
}

/// Send `[method_id, args]` to every member.
pub fn broadcast_to<A: MethodArgs>(group: &dyn Group, method_id: i32, args: &A) -> Result<usize, CodecError> {
    Ok(group.write_all(broadcast_bytes(method_id, args)?))
}

/// Send `[method_id, args]` to every member except `except`.
pub fn broadcast_except<A: MethodArgs>(
    group: &dyn Group,
    method_id: i32,
    args: &A,
    except: &[ConnectionId],
) -> Result<usize, CodecError> {
    Ok(group.write_except(broadcast_bytes(method_id, args)?, except))
}

/// Send `[method_id, args]` only to the listed members.
pub fn broadcast_only<A: MethodArgs>(
    group: &dyn Group,
    method_id: i32,
    args: &A,
    targets: &[ConnectionId],
) -> Result<usize, CodecError> {
    Ok(group.write_to(broadcast_bytes(method_id, args)?, targets))
}
