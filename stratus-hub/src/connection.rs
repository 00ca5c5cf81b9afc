//! Per-connection hub state.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use stratus_core::{ConnectionId, Context, StreamReceiver};

use crate::client_result::PendingClientResults;
use crate::group::{Group, GroupMember, GroupRepository};
use crate::heartbeat::HeartbeatMonitor;
use crate::writer::QueuedResponseWriter;

/// Lifecycle of a hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Connected = 1,
    Disconnected = 2,
}

/// State shared by everything acting on behalf of one hub connection:
/// its writer, its groups and its pending client results.
pub struct HubConnection {
    id: ConnectionId,
    hub: Arc<str>,
    writer: QueuedResponseWriter,
    groups: Arc<dyn GroupRepository>,
    joined: Mutex<Vec<String>>,
    client_results: PendingClientResults,
    client_result_timeout: Duration,
    disconnected: Arc<AtomicBool>,
    state: AtomicU8,
    heartbeat: HeartbeatMonitor,
}

impl HubConnection {
    pub(crate) fn new(
        id: ConnectionId,
        hub: Arc<str>,
        writer: QueuedResponseWriter,
        groups: Arc<dyn GroupRepository>,
        disconnected: Arc<AtomicBool>,
        client_result_timeout: Duration,
    ) -> Self {
        Self {
            id,
            hub,
            writer,
            groups,
            joined: Mutex::new(Vec::new()),
            client_results: PendingClientResults::new(),
            client_result_timeout,
            disconnected,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            heartbeat: HeartbeatMonitor::new(None),
        }
    }

    #[must_use]
    pub(crate) fn with_heartbeat_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.heartbeat = HeartbeatMonitor::new(timeout);
        self
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn hub(&self) -> &str {
        &self.hub
    }

    #[must_use]
    pub fn writer(&self) -> &QueuedResponseWriter {
        &self.writer
    }

    #[must_use]
    pub fn groups(&self) -> &Arc<dyn GroupRepository> {
        &self.groups
    }

    #[must_use]
    pub fn client_results(&self) -> &PendingClientResults {
        &self.client_results
    }

    #[must_use]
    pub fn client_result_timeout(&self) -> Duration {
        self.client_result_timeout
    }

    pub(crate) fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    /// Round trip of the last answered server heartbeat.
    #[must_use]
    pub fn heartbeat_latency(&self) -> Option<Duration> {
        self.heartbeat.latency()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::Acquire) {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }

    pub(crate) fn set_connected(&self) {
        self.state.store(ConnectionState::Connected as u8, Ordering::Release);
    }

    /// Flag the connection as gone. Writers stop draining and queued
    /// requests are skipped.
    pub(crate) fn mark_disconnected(&self) {
        self.disconnected.store(true, Ordering::Release);
        self.state.store(ConnectionState::Disconnected as u8, Ordering::Release);
    }

    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    /// Add this connection to a group, creating the group if needed.
    ///
    /// Returns `None` once the connection is disconnected; a torn down
    /// connection never becomes a member again.
    pub fn join(&self, name: &str) -> Option<Arc<dyn Group>> {
        if self.is_disconnected() {
            tracing::debug!(connection = %self.id, group = name, "join after disconnect ignored");
            return None;
        }

        let member = GroupMember::new(self.id, self.writer.clone());
        let group = loop {
            let group = self.groups.get_or_add(name);
            if group.add(member.clone()) {
                break group;
            }
        };

        {
            let mut joined = self.joined.lock();
            if !joined.iter().any(|g| g == name) {
                joined.push(name.to_string());
            }
        }

        // Teardown may have run leave_all between the check above and the add.
        if self.is_disconnected() {
            self.leave(name);
            return None;
        }
        tracing::debug!(connection = %self.id, group = name, "joined group");
        Some(group)
    }

    /// Remove this connection from a group. Returns `false` if it wasn't a member.
    pub fn leave(&self, name: &str) -> bool {
        self.joined.lock().retain(|g| g != name);
        let left = self
            .groups
            .try_get(name)
            .is_some_and(|group| group.remove(self.id));
        if left {
            tracing::debug!(connection = %self.id, group = name, "left group");
        }
        left
    }

    /// Names of the groups this connection has joined.
    #[must_use]
    pub fn joined_groups(&self) -> Vec<String> {
        self.joined.lock().clone()
    }

    pub(crate) fn leave_all(&self) {
        let joined = std::mem::take(&mut *self.joined.lock());
        for name in joined {
            if let Some(group) = self.groups.try_get(&name) {
                group.remove(self.id);
            }
        }
    }
}

impl fmt::Debug for HubConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubConnection")
            .field("id", &self.id)
            .field("hub", &self.hub)
            .field("state", &self.state())
            .finish()
    }
}

/// The `Connect` call of one hub connection: its context, the inbound
/// stream and the connection state. The outbound stream is owned by the
/// connection's writer.
pub struct StreamingCallContext {
    pub context: Context,
    pub receiver: Box<dyn StreamReceiver>,
    pub connection: Arc<HubConnection>,
}

impl StreamingCallContext {
    #[must_use]
    pub fn new(context: Context, receiver: Box<dyn StreamReceiver>, connection: Arc<HubConnection>) -> Self {
        Self {
            context,
            receiver,
            connection,
        }
    }
}

impl fmt::Debug for StreamingCallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingCallContext")
            .field("context", &self.context)
            .field("connection", &self.connection)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use stratus_core::StreamHandle;

    use super::*;
    use crate::group::InMemoryGroupRepository;

    fn connection(groups: Arc<dyn GroupRepository>) -> HubConnection {
        let (handle, _peer) = StreamHandle::memory();
        let disconnected = Arc::new(AtomicBool::new(false));
        HubConnection::new(
            ConnectionId::next(),
            "Chat".into(),
            QueuedResponseWriter::new(handle.sender, disconnected.clone()),
            groups,
            disconnected,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_join_leave() {
        let repo: Arc<dyn GroupRepository> = Arc::new(InMemoryGroupRepository::new());
        let a = connection(repo.clone());
        let b = connection(repo.clone());

        a.join("room");
        a.join("room");
        let group = b.join("room").unwrap();
        assert_eq!(group.member_count(), 2);
        assert_eq!(a.joined_groups(), ["room"]);

        assert!(a.leave("room"));
        assert!(!a.leave("room"));
        assert!(a.joined_groups().is_empty());
        assert_eq!(group.member_count(), 1);
    }

    #[test]
    fn test_leave_all_empties_groups() {
        let repo = Arc::new(InMemoryGroupRepository::new());
        let conn = connection(repo.clone());
        conn.join("a");
        conn.join("b");
        assert_eq!(repo.len(), 2);

        conn.leave_all();
        assert!(repo.is_empty());
        assert!(conn.joined_groups().is_empty());
    }

    #[test]
    fn test_join_refused_after_disconnect() {
        let repo = Arc::new(InMemoryGroupRepository::new());
        let conn = connection(repo.clone());
        conn.mark_disconnected();

        assert!(conn.join("room").is_none());
        assert!(repo.is_empty());
        assert!(conn.joined_groups().is_empty());
    }

    #[test]
    fn test_state_transitions() {
        let repo: Arc<dyn GroupRepository> = Arc::new(InMemoryGroupRepository::new());
        let conn = connection(repo);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        conn.set_connected();
        assert_eq!(conn.state(), ConnectionState::Connected);
        conn.mark_disconnected();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.is_disconnected());
    }
}
