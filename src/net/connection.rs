//! Connection identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count live connections so a server knows when it is idle
//! - Keep a presence set of live connection handles for forced draining

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Abortive close of a single connection.
pub trait Terminate: Send + Sync {
    fn terminate(&self);
}

impl Terminate for CancellationToken {
    fn terminate(&self) {
        self.cancel();
    }
}

/// Receives connection lifecycle events from a listening server.
pub trait ConnectionObserver<H>: Send + Sync {
    /// A connection was accepted (or finished its TLS handshake).
    fn accepted(&self, id: ConnectionId, handle: &H);
    /// The connection closed on its own or was terminated.
    fn closed(&self, id: ConnectionId);
}

/// Presence set of live connections.
///
/// Once [`ConnectionSet::drain`] has started, the set stays closed: a
/// connection reported afterwards is terminated on arrival.
#[derive(Debug)]
pub struct ConnectionSet<H> {
    live: DashMap<ConnectionId, H>,
    draining: RwLock<bool>,
}

impl<H: Terminate + Clone> ConnectionSet<H> {
    pub fn new() -> Self {
        Self {
            live: DashMap::new(),
            draining: RwLock::new(false),
        }
    }

    pub fn is_draining(&self) -> bool {
        *self.draining.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.live.contains_key(&id)
    }

    /// Terminate every live connection. Returns how many were terminated.
    ///
    /// Entries stay in the set until each connection reports `closed`.
    pub fn drain(&self) -> usize {
        // Closing the gate under the write lock orders this drain after every
        // insert already in progress.
        *self.draining.write().unwrap_or_else(|e| e.into_inner()) = true;

        // Snapshot first: terminating may report `closed` synchronously,
        // which must not run while a shard lock is held.
        let handles: Vec<(ConnectionId, H)> = self
            .live
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        for (id, handle) in &handles {
            tracing::debug!(connection_id = %id, "Terminating connection");
            handle.terminate();
        }
        handles.len()
    }
}

impl<H: Terminate + Clone> Default for ConnectionSet<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Terminate + Clone> ConnectionObserver<H> for ConnectionSet<H> {
    fn accepted(&self, id: ConnectionId, handle: &H) {
        let draining = self.draining.read().unwrap_or_else(|e| e.into_inner());
        if *draining {
            drop(draining);
            tracing::debug!(connection_id = %id, "Connection arrived while draining, terminating");
            handle.terminate();
            return;
        }
        self.live.insert(id, handle.clone());
    }

    fn closed(&self, id: ConnectionId) {
        self.live.remove(&id);
    }
}

/// Counts live connections for graceful close.
///
/// Uses a watch channel so waiters wake as soon as the count reaches zero.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<watch::Sender<u64>>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { active: Arc::new(tx) }
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active.send_modify(|count| *count += 1);
        metrics::set_active_connections(self.active_count());
        ConnectionGuard {
            active: Arc::clone(&self.active),
            id: ConnectionId::new(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        *self.active.borrow()
    }

    /// Wait until all connections are closed.
    pub async fn wait_for_idle(&self) {
        let mut rx = self.active.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<watch::Sender<u64>>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.send_modify(|count| *count = count.saturating_sub(1));
        metrics::set_active_connections(*self.active.borrow());
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}
