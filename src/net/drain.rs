//! Forced connection draining on server close.
//!
//! A listening server's own close stops accepting and then waits for every
//! open connection to finish. [`DrainingClose`] wraps that close so live
//! connections are terminated first, which bounds close latency under an
//! orchestrator's kill deadline.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::net::connection::{ConnectionObserver, ConnectionSet, Terminate};
use crate::observability::metrics;

/// Point in the accept path at which a connection is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptEvent {
    /// Transport connection accepted.
    Connection,
    /// TLS handshake completed.
    SecureConnection,
}

/// Error passed to a close callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CloseError {
    #[error("server is not running")]
    NotRunning,
    #[error("server dropped the close callback")]
    Abandoned,
}

/// Completion callback for [`Server::close`].
pub type CloseCallback = Box<dyn FnOnce(Result<(), CloseError>) + Send + 'static>;

/// A listening server that can be closed and reports its connections.
pub trait Server: Send + Sync + 'static {
    type Connection: Terminate + Clone + 'static;

    /// Whether connections go through a TLS handshake.
    fn is_secure(&self) -> bool;

    /// Register an observer for connections reported at `event`.
    fn observe(&self, event: AcceptEvent, observer: Arc<dyn ConnectionObserver<Self::Connection>>);

    /// Stop accepting; `callback` runs once every connection has ended.
    fn close(&self, callback: Option<CloseCallback>);
}

/// Close wrapper that terminates live connections before closing.
pub struct DrainingClose<S: Server> {
    server: Arc<S>,
    connections: Arc<ConnectionSet<S::Connection>>,
}

impl<S: Server> DrainingClose<S> {
    /// Start tracking the server's connections.
    ///
    /// Secure servers are tracked from handshake completion, plain ones from
    /// accept.
    pub fn wrap(server: Arc<S>) -> Self {
        let connections = Arc::new(ConnectionSet::new());
        let event = if server.is_secure() {
            AcceptEvent::SecureConnection
        } else {
            AcceptEvent::Connection
        };
        let observer: Arc<dyn ConnectionObserver<S::Connection>> = connections.clone();
        server.observe(event, observer);

        Self { server, connections }
    }

    /// Terminate every live connection, then delegate to the server's close.
    pub fn close(&self, callback: Option<CloseCallback>) {
        let drained = self.connections.drain();
        if drained > 0 {
            tracing::info!(connections = drained, "Forcibly closed live connections");
        }
        metrics::record_connections_drained(drained);
        self.server.close(callback);
    }

    /// [`DrainingClose::close`], resolving when the server reports completion.
    pub async fn close_and_wait(&self) -> Result<(), CloseError> {
        let (tx, rx) = oneshot::channel();
        self.close(Some(Box::new(move |result| {
            let _ = tx.send(result);
        })));
        rx.await.unwrap_or(Err(CloseError::Abandoned))
    }

    /// Connections that have not closed yet.
    pub fn live_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn server(&self) -> &Arc<S> {
        &self.server
    }
}

impl<S: Server> Clone for DrainingClose<S> {
    fn clone(&self) -> Self {
        Self {
            server: Arc::clone(&self.server),
            connections: Arc::clone(&self.connections),
        }
    }
}
