//! HTTP server setup and connection handling.
//!
//! # Responsibilities
//! - Create Axum Router with the health probe and middleware
//! - Run the accept loop over a bounded listener
//! - Optional TLS handshake before HTTP
//! - Serve each connection over HTTP/1.1 or HTTP/2 via hyper-util
//! - Report connection lifecycle to observers (see `net::drain`)
//! - Close: stop accepting, then wait for open connections to end

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::{
    extract::{Request, State},
    response::Response,
    routing::get,
    Router,
};
use axum_server::accept::Accept;
use axum_server::tls_rustls::RustlsAcceptor;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower::Service;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::HealthConfig;
use crate::health::HealthHandler;
use crate::http::probe::ProbeContext;
use crate::net::connection::{ConnectionId, ConnectionObserver, ConnectionTracker};
use crate::net::drain::{AcceptEvent, CloseCallback, CloseError, Server};
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};

/// Server lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Built, not yet serving.
    Idle,
    /// Accepting connections.
    Running,
    /// Close requested; waiting for open connections.
    Closing,
    /// Every connection has ended.
    Closed,
}

/// Error type for server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("server was already started")]
    AlreadyStarted,
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

type Observers = Vec<(AcceptEvent, Arc<dyn ConnectionObserver<CancellationToken>>)>;

/// HTTP server with per-connection tracking.
pub struct HttpServer {
    router: Router,
    tls: Option<RustlsAcceptor>,
    tracker: ConnectionTracker,
    observers: Mutex<Observers>,
    state: watch::Sender<ServerState>,
    stop: CancellationToken,
    pending_close: Mutex<Vec<CloseCallback>>,
}

impl HttpServer {
    /// Create a server for the given router.
    pub fn new(router: Router) -> Self {
        let (state, _) = watch::channel(ServerState::Idle);
        Self {
            router,
            tls: None,
            tracker: ConnectionTracker::new(),
            observers: Mutex::new(Vec::new()),
            state,
            stop: CancellationToken::new(),
            pending_close: Mutex::new(Vec::new()),
        }
    }

    /// Terminate TLS on every accepted connection.
    pub fn with_tls(mut self, acceptor: RustlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn build_router(config: &HealthConfig, health: HealthHandler<ProbeContext>) -> Router {
        let mut router = Router::new().route(&config.path, get(probe_handler));
        if config.path != "/" {
            router = router.route("/", get(index_handler));
        }

        router
            .with_state(health)
            .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn is_accepting(&self) -> bool {
        self.state() == ServerState::Running
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Resolve once the server has fully closed.
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == ServerState::Closed).await;
    }

    /// Accept and serve connections until closed.
    ///
    /// Returns after close was requested and every connection has ended.
    pub async fn serve(self: Arc<Self>, listener: Listener) -> Result<(), ServerError> {
        let started = self.state.send_if_modified(|state| {
            if *state == ServerState::Idle {
                *state = ServerState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(ServerError::AlreadyStarted);
        }

        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(address = %addr, tls = self.tls.is_some(), "HTTP server starting");

        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => self.spawn_connection(stream, peer, permit),
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
            }
        }

        drop(listener);
        tracing::info!(
            connections = self.tracker.active_count(),
            "Stopped accepting, waiting for open connections"
        );
        self.tracker.wait_for_idle().await;
        self.state.send_replace(ServerState::Closed);

        let callbacks = std::mem::take(&mut *lock(&self.pending_close));
        for callback in callbacks {
            callback(Ok(()));
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    fn spawn_connection(self: &Arc<Self>, stream: TcpStream, peer: std::net::SocketAddr, permit: ConnectionPermit) {
        let guard = self.tracker.track();
        let id = guard.id();
        let token = CancellationToken::new();
        self.notify_accepted(AcceptEvent::Connection, id, &token);

        let server = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            server.handle_connection(stream, id, &token).await;
            server.notify_closed(id);
            drop(guard);
            tracing::debug!(connection_id = %id, peer_addr = %peer, "Connection finished");
        });
    }

    async fn handle_connection(&self, stream: TcpStream, id: ConnectionId, token: &CancellationToken) {
        let Some(acceptor) = &self.tls else {
            self.drive(stream, id, token).await;
            return;
        };

        // A closing server completes no new handshakes.
        let tls_stream = tokio::select! {
            _ = token.cancelled() => return,
            _ = self.stop.cancelled() => {
                tracing::debug!(connection_id = %id, "Server closing, TLS handshake abandoned");
                return;
            }
            handshake = acceptor.accept(stream, ()) => match handshake {
                Ok((tls_stream, ())) => tls_stream,
                Err(e) => {
                    tracing::debug!(connection_id = %id, error = %e, "TLS handshake failed");
                    return;
                }
            },
        };

        self.notify_accepted(AcceptEvent::SecureConnection, id, token);
        self.drive(tls_stream, id, token).await;
    }

    async fn drive<I>(&self, io: I, id: ConnectionId, token: &CancellationToken)
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let router = self.router.clone();
        let service = hyper::service::service_fn(move |request: hyper::Request<Incoming>| router.clone().call(request));

        let builder = auto::Builder::new(TokioExecutor::new());
        let connection = builder.serve_connection_with_upgrades(TokioIo::new(io), service);

        tokio::select! {
            result = connection => {
                if let Err(e) = result {
                    tracing::debug!(connection_id = %id, error = %e, "Connection error");
                }
            }
            _ = token.cancelled() => {
                tracing::debug!(connection_id = %id, "Connection terminated");
            }
        }
    }

    fn notify_accepted(&self, event: AcceptEvent, id: ConnectionId, token: &CancellationToken) {
        for (observed, observer) in lock(&self.observers).iter() {
            if *observed == event {
                observer.accepted(id, token);
            }
        }
    }

    fn notify_closed(&self, id: ConnectionId) {
        for (_, observer) in lock(&self.observers).iter() {
            observer.closed(id);
        }
    }
}

impl Server for HttpServer {
    type Connection = CancellationToken;

    fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    fn observe(&self, event: AcceptEvent, observer: Arc<dyn ConnectionObserver<CancellationToken>>) {
        lock(&self.observers).push((event, observer));
    }

    fn close(&self, callback: Option<CloseCallback>) {
        let closing = self.state.send_if_modified(|state| {
            if *state == ServerState::Running {
                *state = ServerState::Closing;
                true
            } else {
                false
            }
        });

        if !closing {
            tracing::debug!(state = ?self.state(), "Close requested on a server that is not running");
            if let Some(callback) = callback {
                callback(Err(CloseError::NotRunning));
            }
            return;
        }

        tracing::info!(connections = self.tracker.active_count(), "Closing HTTP server");
        if let Some(callback) = callback {
            lock(&self.pending_close).push(callback);
        }
        self.stop.cancel();
    }
}

/// Health probe route: run the handler, then render whatever it replied.
async fn probe_handler(State(health): State<HealthHandler<ProbeContext>>, request: Request) -> Response {
    let ctx = ProbeContext::from_request(&request);
    health.handle(ctx.clone()).await;
    ctx.into_response()
}

async fn index_handler() -> &'static str {
    "everything is great"
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
