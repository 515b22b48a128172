//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order: bus, hooks, health, server
//! - Register the hook that closes the server after the grace period
//! - Bind the listener last (traffic only when ready)
//! - Serve until closed, then wait for every fired hook
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The bus is created here and handed to everything that subscribes

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ServiceConfig;
use crate::health::{HealthHandler, HealthHandlerOptions};
use crate::http::{HttpServer, ProbeContext, ServerError};
use crate::lifecycle::shutdown::{HookError, ShutdownHooks};
use crate::lifecycle::signals::SignalBus;
use crate::net::drain::{CloseError, DrainingClose};
use crate::net::listener::{Listener, ListenerError};
use crate::net::tls;

/// Key of the hook that closes the HTTP server.
pub const CLOSE_SERVER_HOOK: &str = "close-server";

/// Error type for building or running a [`Service`].
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("failed to load TLS material: {0}")]
    Tls(#[source] std::io::Error),
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Hook(#[from] HookError),
}

/// A bound HTTP service whose lifecycle follows the signal bus.
pub struct Service {
    bus: SignalBus,
    hooks: ShutdownHooks,
    health: HealthHandler<ProbeContext>,
    close: DrainingClose<HttpServer>,
    listener: Listener,
}

impl Service {
    /// Wire every subsystem and bind the listener.
    pub async fn build(
        config: ServiceConfig,
        options: HealthHandlerOptions<ProbeContext>,
    ) -> Result<Self, ServiceError> {
        let bus = SignalBus::new(config.shutdown.signals.iter().copied());
        let hooks = ShutdownHooks::new(bus.clone(), config.shutdown.delivery);
        let health = HealthHandler::new(options, &bus);

        let router = HttpServer::build_router(&config.health, health.clone());
        let mut server = HttpServer::new(router);
        if let Some(acceptor) = tls::acceptor_for(&config.listener).await.map_err(ServiceError::Tls)? {
            server = server.with_tls(acceptor);
        }

        let listener = Listener::bind(&config.listener).await?;
        let close = DrainingClose::wrap(Arc::new(server));

        let grace = Duration::from_millis(config.shutdown.grace_period_ms);
        let closer = close.clone();
        hooks.register(CLOSE_SERVER_HOOK, grace, move || {
            let closer = closer.clone();
            async move {
                match closer.close_and_wait().await {
                    Ok(()) => tracing::info!("HTTP server closed"),
                    Err(CloseError::NotRunning) => tracing::debug!("HTTP server already closed"),
                    Err(e) => tracing::warn!(error = %e, "HTTP server close did not complete"),
                }
            }
        });

        tracing::info!(
            signals = ?bus.signals(),
            grace_ms = config.shutdown.grace_period_ms,
            delivery = ?config.shutdown.delivery,
            "Graceful shutdown configured"
        );

        Ok(Self {
            bus,
            hooks,
            health,
            close,
            listener,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    pub fn bus(&self) -> &SignalBus {
        &self.bus
    }

    pub fn hooks(&self) -> &ShutdownHooks {
        &self.hooks
    }

    pub fn health(&self) -> &HealthHandler<ProbeContext> {
        &self.health
    }

    pub fn close(&self) -> &DrainingClose<HttpServer> {
        &self.close
    }

    /// Forward OS signals into the bus, then [`Service::serve`].
    pub async fn run(self) -> Result<(), ServiceError> {
        self.bus.listen().map_err(ServiceError::Signals)?;
        self.serve().await
    }

    /// Serve until the server is closed, then wait for fired hooks.
    ///
    /// OS signals are not wired; deliveries come from [`SignalBus::emit`].
    pub async fn serve(self) -> Result<(), ServiceError> {
        let server = Arc::clone(self.close.server());
        server.serve(self.listener).await?;
        self.hooks.join().await?;
        Ok(())
    }
}
