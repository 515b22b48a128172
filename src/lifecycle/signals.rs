//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers for the configured termination signals
//! - Fan every delivery out to in-process listeners
//! - Support persistent (`on`) and one-shot (`once`) subscriptions
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Listeners run synchronously inside `emit`, in subscription order
//! - No coalescing: every delivery reaches every current listener

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

/// A process signal the bus can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Signal {
    #[serde(rename = "SIGINT", alias = "interrupt")]
    Interrupt,
    #[serde(rename = "SIGTERM", alias = "terminate")]
    Terminate,
    #[serde(rename = "SIGUSR2", alias = "user2")]
    User2,
    #[serde(rename = "SIGHUP", alias = "hangup")]
    Hangup,
}

impl Signal {
    /// The signals a container orchestrator sends before a hard kill.
    pub const TERMINATION: [Signal; 2] = [Signal::Interrupt, Signal::Terminate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::User2 => "SIGUSR2",
            Signal::Hangup => "SIGHUP",
        }
    }

    #[cfg(unix)]
    fn kind(&self) -> tokio::signal::unix::SignalKind {
        use tokio::signal::unix::SignalKind;
        match self {
            Signal::Interrupt => SignalKind::interrupt(),
            Signal::Terminate => SignalKind::terminate(),
            Signal::User2 => SignalKind::user_defined2(),
            Signal::Hangup => SignalKind::hangup(),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a subscription reacts to repeated deliveries of the same signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Stay subscribed; every delivery fires the listener again.
    #[default]
    EveryFiring,
    /// Unsubscribe after the first delivery.
    Once,
}

static LISTENER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Handle returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(LISTENER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

type Listener = Arc<dyn Fn(Signal) + Send + Sync>;

struct Subscription {
    id: ListenerId,
    signal: Signal,
    delivery: Delivery,
    listener: Listener,
}

/// In-process signal bus.
///
/// Cheap to clone; all clones share the same listener table.
#[derive(Clone)]
pub struct SignalBus {
    signals: Arc<[Signal]>,
    listeners: Arc<Mutex<Vec<Subscription>>>,
}

impl SignalBus {
    /// Create a bus for the given signal set.
    pub fn new(signals: impl IntoIterator<Item = Signal>) -> Self {
        let mut set: Vec<Signal> = Vec::new();
        for signal in signals {
            if !set.contains(&signal) {
                set.push(signal);
            }
        }
        Self {
            signals: set.into(),
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Signals this bus is configured for.
    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    /// Subscribe to every delivery of `signal`.
    pub fn on<F>(&self, signal: Signal, listener: F) -> ListenerId
    where
        F: Fn(Signal) + Send + Sync + 'static,
    {
        self.subscribe(signal, Delivery::EveryFiring, Arc::new(listener))
    }

    /// Subscribe to the next delivery of `signal` only.
    pub fn once<F>(&self, signal: Signal, listener: F) -> ListenerId
    where
        F: Fn(Signal) + Send + Sync + 'static,
    {
        self.subscribe(signal, Delivery::Once, Arc::new(listener))
    }

    pub(crate) fn subscribe(&self, signal: Signal, delivery: Delivery, listener: Listener) -> ListenerId {
        let id = ListenerId::next();
        self.lock().push(Subscription {
            id,
            signal,
            delivery,
            listener,
        });
        id
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn remove(&self, signal: Signal, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|sub| !(sub.id == id && sub.signal == signal));
        listeners.len() != before
    }

    /// Number of listeners currently subscribed to `signal`.
    pub fn listener_count(&self, signal: Signal) -> usize {
        self.lock().iter().filter(|sub| sub.signal == signal).count()
    }

    /// Deliver `signal` to its listeners, in subscription order.
    ///
    /// Returns the number of listeners invoked.
    pub fn emit(&self, signal: Signal) -> usize {
        let fired: Vec<Listener> = {
            let mut listeners = self.lock();
            let fired = listeners
                .iter()
                .filter(|sub| sub.signal == signal)
                .map(|sub| Arc::clone(&sub.listener))
                .collect();
            listeners.retain(|sub| !(sub.signal == signal && sub.delivery == Delivery::Once));
            fired
        };

        tracing::debug!(signal = %signal, listeners = fired.len(), "Dispatching signal");
        for listener in &fired {
            listener(signal);
        }
        fired.len()
    }

    /// Forward OS deliveries of the configured signals into [`SignalBus::emit`].
    ///
    /// Spawns one background task per signal. Must be called from within a
    /// Tokio runtime.
    #[cfg(unix)]
    pub fn listen(&self) -> std::io::Result<()> {
        for &signal in self.signals.iter() {
            let mut stream = tokio::signal::unix::signal(signal.kind())?;
            let bus = self.clone();
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    tracing::info!(signal = %signal, "Signal received");
                    bus.emit(signal);
                }
            });
        }
        Ok(())
    }

    /// Forward Ctrl+C into [`SignalBus::emit`] as [`Signal::Interrupt`].
    #[cfg(not(unix))]
    pub fn listen(&self) -> std::io::Result<()> {
        if !self.signals.contains(&Signal::Interrupt) {
            return Ok(());
        }
        let bus = self.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!(signal = %Signal::Interrupt, "Signal received");
                bus.emit(Signal::Interrupt);
            }
        });
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscription>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new(Signal::TERMINATION)
    }
}

impl fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalBus")
            .field("signals", &self.signals)
            .field("listeners", &self.lock().len())
            .finish()
    }
}
