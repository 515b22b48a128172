//! Shutdown hook registry.
//!
//! A hook is a cleanup callback that runs a fixed grace period after a
//! termination signal reaches the process. Each hook owns one subscription per
//! configured signal, so hooks carry independent grace periods and can be
//! removed without touching each other.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::task::{JoinError, JoinHandle};

use crate::lifecycle::signals::{Delivery, ListenerId, Signal, SignalBus};
use crate::observability::metrics;

/// Caller-supplied identity of a shutdown hook.
///
/// Closures have no identity of their own, so registration and removal are
/// keyed by this token instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HookKey(Arc<str>);

impl HookKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for HookKey {
    fn from(key: &str) -> Self {
        Self(Arc::from(key))
    }
}

impl From<String> for HookKey {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

impl fmt::Display for HookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error surfaced by [`ShutdownHooks::join`].
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("shutdown hook `{0}` was cancelled before it completed")]
    Cancelled(HookKey),
}

type HookFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Tasks spawned by fired hooks.
#[derive(Default)]
struct InFlight {
    running: Vec<(HookKey, JoinHandle<()>)>,
    /// Finished tasks that panicked or were cancelled, kept for `join`.
    failed: Vec<(HookKey, JoinError)>,
}

impl InFlight {
    /// Release finished tasks.
    fn prune(&mut self) {
        for (key, mut handle) in std::mem::take(&mut self.running) {
            if !handle.is_finished() {
                self.running.push((key, handle));
                continue;
            }
            match (&mut handle).now_or_never() {
                Some(Ok(())) => {}
                Some(Err(e)) => self.failed.push((key, e)),
                None => self.running.push((key, handle)),
            }
        }
    }
}

struct Registration {
    grace: Duration,
    subscriptions: Vec<(Signal, ListenerId)>,
}

/// Registry of graceful-shutdown hooks bound to a [`SignalBus`].
///
/// Created at service startup and shared by cloning. Every clone sees the
/// same registrations.
#[derive(Clone)]
pub struct ShutdownHooks {
    bus: SignalBus,
    delivery: Delivery,
    hooks: Arc<Mutex<HashMap<HookKey, Registration>>>,
    in_flight: Arc<Mutex<InFlight>>,
}

impl ShutdownHooks {
    pub fn new(bus: SignalBus, delivery: Delivery) -> Self {
        Self {
            bus,
            delivery,
            hooks: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(InFlight::default())),
        }
    }

    /// Run `callback` once `grace` has elapsed after each termination signal.
    ///
    /// Registering an existing key replaces the previous hook.
    pub fn register<K, F, Fut>(&self, key: K, grace: Duration, callback: F)
    where
        K: Into<HookKey>,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let hook: HookFn = Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(callback()) });

        let mut hooks = lock(&self.hooks);
        if let Some(previous) = hooks.remove(&key) {
            self.unsubscribe(&previous);
        }

        let subscriptions = self
            .bus
            .signals()
            .iter()
            .map(|&signal| {
                let wrapper = self.wrapper(key.clone(), grace, Arc::clone(&hook));
                (signal, self.bus.subscribe(signal, self.delivery, wrapper))
            })
            .collect();

        tracing::debug!(hook = %key, grace = ?grace, "Shutdown hook registered");
        hooks.insert(key, Registration { grace, subscriptions });
    }

    /// Remove a hook. Unknown keys are ignored.
    ///
    /// Grace-period timers already started by an earlier signal keep running.
    pub fn deregister<K: Into<HookKey>>(&self, key: K) {
        let key = key.into();
        let Some(registration) = lock(&self.hooks).remove(&key) else {
            return;
        };
        self.unsubscribe(&registration);
        tracing::debug!(hook = %key, "Shutdown hook removed");
    }

    pub fn is_registered<K: Into<HookKey>>(&self, key: K) -> bool {
        lock(&self.hooks).contains_key(&key.into())
    }

    /// Grace period of a registered hook.
    pub fn grace_period<K: Into<HookKey>>(&self, key: K) -> Option<Duration> {
        lock(&self.hooks).get(&key.into()).map(|r| r.grace)
    }

    pub fn len(&self) -> usize {
        lock(&self.hooks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fired hooks whose callback has not finished yet.
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight)
            .running
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .count()
    }

    /// Wait for every fired hook to finish.
    ///
    /// A cleanup callback that panicked re-raises its panic here; the
    /// registry never swallows cleanup failures.
    pub async fn join(&self) -> Result<(), HookError> {
        loop {
            let (pending, failed) = {
                let mut in_flight = lock(&self.in_flight);
                (
                    std::mem::take(&mut in_flight.running),
                    std::mem::take(&mut in_flight.failed),
                )
            };
            if let Some((key, e)) = failed.into_iter().next() {
                return Err(hook_failure(key, e));
            }
            if pending.is_empty() {
                return Ok(());
            }
            for (key, handle) in pending {
                if let Err(e) = handle.await {
                    return Err(hook_failure(key, e));
                }
            }
        }
    }

    fn wrapper(&self, key: HookKey, grace: Duration, callback: HookFn) -> Arc<dyn Fn(Signal) + Send + Sync> {
        let in_flight = Arc::clone(&self.in_flight);
        Arc::new(move |signal| {
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                tracing::error!(hook = %key, signal = %signal, "No async runtime, shutdown hook dropped");
                return;
            };

            tracing::info!(
                hook = %key,
                signal = %signal,
                grace = ?grace,
                "Shutdown hook triggered"
            );
            metrics::record_hook_fired(key.as_str());

            let callback = Arc::clone(&callback);
            let task_key = key.clone();
            let handle = runtime.spawn(async move {
                tokio::time::sleep(grace).await;
                tracing::info!(hook = %task_key, "Grace period elapsed, running shutdown hook");
                callback().await;
                metrics::record_hook_completed(task_key.as_str());
            });

            let mut in_flight = lock(&in_flight);
            in_flight.prune();
            in_flight.running.push((key.clone(), handle));
        })
    }

    fn unsubscribe(&self, registration: &Registration) {
        for &(signal, id) in &registration.subscriptions {
            self.bus.remove(signal, id);
        }
    }
}

impl fmt::Debug for ShutdownHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHooks")
            .field("delivery", &self.delivery)
            .field("hooks", &self.len())
            .finish()
    }
}

/// Re-raise a panicked hook; anything else was cancelled by the runtime.
fn hook_failure(key: HookKey, error: JoinError) -> HookError {
    if error.is_panic() {
        tracing::error!(hook = %key, "Shutdown hook panicked");
        std::panic::resume_unwind(error.into_panic());
    }
    HookError::Cancelled(key)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_hook(hooks: &ShutdownHooks, key: &str, grace: Duration) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        hooks.register(key, grace, move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        count
    }

    #[tokio::test(start_paused = true)]
    async fn zero_grace_hook_runs_after_one_tick() {
        let bus = SignalBus::default();
        let hooks = ShutdownHooks::new(bus.clone(), Delivery::EveryFiring);
        let count = counting_hook(&hooks, "close", Duration::ZERO);

        bus.emit(Signal::Interrupt);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hook_waits_for_grace_period() {
        let bus = SignalBus::default();
        let hooks = ShutdownHooks::new(bus.clone(), Delivery::EveryFiring);
        let count = counting_hook(&hooks, "close", Duration::from_secs(5));

        bus.emit(Signal::Terminate);
        tokio::time::sleep(Duration::from_millis(4_999)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(hooks.in_flight(), 1);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        hooks.join().await.unwrap();
        assert_eq!(hooks.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn every_delivery_fires_again() {
        let bus = SignalBus::default();
        let hooks = ShutdownHooks::new(bus.clone(), Delivery::EveryFiring);
        let count = counting_hook(&hooks, "close", Duration::from_millis(10));

        bus.emit(Signal::Interrupt);
        bus.emit(Signal::Interrupt);
        bus.emit(Signal::Terminate);
        hooks.join().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn once_delivery_fires_once_per_signal_kind() {
        let bus = SignalBus::default();
        let hooks = ShutdownHooks::new(bus.clone(), Delivery::Once);
        let count = counting_hook(&hooks, "close", Duration::ZERO);

        bus.emit(Signal::Interrupt);
        bus.emit(Signal::Interrupt);
        hooks.join().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        bus.emit(Signal::Terminate);
        hooks.join().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deregistered_hook_never_runs() {
        let bus = SignalBus::default();
        let hooks = ShutdownHooks::new(bus.clone(), Delivery::EveryFiring);
        let count = counting_hook(&hooks, "close", Duration::ZERO);

        hooks.deregister("close");
        assert!(!hooks.is_registered("close"));
        assert_eq!(bus.listener_count(Signal::Interrupt), 0);
        assert_eq!(bus.listener_count(Signal::Terminate), 0);

        bus.emit(Signal::Interrupt);
        bus.emit(Signal::Terminate);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn deregister_unknown_key_is_a_no_op() {
        let hooks = ShutdownHooks::new(SignalBus::default(), Delivery::EveryFiring);
        hooks.deregister("never-registered");

        hooks.register("explodes", Duration::ZERO, || async { panic!("should not run") });
        hooks.deregister("explodes");
        hooks.deregister("explodes");
        assert!(hooks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deregister_does_not_cancel_running_timer() {
        let bus = SignalBus::default();
        let hooks = ShutdownHooks::new(bus.clone(), Delivery::EveryFiring);
        let count = counting_hook(&hooks, "close", Duration::from_secs(1));

        bus.emit(Signal::Terminate);
        hooks.deregister("close");
        hooks.join().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reregistering_replaces_previous_hook() {
        let bus = SignalBus::default();
        let hooks = ShutdownHooks::new(bus.clone(), Delivery::EveryFiring);
        let first = counting_hook(&hooks, "close", Duration::ZERO);
        let second = counting_hook(&hooks, "close", Duration::from_millis(50));

        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks.grace_period("close"), Some(Duration::from_millis(50)));
        assert_eq!(bus.listener_count(Signal::Terminate), 1);

        bus.emit(Signal::Terminate);
        hooks.join().await.unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn independent_grace_periods_fire_in_elapsed_order() {
        let bus = SignalBus::default();
        let hooks = ShutdownHooks::new(bus.clone(), Delivery::EveryFiring);
        let order = Arc::new(Mutex::new(Vec::new()));
        for (key, ms) in [("slow", 300u64), ("fast", 100)] {
            let order = order.clone();
            hooks.register(key, Duration::from_millis(ms), move || {
                let order = order.clone();
                async move { order.lock().unwrap().push(key) }
            });
        }

        bus.emit(Signal::Terminate);
        hooks.join().await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["fast", "slow"]);
    }

    #[tokio::test(start_paused = true)]
    #[should_panic(expected = "cleanup failed")]
    async fn join_surfaces_cleanup_panics() {
        let bus = SignalBus::default();
        let hooks = ShutdownHooks::new(bus.clone(), Delivery::EveryFiring);
        hooks.register("broken", Duration::ZERO, || async { panic!("cleanup failed") });

        bus.emit(Signal::Terminate);
        let _ = hooks.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn finished_hooks_are_released_on_next_firing() {
        let bus = SignalBus::default();
        let hooks = ShutdownHooks::new(bus.clone(), Delivery::EveryFiring);
        let count = counting_hook(&hooks, "reload", Duration::ZERO);

        for _ in 0..5 {
            bus.emit(Signal::Terminate);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(count.load(Ordering::SeqCst), 5);
        assert_eq!(lock(&hooks.in_flight).running.len(), 1);
        hooks.join().await.unwrap();
        assert_eq!(lock(&hooks.in_flight).running.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    #[should_panic(expected = "cleanup failed")]
    async fn released_hook_panic_still_reaches_join() {
        let bus = SignalBus::default();
        let hooks = ShutdownHooks::new(bus.clone(), Delivery::EveryFiring);
        hooks.register("broken", Duration::ZERO, || async { panic!("cleanup failed") });

        bus.emit(Signal::Terminate);
        tokio::time::sleep(Duration::from_millis(10)).await;
        bus.emit(Signal::Terminate);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(lock(&hooks.in_flight).failed.len(), 1);
        let _ = hooks.join().await;
    }
}
