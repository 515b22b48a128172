//! Readiness/liveness probe handler.
//!
//! # State Machine
//! ```text
//! Serving:     test() == true            → healthy(ctx)
//!              test() == false | error   → not_healthy(ctx)
//! Terminating: (any termination signal)  → not_healthy(ctx), forever
//! ```
//!
//! The predicate is re-evaluated on every probe. A termination signal swaps it
//! for a constant `false`; there is no way back.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::health::outcome::{HealthError, ProbeOutcome};
use crate::lifecycle::signals::SignalBus;
use crate::observability::metrics;

type TestFn = dyn Fn() -> BoxFuture<'static, Result<bool, HealthError>> + Send + Sync;

/// Health predicate, synchronous or asynchronous.
#[derive(Clone)]
pub struct HealthTest(Arc<TestFn>);

impl HealthTest {
    /// Wrap a synchronous predicate.
    pub fn from_fn<F, R>(test: F) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: ProbeOutcome<bool>,
    {
        Self(Arc::new(move || -> BoxFuture<'static, Result<bool, HealthError>> {
            Box::pin(std::future::ready(test().into_outcome()))
        }))
    }

    /// Wrap an asynchronous predicate.
    pub fn from_future<F, Fut, R>(test: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: ProbeOutcome<bool>,
    {
        Self(Arc::new(move || -> BoxFuture<'static, Result<bool, HealthError>> {
            let fut = test();
            Box::pin(async move { fut.await.into_outcome() })
        }))
    }

    /// A predicate with a fixed answer.
    pub fn always(result: bool) -> Self {
        Self::from_fn(move || result)
    }

    /// Evaluate the predicate. Panics, sync or async, come back as errors.
    pub async fn evaluate(&self) -> Result<bool, HealthError> {
        let test = Arc::clone(&self.0);
        AssertUnwindSafe(async move { test().await })
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(HealthError::from_panic(payload)))
    }
}

impl Default for HealthTest {
    fn default() -> Self {
        Self::always(true)
    }
}

type CallbackFn<C> = dyn Fn(C) -> BoxFuture<'static, Result<(), HealthError>> + Send + Sync;

/// Callback receiving the request context once the verdict is known.
pub struct ProbeCallback<C>(Arc<CallbackFn<C>>);

impl<C: Send + 'static> ProbeCallback<C> {
    /// Wrap an asynchronous callback.
    pub fn new<F, Fut, R>(callback: F) -> Self
    where
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: ProbeOutcome<()>,
    {
        Self(Arc::new(move |ctx| -> BoxFuture<'static, Result<(), HealthError>> {
            let fut = callback(ctx);
            Box::pin(async move { fut.await.into_outcome() })
        }))
    }

    /// Wrap a synchronous callback.
    pub fn from_fn<F, R>(callback: F) -> Self
    where
        F: Fn(C) -> R + Send + Sync + 'static,
        R: ProbeOutcome<()>,
    {
        Self(Arc::new(move |ctx| -> BoxFuture<'static, Result<(), HealthError>> {
            Box::pin(std::future::ready(callback(ctx).into_outcome()))
        }))
    }

    async fn call(&self, ctx: C) -> Result<(), HealthError> {
        let callback = Arc::clone(&self.0);
        AssertUnwindSafe(async move { callback(ctx).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(HealthError::from_panic(payload)))
    }
}

impl<C> Clone for ProbeCallback<C> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

/// Inputs for [`HealthHandler::new`].
pub struct HealthHandlerOptions<C> {
    /// Health predicate; `None` means always healthy.
    pub test: Option<HealthTest>,
    pub healthy: ProbeCallback<C>,
    pub not_healthy: ProbeCallback<C>,
}

impl<C> HealthHandlerOptions<C> {
    pub fn new(healthy: ProbeCallback<C>, not_healthy: ProbeCallback<C>) -> Self {
        Self {
            test: None,
            healthy,
            not_healthy,
        }
    }

    pub fn with_test(mut self, test: HealthTest) -> Self {
        self.test = Some(test);
        self
    }
}

/// Probe responder built from [`HealthHandlerOptions`].
///
/// `C` is whatever the HTTP layer hands over: a `(request, response)` pair or
/// a single context object. It is passed through opaquely.
pub struct HealthHandler<C> {
    test: Arc<ArcSwap<HealthTest>>,
    terminating: Arc<AtomicBool>,
    healthy: ProbeCallback<C>,
    not_healthy: ProbeCallback<C>,
}

impl<C> Clone for HealthHandler<C> {
    fn clone(&self) -> Self {
        Self {
            test: Arc::clone(&self.test),
            terminating: Arc::clone(&self.terminating),
            healthy: self.healthy.clone(),
            not_healthy: self.not_healthy.clone(),
        }
    }
}

impl<C: Clone + Send + 'static> HealthHandler<C> {
    /// Build a handler and arm the termination override on `bus`.
    pub fn new(options: HealthHandlerOptions<C>, bus: &SignalBus) -> Self {
        let test = Arc::new(ArcSwap::from_pointee(options.test.unwrap_or_default()));
        let terminating = Arc::new(AtomicBool::new(false));

        for &signal in bus.signals() {
            let test = Arc::clone(&test);
            let terminating = Arc::clone(&terminating);
            bus.once(signal, move |signal| {
                test.store(Arc::new(HealthTest::always(false)));
                if !terminating.swap(true, Ordering::SeqCst) {
                    tracing::warn!(signal = %signal, "Termination signal received, probe now reports not healthy");
                }
            });
        }

        Self {
            test,
            terminating,
            healthy: options.healthy,
            not_healthy: options.not_healthy,
        }
    }

    /// Answer one probe.
    ///
    /// Never fails: callback errors are routed or logged, not returned.
    pub async fn handle(&self, ctx: C) {
        let test = self.test.load_full();
        match test.evaluate().await {
            Ok(true) => {
                if let Err(e) = self.healthy.call(ctx.clone()).await {
                    tracing::warn!(error = %e, "Healthy callback failed, reporting not healthy");
                    self.report_not_healthy(ctx).await;
                    return;
                }
                metrics::record_probe(true);
            }
            Ok(false) => self.report_not_healthy(ctx).await,
            Err(e) => {
                tracing::debug!(error = %e, "Health test failed");
                self.report_not_healthy(ctx).await;
            }
        }
    }

    /// Whether a termination signal has flipped this handler.
    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }

    async fn report_not_healthy(&self, ctx: C) {
        metrics::record_probe(false);
        if let Err(e) = self.not_healthy.call(ctx).await {
            tracing::error!(error = %e, "Not-healthy callback failed");
        }
    }
}
