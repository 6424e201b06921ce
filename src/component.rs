//! # Component capabilities.
//!
//! A component is a user value with any subset of four lifecycle
//! capabilities, each a single async method receiving a [`CancellationToken`]:
//!
//! | Capability      | Hook       | When it runs                                  |
//! |-----------------|------------|-----------------------------------------------|
//! | [`Initializer`] | `init`     | once, during boot of the component's priority |
//! | [`Runner`]      | `run`      | long-running work, until stop or exit         |
//! | [`Stoppable`]   | `stop`     | on shutdown, before the run context cancels   |
//! | [`Finalizer`]   | `finalize` | after every run task has exited               |
//!
//! [`Component`] is the registrable record of those capabilities: four
//! optional shared handles, populated from trait objects or from plain
//! closures via the `*Fn` adapters.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::BoxError;
use crate::meta::Meta;

/// Behavior that happens once on application startup.
#[async_trait]
pub trait Initializer: Send + Sync + 'static {
    async fn init(&self, ctx: CancellationToken) -> Result<(), BoxError>;
}

/// Behavior that happens continually through the application lifecycle.
///
/// `run` is expected to be long-running; returning before the given token is
/// canceled is treated as an error unless the component allows early exit.
#[async_trait]
pub trait Runner: Send + Sync + 'static {
    async fn run(&self, ctx: CancellationToken) -> Result<(), BoxError>;
}

/// A way to signal a running component to exit gracefully.
///
/// `stop` is invoked immediately before the component's run context is
/// canceled. It may return immediately and is not expected to synchronize on
/// `run` returning.
#[async_trait]
pub trait Stoppable: Send + Sync + 'static {
    async fn stop(&self, ctx: CancellationToken) -> Result<(), BoxError>;
}

/// Behavior that happens directly before application exit.
#[async_trait]
pub trait Finalizer: Send + Sync + 'static {
    async fn finalize(&self, ctx: CancellationToken) -> Result<(), BoxError>;
}

/// Hook invoked once per component, before its `init`, to populate the
/// component's dependencies.
#[async_trait]
pub trait Injecter: Send + Sync + 'static {
    async fn inject(&self, ctx: CancellationToken, meta: &Meta) -> Result<(), BoxError>;
}

/// A registrable set of lifecycle capabilities.
///
/// ```
/// use appvisor::{BoxError, Component};
///
/// let worker = Component::new()
///     .init_fn(|_ctx| async { Ok::<_, BoxError>(()) })
///     .run_fn(|ctx| async move {
///         ctx.cancelled().await;
///         Ok::<_, BoxError>(())
///     });
/// # let _ = worker;
/// ```
#[derive(Clone, Default)]
pub struct Component {
    init: Option<Arc<dyn Initializer>>,
    run: Option<Arc<dyn Runner>>,
    stop: Option<Arc<dyn Stoppable>>,
    finalize: Option<Arc<dyn Finalizer>>,
}

impl Component {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initializer(mut self, init: Arc<dyn Initializer>) -> Self {
        self.init = Some(init);
        self
    }

    pub fn with_runner(mut self, run: Arc<dyn Runner>) -> Self {
        self.run = Some(run);
        self
    }

    pub fn with_stoppable(mut self, stop: Arc<dyn Stoppable>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn with_finalizer(mut self, finalize: Arc<dyn Finalizer>) -> Self {
        self.finalize = Some(finalize);
        self
    }

    /// Adds an init capability backed by a closure.
    pub fn init_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.with_initializer(Arc::new(InitializerFn::new(f)))
    }

    /// Adds a run capability backed by a closure.
    pub fn run_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.with_runner(Arc::new(RunnerFn::new(f)))
    }

    /// Adds a stop capability backed by a closure.
    pub fn stop_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.with_stoppable(Arc::new(StoppableFn::new(f)))
    }

    /// Adds a finalize capability backed by a closure.
    pub fn finalize_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.with_finalizer(Arc::new(FinalizerFn::new(f)))
    }

    pub(crate) fn initializer(&self) -> Option<&Arc<dyn Initializer>> {
        self.init.as_ref()
    }

    pub(crate) fn runner(&self) -> Option<&Arc<dyn Runner>> {
        self.run.as_ref()
    }

    pub(crate) fn stoppable(&self) -> Option<&Arc<dyn Stoppable>> {
        self.stop.as_ref()
    }

    pub(crate) fn finalizer(&self) -> Option<&Arc<dyn Finalizer>> {
        self.finalize.as_ref()
    }
}

/// Function-backed [`Initializer`].
pub struct InitializerFn<F> {
    f: F,
}

impl<F> InitializerFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Initializer for InitializerFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn init(&self, ctx: CancellationToken) -> Result<(), BoxError> {
        (self.f)(ctx).await
    }
}

/// Function-backed [`Runner`].
pub struct RunnerFn<F> {
    f: F,
}

impl<F> RunnerFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Runner for RunnerFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn run(&self, ctx: CancellationToken) -> Result<(), BoxError> {
        (self.f)(ctx).await
    }
}

/// Function-backed [`Stoppable`].
pub struct StoppableFn<F> {
    f: F,
}

impl<F> StoppableFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Stoppable for StoppableFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn stop(&self, ctx: CancellationToken) -> Result<(), BoxError> {
        (self.f)(ctx).await
    }
}

/// Function-backed [`Finalizer`].
pub struct FinalizerFn<F> {
    f: F,
}

impl<F> FinalizerFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Finalizer for FinalizerFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn finalize(&self, ctx: CancellationToken) -> Result<(), BoxError> {
        (self.f)(ctx).await
    }
}
