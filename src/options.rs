//! Configuration for registered components and for a supervisor run.
//!
//! [`MetaOptions`] configures a single registration; container-wide defaults
//! are supplied to [`ContainerBuilder::build_with`](crate::ContainerBuilder::build_with)
//! and per-registration options win field by field (health keys concatenate).
//! [`RunOptions`] configures the machine itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::component::Injecter;
use crate::health::Health;
use crate::logger::Logger;

pub(crate) type ContextFilter = Arc<dyn Fn(CancellationToken) -> CancellationToken + Send + Sync>;

/// Per-component configuration.
///
/// All timeouts are disabled by default; a zero duration also counts as
/// disabled.
#[derive(Clone, Default)]
pub struct MetaOptions {
    pub(crate) name: Option<String>,
    pub(crate) metadata: Option<HashMap<String, String>>,
    pub(crate) priority: Option<i32>,
    pub(crate) early_exit: Option<bool>,
    pub(crate) health: Option<Health>,
    pub(crate) health_keys: Vec<String>,
    pub(crate) logger: Option<Arc<dyn Logger>>,
    pub(crate) context_filter: Option<ContextFilter>,
    pub(crate) init_timeout: Option<Duration>,
    pub(crate) startup_timeout: Option<Duration>,
    pub(crate) stop_timeout: Option<Duration>,
    pub(crate) shutdown_timeout: Option<Duration>,
    pub(crate) finalize_timeout: Option<Duration>,
}

impl MetaOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Display name used in logs and error records.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Opaque metadata attached to the component and its logger.
    pub fn metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Boot ordering key; lower priorities start first. Defaults to zero.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Permits `run` to return cleanly before stop is requested. The default
    /// treats an early return as an error.
    pub fn early_exit(mut self, allowed: bool) -> Self {
        self.early_exit = Some(allowed);
        self
    }

    /// Health registry the component's startup watch reads from. Must be the
    /// registry its health keys are registered in.
    pub fn health(mut self, health: Health) -> Self {
        self.health = Some(health);
        self
    }

    /// Declares a health key this component will mark healthy.
    pub fn health_key(mut self, key: impl Into<String>) -> Self {
        self.health_keys.push(key.into());
        self
    }

    /// Declares several health keys at once.
    pub fn health_keys<I>(mut self, keys: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.health_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Transforms the token handed to each of the component's hooks.
    pub fn context_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(CancellationToken) -> CancellationToken + Send + Sync + 'static,
    {
        self.context_filter = Some(Arc::new(filter));
        self
    }

    /// Bounds the `init` hook.
    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = Some(timeout);
        self
    }

    /// Bounds the time between `run` starting and the component's health keys
    /// all reporting healthy.
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = Some(timeout);
        self
    }

    /// Bounds the `stop` hook.
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = Some(timeout);
        self
    }

    /// Bounds the time between a stop request and `run` unblocking.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Bounds the `finalize` hook.
    pub fn finalize_timeout(mut self, timeout: Duration) -> Self {
        self.finalize_timeout = Some(timeout);
        self
    }

    pub(crate) fn merge(base: &MetaOptions, registration: &MetaOptions) -> MetaOptions {
        let mut health_keys = base.health_keys.clone();
        health_keys.extend(registration.health_keys.iter().cloned());

        MetaOptions {
            name: registration.name.clone().or_else(|| base.name.clone()),
            metadata: registration
                .metadata
                .clone()
                .or_else(|| base.metadata.clone()),
            priority: registration.priority.or(base.priority),
            early_exit: registration.early_exit.or(base.early_exit),
            health: registration.health.clone().or_else(|| base.health.clone()),
            health_keys,
            logger: registration.logger.clone().or_else(|| base.logger.clone()),
            context_filter: registration
                .context_filter
                .clone()
                .or_else(|| base.context_filter.clone()),
            init_timeout: registration.init_timeout.or(base.init_timeout),
            startup_timeout: registration.startup_timeout.or(base.startup_timeout),
            stop_timeout: registration.stop_timeout.or(base.stop_timeout),
            shutdown_timeout: registration.shutdown_timeout.or(base.shutdown_timeout),
            finalize_timeout: registration.finalize_timeout.or(base.finalize_timeout),
        }
    }
}

/// Where finalizers get their context from.
///
/// The run pipeline finalizes components on a context that is independent of
/// the caller's by default; opt into [`FinalizeContext::InheritRun`] to have
/// finalizers observe cancellation of the run context instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FinalizeContext {
    /// Finalizers receive a fresh, never-canceled token.
    #[default]
    Detached,
    /// Finalizers receive the run pipeline's token.
    InheritRun,
}

/// Machine-level configuration for [`run`](crate::run).
#[derive(Clone, Default)]
pub struct RunOptions {
    pub(crate) injecter: Option<Arc<dyn Injecter>>,
    pub(crate) health: Option<Health>,
    pub(crate) finalize_context: FinalizeContext,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook invoked once per component before its `init`.
    pub fn injecter(mut self, injecter: Arc<dyn Injecter>) -> Self {
        self.injecter = Some(injecter);
        self
    }

    /// Health registry the machine gates priority advancement on.
    pub fn health(mut self, health: Health) -> Self {
        self.health = Some(health);
        self
    }

    /// Chooses the context finalizers run under.
    pub fn finalize_context(mut self, mode: FinalizeContext) -> Self {
        self.finalize_context = mode;
        self
    }
}
