//! # Per-component state machine.
//!
//! [`Meta`] wraps a registered [`Component`] and ensures its hooks are only
//! called once and never from an invalid state (for example `run` before
//! `init`, or after a failed `init`).
//!
//! States move `Fresh -> Initialized -> Running -> Stopping -> Stopped`, with
//! `Finalized` reachable from any post-`Fresh` state:
//!
//! - `init` marks the meta initialized on success, also when the component
//!   has no init capability.
//! - `run` only proceeds when initialized and not stopping. The user hook is
//!   spawned on its own task and raced against the component's health keys
//!   reporting healthy (startup timeout), the one-shot stop signal, and its
//!   own return.
//! - `stop` marks the meta stopping exactly once; the user hook runs only if
//!   the component was running.
//! - `finalize` runs only if the meta initialized.
//!
//! Every phase passes its token through the component's context filter and
//! derives a child before handing it to user code. A phase with a configured
//! timeout returns a timeout [`OpError`] when the timer wins the race.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinError;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::component::{Component, Runner};
use crate::error::{is_canceled, BoxError, Error, Op, OpError};
use crate::health::Health;
use crate::logger::{Logger, NilLogger};
use crate::options::{ContextFilter, MetaOptions};

pub struct Meta {
    component: Component,
    name: String,
    metadata: HashMap<String, String>,
    priority: i32,
    early_exit: bool,
    health: Health,
    health_keys: Vec<String>,
    logger: Arc<dyn Logger>,
    context_filter: Option<ContextFilter>,
    init_timeout: Option<Duration>,
    startup_timeout: Option<Duration>,
    stop_timeout: Option<Duration>,
    shutdown_timeout: Option<Duration>,
    finalize_timeout: Option<Duration>,
    flags: Mutex<Flags>,
    stopped: CancellationToken,
}

#[derive(Default)]
struct Flags {
    initialized: bool,
    running: bool,
    stopping: bool,
}

impl Meta {
    pub(crate) fn new(component: Component, options: MetaOptions) -> Self {
        let metadata = options.metadata.unwrap_or_default();
        let logger: Arc<dyn Logger> = options.logger.unwrap_or_else(|| Arc::new(NilLogger));
        let logger = if metadata.is_empty() {
            logger
        } else {
            logger.with_fields(metadata.clone())
        };

        Self {
            component,
            name: options.name.unwrap_or_else(|| "<unnamed>".to_string()),
            metadata,
            priority: options.priority.unwrap_or(0),
            early_exit: options.early_exit.unwrap_or(false),
            health: options.health.unwrap_or_default(),
            health_keys: options.health_keys,
            logger,
            context_filter: options.context_filter,
            init_timeout: options.init_timeout,
            startup_timeout: options.startup_timeout,
            stop_timeout: options.stop_timeout,
            shutdown_timeout: options.shutdown_timeout,
            finalize_timeout: options.finalize_timeout,
            flags: Mutex::new(Flags::default()),
            stopped: CancellationToken::new(),
        }
    }

    /// The component's configured name, or `<unnamed>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The component's configured metadata.
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub(crate) fn priority(&self) -> i32 {
        self.priority
    }

    pub(crate) fn health_keys(&self) -> &[String] {
        &self.health_keys
    }

    pub(crate) fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    #[cfg(test)]
    pub(crate) fn allows_early_exit(&self) -> bool {
        self.early_exit
    }

    fn lock(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn filtered(&self, ctx: CancellationToken) -> CancellationToken {
        match &self.context_filter {
            Some(filter) => filter(ctx),
            None => ctx,
        }
    }

    fn phase_token(&self, ctx: CancellationToken) -> CancellationToken {
        self.filtered(ctx).child_token()
    }

    /// Invokes the component's `init` hook under the init timeout and marks
    /// the meta initialized on success.
    pub async fn init(&self, ctx: CancellationToken) -> Result<(), Error> {
        if let Some(initializer) = self.component.initializer() {
            let initializer = Arc::clone(initializer);
            let token = self.phase_token(ctx);
            let hook = async move { initializer.init(token).await };
            run_op(
                self.logger.as_ref(),
                &self.name,
                Op::Init,
                self.init_timeout,
                hook,
            )
            .await?;
        }

        self.lock().initialized = true;
        Ok(())
    }

    /// Invokes the component's `run` hook and supervises it until it returns,
    /// the startup health wait fails, or a stop request unblocks it.
    ///
    /// No-op if the component has no run capability, was never initialized,
    /// or stop was already requested.
    pub async fn run(&self, ctx: CancellationToken) -> Result<(), Error> {
        let Some(runner) = self.component.runner() else {
            return Ok(());
        };
        if !self.should_run() {
            return Ok(());
        }

        let result = self.supervise(ctx, Arc::clone(runner)).await;
        self.lock().running = false;
        result
    }

    fn should_run(&self) -> bool {
        let mut flags = self.lock();
        if !flags.initialized || flags.stopping {
            return false;
        }

        flags.running = true;
        true
    }

    async fn supervise(
        &self,
        ctx: CancellationToken,
        runner: Arc<dyn Runner>,
    ) -> Result<(), Error> {
        let derived = ctx.child_token();
        let _cancel_on_exit = derived.clone().drop_guard();

        let user_token = self.filtered(derived.clone()).child_token();
        let logger = Arc::clone(&self.logger);
        let name = self.name.clone();
        let mut handle = tokio::spawn(async move {
            let hook = async move { runner.run(user_token).await };
            run_op(logger.as_ref(), &name, Op::Run, None, hook).await
        });

        let mut verdict = self.watch_health()?;

        tokio::select! {
            healthy = &mut verdict => {
                if !healthy.unwrap_or(false) {
                    return Err(Error::StartupTimeout);
                }

                tokio::select! {
                    result = &mut handle => return self.handle_result(&derived, self.join_result(result)),
                    _ = self.stopped.cancelled() => derived.cancel(),
                }
            }
            result = &mut handle => return self.handle_result(&derived, self.join_result(result)),
            _ = self.stopped.cancelled() => derived.cancel(),
        }

        // Stop was requested and the derived token canceled; give the runner
        // until the shutdown timeout to unblock, then abandon it.
        match self.shutdown_timeout.filter(|t| *t > Duration::ZERO) {
            Some(limit) => tokio::select! {
                result = &mut handle => self.ignore_canceled(&derived, self.join_result(result)),
                _ = time::sleep(limit) => Err(Error::ShutdownTimeout),
            },
            None => {
                let result = (&mut handle).await;
                self.ignore_canceled(&derived, self.join_result(result))
            }
        }
    }

    /// Spawns a watcher resolving to true once every declared health key
    /// reports healthy, or false when the startup timeout elapses first. With
    /// no declared keys the watcher reports healthy on its primed
    /// notification.
    fn watch_health(&self) -> Result<oneshot::Receiver<bool>, Error> {
        let statuses = self.health.get_all(&self.health_keys)?;
        let subscription = self.health.subscribe();
        let startup_timeout = self.startup_timeout.filter(|t| *t > Duration::ZERO);
        let (mut tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let deadline = async {
                match startup_timeout {
                    Some(limit) => time::sleep(limit).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::pin!(deadline);

            let healthy = loop {
                tokio::select! {
                    _ = &mut deadline => break false,
                    // The supervisor stopped listening; nothing left to watch.
                    _ = tx.closed() => return,
                    _ = subscription.changed() => {
                        if statuses.iter().all(|status| status.healthy()) {
                            break true;
                        }
                    }
                }
            };

            let _ = tx.send(healthy);
        });

        Ok(rx)
    }

    fn join_result(&self, result: Result<Result<(), Error>, JoinError>) -> Result<(), Error> {
        result.unwrap_or_else(|join| Err(OpError::failed(&self.name, Op::Run, Box::new(join)).into()))
    }

    /// Decides the error value after the runner returned: a clean return
    /// without a stop request is unexpected unless the component allows early
    /// exit; cancellation errors are laundered.
    fn handle_result(
        &self,
        derived: &CancellationToken,
        result: Result<(), Error>,
    ) -> Result<(), Error> {
        let stopping = self.lock().stopping;
        match result {
            Ok(()) if !stopping && !self.early_exit => Err(Error::UnexpectedReturn),
            result => self.ignore_canceled(derived, result),
        }
    }

    fn ignore_canceled(
        &self,
        derived: &CancellationToken,
        result: Result<(), Error>,
    ) -> Result<(), Error> {
        match result {
            Err(err) if derived.is_cancelled() && is_canceled(&err) => Ok(()),
            result => result,
        }
    }

    /// Requests the component to stop. Marks the meta stopping exactly once;
    /// signals the run supervisor and invokes the user `stop` hook only if
    /// the component was running.
    ///
    /// No-op if the meta never initialized or stop was already requested.
    pub async fn stop(&self, ctx: CancellationToken) -> Result<(), Error> {
        if !self.begin_stop() {
            return Ok(());
        }

        self.stopped.cancel();

        if let Some(stoppable) = self.component.stoppable() {
            let stoppable = Arc::clone(stoppable);
            let token = self.phase_token(ctx);
            let hook = async move { stoppable.stop(token).await };
            run_op(
                self.logger.as_ref(),
                &self.name,
                Op::Stop,
                self.stop_timeout,
                hook,
            )
            .await?;
        }

        Ok(())
    }

    fn begin_stop(&self) -> bool {
        let mut flags = self.lock();
        if !flags.initialized || flags.stopping {
            return false;
        }

        flags.stopping = true;
        flags.running
    }

    /// Invokes the component's `finalize` hook under the finalize timeout.
    /// No-op if the meta never initialized.
    pub async fn finalize(&self, ctx: CancellationToken) -> Result<(), Error> {
        if !self.lock().initialized {
            return Ok(());
        }

        if let Some(finalizer) = self.component.finalizer() {
            let finalizer = Arc::clone(finalizer);
            let token = self.phase_token(ctx);
            let hook = async move { finalizer.finalize(token).await };
            run_op(
                self.logger.as_ref(),
                &self.name,
                Op::Finalize,
                self.finalize_timeout,
                hook,
            )
            .await?;
        }

        Ok(())
    }
}

/// Runs one lifecycle hook, racing it against the phase timeout. A zero or
/// absent timeout leaves the hook unbounded.
async fn run_op<F>(
    logger: &dyn Logger,
    name: &str,
    op: Op,
    timeout: Option<Duration>,
    hook: F,
) -> Result<(), Error>
where
    F: Future<Output = Result<(), BoxError>>,
{
    logger.info(&format!("{name}: {op} starting"));

    let result = match timeout.filter(|t| *t > Duration::ZERO) {
        Some(limit) => match time::timeout(limit, hook).await {
            Ok(result) => result,
            Err(_elapsed) => return Err(OpError::timeout(name, op).into()),
        },
        None => hook.await,
    };

    match result {
        Ok(()) => {
            logger.info(&format!("{name}: {op} finished"));
            Ok(())
        }
        Err(cause) => Err(OpError::failed(name, op, cause).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use crate::error::Canceled;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn run_is_a_noop_before_init() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let component = Component::new().run_fn(move |_ctx| {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, BoxError>(())
            }
        });

        let meta = Meta::new(component, MetaOptions::new().name("worker"));
        meta.run(token()).await.expect("run without init");
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn init_marks_initialized_without_an_init_hook() {
        let finalized = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finalized);
        let component = Component::new().finalize_fn(move |_ctx| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(())
            }
        });

        let meta = Meta::new(component, MetaOptions::new().name("worker"));
        meta.finalize(token()).await.expect("finalize before init");
        assert_eq!(finalized.load(Ordering::SeqCst), 0);

        meta.init(token()).await.expect("init");
        meta.finalize(token()).await.expect("finalize");
        assert_eq!(finalized.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_init_blocks_finalize() {
        let finalized = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finalized);
        let component = Component::new()
            .init_fn(|_ctx| async { Err::<(), BoxError>("boom".into()) })
            .finalize_fn(move |_ctx| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                }
            });

        let meta = Meta::new(component, MetaOptions::new().name("worker"));
        let err = meta.init(token()).await.expect_err("failing init");
        assert_eq!(err.to_string(), "worker: init failed (boom)");

        meta.finalize(token()).await.expect("finalize no-op");
        assert_eq!(finalized.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn init_timeout_is_reported() {
        let component = Component::new().init_fn(|_ctx| async {
            std::future::pending::<()>().await;
            Ok::<_, BoxError>(())
        });

        let meta = Meta::new(
            component,
            MetaOptions::new()
                .name("worker")
                .init_timeout(Duration::from_secs(5)),
        );
        let err = meta.init(token()).await.expect_err("stuck init");
        assert_eq!(err.to_string(), "worker: init timeout");
    }

    #[tokio::test]
    async fn unexpected_return_is_synthesized() {
        let component = Component::new().run_fn(|_ctx| async { Ok::<_, BoxError>(()) });
        let meta = Meta::new(component, MetaOptions::new().name("worker"));

        meta.init(token()).await.expect("init");
        let err = meta.run(token()).await.expect_err("early return");
        assert!(matches!(err, Error::UnexpectedReturn));
    }

    #[tokio::test]
    async fn early_exit_permits_a_clean_return() {
        let component = Component::new().run_fn(|_ctx| async { Ok::<_, BoxError>(()) });
        let meta = Meta::new(
            component,
            MetaOptions::new().name("worker").early_exit(true),
        );

        meta.init(token()).await.expect("init");
        meta.run(token()).await.expect("early exit allowed");
    }

    #[tokio::test]
    async fn run_failure_is_wrapped() {
        let component = Component::new().run_fn(|_ctx| async { Err::<(), BoxError>("boom".into()) });
        let meta = Meta::new(component, MetaOptions::new().name("worker"));

        meta.init(token()).await.expect("init");
        let err = meta.run(token()).await.expect_err("failing run");
        assert_eq!(err.to_string(), "worker: run failed (boom)");
    }

    #[tokio::test]
    async fn stop_invokes_user_stop_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stops);
        let component = Component::new()
            .run_fn(|ctx| async move {
                ctx.cancelled().await;
                Ok::<_, BoxError>(())
            })
            .stop_fn(move |_ctx| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                }
            });

        let meta = Arc::new(Meta::new(component, MetaOptions::new().name("worker")));
        meta.init(token()).await.expect("init");

        let runner = tokio::spawn({
            let meta = Arc::clone(&meta);
            async move { meta.run(token()).await }
        });
        settle().await;

        meta.stop(token()).await.expect("stop");
        meta.stop(token()).await.expect("repeated stop");
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        runner.await.expect("join").expect("clean run");
    }

    #[tokio::test]
    async fn stop_without_running_skips_user_stop() {
        let stops = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stops);
        let component = Component::new().stop_fn(move |_ctx| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(())
            }
        });

        let meta = Meta::new(component, MetaOptions::new().name("worker"));
        meta.init(token()).await.expect("init");
        meta.stop(token()).await.expect("stop");
        assert_eq!(stops.load(Ordering::SeqCst), 0);

        // Stop marked the meta stopping, so a later run is a no-op.
        meta.run(token()).await.expect("run after stop");
    }

    #[tokio::test]
    async fn canceled_errors_are_laundered_after_stop() {
        let component = Component::new().run_fn(|ctx| async move {
            ctx.cancelled().await;
            Err::<(), BoxError>(Box::new(Canceled))
        });

        let meta = Arc::new(Meta::new(component, MetaOptions::new().name("worker")));
        meta.init(token()).await.expect("init");

        let runner = tokio::spawn({
            let meta = Arc::clone(&meta);
            async move { meta.run(token()).await }
        });
        settle().await;

        meta.stop(token()).await.expect("stop");
        runner.await.expect("join").expect("canceled exit is clean");
    }

    #[tokio::test(start_paused = true)]
    async fn startup_timeout_fails_the_run() {
        let health = Health::new();
        health.register("worker.ready").expect("fresh key");

        let component = Component::new().run_fn(|ctx| async move {
            ctx.cancelled().await;
            Ok::<_, BoxError>(())
        });
        let meta = Meta::new(
            component,
            MetaOptions::new()
                .name("worker")
                .health(health)
                .health_key("worker.ready")
                .startup_timeout(Duration::from_secs(5)),
        );

        meta.init(token()).await.expect("init");
        let err = meta.run(token()).await.expect_err("never healthy");
        assert!(matches!(err, Error::StartupTimeout));
    }

    #[tokio::test]
    async fn undeclared_health_key_fails_the_run() {
        let component = Component::new().run_fn(|ctx| async move {
            ctx.cancelled().await;
            Ok::<_, BoxError>(())
        });
        let meta = Meta::new(
            component,
            MetaOptions::new().name("worker").health_key("worker.ready"),
        );

        meta.init(token()).await.expect("init");
        let err = meta.run(token()).await.expect_err("unknown key");
        assert!(matches!(err, Error::HealthComponentNotRegistered(key) if key == "worker.ready"));
    }
}
