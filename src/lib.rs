//! # appvisor
//!
//! **Appvisor** is an embeddable application lifecycle supervisor.
//!
//! It orchestrates a fixed, declaratively registered set of long-running
//! processes and one-shot initializers through a strict boot, run, and
//! shutdown protocol: priority-ordered parallel startup, health-gated
//! advancement between priority groups, propagation of the first failure into
//! a coordinated teardown, bounded per-phase timeouts, and reverse-priority
//! stop with finalization.
//!
//! | Area            | Description                                                        | Key types / traits                         |
//! |-----------------|--------------------------------------------------------------------|--------------------------------------------|
//! | **Components**  | Lifecycle capabilities a registered value may implement.           | [`Initializer`], [`Runner`], [`Stoppable`], [`Finalizer`], [`Component`] |
//! | **Registration**| Register processes and initializers, freeze them into a container. | [`ContainerBuilder`], [`Container`], [`MetaOptions`] |
//! | **Health**      | Named health statuses gating priority advancement.                 | [`Health`], [`HealthStatus`], [`Subscription`] |
//! | **Execution**   | Start the machine, wait for exit, request shutdown.                | [`run`], [`State`], [`RunOptions`]         |
//! | **Injection**   | Hook invoked once per component before its init.                   | [`Injecter`], [`Meta`]                     |
//! | **Errors**      | Sentinels and per-operation error records.                         | [`Error`], [`OpError`]                     |
//! | **Logging**     | Pluggable leveled sink.                                            | [`Logger`], [`NilLogger`], [`TracingLogger`] |
//!
//! ## Lifecycle
//!
//! Components register at a priority (lower boots first). For each priority,
//! the machine injects and initializes its components, dispatches their `run`
//! hooks, and then waits for every health key declared at that priority to
//! report healthy before the next priority begins to initialize. A failure
//! anywhere stops the boot, tears down everything that was started in reverse
//! priority order, and finalizes exactly the components that initialized.
//!
//! One compatibility rule: components at priority zero boot strictly one
//! after another in registration order, while every other priority boots as
//! one parallel group.
//!
//! ```no_run
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use appvisor::{BoxError, Component, ContainerBuilder, Health, MetaOptions, RunOptions};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let health = Health::new();
//!     let ready = health.register("server.ready").expect("fresh key");
//!
//!     let server = Component::new()
//!         .init_fn(|_ctx| async { Ok::<_, BoxError>(()) })
//!         .run_fn(move |ctx| {
//!             let ready = ready.clone();
//!             async move {
//!                 ready.update(true);
//!                 ctx.cancelled().await;
//!                 Ok::<_, BoxError>(())
//!             }
//!         })
//!         .stop_fn(|_ctx| async { Ok::<_, BoxError>(()) });
//!
//!     let mut builder = ContainerBuilder::new();
//!     builder.register_process(
//!         server,
//!         MetaOptions::new()
//!             .name("server")
//!             .priority(1)
//!             .health_key("server.ready")
//!             .stop_timeout(Duration::from_secs(5)),
//!     );
//!     let container = builder.build_with(MetaOptions::new().health(health.clone()));
//!
//!     let ctx = CancellationToken::new();
//!     let mut state = appvisor::run(ctx.clone(), container, RunOptions::new().health(health.clone()));
//!
//!     // Request shutdown once the server reports healthy.
//!     let subscription = health.subscribe();
//!     loop {
//!         subscription.changed().await;
//!         if health.healthy() {
//!             break;
//!         }
//!     }
//!     state.shutdown(ctx.clone());
//!     assert!(state.wait(ctx).await);
//! }
//! ```

mod builder;
mod component;
mod container;
mod error;
mod health;
mod logger;
mod machine;
mod meta;
mod options;
mod state;
mod stream;

pub use component::{
    Component, Finalizer, FinalizerFn, Initializer, InitializerFn, Injecter, Runner, RunnerFn,
    Stoppable, StoppableFn,
};
pub use container::{Container, ContainerBuilder};
pub use error::{BoxError, Canceled, Error, Op, OpError, OpErrorKind};
pub use health::{Health, HealthStatus, Subscription};
pub use logger::{LogFields, Logger, NilLogger, TracingLogger};
pub use meta::Meta;
pub use options::{FinalizeContext, MetaOptions, RunOptions};
pub use state::{run, State};
