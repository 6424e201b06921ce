//! # Machine builder.
//!
//! Assembles, from a frozen [`Container`], the two composed stream functions
//! the machine drives:
//!
//! - `run`: for each priority in ascending order, inject then init each
//!   partition, dispatch every `run` task, and wait for the priority's health
//!   keys to all report healthy before advancing. After the last priority the
//!   pipeline forwards errors from the background run tasks and finally
//!   finalizes every component.
//! - `shutdown`: stop each priority group in descending order, every stop
//!   within a group in parallel.
//!
//! Priority zero partitions each component alone so its members boot
//! sequentially; all other priorities boot as one parallel partition.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::component::Injecter;
use crate::container::Container;
use crate::error::{Error, Op, OpError};
use crate::health::Health;
use crate::meta::Meta;
use crate::options::{FinalizeContext, RunOptions};
use crate::stream::{chain, closed, parallel, sequence, to_stream, StreamFn};

pub(crate) struct MachineBuilder {
    injecter: Option<Arc<dyn Injecter>>,
    health: Health,
    finalize_context: FinalizeContext,
}

impl MachineBuilder {
    pub(crate) fn new(options: RunOptions) -> Self {
        Self {
            injecter: options.injecter,
            health: options.health.unwrap_or_default(),
            finalize_context: options.finalize_context,
        }
    }

    pub(crate) fn build_run(&self, container: &Container) -> StreamFn {
        let total = container.len();
        let (process_tx, process_rx) = mpsc::channel::<Error>(total.max(1));
        let health_cancel = CancellationToken::new();
        let run_tasks = TaskTracker::new();

        let mut priority_stages: Vec<StreamFn> = Vec::new();
        for &priority in container.priorities() {
            let metas: Vec<Arc<Meta>> = container.metas_at(priority).to_vec();

            // Legacy rule: priority zero boots its members one after another,
            // every other priority boots as one parallel group.
            let partitions: Vec<Vec<Arc<Meta>>> = if priority == 0 {
                metas.iter().cloned().map(|meta| vec![meta]).collect()
            } else {
                vec![metas.clone()]
            };

            let mut boot_stages: Vec<StreamFn> = Vec::new();
            for partition in partitions {
                let inject_stage = parallel(
                    partition
                        .iter()
                        .map(|meta| self.inject_stage(Arc::clone(meta)))
                        .collect(),
                );
                let init_stage = parallel(
                    partition
                        .iter()
                        .map(|meta| {
                            let meta = Arc::clone(meta);
                            to_stream(move |ctx| async move { meta.init(ctx).await })
                        })
                        .collect(),
                );

                boot_stages.push(chain(vec![inject_stage, init_stage]));
            }

            let run_stage = parallel(
                metas
                    .iter()
                    .map(|meta| {
                        let meta = Arc::clone(meta);
                        let run_tasks = run_tasks.clone();
                        let health_cancel = health_cancel.clone();
                        let process_tx = process_tx.clone();

                        // Dispatches the supervised run in the background and
                        // finishes immediately; failures land on the process
                        // error channel and abort any in-flight health wait.
                        let stage: StreamFn = Box::new(move |ctx: CancellationToken| {
                            run_tasks.spawn(async move {
                                if let Err(err) = meta.run(ctx).await {
                                    health_cancel.cancel();
                                    let _ = process_tx.send(err).await;
                                }
                            });
                            closed()
                        });
                        stage
                    })
                    .collect(),
            );

            let wait_stage = self.wait_until_healthy(&metas, health_cancel.clone());

            priority_stages.push(chain(vec![chain(boot_stages), run_stage, wait_stage]));
        }

        let forward_process_errors: StreamFn = {
            let run_tasks = run_tasks.clone();
            let health_cancel = health_cancel.clone();
            Box::new(move |_ctx| {
                tokio::spawn(async move {
                    run_tasks.close();
                    run_tasks.wait().await;
                    drop(process_tx);
                    health_cancel.cancel();
                });
                process_rx
            })
        };

        let finalize_all = parallel(
            container
                .metas()
                .into_iter()
                .map(|meta| {
                    let mode = self.finalize_context;
                    to_stream(move |ctx| async move {
                        let token = match mode {
                            FinalizeContext::Detached => CancellationToken::new(),
                            FinalizeContext::InheritRun => ctx,
                        };
                        meta.finalize(token).await
                    })
                })
                .collect(),
        );

        sequence(vec![
            chain(priority_stages),
            forward_process_errors,
            finalize_all,
        ])
    }

    fn inject_stage(&self, meta: Arc<Meta>) -> StreamFn {
        let injecter = self.injecter.clone();
        to_stream(move |ctx| async move {
            let Some(injecter) = injecter else {
                return Ok(());
            };

            meta.logger()
                .info(&format!("Running inject hook for {}", meta.name()));

            injecter
                .inject(ctx, &meta)
                .await
                .map_err(|err| Error::from(OpError::failed(meta.name(), Op::Inject, err)))
        })
    }

    /// Builds the stage gating advancement past a priority: it resolves the
    /// union of the priority's health keys and waits until all of them report
    /// healthy, or fails with [`Error::HealthCheckCanceled`] once a process
    /// error aborts the wait.
    fn wait_until_healthy(&self, metas: &[Arc<Meta>], cancel: CancellationToken) -> StreamFn {
        let mut keys: Vec<String> = Vec::new();
        for meta in metas {
            for key in meta.health_keys() {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        }

        let health = self.health.clone();
        to_stream(move |_ctx| async move {
            let statuses = health.get_all(&keys)?;
            if statuses.is_empty() {
                return Ok(());
            }

            let subscription = health.subscribe();
            loop {
                tokio::select! {
                    _ = subscription.changed() => {}
                    _ = cancel.cancelled() => return Err(Error::HealthCheckCanceled),
                }

                if statuses.iter().all(|status| status.healthy()) {
                    return Ok(());
                }
            }
        })
    }

    pub(crate) fn build_shutdown(&self, container: &Container) -> StreamFn {
        let mut stop_stages: Vec<StreamFn> = Vec::new();
        for &priority in container.priorities().iter().rev() {
            stop_stages.push(parallel(
                container
                    .metas_at(priority)
                    .iter()
                    .map(|meta| {
                        let meta = Arc::clone(meta);
                        to_stream(move |ctx| async move { meta.stop(ctx).await })
                    })
                    .collect(),
            ));
        }

        sequence(stop_stages)
    }
}
