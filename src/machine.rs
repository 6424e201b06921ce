//! # Machine: drives the run and shutdown pipelines.
//!
//! The machine owns the single output error channel for a session. Starting
//! it spawns a forwarder for the run pipeline; a shutdown request spawns a
//! second forwarder for the shutdown pipeline, at most once. A watcher closes
//! the output exactly once, after every forwarder that was started has
//! drained its pipeline.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::Error;
use crate::stream::StreamFn;

pub(crate) struct Machine {
    shutdown_fn: Mutex<Option<StreamFn>>,
    sender: Mutex<Option<mpsc::Sender<Error>>>,
    pipelines: TaskTracker,
}

impl Machine {
    /// Creates a machine, starts its run pipeline, and returns the receive
    /// side of the output channel. Must be called within a Tokio runtime.
    pub(crate) fn start(
        run_fn: StreamFn,
        shutdown_fn: StreamFn,
        ctx: CancellationToken,
    ) -> (Arc<Machine>, mpsc::Receiver<Error>) {
        let (tx, rx) = mpsc::channel(1);
        let machine = Arc::new(Machine {
            shutdown_fn: Mutex::new(Some(shutdown_fn)),
            sender: Mutex::new(Some(tx)),
            pipelines: TaskTracker::new(),
        });

        machine.spawn_pipeline(run_fn, ctx);

        // Dropping the retained sender is what closes the output; it happens
        // once, after the run pipeline and any started shutdown pipeline have
        // drained.
        let watcher = Arc::clone(&machine);
        tokio::spawn(async move {
            watcher.pipelines.close();
            watcher.pipelines.wait().await;
            watcher.lock_sender().take();
        });

        (machine, rx)
    }

    /// Starts the shutdown pipeline. Only the first call has an effect; a
    /// request arriving after the output already closed is a no-op.
    pub(crate) fn shutdown(&self, ctx: CancellationToken) {
        let shutdown_fn = self.lock_shutdown().take();
        if let Some(shutdown_fn) = shutdown_fn {
            self.spawn_pipeline(shutdown_fn, ctx);
        }
    }

    fn spawn_pipeline(&self, pipeline: StreamFn, ctx: CancellationToken) {
        let tx = match self.lock_sender().as_ref() {
            Some(tx) => tx.clone(),
            None => return,
        };

        self.pipelines.spawn(async move {
            let mut errors = pipeline(ctx);
            while let Some(err) = errors.recv().await {
                if tx.send(err).await.is_err() {
                    break;
                }
            }
        });
    }

    fn lock_shutdown(&self) -> MutexGuard<'_, Option<StreamFn>> {
        self.shutdown_fn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_sender(&self) -> MutexGuard<'_, Option<mpsc::Sender<Error>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::to_stream;

    #[tokio::test]
    async fn output_closes_after_the_run_pipeline() {
        let run_fn = to_stream(|_ctx| async { Err(Error::UnexpectedReturn) });
        let shutdown_fn = to_stream(|_ctx| async { Ok(()) });

        let (_machine, mut errors) = Machine::start(run_fn, shutdown_fn, CancellationToken::new());

        let err = errors.recv().await.expect("one error");
        assert!(matches!(err, Error::UnexpectedReturn));
        assert!(errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn shutdown_pipeline_errors_are_forwarded_once() {
        let (gate_tx, gate_rx) = tokio::sync::oneshot::channel::<()>();
        let run_fn = to_stream(move |_ctx| async move {
            let _ = gate_rx.await;
            Ok(())
        });
        let shutdown_fn = to_stream(|_ctx| async { Err(Error::ShutdownTimeout) });

        let (machine, mut errors) = Machine::start(run_fn, shutdown_fn, CancellationToken::new());
        machine.shutdown(CancellationToken::new());
        machine.shutdown(CancellationToken::new()); // second request is a no-op

        let err = errors.recv().await.expect("shutdown error");
        assert!(matches!(err, Error::ShutdownTimeout));

        let _ = gate_tx.send(());
        assert!(errors.recv().await.is_none());
    }
}
