//! # Error-stream combinators.
//!
//! The machine is assembled from one primitive: a function from a
//! cancellation token to a finite stream of errors that closes when the stage
//! is done ([`StreamFn`]). Four operators compose them:
//!
//! - [`to_stream`] adapts a plain fallible future into a 0-or-1 error stage.
//! - [`chain`] pipes stages sequentially and skips the rest once any stage
//!   emitted an error.
//! - [`sequence`] pipes stages sequentially and always runs every stage.
//! - [`parallel`] launches all stages concurrently, forwarding errors as they
//!   arrive and closing once every stage finished.
//!
//! These are the only structuring primitives the machine builder uses.

use std::future::Future;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// A finite stream of errors; closed once the producing stage is done.
pub(crate) type ErrorStream = mpsc::Receiver<Error>;

/// A single pipeline stage.
pub(crate) type StreamFn = Box<dyn FnOnce(CancellationToken) -> ErrorStream + Send>;

/// An already-closed stream, for stages that finish before they return.
pub(crate) fn closed() -> ErrorStream {
    let (_tx, rx) = mpsc::channel(1);
    rx
}

/// Adapts a fallible future into a stage emitting at most one error.
pub(crate) fn to_stream<F, Fut>(stage: F) -> StreamFn
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    Box::new(move |ctx| {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            if let Err(err) = stage(ctx).await {
                let _ = tx.send(err).await;
            }
        });
        rx
    })
}

/// Runs stages in order, skipping the remainder after the first stage that
/// emitted an error.
pub(crate) fn chain(stages: Vec<StreamFn>) -> StreamFn {
    combine(true, stages)
}

/// Runs every stage in order, regardless of errors.
pub(crate) fn sequence(stages: Vec<StreamFn>) -> StreamFn {
    combine(false, stages)
}

fn combine(stop_on_error: bool, mut stages: Vec<StreamFn>) -> StreamFn {
    if stages.len() == 1 {
        return stages.remove(0);
    }

    Box::new(move |ctx| {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let mut saw_error = false;
            for stage in stages {
                if saw_error && stop_on_error {
                    break;
                }

                let mut errors = stage(ctx.clone());
                while let Some(err) = errors.recv().await {
                    saw_error = true;
                    if tx.send(err).await.is_err() {
                        return;
                    }
                }
            }
        });
        rx
    })
}

/// Runs all stages concurrently, merging their errors. The merged stream
/// closes once every stage has finished.
pub(crate) fn parallel(stages: Vec<StreamFn>) -> StreamFn {
    Box::new(move |ctx| {
        let (tx, rx) = mpsc::channel(1);
        for stage in stages {
            let tx = tx.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let mut errors = stage(ctx);
                while let Some(err) = errors.recv().await {
                    if tx.send(err).await.is_err() {
                        break;
                    }
                }
            });
        }
        rx
    })
}
