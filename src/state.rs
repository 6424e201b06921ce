//! Entry point and the state handle tracking a running application.

use std::sync::{Arc, Once};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::builder::MachineBuilder;
use crate::container::Container;
use crate::error::Error;
use crate::machine::Machine;
use crate::options::RunOptions;

/// Builds a machine for the registered components and starts its run
/// pipeline. Must be called within a Tokio runtime.
///
/// The returned [`State`] is used to request shutdown and to block until all
/// processes have exited.
pub fn run(ctx: CancellationToken, container: Container, options: RunOptions) -> State {
    let builder = MachineBuilder::new(options);
    let run_fn = builder.build_run(&container);
    let shutdown_fn = builder.build_shutdown(&container);

    let (machine, errors) = Machine::start(run_fn, shutdown_fn, ctx);
    State {
        machine,
        errors,
        seen: Vec::new(),
        shutdown_once: Once::new(),
    }
}

/// Tracks the current state of application execution.
pub struct State {
    machine: Arc<Machine>,
    errors: mpsc::Receiver<Error>,
    seen: Vec<Error>,
    shutdown_once: Once,
}

impl State {
    /// Blocks until all processes exit cleanly or until an error occurs. On
    /// the first error every running process is signalled to exit; the method
    /// still unblocks only once everything has exited.
    ///
    /// Returns true iff no error was observed.
    pub async fn wait(&mut self, ctx: CancellationToken) -> bool {
        let mut clean = true;
        while let Some(err) = self.errors.recv().await {
            clean = false;
            self.seen.push(err);
            self.request_shutdown(ctx.clone());
        }

        clean
    }

    /// Signals all running processes to exit. Idempotent; never fails, it
    /// only requests.
    pub fn shutdown(&self, ctx: CancellationToken) {
        self.request_shutdown(ctx);
    }

    fn request_shutdown(&self, ctx: CancellationToken) {
        let machine = &self.machine;
        self.shutdown_once.call_once(|| machine.shutdown(ctx));
    }

    /// The errors observed so far, in emission order.
    pub fn errors(&self) -> &[Error] {
        &self.seen
    }
}
