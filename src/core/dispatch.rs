//! # Dedicated execution context for runs.
//!
//! [`Dispatcher::dispatch`] hands every run its own OS thread with its own
//! current-thread Tokio runtime, whatever the caller's context is.
//!
//! ```text
//! dispatch(request)
//!   └─ thread "run-{id}"
//!        ├─ runtime = current_thread + time
//!        ├─ runtime.block_on(supervisor.run(request))   hard deadline enforced inside
//!        └─ runtime.shutdown_timeout(grace)
//! ```
//!
//! ### Notes
//! - `Config::hard_deadline` bounds the run's event loop, not its finishing
//!   steps; see [`RunSupervisor`].
//! - The deadline takes effect at the producer's next suspension point; a
//!   producer that blocks its thread without yielding cannot be interrupted.
//! - Dropping the [`DispatchHandle`] detaches the run (fire-and-forget).

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, info};

use crate::core::supervisor::RunSupervisor;
use crate::error::{DispatchError, panic_message};
use crate::run::{RunOutcome, RunRequest};

/// Time granted to leftover tasks when a run's runtime shuts down.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Starts runs on dedicated threads.
#[derive(Clone)]
pub struct Dispatcher {
    supervisor: Arc<RunSupervisor>,
}

impl Dispatcher {
    pub fn new(supervisor: Arc<RunSupervisor>) -> Self {
        Self { supervisor }
    }

    /// Starts `request` on a new thread and returns immediately.
    pub fn dispatch(&self, request: RunRequest) -> Result<DispatchHandle, DispatchError> {
        let supervisor = Arc::clone(&self.supervisor);
        let run_id = request.run_id.clone();

        let thread = std::thread::Builder::new()
            .name(format!("run-{run_id}"))
            .spawn(move || -> Result<RunOutcome, DispatchError> {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .map_err(|err| {
                        error!(run_id = %request.run_id, error = %err, "failed to build run runtime");
                        DispatchError::Runtime(err)
                    })?;
                let outcome = runtime.block_on(supervisor.run(request));
                runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
                Ok(outcome)
            })
            .map_err(DispatchError::Spawn)?;

        info!(run_id = %run_id, "run dispatched");
        Ok(DispatchHandle { run_id, thread })
    }
}

/// Handle to a dispatched run.
pub struct DispatchHandle {
    run_id: String,
    thread: JoinHandle<Result<RunOutcome, DispatchError>>,
}

impl DispatchHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Blocks until the run thread exits.
    pub fn join(self) -> Result<RunOutcome, DispatchError> {
        self.thread
            .join()
            .map_err(|panic| DispatchError::Panicked(panic_message(&*panic)))?
    }
}
