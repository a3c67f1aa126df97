//! Process runner for sandrun
//!
//! Drives the compile and run phases of a prepared workspace through the
//! selected backend. Both phases share one wall clock deadline.

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, instrument};

pub use crate::runner::classify::classify;
pub use crate::runner::compile::{compile, compile_limits};
pub use crate::runner::execute::execute;

mod classify;
mod compile;
mod execute;

use crate::{
    backend::{Backend, BackendError, ProcessOutput},
    config::LanguageSpec,
    types::ResourceLimits,
    workspace::{Workspace, WorkspaceError},
};

/// Errors that occur during compilation
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("language '{0}' does not need compilation")]
    NotCompiled(String),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Errors that occur during execution
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("execution not started: {0}")]
    NotStarted(String),

    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

/// What the phases produced, before classification
#[derive(Debug, Clone)]
pub enum RawOutcome {
    /// The compile phase exited non-zero or ran out of time; run was skipped
    CompileFailed(ProcessOutput),

    /// The program ran
    Completed {
        output: ProcessOutput,
        /// Time spent compiling, zero for interpreted languages
        compile_time: Duration,
    },

    /// Something outside the submitted code went wrong
    Fault { message: String, elapsed: Duration },
}

/// Runs the phases of an execution on a backend
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    backend: Backend,
}

impl ProcessRunner {
    /// Create a new runner on the given backend
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Get the backend
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Compile (when the toolchain needs it) and run the workspace's program
    #[instrument(skip(self, workspace, spec, stdin, limits), fields(language = %spec.id))]
    pub async fn run(
        &self,
        workspace: &Workspace,
        spec: &LanguageSpec,
        stdin: Option<&str>,
        limits: &ResourceLimits,
    ) -> RawOutcome {
        let started = Instant::now();
        let deadline = started + limits.timeout_duration();

        let mut compile_time = Duration::ZERO;
        if spec.needs_compile() {
            match compile(&self.backend, workspace, spec, limits, deadline).await {
                Ok(output) if output.success() => compile_time = output.elapsed,
                Ok(output) => {
                    debug!(
                        exit_code = ?output.exit_code,
                        timed_out = output.timed_out,
                        "compilation failed"
                    );
                    return RawOutcome::CompileFailed(output);
                }
                Err(e) => {
                    return RawOutcome::Fault {
                        message: e.to_string(),
                        elapsed: started.elapsed(),
                    };
                }
            }
        }

        match execute(&self.backend, workspace, spec, stdin, limits, deadline).await {
            Ok(output) => RawOutcome::Completed {
                output,
                compile_time,
            },
            Err(e) => RawOutcome::Fault {
                message: e.to_string(),
                elapsed: started.elapsed(),
            },
        }
    }
}

/// Budget left until `deadline`, capped at the phase's own timeout
pub(crate) fn remaining(deadline: Instant, phase_timeout: Duration) -> Duration {
    deadline
        .saturating_duration_since(Instant::now())
        .min(phase_timeout)
}
