//! Execution backends
//!
//! A backend runs one phase (compile or run) of a program inside a prepared
//! workspace and reports what happened. Two backends exist:
//! - container: a throwaway container per phase, with cgroup limits and no
//!   network
//! - subprocess: a host child process with a scrubbed environment and
//!   rlimits, used when no container runtime is reachable

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

pub use crate::backend::command::{Phase, PhaseCommand};
pub use crate::backend::container::{CONTAINER_WORKSPACE, ContainerBackend};
pub use crate::backend::rlimit::RlimitPlan;
pub use crate::backend::subprocess::{SubprocessBackend, resolve_command};
use crate::config::{BackendKind, Config, LanguageSpec};
use crate::workspace::Workspace;

mod command;
mod container;
mod rlimit;
mod subprocess;

/// Errors raised while running a phase
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("failed to spawn process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("container runtime error: {0}")]
    Container(#[from] bollard::errors::Error),

    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("empty command")]
    EmptyCommand,
}

/// What a finished phase produced
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// Exit code, `None` when killed by a signal or timed out
    pub exit_code: Option<i32>,
    /// Terminating signal
    pub signal: Option<i32>,
    /// The wall clock budget ran out and the process was killed
    pub timed_out: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// At least one stream hit the output ceiling
    pub output_truncated: bool,
    /// Wall clock time from start to exit
    pub elapsed: Duration,
    /// The memory cgroup killed the process
    pub oom_killed: bool,
}

impl ProcessOutput {
    /// Exited on its own with code 0
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// The backend an engine runs programs with
#[derive(Debug, Clone)]
pub enum Backend {
    Subprocess(SubprocessBackend),
    /// Languages without an image run on the subprocess fallback
    Container {
        container: ContainerBackend,
        fallback: SubprocessBackend,
    },
}

impl Backend {
    /// Pick the backend the configuration asks for.
    ///
    /// `auto` prefers containers and falls back to subprocesses when the
    /// runtime does not answer. `container` fails instead.
    pub async fn select(config: &Config) -> Result<Self, BackendError> {
        match config.backend {
            BackendKind::Subprocess => Ok(Self::subprocess()),
            BackendKind::Container => {
                let container = ContainerBackend::connect(config.container.clone()).await?;
                info!("using container backend");
                Ok(Self::container(container))
            }
            BackendKind::Auto => match ContainerBackend::connect(config.container.clone()).await {
                Ok(container) => {
                    info!("using container backend");
                    Ok(Self::container(container))
                }
                Err(e) => {
                    warn!(error = %e, "container runtime unreachable, using subprocess backend");
                    Ok(Self::subprocess())
                }
            },
        }
    }

    pub fn subprocess() -> Self {
        Self::Subprocess(SubprocessBackend::new())
    }

    pub fn container(container: ContainerBackend) -> Self {
        Self::Container {
            container,
            fallback: SubprocessBackend::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Subprocess(_) => "subprocess",
            Self::Container { .. } => "container",
        }
    }

    /// Run one phase of `spec` inside `workspace`
    pub async fn run(
        &self,
        spec: &LanguageSpec,
        workspace: &Workspace,
        command: PhaseCommand,
    ) -> Result<ProcessOutput, BackendError> {
        match self {
            Self::Subprocess(backend) => backend.run(spec, workspace, command).await,
            Self::Container {
                container,
                fallback,
            } => match spec.image.as_deref() {
                Some(image) => container.run(spec, image, workspace, command).await,
                None => {
                    warn!(language = %spec.id, "no container image configured, running as subprocess");
                    fallback.run(spec, workspace, command).await
                }
            },
        }
    }
}
