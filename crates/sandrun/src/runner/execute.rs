//! Execution step for code running
//!
//! Runs the compiled or interpreted program with its stdin payload.

use std::time::Instant;

use tracing::{debug, instrument};

use crate::backend::{Backend, Phase, PhaseCommand, ProcessOutput};
use crate::config::{LanguageSpec, Toolchain};
use crate::runner::{ExecuteError, remaining};
use crate::types::{DEFAULT_MEMORY_MB, ResourceLimits};
use crate::workspace::Workspace;

/// File the run phase needs in the workspace
fn artifact_name(spec: &LanguageSpec, workspace: &Workspace) -> String {
    match &spec.toolchain {
        Toolchain::Interpreted { .. } => workspace.source_name().to_owned(),
        Toolchain::Native { .. } => workspace.binary_name().to_owned(),
        Toolchain::Jvm { .. } => format!("{}.class", workspace.binary_name()),
    }
}

/// Run the workspace's program, bounded by `deadline`
#[instrument(skip(backend, workspace, spec, stdin, limits), fields(language = %spec.id))]
pub async fn execute(
    backend: &Backend,
    workspace: &Workspace,
    spec: &LanguageSpec,
    stdin: Option<&str>,
    limits: &ResourceLimits,
    deadline: Instant,
) -> Result<ProcessOutput, ExecuteError> {
    let artifact = artifact_name(spec, workspace);
    if !workspace.file_exists(&artifact).await? {
        return Err(ExecuteError::NotStarted(format!(
            "'{artifact}' not found in workspace"
        )));
    }

    let timeout = remaining(deadline, limits.timeout_duration());
    if timeout.is_zero() {
        debug!("deadline reached before run phase");
        return Ok(ProcessOutput {
            timed_out: true,
            ..Default::default()
        });
    }

    let memory_mb = limits.memory_limit.unwrap_or(DEFAULT_MEMORY_MB);
    let argv = LanguageSpec::expand_command(
        spec.run_command(),
        workspace.source_name(),
        workspace.binary_name(),
        memory_mb,
    );

    debug!(?argv, "executing program");

    let mut command = PhaseCommand::new(Phase::Run)
        .timeout(timeout)
        .limits(limits.clone())
        .command(argv);
    if let Some(data) = stdin {
        command = command.stdin(data.as_bytes().to_vec());
    }

    let output = backend.run(spec, workspace, command).await?;

    debug!(
        exit_code = ?output.exit_code,
        signal = ?output.signal,
        timed_out = output.timed_out,
        elapsed = ?output.elapsed,
        "execution complete"
    );

    Ok(output)
}
