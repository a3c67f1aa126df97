//! Compilation step for code execution
//!
//! Runs the language's compile command in the workspace. The compile step
//! may write build artifacts next to the source.

use std::time::Instant;

use tracing::{debug, instrument};

use crate::backend::{Backend, Phase, PhaseCommand, ProcessOutput};
use crate::config::LanguageSpec;
use crate::runner::{CompileError, remaining};
use crate::types::{DEFAULT_MEMORY_MB, ResourceLimits};
use crate::workspace::Workspace;

/// Limits for the compile phase: the run limits with the language's
/// compile overrides applied
pub fn compile_limits(spec: &LanguageSpec, limits: &ResourceLimits) -> ResourceLimits {
    match &spec.compile_limits {
        Some(overrides) => limits.with_overrides(overrides),
        None => limits.clone(),
    }
}

/// Compile the workspace's source, bounded by `deadline`
#[instrument(skip(backend, workspace, spec, limits), fields(language = %spec.id))]
pub async fn compile(
    backend: &Backend,
    workspace: &Workspace,
    spec: &LanguageSpec,
    limits: &ResourceLimits,
    deadline: Instant,
) -> Result<ProcessOutput, CompileError> {
    let template = spec
        .compile_command()
        .ok_or_else(|| CompileError::NotCompiled(spec.id.clone()))?;

    let limits = compile_limits(spec, limits);
    let memory_mb = limits.memory_limit.unwrap_or(DEFAULT_MEMORY_MB);
    let argv = LanguageSpec::expand_command(
        template,
        workspace.source_name(),
        workspace.binary_name(),
        memory_mb,
    );

    debug!(?argv, "compiling");

    let command = PhaseCommand::new(Phase::Compile)
        .timeout(remaining(deadline, limits.timeout_duration()))
        .limits(limits)
        .command(argv);

    let output = backend.run(spec, workspace, command).await?;

    debug!(
        success = output.success(),
        exit_code = ?output.exit_code,
        timed_out = output.timed_out,
        elapsed = ?output.elapsed,
        "compilation complete"
    );

    Ok(output)
}
