//! Result classification
//!
//! Maps the raw outcome of the phases onto the public status model.

use crate::backend::ProcessOutput;
use crate::runner::RawOutcome;
use crate::types::{ExecutionResult, ExecutionStatus, LimitExceeded, ResourceLimits};

/// Build the final result for a raw outcome
pub fn classify(outcome: RawOutcome, limits: &ResourceLimits) -> ExecutionResult {
    match outcome {
        RawOutcome::CompileFailed(output) if output.timed_out => timed_out(output, limits),
        RawOutcome::CompileFailed(output) => {
            let hint = limit_hint(&output, false);
            ExecutionResult {
                stdout: String::new(),
                stderr: compiler_output(&output),
                execution_time: output.elapsed.as_secs_f64(),
                status: ExecutionStatus::CompilationError,
                exit_code: output.exit_code,
                signal: output.signal,
                limit_exceeded: hint,
                violations: Vec::new(),
            }
        }
        RawOutcome::Completed { output, .. } if output.timed_out => timed_out(output, limits),
        RawOutcome::Completed {
            output,
            compile_time,
        } => {
            let success = output.exit_code == Some(0) && output.signal.is_none();
            let status = if success {
                ExecutionStatus::Success
            } else {
                ExecutionStatus::RuntimeError
            };
            ExecutionResult {
                limit_exceeded: limit_hint(&output, success),
                stdout: output.stdout_lossy(),
                stderr: output.stderr_lossy(),
                execution_time: (compile_time + output.elapsed).as_secs_f64(),
                status,
                exit_code: output.exit_code,
                signal: output.signal,
                violations: Vec::new(),
            }
        }
        RawOutcome::Fault { message, elapsed } => ExecutionResult::internal_error(message, elapsed),
    }
}

fn timed_out(output: ProcessOutput, limits: &ResourceLimits) -> ExecutionResult {
    let limit = limits.timeout_duration().as_secs_f64();
    let mut stderr = output.stderr_lossy();
    if !stderr.is_empty() && !stderr.ends_with('\n') {
        stderr.push('\n');
    }
    stderr.push_str(&format!("execution timed out after {limit} seconds"));

    ExecutionResult {
        stdout: output.stdout_lossy(),
        stderr,
        execution_time: limit,
        status: ExecutionStatus::Timeout,
        exit_code: None,
        signal: output.signal,
        limit_exceeded: LimitExceeded::WallTime,
        violations: Vec::new(),
    }
}

/// Compiler diagnostics; some toolchains print them on stdout
fn compiler_output(output: &ProcessOutput) -> String {
    let stdout = output.stdout_lossy();
    let stderr = output.stderr_lossy();
    match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (true, _) => stderr,
        (false, true) => stdout,
        (false, false) => format!("{stdout}{stderr}"),
    }
}

/// Which limit most likely ended the process.
///
/// Memory markers in stderr only count for failed processes.
fn limit_hint(output: &ProcessOutput, success: bool) -> LimitExceeded {
    let from_signal = LimitExceeded::from_signal(output.signal);
    if from_signal.is_exceeded() {
        return from_signal;
    }
    if output.output_truncated {
        return LimitExceeded::Output;
    }
    if success {
        return LimitExceeded::NotExceeded;
    }
    if output.oom_killed {
        return LimitExceeded::Memory;
    }
    LimitExceeded::from_stderr(&output.stderr_lossy())
}
