//! Command builder for one process phase
//!
//! Describes what a backend should run: the expanded argv, the limits in
//! force, the stdin payload and the remaining wall clock budget.

use std::time::Duration;

use crate::types::{DEFAULT_MEMORY_MB, ResourceLimits};

/// Which phase of an execution a command belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Build step; the workspace is writable
    Compile,
    /// Program run; the workspace is read-only where the backend supports it
    Run,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Compile => "compile",
            Phase::Run => "run",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builder for a backend invocation
#[derive(Debug, Clone)]
pub struct PhaseCommand {
    phase: Phase,
    /// Program and arguments, placeholders already expanded
    argv: Vec<String>,
    /// Resource limits
    limits: ResourceLimits,
    /// Payload written to stdin, then closed
    stdin: Option<Vec<u8>>,
    /// Wall clock budget for this phase
    timeout: Duration,
}

impl PhaseCommand {
    /// Create a new command builder for the given phase
    pub fn new(phase: Phase) -> Self {
        let limits = ResourceLimits::default();
        Self {
            phase,
            argv: Vec::new(),
            timeout: limits.timeout_duration(),
            limits,
            stdin: None,
        }
    }

    /// Set the command to run
    pub fn command(mut self, cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.argv = cmd.into_iter().map(Into::into).collect();
        self
    }

    /// Set resource limits
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the stdin payload
    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    /// Set the wall clock budget
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    pub fn get_limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn stdin_data(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    /// Take the stdin payload out of the command
    pub fn take_stdin(&mut self) -> Option<Vec<u8>> {
        self.stdin.take()
    }

    pub fn get_timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether the workspace must be writable for this command
    pub fn writable_workspace(&self) -> bool {
        matches!(self.phase, Phase::Compile)
    }

    /// Effective memory ceiling in megabytes
    pub fn memory_mb(&self) -> u64 {
        self.limits.memory_limit.unwrap_or(DEFAULT_MEMORY_MB)
    }

    /// Output ceiling per stream in bytes
    pub fn output_cap(&self) -> usize {
        self.limits.max_output_bytes().unwrap_or(usize::MAX)
    }
}
