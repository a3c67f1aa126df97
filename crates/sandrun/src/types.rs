use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::validator::Violation;

/// Largest accepted source payload in bytes
pub const MAX_SOURCE_BYTES: usize = 100 * 1024;

/// Largest accepted stdin payload in bytes
pub const MAX_STDIN_BYTES: usize = 10 * 1024;

/// Memory ceiling used for `{memory_mb}` when no limit is configured
pub const DEFAULT_MEMORY_MB: u64 = 512;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Wall clock time limit in seconds, shared by compilation and execution
    #[serde(default)]
    pub timeout: Option<f64>,

    /// CPU time limit in seconds (defaults to the wall clock limit rounded up)
    #[serde(default)]
    pub cpu_time: Option<u64>,

    /// Memory ceiling in megabytes
    #[serde(default)]
    pub memory_limit: Option<u64>,

    /// Maximum number of processes/threads
    #[serde(default)]
    pub max_processes: Option<u32>,

    /// Maximum captured output per stream in kilobytes
    #[serde(default)]
    pub max_output: Option<u64>,

    /// Largest file a process may write, in megabytes
    #[serde(default)]
    pub max_file_size: Option<u64>,

    /// Maximum open files
    #[serde(default)]
    pub max_open_files: Option<u32>,
}

impl ResourceLimits {
    /// Create new resource limits with the default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create resource limits with every field unset
    ///
    /// Useful as a starting point for overrides that should only replace the
    /// fields explicitly set.
    pub fn unset() -> Self {
        Self {
            timeout: None,
            cpu_time: None,
            memory_limit: None,
            max_processes: None,
            max_output: None,
            max_file_size: None,
            max_open_files: None,
        }
    }

    /// Set the wall clock time limit in seconds
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    /// Set the CPU time limit in seconds
    pub fn with_cpu_time(mut self, seconds: u64) -> Self {
        self.cpu_time = Some(seconds);
        self
    }

    /// Set the memory ceiling in megabytes
    pub fn with_memory_limit(mut self, mb: u64) -> Self {
        self.memory_limit = Some(mb);
        self
    }

    /// Set the maximum number of processes
    pub fn with_max_processes(mut self, count: u32) -> Self {
        self.max_processes = Some(count);
        self
    }

    /// Set the maximum output size in kilobytes
    pub fn with_max_output(mut self, kb: u64) -> Self {
        self.max_output = Some(kb);
        self
    }

    /// Set the maximum number of open files
    pub fn with_max_open_files(mut self, count: u32) -> Self {
        self.max_open_files = Some(count);
        self
    }

    /// Set the largest writable file in megabytes
    pub fn with_max_file_size(mut self, mb: u64) -> Self {
        self.max_file_size = Some(mb);
        self
    }

    /// Apply overrides from another ResourceLimits, preferring values from `overrides`
    ///
    /// Returns a new ResourceLimits with values from `overrides` taking precedence
    /// over values from `self` when both are present.
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            timeout: overrides.timeout.or(self.timeout),
            cpu_time: overrides.cpu_time.or(self.cpu_time),
            memory_limit: overrides.memory_limit.or(self.memory_limit),
            max_processes: overrides.max_processes.or(self.max_processes),
            max_output: overrides.max_output.or(self.max_output),
            max_file_size: overrides.max_file_size.or(self.max_file_size),
            max_open_files: overrides.max_open_files.or(self.max_open_files),
        }
    }

    /// Whether a set timeout lies in `(0, MAX_TIMEOUT_SECS]`. Unset counts as valid.
    pub fn timeout_in_range(&self) -> bool {
        self.timeout.is_none_or(valid_timeout)
    }

    /// Wall clock budget as a duration. Unset or invalid values fall back to
    /// the default budget so a timeout is always enforced.
    pub fn timeout_duration(&self) -> Duration {
        self.timeout
            .filter(|secs| valid_timeout(*secs))
            .map(Duration::from_secs_f64)
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// CPU time ceiling in whole seconds
    pub fn effective_cpu_time(&self) -> u64 {
        self.cpu_time
            .unwrap_or_else(|| self.timeout_duration().as_secs_f64().ceil() as u64)
            .max(1)
    }

    /// Output ceiling per stream in bytes, if any
    pub fn max_output_bytes(&self) -> Option<usize> {
        self.max_output
            .map(|kb| usize::try_from(kb.saturating_mul(1024)).unwrap_or(usize::MAX))
    }

    /// File size ceiling in bytes, if any
    pub fn max_file_size_bytes(&self) -> Option<u64> {
        self.max_file_size.map(|mb| mb.saturating_mul(1024 * 1024))
    }
}

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Longest accepted wall clock limit in seconds
pub const MAX_TIMEOUT_SECS: f64 = 86_400.0;

fn valid_timeout(secs: f64) -> bool {
    secs.is_finite() && secs > 0.0 && secs <= MAX_TIMEOUT_SECS
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT_SECS as f64),
            cpu_time: None,
            memory_limit: Some(DEFAULT_MEMORY_MB),
            max_processes: Some(64),
            max_output: Some(1024), // 1 MB per stream
            max_file_size: Some(64),
            max_open_files: Some(64),
        }
    }
}

/// A single request to the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Source code to run
    pub code: String,

    /// Language name or alias (case-insensitive)
    pub language: String,

    /// Optional standard input payload
    #[serde(default)]
    pub stdin: Option<String>,

    /// Optional per-request limit overrides
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language: language.into(),
            stdin: None,
            limits: None,
        }
    }

    /// Provide a standard input payload
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    /// Override limits for this request only
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = Some(limits);
        self
    }
}

/// Result of an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Captured standard output
    pub stdout: String,

    /// Captured standard error (compiler output for compilation errors)
    pub stderr: String,

    /// Wall clock time in seconds covering compilation and execution
    pub execution_time: f64,

    /// Execution status
    pub status: ExecutionStatus,

    /// Exit code if the program exited normally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Signal number if the program was killed by a signal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,

    /// Which limit was hit, if any could be identified
    #[serde(default)]
    pub limit_exceeded: LimitExceeded,

    /// Static screening violations (validation errors only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
}

impl ExecutionResult {
    /// Check if the execution was successful (exited with code 0)
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.status, ExecutionStatus::Success) && self.exit_code == Some(0)
    }

    /// Result for a fault unrelated to the submitted code
    pub fn internal_error(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            stderr: message.into(),
            execution_time: elapsed.as_secs_f64(),
            status: ExecutionStatus::Error,
            ..Default::default()
        }
    }
}

impl Default for ExecutionResult {
    fn default() -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            execution_time: 0.0,
            status: ExecutionStatus::Success,
            exit_code: None,
            signal: None,
            limit_exceeded: LimitExceeded::NotExceeded,
            violations: Vec::new(),
        }
    }
}

/// Status of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Program exited with code 0
    Success,

    /// Compiler exited non-zero; the run phase was skipped
    CompilationError,

    /// Program exited non-zero or was killed by a signal
    RuntimeError,

    /// Wall clock budget exceeded and the process tree was killed
    Timeout,

    /// Static screening rejected the request
    ValidationError,

    /// Fault unrelated to the submitted code
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::CompilationError => "compilation_error",
            ExecutionStatus::RuntimeError => "runtime_error",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::ValidationError => "validation_error",
            ExecutionStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secondary status indicating which resource limit was exceeded.
/// This provides more detail beyond the basic ExecutionStatus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LimitExceeded {
    /// No limit was exceeded
    #[default]
    #[serde(rename = "none")]
    NotExceeded,

    /// Wall clock time limit exceeded
    #[serde(rename = "wall_time")]
    WallTime,

    /// CPU time limit exceeded
    #[serde(rename = "cpu_time")]
    CpuTime,

    /// Memory ceiling exceeded
    #[serde(rename = "memory")]
    Memory,

    /// Output or file size ceiling exceeded
    #[serde(rename = "output")]
    Output,
}

/// Markers runtimes print when an allocation fails under the memory ceiling
const OUT_OF_MEMORY_MARKERS: [&str; 6] = [
    "memoryerror",
    "bad_alloc",
    "out of memory",
    "outofmemoryerror",
    "cannot allocate memory",
    "failed to allocate",
];

impl LimitExceeded {
    /// Infer an exceeded limit from a terminating signal
    pub fn from_signal(signal: Option<i32>) -> Self {
        match signal {
            Some(SIGXCPU) => LimitExceeded::CpuTime,
            Some(SIGXFSZ) => LimitExceeded::Output,
            _ => LimitExceeded::NotExceeded,
        }
    }

    /// Infer a memory failure from the program's error output
    pub fn from_stderr(stderr: &str) -> Self {
        let lower = stderr.to_lowercase();
        if OUT_OF_MEMORY_MARKERS.iter().any(|m| lower.contains(m)) {
            LimitExceeded::Memory
        } else {
            LimitExceeded::NotExceeded
        }
    }

    /// Check if any limit was exceeded
    #[must_use]
    pub fn is_exceeded(&self) -> bool {
        !matches!(self, LimitExceeded::NotExceeded)
    }
}

// Linux numbering
const SIGXCPU: i32 = 24;
const SIGXFSZ: i32 = 25;
