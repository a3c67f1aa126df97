//! Execution engine
//!
//! Ties the pieces together: bounds checks, language lookup, static
//! screening, workspace allocation, the compile and run phases, and result
//! classification. [`Engine::execute`] always produces an
//! [`ExecutionResult`]; failures are folded into its status.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::backend::{Backend, BackendError};
use crate::config::{Config, ConfigError, LanguageSpec};
use crate::registry::LanguageRegistry;
use crate::runner::{ProcessRunner, classify};
use crate::types::{
    ExecutionRequest, ExecutionResult, ExecutionStatus, MAX_SOURCE_BYTES, MAX_STDIN_BYTES,
    MAX_TIMEOUT_SECS, ResourceLimits,
};
use crate::validator::{self, ValidationResult, Violation};
use crate::workspace::{WorkspaceError, WorkspaceManager};

/// Errors surfaced by the engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("source code is {size} bytes, the limit is {limit}")]
    SourceTooLarge { size: usize, limit: usize },

    #[error("stdin is {size} bytes, the limit is {limit}")]
    StdinTooLarge { size: usize, limit: usize },

    #[error("timeout of {timeout} seconds is outside (0, {max}]", max = MAX_TIMEOUT_SECS)]
    TimeoutOutOfRange { timeout: f64 },

    #[error("source rejected by static screening ({} violation(s))", .violations.len())]
    Validation { violations: Vec<Violation> },

    #[error("no public class, interface, enum or record found in source")]
    NoPublicTypeFound,

    #[error("compilation failed: {stderr}")]
    Compilation { stderr: String },

    #[error("program exited with {exit_code:?}: {stderr}")]
    Runtime {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("execution timed out after {limit} seconds")]
    Timeout { limit: f64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Status reported for this error
    pub fn status(&self) -> ExecutionStatus {
        match self {
            EngineError::SourceTooLarge { .. }
            | EngineError::StdinTooLarge { .. }
            | EngineError::TimeoutOutOfRange { .. }
            | EngineError::Validation { .. } => ExecutionStatus::ValidationError,
            EngineError::NoPublicTypeFound | EngineError::Compilation { .. } => {
                ExecutionStatus::CompilationError
            }
            EngineError::Runtime { .. } => ExecutionStatus::RuntimeError,
            EngineError::Timeout { .. } => ExecutionStatus::Timeout,
            EngineError::UnsupportedLanguage(_) | EngineError::Internal(_) => {
                ExecutionStatus::Error
            }
        }
    }

    /// Fold the error into a result
    pub fn into_result(self, elapsed: Duration) -> ExecutionResult {
        let status = self.status();
        let stderr = match &self {
            EngineError::Compilation { stderr } | EngineError::Runtime { stderr, .. } => {
                stderr.clone()
            }
            EngineError::Internal(message) => message.clone(),
            other => other.to_string(),
        };
        let execution_time = match &self {
            EngineError::Timeout { limit } => *limit,
            _ => elapsed.as_secs_f64(),
        };
        let exit_code = match &self {
            EngineError::Runtime { exit_code, .. } => *exit_code,
            _ => None,
        };
        let violations = match self {
            EngineError::Validation { violations } => violations,
            _ => Vec::new(),
        };

        ExecutionResult {
            stderr,
            execution_time,
            status,
            exit_code,
            violations,
            ..Default::default()
        }
    }

    /// Split a classified result into success and failure
    pub fn check(result: ExecutionResult) -> Result<ExecutionResult, EngineError> {
        match result.status {
            ExecutionStatus::Success => Ok(result),
            ExecutionStatus::CompilationError => Err(EngineError::Compilation {
                stderr: result.stderr,
            }),
            ExecutionStatus::RuntimeError => Err(EngineError::Runtime {
                exit_code: result.exit_code,
                stderr: result.stderr,
            }),
            ExecutionStatus::Timeout => Err(EngineError::Timeout {
                limit: result.execution_time,
            }),
            ExecutionStatus::ValidationError => Err(EngineError::Validation {
                violations: result.violations,
            }),
            ExecutionStatus::Error => Err(EngineError::Internal(result.stderr)),
        }
    }
}

impl From<WorkspaceError> for EngineError {
    fn from(err: WorkspaceError) -> Self {
        match err {
            WorkspaceError::NoPublicTypeFound => EngineError::NoPublicTypeFound,
            other => EngineError::Internal(other.to_string()),
        }
    }
}

impl From<BackendError> for EngineError {
    fn from(err: BackendError) -> Self {
        EngineError::Internal(err.to_string())
    }
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Internal(err.to_string())
    }
}

/// Sandboxed multi-language execution engine
#[derive(Debug, Clone)]
pub struct Engine {
    registry: Arc<LanguageRegistry>,
    workspaces: WorkspaceManager,
    runner: ProcessRunner,
    default_limits: ResourceLimits,
}

impl Engine {
    /// Create an engine, selecting the backend the configuration asks for
    pub async fn new(config: Config) -> Result<Self, EngineError> {
        let backend = Backend::select(&config).await?;
        Ok(Self::with_backend(&config, backend))
    }

    /// Create an engine on an explicit backend
    pub fn with_backend(config: &Config, backend: Backend) -> Self {
        let registry = Arc::new(LanguageRegistry::from_config(config));
        let workspaces =
            WorkspaceManager::new(config.workspace_root.clone(), config.concurrency());

        info!(
            backend = backend.name(),
            languages = registry.len(),
            concurrency = workspaces.capacity(),
            "engine ready"
        );
        if matches!(backend, Backend::Subprocess(_)) {
            warn!("subprocess backend shares the host filesystem and network with executed code");
        }

        Self {
            registry,
            workspaces,
            runner: ProcessRunner::new(backend),
            default_limits: config.default_limits.clone(),
        }
    }

    /// Get the language registry
    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    /// Sorted ids of the configured languages
    pub fn supported_languages(&self) -> Vec<String> {
        self.registry.supported_languages()
    }

    /// Name of the backend in use
    pub fn backend_name(&self) -> &'static str {
        self.runner.backend().name()
    }

    /// Screen `code` without running it
    pub fn validate(&self, code: &str, language: &str) -> Result<ValidationResult, EngineError> {
        let spec = self.registry.resolve(language)?;
        Ok(validator::validate(code, &spec))
    }

    /// Limits for a request: defaults, then the language's run limits, then
    /// the request's own overrides
    pub fn effective_limits(
        &self,
        spec: &LanguageSpec,
        overrides: Option<&ResourceLimits>,
    ) -> ResourceLimits {
        let mut limits = self.default_limits.clone();
        if let Some(run_limits) = &spec.run_limits {
            limits = limits.with_overrides(run_limits);
        }
        if let Some(overrides) = overrides {
            limits = limits.with_overrides(overrides);
        }
        limits
    }

    /// Execute a request. Never fails; errors become the result's status.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();
        match self.run_request(request).await {
            Ok(result) => result,
            Err(e) => {
                debug!(error = %e, "execution rejected");
                e.into_result(started.elapsed())
            }
        }
    }

    /// Execute a request, returning anything but success as an error
    pub async fn try_execute(
        &self,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult, EngineError> {
        let result = self.run_request(request).await?;
        EngineError::check(result)
    }

    #[instrument(skip(self, request), fields(language = %request.language))]
    async fn run_request(
        &self,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult, EngineError> {
        check_bounds(&request)?;

        let spec = self.registry.resolve(&request.language)?;

        let validation = validator::validate(&request.code, &spec);
        if !validation.valid {
            return Err(EngineError::Validation {
                violations: validation.violations,
            });
        }

        let limits = self.effective_limits(&spec, request.limits.as_ref());

        let mut workspace = self.workspaces.acquire(&spec, &request.code).await?;
        let outcome = self
            .runner
            .run(&workspace, &spec, request.stdin.as_deref(), &limits)
            .await;
        // Failures are logged by release; the result stands either way
        let _ = workspace.release();

        let result = classify(outcome, &limits);
        debug!(
            status = %result.status,
            execution_time = result.execution_time,
            exit_code = ?result.exit_code,
            "execution finished"
        );
        Ok(result)
    }
}

fn check_bounds(request: &ExecutionRequest) -> Result<(), EngineError> {
    if request.code.len() > MAX_SOURCE_BYTES {
        return Err(EngineError::SourceTooLarge {
            size: request.code.len(),
            limit: MAX_SOURCE_BYTES,
        });
    }
    if let Some(stdin) = &request.stdin
        && stdin.len() > MAX_STDIN_BYTES
    {
        return Err(EngineError::StdinTooLarge {
            size: stdin.len(),
            limit: MAX_STDIN_BYTES,
        });
    }
    if let Some(limits) = &request.limits
        && let Some(timeout) = limits.timeout
        && !limits.timeout_in_range()
    {
        return Err(EngineError::TimeoutOutOfRange { timeout });
    }
    Ok(())
}
