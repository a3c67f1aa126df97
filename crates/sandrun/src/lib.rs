//! A library for sandboxed multi-language code execution.
//!
//! Sandrun accepts untrusted source code in one of several languages,
//! screens it for disallowed constructs, compiles it when needed and runs it
//! under resource and time limits, returning a structured result.
//!
//! # Features
//!
//! - **Multi-language** — Interpreted, native and JVM toolchains from a TOML registry.
//! - **Static screening** — Import allow-lists and deny-lists of dangerous calls.
//! - **Two backends** — Throwaway containers, or host subprocesses under rlimits.
//! - **Scoped workspaces** — One temporary directory per execution, always removed.
//! - **Resource limits** — Wall clock, CPU time, memory, processes and output.
//!
//! # Example
//!
//! ```no_run
//! use sandrun::{Config, Engine, ExecutionRequest};
//!
//! # async fn demo() -> Result<(), sandrun::EngineError> {
//! let engine = Engine::new(Config::load(None)?).await?;
//! let result = engine
//!     .execute(ExecutionRequest::new("print(1 + 1)", "python"))
//!     .await;
//! println!("{}: {}", result.status, result.stdout);
//! # Ok(())
//! # }
//! ```

pub use backend::{Backend, BackendError, ContainerBackend, ProcessOutput, SubprocessBackend};
pub use config::{
    BackendKind, Config, ConfigError, EXAMPLE_CONFIG, ImportRule, LanguageSpec, SecurityPolicy,
    Toolchain,
};
pub use engine::{Engine, EngineError};
pub use registry::LanguageRegistry;
pub use runner::{ProcessRunner, RawOutcome};
pub use types::{
    ExecutionRequest, ExecutionResult, ExecutionStatus, LimitExceeded, ResourceLimits,
};
pub use validator::{ValidationResult, Violation, validate};
pub use workspace::{Workspace, WorkspaceError, WorkspaceManager};

pub mod backend;
pub mod config;
pub mod engine;
pub mod registry;
pub mod runner;
pub mod types;
pub mod validator;
pub mod workspace;
