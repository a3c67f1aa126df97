//! Integration tests for sandrun
//!
//! These tests need real language toolchains (python3, node, gcc, g++, go,
//! rustc, javac) on the host, or a container runtime with the configured
//! images.
//! Run with: cargo test -p sandrun --features integration-tests
//!
//! Set `SANDRUN_TEST_BACKEND=container` to run them on the container backend.

#![cfg(feature = "integration-tests")]

use std::fs;

use sandrun::{Backend, BackendKind, Config, Engine, ExecutionRequest};

mod compilation;
mod execution;
mod resource_limits;
mod validation;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Helper to get fixture file content
pub(crate) fn fixture_source(name: &str) -> String {
    let path = format!("{FIXTURES_PATH}/sources/{name}");
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

/// Built-in configuration with process count limits removed.
///
/// RLIMIT_NPROC counts every process of the user running the tests, so the
/// built-in ceilings are too tight for a busy development machine.
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    config.default_limits.max_processes = None;
    for spec in config.languages.values_mut() {
        for limits in [&mut spec.run_limits, &mut spec.compile_limits]
            .into_iter()
            .flatten()
        {
            limits.max_processes = None;
        }
    }
    config.backend = match std::env::var("SANDRUN_TEST_BACKEND").as_deref() {
        Ok("container") => BackendKind::Container,
        _ => BackendKind::Subprocess,
    };
    config
}

pub(crate) async fn test_engine() -> Engine {
    let config = test_config();
    match config.backend {
        BackendKind::Subprocess => Engine::with_backend(&config, Backend::subprocess()),
        _ => Engine::new(config)
            .await
            .expect("container runtime should be reachable"),
    }
}

/// Request for a fixture file
pub(crate) fn fixture_request(name: &str, language: &str) -> ExecutionRequest {
    ExecutionRequest::new(fixture_source(name), language)
}
