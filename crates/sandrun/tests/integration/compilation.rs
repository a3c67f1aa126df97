use sandrun::{ExecutionRequest, ExecutionStatus, ResourceLimits};

use super::{fixture_request, fixture_source, test_engine};

#[tokio::test]
async fn test_cpp_syntax_error() {
    let engine = test_engine().await;
    let result = engine
        .execute(fixture_request("syntax_error.cpp", "cpp"))
        .await;

    assert_eq!(result.status, ExecutionStatus::CompilationError);
    assert!(result.stderr.contains("error"), "{}", result.stderr);
    assert!(result.stdout.is_empty());
}

#[tokio::test]
async fn test_java_public_class_naming() {
    let engine = test_engine().await;
    let request = fixture_request("Solution.java", "java").with_stdin("19 23\n");
    let result = engine.execute(request).await;

    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.stdout, "42\n");
}

#[tokio::test]
async fn test_java_without_public_class() {
    let engine = test_engine().await;
    let code = fixture_source("Solution.java").replace("public class", "class");
    let result = engine.execute(ExecutionRequest::new(code, "java")).await;

    assert_eq!(result.status, ExecutionStatus::CompilationError);
    assert!(result.stderr.contains("no public class"));
}

#[tokio::test]
async fn test_rust_hello_world() {
    let engine = test_engine().await;
    let result = engine.execute(fixture_request("hello.rs", "rust")).await;

    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.stdout, "Hello from rust!\n");
}

#[tokio::test]
async fn test_go_hello_world() {
    let engine = test_engine().await;
    let result = engine.execute(fixture_request("hello.go", "go")).await;

    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.stdout, "Hello from go!\n");
}

#[tokio::test]
async fn test_small_output_cap_does_not_limit_the_linker() {
    let engine = test_engine().await;
    let request =
        fixture_request("hello.c", "c").with_limits(ResourceLimits::unset().with_max_output(1));
    let result = engine.execute(request).await;

    assert!(result.is_success(), "{result:?}");
}
