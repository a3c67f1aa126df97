use sandrun::{ExecutionRequest, ExecutionStatus, LimitExceeded};

use super::{fixture_request, test_engine};

#[tokio::test]
async fn test_python_hello_world() {
    let engine = test_engine().await;
    let result = engine.execute(fixture_request("hello.py", "python")).await;

    assert_eq!(result.status, ExecutionStatus::Success, "{result:?}");
    assert_eq!(result.stdout, "Hello, World!\n2\n");
    assert_eq!(result.exit_code, Some(0));
    assert!(result.stderr.is_empty());
    assert_eq!(result.limit_exceeded, LimitExceeded::NotExceeded);
}

#[tokio::test]
async fn test_python_inline_expression() {
    let engine = test_engine().await;
    let result = engine
        .execute(ExecutionRequest::new("print(1+1)", "Python"))
        .await;

    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.stdout, "2\n");
    assert!(result.execution_time > 0.0);
}

#[tokio::test]
async fn test_python_alias_and_stdin() {
    let engine = test_engine().await;
    let request = fixture_request("echo.py", "py").with_stdin("first\nsecond\n");
    let result = engine.execute(request).await;

    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.stdout, "FIRST\nSECOND\n");
}

#[tokio::test]
async fn test_python_runtime_error() {
    let engine = test_engine().await;
    let result = engine
        .execute(fixture_request("runtime_error.py", "python"))
        .await;

    assert_eq!(result.status, ExecutionStatus::RuntimeError);
    assert_eq!(result.exit_code, Some(1));
    assert!(result.stderr.contains("IndexError"));
}

#[tokio::test]
async fn test_javascript_hello() {
    let engine = test_engine().await;
    let result = engine.execute(fixture_request("hello.js", "js")).await;

    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.stdout, "hello 2,4,6\n");
}

#[tokio::test]
async fn test_c_hello() {
    let engine = test_engine().await;
    let result = engine.execute(fixture_request("hello.c", "c")).await;

    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.stdout, "Hello from C\n");
}

#[tokio::test]
async fn test_cpp_with_stdin() {
    let engine = test_engine().await;
    let request = fixture_request("hello.cpp", "c++").with_stdin("sandrun\n");
    let result = engine.execute(request).await;

    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.stdout, "Hello, sandrun!\n");
}

#[tokio::test]
async fn test_unsupported_language() {
    let engine = test_engine().await;
    let result = engine
        .execute(ExecutionRequest::new("DISPLAY 'HI'.", "cobol"))
        .await;

    assert_eq!(result.status, ExecutionStatus::Error);
    assert!(result.stderr.contains("cobol"));
}

#[tokio::test]
async fn test_concurrent_executions() {
    let engine = test_engine().await;
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .execute(ExecutionRequest::new(format!("print({i} * 10)"), "python"))
                    .await
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap();
        assert!(result.is_success(), "{result:?}");
        assert_eq!(result.stdout, format!("{}\n", i * 10));
    }
}
