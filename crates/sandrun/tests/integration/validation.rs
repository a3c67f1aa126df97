use sandrun::{ExecutionRequest, ExecutionStatus};

use super::{fixture_request, test_engine};

#[tokio::test]
async fn test_forbidden_import_is_rejected() {
    let engine = test_engine().await;
    let result = engine.execute(fixture_request("forbidden.py", "python")).await;

    assert_eq!(result.status, ExecutionStatus::ValidationError);
    assert!(result.stdout.is_empty());
    assert_eq!(result.exit_code, None);

    // Import violations come first, then deny patterns
    let constructs: Vec<_> = result
        .violations
        .iter()
        .map(|v| (v.construct.as_str(), v.line))
        .collect();
    assert_eq!(constructs, vec![("os", 1), ("os.system", 4)]);
}

#[tokio::test]
async fn test_inline_os_system_is_rejected() {
    let engine = test_engine().await;
    let result = engine
        .execute(ExecutionRequest::new("import os; os.system('ls')", "python"))
        .await;

    assert_eq!(result.status, ExecutionStatus::ValidationError);
    assert!(!result.violations.is_empty());
}

#[tokio::test]
async fn test_validate_without_running() {
    let engine = test_engine().await;

    let clean = engine
        .validate("#include <vector>\nint main() {}\n", "cpp")
        .unwrap();
    assert!(clean.valid);

    let rejected = engine
        .validate("#include <fstream>\nint main() { system(\"ls\"); }\n", "cpp")
        .unwrap();
    assert!(!rejected.valid);
    // The header, plus the `fstream` and `system(` patterns
    assert_eq!(rejected.violations.len(), 3);
    assert_eq!(rejected.violations[0].construct, "fstream");
}

#[tokio::test]
async fn test_javascript_process_global_is_rejected() {
    let engine = test_engine().await;
    let result = engine
        .execute(ExecutionRequest::new("process.exit(0)", "javascript"))
        .await;

    assert_eq!(result.status, ExecutionStatus::ValidationError);
    assert_eq!(result.violations[0].construct, "process");
}

#[tokio::test]
async fn test_compound_statement_import_is_rejected() {
    let engine = test_engine().await;
    let code = "if True: import os\nprint(os.popen('echo pwned').read().strip())\n";
    let result = engine.execute(ExecutionRequest::new(code, "python")).await;

    assert_eq!(result.status, ExecutionStatus::ValidationError);
    assert_eq!(result.violations[0].construct, "os");
    assert!(result.stdout.is_empty());
}

#[tokio::test]
async fn test_spaced_call_is_rejected() {
    let engine = test_engine().await;
    let result = engine
        .execute(ExecutionRequest::new("print(eval ('1+1'))", "python"))
        .await;
    assert_eq!(result.status, ExecutionStatus::ValidationError);
    assert_eq!(result.violations[0].construct, "eval(");

    let code = "#include <stdlib.h>\nint main(){ return system (\"echo pwned-c\"); }\n";
    let result = engine.execute(ExecutionRequest::new(code, "c")).await;
    assert_eq!(result.status, ExecutionStatus::ValidationError);
    assert_eq!(result.violations[0].construct, "system(");
    assert!(result.stdout.is_empty());
}
