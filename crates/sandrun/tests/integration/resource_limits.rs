use std::time::{Duration, Instant};

use sandrun::{ExecutionStatus, LimitExceeded, ResourceLimits};

use super::{fixture_request, test_engine};

#[tokio::test]
async fn test_javascript_infinite_loop_times_out() {
    let engine = test_engine().await;
    let request = fixture_request("infinite_loop.js", "javascript")
        .with_limits(ResourceLimits::unset().with_timeout(2.0));

    let started = Instant::now();
    let result = engine.execute(request).await;

    assert_eq!(result.status, ExecutionStatus::Timeout);
    assert_eq!(result.execution_time, 2.0);
    assert_eq!(result.limit_exceeded, LimitExceeded::WallTime);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_memory_ceiling() {
    let engine = test_engine().await;
    let request = fixture_request("memory_hog.py", "python")
        .with_limits(ResourceLimits::unset().with_memory_limit(128).with_timeout(10.0));

    let result = engine.execute(request).await;

    assert_eq!(result.status, ExecutionStatus::RuntimeError, "{result:?}");
    assert_eq!(result.limit_exceeded, LimitExceeded::Memory);
}

#[tokio::test]
async fn test_output_ceiling() {
    let engine = test_engine().await;
    let code = "for i in range(200000):\n    print('0123456789')\n";
    let request = sandrun::ExecutionRequest::new(code, "python")
        .with_limits(ResourceLimits::unset().with_max_output(16));

    let result = engine.execute(request).await;

    assert_eq!(result.stdout.len(), 16 * 1024);
    assert_eq!(result.limit_exceeded, LimitExceeded::Output);
}
