use crate::{FetchError, RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[test]
fn test_default_policy() {
    let policy = RetryPolicy::default();

    assert_eq!(policy.max_retries(), DEFAULT_MAX_RETRIES);
    assert_eq!(policy.base_delay(), DEFAULT_RETRY_DELAY);
    assert!(policy.is_retryable(&FetchError::io("reset")));
    assert!(!policy.is_retryable(&FetchError::error("bad input")));
}

#[test]
fn test_should_retry_counts_attempts() {
    let policy = RetryPolicy::new(2, Duration::from_millis(10));
    let error = FetchError::Timeout;

    assert!(policy.should_retry(0, &error));
    assert!(policy.should_retry(1, &error));
    assert!(!policy.should_retry(2, &error));
}

#[test]
fn test_zero_retries_is_terminal() {
    let policy = RetryPolicy::none();

    assert!(!policy.should_retry(0, &FetchError::io("reset")));
}

#[test]
fn test_custom_predicate() {
    let policy = RetryPolicy::default().with_predicate(|error| error.is_none());

    assert!(policy.should_retry(0, &FetchError::None));
    assert!(!policy.should_retry(0, &FetchError::io("reset")));
}

#[test]
fn test_exponential_delay() {
    let policy = RetryPolicy::new(5, Duration::from_millis(100)).exponential();

    assert_eq!(policy.delay_for(0), Duration::from_millis(100));
    assert_eq!(policy.delay_for(1), Duration::from_millis(200));
    assert_eq!(policy.delay_for(3), Duration::from_millis(800));
}

#[tokio::test(start_paused = true)]
async fn test_run_gives_up_after_max_retries() {
    let policy = RetryPolicy::new(3, Duration::from_millis(2000));
    let calls = Arc::new(AtomicU32::new(0));
    let started = Instant::now();

    let result: Result<(), FetchError> = policy
        .run(|_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::io("unreachable")) }
        })
        .await;

    assert_eq!(result, Err(FetchError::io("unreachable")));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(6000));
    assert!(elapsed < Duration::from_millis(6100));
}

#[tokio::test(start_paused = true)]
async fn test_run_recovers() {
    let policy = RetryPolicy::new(3, Duration::from_millis(100));

    let result = policy
        .run(|attempt| async move {
            if attempt < 2 {
                Err(FetchError::Timeout)
            } else {
                Ok(attempt)
            }
        })
        .await;

    assert_eq!(result, Ok(2));
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_on_terminal_error() {
    let policy = RetryPolicy::default();
    let calls = AtomicU32::new(0);

    let result: Result<(), FetchError> = policy
        .run(|_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::error("forbidden")) }
        })
        .await;

    assert!(result.unwrap_err().is_error());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
