use crate::common::Article;
use futures::StreamExt;
use reflow::{FetchError, KeyedCache, Outcome, RetryPolicy, RexecuteOptions, RexecuteQueue};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod common;

fn queue() -> RexecuteQueue {
    RexecuteQueue::new(
        KeyedCache::new(32),
        RetryPolicy::new(3, Duration::from_millis(1000)),
    )
}

/// Fails with a transient error `failures` times, then answers `value`.
fn flaky(
    failures: u32,
    value: &'static str,
    calls: Arc<AtomicU32>,
) -> impl Fn() -> futures::future::Ready<Result<String, FetchError>> + Send + Sync + 'static {
    move || {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(if call < failures {
            Err(FetchError::io("socket closed"))
        } else {
            Ok(value.to_string())
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_immediate_success_publishes() {
    let queue = queue();
    let calls = Arc::new(AtomicU32::new(0));

    let outcome = queue
        .submit("profile", RexecuteOptions::new(), flaky(0, "saved", calls.clone()))
        .await;

    assert_eq!(outcome, Outcome::success("saved".to_string()));
    assert_eq!(queue.cache().get::<String>("profile"), Some("saved".to_string()));
    assert_eq!(queue.pending_len(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_terminal_failure_skips_queue() {
    let queue = queue();
    let failures = Arc::new(Mutex::new(Vec::new()));
    let seen = failures.clone();
    let options = RexecuteOptions::new()
        .with_on_terminal_failure(move |error| seen.lock().unwrap().push(error.clone()));

    let outcome: Outcome<String> = queue
        .submit("profile", options, || async {
            Err::<String, _>(FetchError::error("validation failed"))
        })
        .await;

    assert_eq!(outcome, Outcome::failure(FetchError::error("validation failed")));
    assert_eq!(
        *failures.lock().unwrap(),
        vec![FetchError::error("validation failed")]
    );
    assert_eq!(queue.pending_len(), 0);
    assert!(!queue.cache().contains_key("profile"));
}

#[tokio::test(start_paused = true)]
async fn test_retryable_failure_runs_in_background() {
    let queue = queue();
    let calls = Arc::new(AtomicU32::new(0));

    let submitted = tokio::spawn({
        let queue = queue.clone();
        let calls = calls.clone();
        async move {
            queue
                .submit("draft", RexecuteOptions::new(), flaky(2, "synced", calls))
                .await
        }
    });

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(queue.pending_keys(), vec!["draft".to_string()]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let outcome = submitted.await.unwrap();

    assert_eq!(outcome, Outcome::success("synced".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(queue.cache().get::<String>("draft"), Some("synced".to_string()));
    assert_eq!(queue.pending_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_calls_back_once() {
    let queue = queue();
    let calls = Arc::new(AtomicU32::new(0));
    let terminal = Arc::new(AtomicU32::new(0));
    let counted = terminal.clone();
    let options = RexecuteOptions::new()
        .with_retry(RetryPolicy::new(2, Duration::from_millis(100)))
        .with_on_terminal_failure(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });

    let outcome = queue
        .submit("upload", options, flaky(u32::MAX, "never", calls.clone()))
        .await;

    assert_eq!(outcome, Outcome::failure(FetchError::io("socket closed")));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(terminal.load(Ordering::SeqCst), 1);
    assert_eq!(queue.pending_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_new_submission_replaces_pending_job() {
    let queue = queue();
    let first_calls = Arc::new(AtomicU32::new(0));
    let second_calls = Arc::new(AtomicU32::new(0));

    let first = tokio::spawn({
        let queue = queue.clone();
        let calls = first_calls.clone();
        async move {
            queue
                .submit("title", RexecuteOptions::new(), flaky(u32::MAX, "old", calls))
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(queue.pending_len(), 1);

    let second = queue
        .submit("title", RexecuteOptions::new(), flaky(0, "new", second_calls.clone()))
        .await;
    tokio::time::sleep(Duration::from_millis(5000)).await;

    assert_eq!(second, Outcome::success("new".to_string()));
    assert_eq!(first.await.unwrap(), Outcome::success("new".to_string()));
    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    assert_eq!(queue.cache().get::<String>("title"), Some("new".to_string()));
    assert_eq!(queue.pending_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stale_in_flight_completion_is_discarded() {
    let queue = queue();
    let stale_calls = Arc::new(AtomicU32::new(0));
    let calls = stale_calls.clone();
    // First call fails fast; retries take 500 ms and then succeed.
    let slow_retry = move || {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if call == 0 {
                return Err(FetchError::io("offline"));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, FetchError>(Article::new(1, "stale"))
        }
    };

    tokio::spawn({
        let queue = queue.clone();
        async move { queue.submit("article", RexecuteOptions::new(), slow_retry).await }
    });

    // The background attempt starts at 1000 ms and finishes at 1500 ms.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(stale_calls.load(Ordering::SeqCst), 2);

    let fresh = queue
        .submit("article", RexecuteOptions::new(), || async {
            Ok::<_, FetchError>(Article::new(1, "fresh"))
        })
        .await;
    tokio::time::sleep(Duration::from_millis(1000)).await;

    assert_eq!(fresh, Outcome::success(Article::new(1, "fresh")));
    assert_eq!(
        queue.cache().get::<Article>("article"),
        Some(Article::new(1, "fresh"))
    );
    assert_eq!(stale_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_submission_settles_waiting_caller() {
    let queue = queue();
    let calls = Arc::new(AtomicU32::new(0));

    let waiting = tokio::spawn({
        let queue = queue.clone();
        async move {
            queue
                .submit("order", RexecuteOptions::new(), flaky(u32::MAX, "never", calls))
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let rejected: Outcome<String> = queue
        .submit("order", RexecuteOptions::new(), || async {
            Err::<String, _>(FetchError::error("out of stock"))
        })
        .await;

    assert_eq!(rejected, Outcome::failure(FetchError::error("out of stock")));
    assert_eq!(
        waiting.await.unwrap(),
        Outcome::failure(FetchError::error("out of stock"))
    );
    assert_eq!(queue.pending_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_every_caller_settles_when_many_jobs_fail_together() {
    let queue = RexecuteQueue::new(
        KeyedCache::new(8),
        RetryPolicy::new(1, Duration::from_millis(10)),
    );
    let calls = Arc::new(AtomicU32::new(0));

    let waiting: Vec<_> = (0..200)
        .map(|id| {
            let queue = queue.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                queue
                    .submit(
                        format!("upload:{id}"),
                        RexecuteOptions::new(),
                        flaky(u32::MAX, "never", calls),
                    )
                    .await
            })
        })
        .collect();

    for outcome in futures::future::join_all(waiting).await {
        assert_eq!(
            outcome.unwrap(),
            Outcome::failure(FetchError::io("socket closed"))
        );
    }
    assert_eq!(queue.pending_len(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 400);
}

#[tokio::test(start_paused = true)]
async fn test_rexecute_stream_starts_loading() {
    let queue = queue();
    let calls = Arc::new(AtomicU32::new(0));

    let states: Vec<Outcome<String>> = queue
        .rexecute("note", RexecuteOptions::new(), flaky(1, "stored", calls))
        .collect()
        .await;

    assert_eq!(
        states,
        vec![Outcome::Loading, Outcome::success("stored".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_waiters() {
    let queue = queue();
    let calls = Arc::new(AtomicU32::new(0));

    let waiting = tokio::spawn({
        let queue = queue.clone();
        let calls = calls.clone();
        async move {
            queue
                .submit("sync", RexecuteOptions::new(), flaky(u32::MAX, "never", calls))
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    queue.shutdown();

    assert!(queue.is_shutdown());
    assert_eq!(waiting.await.unwrap(), Outcome::failure(FetchError::Cancelled));
    assert_eq!(queue.pending_len(), 0);

    let late = queue
        .submit("sync", RexecuteOptions::new(), flaky(0, "late", calls.clone()))
        .await;
    assert_eq!(late, Outcome::failure(FetchError::Cancelled));

    tokio::time::sleep(Duration::from_millis(5000)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
