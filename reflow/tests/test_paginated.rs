use crate::common::{settle, Article};
use reflow::mock::MockFetch;
use reflow::{
    CacheSource, FetchError, KeyedCache, Outcome, Page, PageCursor, PaginatedOutcome,
    PaginatedReflow, ReflowOptions,
};
use std::time::Duration;

mod common;

fn items(state: &Outcome<PaginatedOutcome<u32>>) -> Vec<u32> {
    state
        .value_ref()
        .map(|page| page.items.clone())
        .unwrap_or_default()
}

#[tokio::test(start_paused = true)]
async fn test_pages_accumulate() {
    let mock = MockFetch::new()
        .then_ok(vec![1, 2])
        .then_ok(vec![3, 4])
        .then_ok(vec![5]);
    let feed = PaginatedReflow::new(
        PageCursor::offset(0, 2),
        ReflowOptions::new(),
        mock.page_fetcher(),
    );
    let _observer = feed.to_stream();
    settle().await;

    assert_eq!(
        feed.current_state(),
        Outcome::success(PaginatedOutcome::new(vec![1, 2], false, true))
    );

    feed.load_more();
    settle().await;
    assert_eq!(items(&feed.current_state()), vec![1, 2, 3, 4]);
    assert!(feed.has_more_pages());

    feed.load_more();
    settle().await;
    assert_eq!(
        feed.current_state(),
        Outcome::success(PaginatedOutcome::new(vec![1, 2, 3, 4, 5], false, false))
    );
    assert!(!feed.has_more_pages());
    assert_eq!(
        mock.cursors(),
        vec![
            PageCursor::offset(0, 2),
            PageCursor::offset(1, 2),
            PageCursor::offset(2, 2),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_full_pages_keep_going() {
    let mock = MockFetch::new().always(Ok(vec![0u32, 0]));
    let feed = PaginatedReflow::new(
        PageCursor::offset(0, 2),
        ReflowOptions::new(),
        mock.page_fetcher(),
    );
    let _observer = feed.to_stream();
    settle().await;

    for loaded in 1..=10 {
        assert_eq!(items(&feed.current_state()).len(), loaded * 2);
        assert!(feed.has_more_pages());
        feed.load_more();
        settle().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_load_more_after_last_page_is_noop() {
    let mock = MockFetch::new().then_ok(vec![1u32]);
    let feed = PaginatedReflow::new(
        PageCursor::offset(0, 2),
        ReflowOptions::new(),
        mock.page_fetcher(),
    );
    let _observer = feed.to_stream();
    settle().await;
    assert!(!feed.has_more_pages());

    feed.load_more();
    settle().await;

    assert_eq!(items(&feed.current_state()), vec![1]);
    assert_eq!(mock.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_page_size_ends_on_empty_page() {
    let mock = MockFetch::new().then_ok(vec![7u32]).then_ok(Vec::new());
    let feed = PaginatedReflow::new(
        PageCursor::offset(0, 0),
        ReflowOptions::new(),
        mock.page_fetcher(),
    );
    let _observer = feed.to_stream();
    settle().await;
    assert!(feed.has_more_pages());

    feed.load_more();
    settle().await;
    assert!(!feed.has_more_pages());

    feed.load_more();
    settle().await;
    assert_eq!(items(&feed.current_state()), vec![7]);
    assert_eq!(mock.calls(), 2);
    assert_eq!(
        mock.cursors(),
        vec![PageCursor::offset(0, 1), PageCursor::offset(1, 1)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_load_more_requests_collapse() {
    let mock = MockFetch::new()
        .with_delay(Duration::from_millis(100))
        .always(Ok(vec![7u32, 7]));
    let feed = PaginatedReflow::new(
        PageCursor::offset(0, 2),
        ReflowOptions::new(),
        mock.page_fetcher(),
    );
    let _observer = feed.to_stream();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(mock.calls(), 1);

    feed.load_more();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(feed.is_loading_more());
    assert_eq!(
        feed.current_state(),
        Outcome::success(PaginatedOutcome::new(vec![7, 7], true, true))
    );

    // Both land while the second page loads and leave one request behind.
    feed.load_more();
    feed.load_more();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(mock.calls(), 3);
    assert_eq!(items(&feed.current_state()).len(), 6);
    assert!(!feed.is_loading_more());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_starts_over() {
    let mock = MockFetch::new()
        .then_ok(vec![1, 2])
        .then_ok(vec![3, 4])
        .then_ok(vec![10, 20]);
    let feed = PaginatedReflow::new(
        PageCursor::offset(0, 2),
        ReflowOptions::new(),
        mock.page_fetcher(),
    );
    let _observer = feed.to_stream();
    settle().await;
    feed.load_more();
    settle().await;
    assert_eq!(items(&feed.current_state()), vec![1, 2, 3, 4]);

    feed.refresh();
    settle().await;

    assert_eq!(items(&feed.current_state()), vec![10, 20]);
    assert_eq!(mock.cursors().last(), Some(&PageCursor::offset(0, 2)));
}

#[tokio::test(start_paused = true)]
async fn test_failed_page_keeps_items() {
    let mock = MockFetch::new()
        .then_ok(vec![1, 2])
        .then_err(FetchError::error("server error"))
        .then_ok(vec![3, 4]);
    let feed = PaginatedReflow::new(
        PageCursor::offset(0, 2),
        ReflowOptions::new(),
        mock.page_fetcher(),
    );
    let _observer = feed.to_stream();
    settle().await;

    feed.load_more();
    settle().await;
    assert_eq!(
        feed.current_state(),
        Outcome::failure(FetchError::error("server error"))
    );
    assert!(feed.has_more_pages());

    feed.load_more();
    settle().await;

    assert_eq!(items(&feed.current_state()), vec![1, 2, 3, 4]);
    assert_eq!(
        mock.cursors(),
        vec![
            PageCursor::offset(0, 2),
            PageCursor::offset(1, 2),
            PageCursor::offset(1, 2),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_first_page_retried_by_load_more() {
    let mock = MockFetch::new()
        .then_err(FetchError::error("down"))
        .then_ok(vec![1u32, 2]);
    let feed = PaginatedReflow::new(
        PageCursor::offset(0, 2),
        ReflowOptions::new(),
        mock.page_fetcher(),
    );
    let _observer = feed.to_stream();
    settle().await;
    assert!(feed.current_state().is_failure());

    feed.load_more();
    settle().await;

    assert_eq!(items(&feed.current_state()), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_cursor_tokens_follow_pages() {
    let feed = PaginatedReflow::new(
        PageCursor::cursor("start", 2),
        ReflowOptions::new(),
        |cursor: PageCursor| async move {
            let PageCursor::Cursor { token, .. } = cursor else {
                return Err(FetchError::error("expected a token"));
            };
            let page = match token.as_str() {
                "start" => Page::with_next(
                    vec![Article::new(1, "a"), Article::new(2, "b")],
                    PageCursor::cursor("after-2", 2),
                ),
                "after-2" => Page::new(vec![Article::new(3, "c")]),
                other => return Err(FetchError::error(format!("unknown token {other}"))),
            };
            Ok::<_, FetchError>(page)
        },
    );
    let _observer = feed.to_stream();
    settle().await;
    feed.load_more();
    settle().await;

    let state = feed.current_state();
    let page = state.value_ref().expect("loaded");
    assert_eq!(page.len(), 3);
    assert_eq!(page.items[2], Article::new(3, "c"));
    assert!(!page.has_more_pages);
}

#[tokio::test(start_paused = true)]
async fn test_cache_seeds_first_page() {
    let cache = KeyedCache::new(8);
    cache.put("feed", vec![9u32, 9]);
    let mock = MockFetch::new()
        .with_delay(Duration::from_millis(100))
        .then_ok(vec![1u32, 2]);
    let feed = PaginatedReflow::new(
        PageCursor::offset(0, 2),
        ReflowOptions::new().with_cache_source(CacheSource::memory(cache.clone(), "feed")),
        mock.page_fetcher(),
    );
    let _observer = feed.to_stream();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(items(&feed.current_state()), vec![9, 9]);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(items(&feed.current_state()), vec![1, 2]);
    assert_eq!(cache.get::<Vec<u32>>("feed"), Some(vec![1, 2]));
}
