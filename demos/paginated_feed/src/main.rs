use crate::tracing_setup::tracing_init;
use futures::StreamExt;
use reflow::{
    FetchError, Outcome, PageCursor, PaginatedOutcome, PaginatedReflow, ReflowOptions,
    ReflowStreamExt,
};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

mod tracing_setup;

const PAGE_SIZE: usize = 4;
const TOTAL_POSTS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
struct Post {
    id: usize,
    title: String,
}

async fn fetch_posts(cursor: PageCursor) -> Result<Vec<Post>, FetchError> {
    let PageCursor::Offset { index, page_size } = cursor else {
        return Err(FetchError::error("offset cursors only"));
    };
    sleep(Duration::from_millis(200)).await;
    let start = (index * page_size).min(TOTAL_POSTS);
    let end = (start + page_size).min(TOTAL_POSTS);
    debug!("Server | serving posts {}..{}", start, end);
    Ok((start..end)
        .map(|id| Post {
            id,
            title: format!("post #{id}"),
        })
        .collect())
}

fn summary(state: &Outcome<PaginatedOutcome<Post>>) -> String {
    match state {
        Outcome::Loading => "loading".to_string(),
        Outcome::Success { value } => format!(
            "{} posts, loading more: {}, more pages: {}",
            value.len(),
            value.is_loading_more,
            value.has_more_pages
        ),
        Outcome::Failure { error } => format!("failed: {error}"),
    }
}

#[tokio::main]
async fn main() {
    tracing_init();

    let feed = PaginatedReflow::new(
        PageCursor::offset(0, PAGE_SIZE),
        ReflowOptions::new(),
        fetch_posts,
    );

    info!("==========================================");
    warn!("A. First page");

    let mut states = feed.to_stream();
    while let Some(state) = states.next().await {
        info!("  Main | {}", summary(&state));
        if state.is_complete() {
            break;
        }
    }

    info!("==========================================");
    warn!("B. Load more until the feed runs dry");

    while feed.has_more_pages() {
        feed.load_more();
        while let Some(state) = states.next().await {
            info!("  Main | {}", summary(&state));
            if !feed.is_loading_more() && !state.is_loading() {
                break;
            }
        }
    }
    feed.load_more();
    sleep(Duration::from_millis(300)).await;
    info!("  Main | after a no-op load more: {}", summary(&feed.current_state()));

    info!("==========================================");
    warn!("C. Refresh starts over from the first page");

    feed.refresh();
    let first_page = feed
        .to_stream()
        .skip_while(|state| {
            let refreshed = matches!(state, Outcome::Success { value } if value.len() == PAGE_SIZE);
            futures::future::ready(!refreshed)
        })
        .stop_if(|_| true)
        .collect::<Vec<_>>()
        .await;
    if let Some(Outcome::Success { value }) = first_page.last() {
        let titles: Vec<&str> = value.items.iter().map(|post| post.title.as_str()).collect();
        info!("  Main | {:?}", titles);
    }

    drop(states);
    info!("==========================================");
    info!("  Main | Finish");
}
