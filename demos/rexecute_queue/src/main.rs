use crate::tracing_setup::tracing_init;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use reflow::{
    CacheSource, FetchError, KeyedCache, Reflow, ReflowOptions, RetryPolicy,
    RexecuteOptions, RexecuteQueue,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

mod tracing_setup;

#[derive(Debug, Clone, PartialEq)]
struct Profile {
    name: String,
    bio: String,
}

/// Succeeds once the backend has come back from `outage` failed calls.
fn save_profile(
    profile: Profile,
    outage: u32,
) -> impl Fn() -> BoxFuture<'static, Result<Profile, FetchError>> + Send + Sync + 'static {
    let calls = Arc::new(AtomicU32::new(0));
    move || {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        let profile = profile.clone();
        async move {
            sleep(Duration::from_millis(100)).await;
            if call < outage {
                Err(FetchError::io("backend unavailable"))
            } else {
                Ok(profile)
            }
        }
        .boxed()
    }
}

#[tokio::main]
async fn main() {
    tracing_init();

    let cache = KeyedCache::default();
    let queue = RexecuteQueue::new(
        cache.clone(),
        RetryPolicy::new(3, Duration::from_millis(400)),
    );

    // A screen showing the profile reads it from the same cache.
    let profile_view = Reflow::new(
        ReflowOptions::new()
            .with_cache_source(CacheSource::memory(cache.clone(), "profile:ada"))
            .with_max_retries(0),
        || async {
            sleep(Duration::from_millis(50)).await;
            Ok::<_, FetchError>(Profile {
                name: "ada".to_string(),
                bio: String::new(),
            })
        },
    );
    let view = tokio::spawn(profile_view.to_stream().for_each(|state| async move {
        info!("  View | {:?}", state);
    }));

    info!("==========================================");
    warn!("A. Save succeeds after the backend recovers");

    let saved = queue
        .rexecute(
            "profile:ada",
            RexecuteOptions::new(),
            save_profile(
                Profile {
                    name: "ada".to_string(),
                    bio: "mathematician".to_string(),
                },
                2,
            ),
        )
        .for_each(|state| async move {
            info!("  Main | save: {:?}", state);
        });
    saved.await;

    info!("==========================================");
    warn!("B. A newer edit replaces the pending one");

    let older = tokio::spawn({
        let queue = queue.clone();
        async move {
            queue
                .submit(
                    "profile:ada",
                    RexecuteOptions::new(),
                    save_profile(
                        Profile {
                            name: "ada".to_string(),
                            bio: "draft".to_string(),
                        },
                        10,
                    ),
                )
                .await
        }
    });
    sleep(Duration::from_millis(200)).await;
    info!("  Main | pending: {:?}", queue.pending_keys());

    let newer = queue
        .submit(
            "profile:ada",
            RexecuteOptions::new(),
            save_profile(
                Profile {
                    name: "ada".to_string(),
                    bio: "first programmer".to_string(),
                },
                0,
            ),
        )
        .await;
    info!("  Main | newer edit: {:?}", newer);
    match older.await {
        Ok(outcome) => info!("  Main | older edit settled as: {:?}", outcome),
        Err(join_error) => error!("  Main | older edit panicked: {}", join_error),
    }

    info!("==========================================");
    warn!("C. Retries run out");

    let failed = queue
        .submit(
            "profile:bob",
            RexecuteOptions::new()
                .with_retry(RetryPolicy::new(1, Duration::from_millis(200)))
                .with_on_terminal_failure(|error| {
                    error!("  Main | giving up on bob: {}", error);
                }),
            save_profile(
                Profile {
                    name: "bob".to_string(),
                    bio: "builder".to_string(),
                },
                5,
            ),
        )
        .await;
    info!("  Main | bob: {:?}", failed);

    queue.shutdown();
    view.abort();
    sleep(Duration::from_millis(50)).await;

    info!("==========================================");
    info!("  Main | Finish");
}
