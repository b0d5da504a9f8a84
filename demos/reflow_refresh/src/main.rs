use crate::tracing_setup::tracing_init;
use futures_signals::signal::SignalExt;
use reflow::{CacheSource, FetchError, KeyedCache, Outcome, Reflow, ReflowOptions};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

mod tracing_setup;

#[derive(Debug, Clone, PartialEq)]
struct Forecast {
    city: String,
    celsius: i32,
    revision: u32,
}

/// Drops the connection on every third request.
async fn fetch_forecast(requests: Arc<AtomicU32>) -> Result<Forecast, FetchError> {
    let request = requests.fetch_add(1, Ordering::SeqCst);
    sleep(Duration::from_millis(300)).await;
    if request % 3 == 1 {
        debug!("Server | dropping request {}", request);
        return Err(FetchError::io("connection reset by peer"));
    }
    Ok(Forecast {
        city: "Lisbon".to_string(),
        celsius: 18 + request as i32,
        revision: request,
    })
}

#[tokio::main]
async fn main() {
    tracing_init();

    info!("==========================================");
    warn!("A. Loading, then the first forecast");

    let cache = KeyedCache::default();
    let requests = Arc::new(AtomicU32::new(0));
    let fetch_requests = requests.clone();
    let forecast = Reflow::new(
        ReflowOptions::new()
            .with_cache_source(CacheSource::memory(cache.clone(), "forecast:lisbon"))
            .with_retry_delay(Duration::from_millis(500)),
        move || fetch_forecast(fetch_requests.clone()),
    );

    forecast
        .to_signal()
        .stop_if(|state| state.is_complete())
        .for_each(|state| async move {
            info!("  Main | state: {:?}", state);
        })
        .await;

    sleep(Duration::from_millis(100)).await;

    info!("==========================================");
    warn!("B. Refresh hits a dropped request and retries");

    let observer = forecast.to_signal().for_each(|state| async move {
        info!("  Main | state: {:?}", state);
    });
    let observing = tokio::spawn(observer);
    sleep(Duration::from_millis(50)).await;

    forecast.refresh();
    sleep(Duration::from_millis(1500)).await;
    info!(
        "  Main | {} requests sent, cached: {:?}",
        requests.load(Ordering::SeqCst),
        cache.get::<Forecast>("forecast:lisbon")
    );

    info!("==========================================");
    warn!("C. A write to the cache reaches the subscriber");

    cache.put(
        "forecast:lisbon",
        Forecast {
            city: "Lisbon".to_string(),
            celsius: 30,
            revision: 99,
        },
    );
    sleep(Duration::from_millis(100)).await;
    if let Outcome::Success { value } = forecast.current_state() {
        info!("  Main | current revision {}", value.revision);
    }

    observing.abort();
    sleep(Duration::from_millis(50)).await;
    info!("  Main | active after last observer left: {}", forecast.is_active());

    info!("==========================================");
    info!("  Main | Finish");
}
