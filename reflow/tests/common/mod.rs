#![allow(dead_code)]

use futures::{Stream, StreamExt};
use reflow::{Outcome, ReflowStreamExt};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub struct Article {
    pub id: u32,
    pub title: String,
}

impl Article {
    pub fn new(id: u32, title: &str) -> Self {
        Article {
            id,
            title: title.to_string(),
        }
    }
}

/// Lets spawned engine tasks run until they block on a timer.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub async fn next_state<S, T>(stream: &mut S) -> Outcome<T>
where
    S: Stream<Item = Outcome<T>> + Unpin,
{
    stream.next().await.expect("state stream ended")
}

/// Every state up to and including the first complete one.
pub async fn collect_until_complete<S, T>(stream: S) -> Vec<Outcome<T>>
where
    S: Stream<Item = Outcome<T>>,
{
    stream.stop_if(|state| state.is_complete()).collect().await
}
