use crate::ObserverGuard;
use futures_core::stream::Stream;
use futures_signals::signal::Signal;
use pin_project::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Extension trait that provides additional utility methods for Stream types.
pub trait ReflowStreamExt: Stream {
    /// Creates a stream that ends right after the first item the predicate
    /// accepts. That item is still yielded.
    ///
    /// ## Examples
    ///
    /// ```no_run
    /// use futures::StreamExt;
    /// use reflow::{Outcome, Reflow, ReflowOptions, ReflowStreamExt};
    ///
    /// async fn example() {
    ///     let reflow = Reflow::new(ReflowOptions::new(), || async { Ok::<_, reflow::FetchError>(7) });
    ///     let states: Vec<Outcome<i32>> = reflow
    ///         .to_stream()
    ///         .stop_if(|state| state.is_complete())
    ///         .collect()
    ///         .await;
    ///     assert_eq!(states.last(), Some(&Outcome::success(7)));
    /// }
    /// ```
    fn stop_if<F>(self, test: F) -> StopIf<Self, F>
    where
        F: FnMut(&Self::Item) -> bool,
        Self: Sized,
    {
        StopIf {
            stream: self,
            stopped: false,
            test,
        }
    }
}
impl<T: ?Sized> ReflowStreamExt for T where T: Stream {}

/// A stream that stops producing items once a predicate returns true.
#[pin_project(project = StopIfProj)]
#[derive(Debug)]
#[must_use = "Streams do nothing unless polled"]
pub struct StopIf<A, B> {
    #[pin]
    stream: A,
    stopped: bool,
    test: B,
}

impl<A, B> Stream for StopIf<A, B>
where
    A: Stream,
    B: FnMut(&A::Item) -> bool,
{
    type Item = A::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let StopIfProj {
            stream,
            stopped,
            test,
        } = self.project();

        if *stopped {
            return Poll::Ready(None);
        }
        match stream.poll_next(cx) {
            Poll::Ready(Some(value)) => {
                if test(&value) {
                    *stopped = true;
                }
                Poll::Ready(Some(value))
            }
            Poll::Ready(None) => {
                *stopped = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A stream or signal over a subscription's state that keeps the
/// subscription running until dropped.
#[pin_project]
#[must_use = "Streams do nothing unless polled"]
pub struct Observed<S> {
    #[pin]
    inner: S,
    _guard: ObserverGuard,
}

impl<S> Observed<S> {
    pub(crate) fn new(inner: S, guard: ObserverGuard) -> Self {
        Observed {
            inner,
            _guard: guard,
        }
    }
}

impl<S: Stream> Stream for Observed<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<S: Signal> Signal for Observed<S> {
    type Item = S::Item;

    fn poll_change(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_change(cx)
    }
}
