use futures::FutureExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Starts the engine of a subscription. The flag is true when the engine
/// ran before and is being restarted for a returning observer.
pub(crate) type Launcher = Box<dyn Fn(CancellationToken, bool) + Send + Sync>;

struct LifecycleState {
    observers: usize,
    running: Option<CancellationToken>,
    launches: u64,
}

/// Lazy-start, stop-when-unobserved bookkeeping shared by every
/// subscription type.
pub(crate) struct Lifecycle {
    scope: CancellationToken,
    launcher: Launcher,
    state: Mutex<LifecycleState>,
}

impl Lifecycle {
    pub(crate) fn new(scope: CancellationToken, launcher: Launcher) -> Arc<Self> {
        Arc::new(Lifecycle {
            scope,
            launcher,
            state: Mutex::new(LifecycleState {
                observers: 0,
                running: None,
                launches: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers an observer, launching the engine if it is idle.
    pub(crate) fn attach(self: &Arc<Self>) -> ObserverGuard {
        let mut state = self.lock();
        state.observers += 1;
        if state.running.is_none() && !self.scope.is_cancelled() {
            let token = self.scope.child_token();
            let restart = state.launches > 0;
            state.launches += 1;
            state.running = Some(token.clone());
            debug!(restart, "subscription engine launched");
            (self.launcher)(token, restart);
        }
        ObserverGuard {
            lifecycle: self.clone(),
        }
    }

    fn detach(&self) {
        let mut state = self.lock();
        state.observers = state.observers.saturating_sub(1);
        if state.observers == 0 {
            if let Some(token) = state.running.take() {
                debug!("last observer detached, stopping subscription engine");
                token.cancel();
            }
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.lock().running.is_some()
    }

    pub(crate) fn observers(&self) -> usize {
        self.lock().observers
    }

    pub(crate) fn close(&self) {
        self.scope.cancel();
        if let Some(token) = self.lock().running.take() {
            token.cancel();
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.scope.is_cancelled()
    }
}

/// Keeps a subscription's engine alive while held.
pub struct ObserverGuard {
    lifecycle: Arc<Lifecycle>,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.lifecycle.detach();
    }
}

/// Consumes a stored trigger permit, if any.
pub(crate) fn drain(trigger: &Notify) {
    let _ = trigger.notified().now_or_never();
}

/// The generation of the cycle allowed to publish.
///
/// Bumping the epoch retires every earlier cycle: their emissions compare
/// against the current value under the lock and are dropped on mismatch.
#[derive(Default)]
pub(crate) struct Epoch(Mutex<u64>);

impl Epoch {
    pub(crate) fn advance(&self) -> u64 {
        let mut epoch = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        *epoch += 1;
        *epoch
    }

    /// Advances past `generation` only if it is still current, so a stopping
    /// driver cannot stale a cycle that a newer driver already started.
    pub(crate) fn retire(&self, generation: u64) -> bool {
        let mut epoch = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if *epoch != generation {
            return false;
        }
        *epoch += 1;
        true
    }

    /// Runs `publish` only while `generation` is current.
    pub(crate) fn publish_if_current<F>(&self, generation: u64, publish: F) -> bool
    where
        F: FnOnce(),
    {
        let epoch = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if *epoch != generation {
            return false;
        }
        publish();
        true
    }
}
