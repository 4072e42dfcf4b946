//! Scoped ownership of remote sessions.
//!
//! Every adapter call opens exactly one remote session and must close it on
//! every exit path. [`Scoped`] holds the release handle: the normal path
//! awaits [`Scoped::release`]; if the owning future is dropped first (caller
//! disconnect, timeout) the guard's `Drop` spawns the release onto the
//! current runtime instead. Either way it is issued once.

use async_trait::async_trait;
use handson_core::error::ToolError;
use tracing::{debug, warn};

/// A cheap handle that can close one remote resource.
#[async_trait]
pub trait Release: Clone + Send + Sync + 'static {
    /// Short description for logs, e.g. `code-interpreter session abc`.
    fn label(&self) -> String;

    async fn release(self) -> Result<(), ToolError>;
}

pub struct Scoped<R: Release> {
    resource: R,
    released: bool,
}

impl<R: Release> Scoped<R> {
    pub fn new(resource: R) -> Self {
        Self {
            resource,
            released: false,
        }
    }

    /// Release now. Failures are logged, not returned.
    pub async fn release(mut self) {
        self.released = true;
        finish(self.resource.clone()).await;
    }

    /// Keep the resource open and hand back its handle.
    pub fn disarm(mut self) -> R {
        self.released = true;
        self.resource.clone()
    }
}

impl<R: Release> std::ops::Deref for Scoped<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<R: Release> Drop for Scoped<R> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let resource = self.resource.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(resource = %resource.label(), "Scope abandoned, releasing in background");
                handle.spawn(finish(resource));
            }
            Err(_) => {
                warn!(resource = %resource.label(), "No runtime to release on; left to expire remotely");
            }
        }
    }
}

async fn finish<R: Release>(resource: R) {
    let label = resource.label();
    match resource.release().await {
        Ok(()) => debug!(resource = %label, "Released"),
        Err(e) => warn!(resource = %label, error = %e, "Release failed"),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    pub(crate) struct Counter(pub Arc<AtomicUsize>);

    #[async_trait]
    impl Release for Counter {
        fn label(&self) -> String {
            "counter".into()
        }
        async fn release(self) -> Result<(), ToolError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Yield until `counter` reaches `expected` or give up.
    pub(crate) async fn settle(counter: &AtomicUsize, expected: usize) {
        for _ in 0..50 {
            if counter.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn explicit_release_runs_once() {
        let counter = Counter::default();
        let guard = Scoped::new(counter.clone());
        guard.release().await;
        settle(&counter.0, 2).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_guard_releases_in_background() {
        let counter = Counter::default();
        {
            let _guard = Scoped::new(counter.clone());
        }
        settle(&counter.0, 1).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disarmed_guard_never_releases() {
        let counter = Counter::default();
        let handle = Scoped::new(counter.clone()).disarm();
        settle(&counter.0, 1).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
        handle.release().await.unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_future_still_releases() {
        let counter = Counter::default();
        let held = counter.clone();
        let work = tokio::spawn(async move {
            let _guard = Scoped::new(held);
            std::future::pending::<()>().await;
        });
        tokio::task::yield_now().await;
        work.abort();
        let _ = work.await;
        settle(&counter.0, 1).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
