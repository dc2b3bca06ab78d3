//! Context implementation for cancellation and deadlines
//!
//! This module provides the Context type which carries a cancellation signal
//! and an optional deadline across async boundaries. Every remote call the
//! engine makes is bounded by one.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time;

/// Context carries request-scoped cancellation and timeouts
/// CRITICAL: Pass this as first parameter to ALL async trait methods
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    deadline: Option<Instant>,
    done: watch::Receiver<bool>,
    done_tx: watch::Sender<bool>,
    parent: Option<Context>,
}

/// Why a bounded operation stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Cancelled,
    TimedOut,
}

impl Context {
    pub fn new() -> Self {
        Self::build(None, None)
    }

    /// Derives a context that also expires after `timeout`
    /// Cancelling the original cancels the derived context, not the reverse.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        let deadline = match self.inner.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self::build(Some(deadline), Some(self.clone()))
    }

    fn build(deadline: Option<Instant>, parent: Option<Context>) -> Self {
        let (done_tx, done_rx) = watch::channel(false);

        Self {
            inner: Arc::new(ContextInner {
                deadline,
                done: done_rx,
                done_tx,
                parent,
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.done.borrow()
            || self
                .inner
                .parent
                .as_ref()
                .is_some_and(Context::is_cancelled)
    }

    pub fn is_expired(&self) -> bool {
        self.inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Returns a channel that flips to true when work done on behalf of this
    /// context should stop
    pub fn done(&self) -> watch::Receiver<bool> {
        self.inner.done.clone()
    }

    pub fn cancel(&self) {
        let _ = self.inner.done_tx.send(true);
    }

    /// Checks the context before starting a step
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.is_cancelled() {
            Err(Interrupted::Cancelled)
        } else if self.is_expired() {
            Err(Interrupted::TimedOut)
        } else {
            Ok(())
        }
    }

    /// Drives `fut` until it finishes, the context is cancelled, or the
    /// deadline passes
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        self.check()?;

        let expired = async {
            match self.inner.deadline {
                Some(deadline) => time::sleep_until(deadline.into()).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            output = fut => Ok(output),
            _ = self.cancelled() => Err(Interrupted::Cancelled),
            _ = expired => Err(Interrupted::TimedOut),
        }
    }

    /// Resolves once this context or any context it was derived from is cancelled
    fn cancelled(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let mut done = self.done();
            let own = async move {
                // A dropped sender can never cancel, so wait forever instead
                if done.wait_for(|cancelled| *cancelled).await.is_err() {
                    std::future::pending::<()>().await;
                }
            };
            match &self.inner.parent {
                Some(parent) => {
                    tokio::select! {
                        _ = own => {}
                        _ = parent.cancelled() => {}
                    }
                }
                None => own.await,
            }
        })
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
