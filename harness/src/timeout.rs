//! Bounded waits on external resources.
//!
//! A [`TimeoutGuard`] wraps any future that blocks on something outside our
//! control (a subprocess exit, a console that may never print another line)
//! with a deadline. The deadline is a `tokio` timer owned by the guarded call:
//! it is armed when the call starts and dropped when the call returns, so it
//! cannot fire once the guarded future has completed. When the guarded
//! future is ready on the same poll the deadline expires, completion wins.

use std::future::Future;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tracing::warn;

use crate::error::{Error, Result};

/// Deadline wrapper, reusable across calls; every call gets a fresh timer.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutGuard {
    limit: Duration,
}

/// Result of a guarded wait.
#[derive(Debug, PartialEq, Eq)]
pub enum Guarded<T> {
    /// The operation finished before the deadline.
    Completed(T),
    /// The deadline fired first; the operation was cancelled.
    TimedOut,
}

impl<T> Guarded<T> {
    pub fn into_result(self, limit: Duration) -> Result<T> {
        match self {
            Guarded::Completed(value) => Ok(value),
            Guarded::TimedOut => Err(Error::Timeout(limit)),
        }
    }
}

impl TimeoutGuard {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Run `operation` under the deadline.
    ///
    /// On expiry the operation's future is dropped before this returns, which
    /// releases anything it borrowed; the caller then tears down the
    /// underlying resource (closes the console, kills the process).
    pub async fn run<F>(&self, operation: F) -> Guarded<F::Output>
    where
        F: Future,
    {
        match tokio::time::timeout(self.limit, operation).await {
            Ok(value) => Guarded::Completed(value),
            Err(_) => Guarded::TimedOut,
        }
    }

    /// Wait for `child` to exit, killing it once the deadline expires.
    pub async fn wait_or_kill(&self, child: &mut Child) -> Result<ExitStatus> {
        let guarded = self.run(child.wait()).await;
        if matches!(guarded, Guarded::TimedOut) {
            warn!(pid = ?child.id(), limit = ?self.limit, "child did not exit in time, killing");
            child.kill().await?;
        }
        Ok(guarded.into_result(self.limit)??)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_before_deadline() {
        let guard = TimeoutGuard::new(Duration::from_secs(5));
        let outcome = guard.run(async { 42 }).await;
        assert_eq!(outcome, Guarded::Completed(42));
    }

    #[tokio::test]
    async fn expires_on_pending_operation() {
        let guard = TimeoutGuard::new(Duration::from_millis(50));
        let outcome = guard.run(std::future::pending::<()>()).await;
        assert_eq!(outcome, Guarded::TimedOut);
        assert!(matches!(
            outcome.into_result(guard.limit()),
            Err(Error::Timeout(d)) if d == Duration::from_millis(50)
        ));
    }

    #[tokio::test]
    async fn guard_is_reusable() {
        let guard = TimeoutGuard::new(Duration::from_millis(30));
        assert_eq!(guard.run(std::future::pending::<()>()).await, Guarded::TimedOut);
        assert_eq!(guard.run(async { "again" }).await, Guarded::Completed("again"));
    }

    #[tokio::test]
    async fn kills_hanging_child() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let guard = TimeoutGuard::new(Duration::from_millis(100));
        let err = guard.wait_or_kill(&mut child).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        // The child has been reaped by kill().
        assert!(child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn returns_exit_status_of_quick_child() {
        let mut child = tokio::process::Command::new("true").spawn().unwrap();
        let guard = TimeoutGuard::new(Duration::from_secs(5));
        let status = guard.wait_or_kill(&mut child).await.unwrap();
        assert!(status.success());
    }
}
