// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Cooperative shutdown token shared by the poller and the worker.
//
// The outer signal layer calls `trigger()`; every suspension point in the
// proxy checks `is_set()` or waits through `sleep()` so cancellation is
// bounded by the longest single network call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    done: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner { done: AtomicBool::new(false), notify: Notify::new() }),
        }
    }

    /// Flip the flag.  Monotonic: once set it is never cleared.
    pub fn trigger(&self) {
        self.inner.done.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.inner.done.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, returning early (with `true`) when shutdown is
    /// triggered while sleeping.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_set() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_set(),
            _ = self.inner.notify.notified() => true,
        }
    }

    /// Resolve when shutdown is triggered.
    pub async fn triggered(&self) {
        if self.is_set() {
            return;
        }
        self.inner.notify.notified().await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_runs_to_completion_when_not_triggered() {
        let shutdown = Shutdown::new();
        let interrupted = shutdown.sleep(Duration::from_millis(10)).await;
        assert!(!interrupted);
    }

    #[tokio::test]
    async fn trigger_interrupts_sleep() {
        let shutdown = Shutdown::new();
        let waiter = shutdown.clone();
        let handle = tokio::spawn(async move { waiter.sleep(Duration::from_secs(30)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger();

        let interrupted = handle.await.expect("join");
        assert!(interrupted);
        assert!(shutdown.is_set());
    }

    #[tokio::test]
    async fn flag_is_monotonic() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        shutdown.trigger();
        assert!(shutdown.is_set());
        assert!(shutdown.sleep(Duration::from_secs(1)).await);
    }
}
