// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Listener registry of a single component.
//!
//! Delivery policy: the terminal outcome and the snapshot of listeners to
//! notify are captured under one lock. A listener attached after that point is
//! not queued; it is replayed the recorded outcome synchronously inside
//! `attach`. Either way each listener sees exactly one of succeeded/failed and
//! then exactly one finished.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::domain::listener::ProcessListener;
use crate::domain::process::{ProcessId, RollbackReason};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed(RollbackReason),
}

#[derive(Default)]
struct Inner {
    listeners: Vec<Arc<dyn ProcessListener>>,
    outcome: Option<Outcome>,
}

#[derive(Default)]
pub struct ListenerRegistry {
    inner: Mutex<Inner>,
}

fn deliver(listener: &dyn ProcessListener, process: ProcessId, outcome: &Outcome) {
    match outcome {
        Outcome::Succeeded => listener.on_succeeded(process),
        Outcome::Failed(reason) => listener.on_failed(process, reason),
    }
    listener.on_finished(process);
}

fn same_listener(a: &Arc<dyn ProcessListener>, b: &Arc<dyn ProcessListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, process: ProcessId, listener: Arc<dyn ProcessListener>) {
        let replay = {
            let mut inner = self.inner.lock();
            match &inner.outcome {
                Some(outcome) => Some(outcome.clone()),
                None => {
                    inner.listeners.push(listener.clone());
                    None
                }
            }
        };
        if let Some(outcome) = replay {
            deliver(listener.as_ref(), process, &outcome);
        }
    }

    /// Returns whether the listener was registered.
    pub fn detach(&self, listener: &Arc<dyn ProcessListener>) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|l| !same_listener(l, listener));
        before != inner.listeners.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.inner.lock().outcome.clone()
    }

    /// Record the terminal outcome and notify every registered listener once.
    ///
    /// A second call is ignored.
    pub fn complete(&self, process: ProcessId, outcome: Outcome) {
        let listeners = {
            let mut inner = self.inner.lock();
            if inner.outcome.is_some() {
                return;
            }
            inner.outcome = Some(outcome.clone());
            std::mem::take(&mut inner.listeners)
        };
        for listener in listeners {
            deliver(listener.as_ref(), process, &outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        succeeded: AtomicUsize,
        failed: AtomicUsize,
        finished: AtomicUsize,
    }

    impl ProcessListener for Counting {
        fn on_succeeded(&self, _process: ProcessId) {
            self.succeeded.fetch_add(1, Ordering::SeqCst);
        }

        fn on_failed(&self, _process: ProcessId, _reason: &RollbackReason) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_finished(&self, _process: ProcessId) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_late_listener_is_replayed() {
        let registry = ListenerRegistry::new();
        let id = ProcessId::new();
        let early = Arc::new(Counting::default());
        registry.attach(id, early.clone());

        registry.complete(id, Outcome::Failed(RollbackReason::new("boom")));
        registry.complete(id, Outcome::Succeeded);

        let late = Arc::new(Counting::default());
        registry.attach(id, late.clone());

        for l in [&early, &late] {
            assert_eq!(l.failed.load(Ordering::SeqCst), 1);
            assert_eq!(l.succeeded.load(Ordering::SeqCst), 0);
            assert_eq!(l.finished.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_detached_listener_is_not_notified() {
        let registry = ListenerRegistry::new();
        let id = ProcessId::new();
        let listener: Arc<dyn ProcessListener> = Arc::new(Counting::default());
        registry.attach(id, listener.clone());

        assert!(registry.detach(&listener));
        assert!(!registry.detach(&listener));
        assert!(registry.is_empty());
    }
}
