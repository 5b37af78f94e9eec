// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Shared lifecycle state of a process component.
//!
//! `ComponentCore` owns the state machine, the pause gate, the cancellation
//! signal, the first recorded `RollbackReason` and the listener registry.
//! Leaf, composite and decorator components all delegate to it.
//!
//! All transitions happen under one `parking_lot` lock that is never held
//! across an await point.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::application::process::listeners::{ListenerRegistry, Outcome};
use crate::domain::listener::ProcessListener;
use crate::domain::process::{ActivePhase, ComponentError, ProcessId, ProcessState, RollbackReason};

struct Lifecycle {
    state: ProcessState,
    reason: Option<RollbackReason>,
}

pub struct ComponentCore {
    id: ProcessId,
    name: String,
    lifecycle: Mutex<Lifecycle>,
    /// `true` while paused.
    pause_gate: watch::Sender<bool>,
    cancel_token: CancellationToken,
    listeners: ListenerRegistry,
    /// Propagation only; the parent owns the child, never the reverse.
    parent: Mutex<Option<Weak<ComponentCore>>>,
}

impl ComponentCore {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let (pause_gate, _) = watch::channel(false);
        Arc::new(Self {
            id: ProcessId::new(),
            name: name.into(),
            lifecycle: Mutex::new(Lifecycle {
                state: ProcessState::Ready,
                reason: None,
            }),
            pause_gate,
            cancel_token: CancellationToken::new(),
            listeners: ListenerRegistry::new(),
            parent: Mutex::new(None),
        })
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ProcessState {
        self.lifecycle.lock().state
    }

    /// The reason recorded at the first failure or cancellation.
    pub fn rollback_reason(&self) -> Option<RollbackReason> {
        self.lifecycle.lock().reason.clone()
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn attach_listener(&self, listener: Arc<dyn ProcessListener>) {
        self.listeners.attach(self.id, listener);
    }

    pub fn set_parent(&self, parent: &Arc<ComponentCore>) {
        *self.parent.lock() = Some(Arc::downgrade(parent));
    }

    pub fn parent(&self) -> Option<Arc<ComponentCore>> {
        self.parent.lock().as_ref().and_then(Weak::upgrade)
    }

    pub fn parent_link(&self) -> Option<Weak<ComponentCore>> {
        self.parent.lock().clone()
    }

    fn transition(&self, lifecycle: &mut Lifecycle, to: ProcessState) {
        debug!(
            process_id = %self.id,
            name = %self.name,
            from = %lifecycle.state,
            to = %to,
            "Process state transition"
        );
        lifecycle.state = to;
    }

    /// READY -> RUNNING, or straight to PAUSED(RUNNING) under a paused parent.
    ///
    /// The parent's state is read under this component's lock, so a parent
    /// pause either is seen here or reaches this component after it left READY.
    pub fn begin(&self) -> Result<(), ComponentError> {
        let paused = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != ProcessState::Ready {
                return Err(ComponentError::InvalidState {
                    operation: "start",
                    state: lifecycle.state,
                });
            }
            let paused = self.parent().is_some_and(|parent| parent.state().is_paused());
            let to = if paused {
                ProcessState::Paused {
                    previous: ActivePhase::Running,
                }
            } else {
                ProcessState::Running
            };
            self.transition(&mut lifecycle, to);
            paused
        };
        if paused {
            self.pause_gate.send_replace(true);
        }
        Ok(())
    }

    /// RUNNING/ROLLBACKING -> PAUSED, remembering the phase.
    pub fn pause(&self) -> Result<(), ComponentError> {
        {
            let mut lifecycle = self.lifecycle.lock();
            let previous = match lifecycle.state {
                ProcessState::Running => ActivePhase::Running,
                ProcessState::Rollbacking => ActivePhase::Rollbacking,
                state => {
                    return Err(ComponentError::InvalidState {
                        operation: "pause",
                        state,
                    })
                }
            };
            self.transition(&mut lifecycle, ProcessState::Paused { previous });
        }
        self.pause_gate.send_replace(true);
        Ok(())
    }

    /// PAUSED -> the remembered phase.
    pub fn resume(&self) -> Result<(), ComponentError> {
        {
            let mut lifecycle = self.lifecycle.lock();
            match lifecycle.state {
                ProcessState::Paused { previous } => {
                    self.transition(&mut lifecycle, previous.into());
                }
                state => {
                    return Err(ComponentError::InvalidState {
                        operation: "resume",
                        state,
                    })
                }
            }
        }
        self.pause_gate.send_replace(false);
        Ok(())
    }

    /// RUNNING or PAUSED(RUNNING) -> ROLLBACKING with the supplied reason.
    ///
    /// Cooperative: the executing task observes it at its next checkpoint.
    pub fn cancel(&self, reason: RollbackReason) -> Result<(), ComponentError> {
        {
            let mut lifecycle = self.lifecycle.lock();
            match lifecycle.state {
                ProcessState::Running
                | ProcessState::Paused {
                    previous: ActivePhase::Running,
                } => {
                    self.transition(&mut lifecycle, ProcessState::Rollbacking);
                    if lifecycle.reason.is_none() {
                        lifecycle.reason = Some(reason);
                    }
                }
                state => {
                    return Err(ComponentError::InvalidState {
                        operation: "cancel",
                        state,
                    })
                }
            }
        }
        self.cancel_token.cancel();
        self.pause_gate.send_replace(false);
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.cancel_token.cancelled().await
    }

    pub fn cancelled_reason(&self) -> RollbackReason {
        self.rollback_reason()
            .unwrap_or_else(|| RollbackReason::new(format!("Process '{}' was cancelled", self.name)))
    }

    /// Cooperative safe point while running.
    ///
    /// Waits while paused; returns the rollback reason once cancellation has
    /// been requested.
    pub async fn checkpoint(&self) -> Result<(), RollbackReason> {
        let mut gate = self.pause_gate.subscribe();
        loop {
            if self.cancel_token.is_cancelled() {
                return Err(self.cancelled_reason());
            }
            if !*gate.borrow_and_update() {
                return Ok(());
            }
            tokio::select! {
                changed = gate.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                _ = self.cancel_token.cancelled() => {}
            }
        }
    }

    /// Safe point while rolling back: only pausing applies.
    pub async fn wait_while_paused(&self) {
        let mut gate = self.pause_gate.subscribe();
        while *gate.borrow_and_update() {
            if gate.changed().await.is_err() {
                return;
            }
        }
    }

    /// Enter ROLLBACKING after a failure, keeping the first recorded reason.
    pub fn enter_rollback(&self, failure: RollbackReason) -> RollbackReason {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            ProcessState::Running => {
                self.transition(&mut lifecycle, ProcessState::Rollbacking);
            }
            ProcessState::Paused {
                previous: ActivePhase::Running,
            } => {
                self.transition(
                    &mut lifecycle,
                    ProcessState::Paused {
                        previous: ActivePhase::Rollbacking,
                    },
                );
            }
            _ => {}
        }
        lifecycle.reason.get_or_insert(failure).clone()
    }

    /// RUNNING -> SUCCEEDED once no pause or cancellation is pending.
    pub async fn settle_success(&self) -> Result<(), RollbackReason> {
        loop {
            self.checkpoint().await?;
            let succeeded = {
                let mut lifecycle = self.lifecycle.lock();
                if lifecycle.state == ProcessState::Running {
                    self.transition(&mut lifecycle, ProcessState::Succeeded);
                    true
                } else {
                    false
                }
            };
            if succeeded {
                self.listeners.complete(self.id, Outcome::Succeeded);
                return Ok(());
            }
            tokio::task::yield_now().await;
        }
    }

    /// ROLLBACKING -> FAILED once not paused.
    pub async fn settle_failure(&self, reason: &RollbackReason) {
        loop {
            self.wait_while_paused().await;
            let failed = {
                let mut lifecycle = self.lifecycle.lock();
                if lifecycle.state == ProcessState::Rollbacking {
                    self.transition(&mut lifecycle, ProcessState::Failed);
                    true
                } else {
                    false
                }
            };
            if failed {
                break;
            }
            tokio::task::yield_now().await;
        }
        self.listeners.complete(self.id, Outcome::Failed(reason.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_rejects_invalid_operations() {
        let core = ComponentCore::new("unit");
        assert!(matches!(
            core.pause(),
            Err(ComponentError::InvalidState { operation: "pause", state: ProcessState::Ready })
        ));
        assert!(core.cancel(RollbackReason::new("x")).is_err());

        core.begin().unwrap();
        assert!(core.begin().is_err());
        assert!(core.resume().is_err());

        core.pause().unwrap();
        assert_eq!(
            core.state(),
            ProcessState::Paused { previous: ActivePhase::Running }
        );
        core.resume().unwrap();
        assert_eq!(core.state(), ProcessState::Running);
    }

    #[test]
    fn test_cancel_keeps_first_reason() {
        let core = ComponentCore::new("unit");
        core.begin().unwrap();
        core.cancel(RollbackReason::new("first")).unwrap();
        assert_eq!(core.state(), ProcessState::Rollbacking);
        assert!(core.cancel(RollbackReason::new("second")).is_err());

        let reason = core.enter_rollback(RollbackReason::new("later failure"));
        assert_eq!(reason.hint, "first");
    }

    #[tokio::test]
    async fn test_checkpoint_waits_for_resume() {
        let core = ComponentCore::new("unit");
        core.begin().unwrap();
        core.pause().unwrap();

        let waiter = {
            let core = core.clone();
            tokio::spawn(async move { core.checkpoint().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        core.resume().unwrap();
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_begin_under_paused_parent_starts_paused() {
        let parent = ComponentCore::new("parent");
        parent.begin().unwrap();
        let child = ComponentCore::new("child");
        child.set_parent(&parent);
        parent.pause().unwrap();

        child.begin().unwrap();
        assert_eq!(
            child.state(),
            ProcessState::Paused { previous: ActivePhase::Running }
        );

        let waiter = {
            let child = child.clone();
            tokio::spawn(async move { child.checkpoint().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        parent.resume().unwrap();
        child.resume().unwrap();
        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(child.state(), ProcessState::Running);
    }

    #[tokio::test]
    async fn test_cancel_wakes_paused_checkpoint() {
        let core = ComponentCore::new("unit");
        core.begin().unwrap();
        core.pause().unwrap();

        let waiter = {
            let core = core.clone();
            tokio::spawn(async move { core.checkpoint().await })
        };
        core.cancel(RollbackReason::new("stop")).unwrap();

        let reason = waiter.await.unwrap().unwrap_err();
        assert_eq!(reason.hint, "stop");
        assert_eq!(core.state(), ProcessState::Rollbacking);
    }
}
