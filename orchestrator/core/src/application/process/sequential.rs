// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Ordered composite with reverse compensation.
//!
//! Children run one after another in insertion order. Children may be appended
//! while the composite is running (through a [`ChildAppender`]); the execution
//! loop re-reads the list on every iteration, so an appended child runs after
//! every child already queued.
//!
//! When a child fails, or the composite is cancelled, outstanding async
//! children are cancelled and awaited first, then every child that SUCCEEDED is
//! compensated in exact reverse order. The composite reports the reason of
//! the first failure unchanged.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::application::process::{ComponentCore, ProcessComponent};
use crate::domain::process::{ComponentError, ProcessState, RollbackReason};

type Children = Arc<Mutex<Vec<Arc<dyn ProcessComponent>>>>;

pub struct SequentialProcess {
    core: Arc<ComponentCore>,
    children: Children,
    /// Children that have been started, in start order.
    started: Mutex<Vec<Arc<dyn ProcessComponent>>>,
}

/// Appends children to a running [`SequentialProcess`] without owning it.
#[derive(Clone)]
pub struct ChildAppender {
    children: Weak<Mutex<Vec<Arc<dyn ProcessComponent>>>>,
    parent: Weak<ComponentCore>,
}

impl ChildAppender {
    pub fn append(&self, child: Arc<dyn ProcessComponent>) -> Result<(), ComponentError> {
        let (Some(children), Some(parent)) = (self.children.upgrade(), self.parent.upgrade()) else {
            return Err(ComponentError::Detached(child.name().to_string()));
        };
        push_child(&parent, &children, child)
    }
}

fn push_child(
    parent: &Arc<ComponentCore>,
    children: &Mutex<Vec<Arc<dyn ProcessComponent>>>,
    child: Arc<dyn ProcessComponent>,
) -> Result<(), ComponentError> {
    let state = parent.state();
    if state.is_terminal() {
        return Err(ComponentError::InvalidState {
            operation: "append",
            state,
        });
    }
    child.attach_parent(parent);
    debug!(parent = %parent.name(), child = %child.name(), "Child appended");
    children.lock().push(child);
    Ok(())
}

fn child_failure(child: &dyn ProcessComponent, error: ComponentError) -> RollbackReason {
    match error {
        ComponentError::Failed(reason) => reason,
        other => RollbackReason::new(other.to_string()).with_component(child.id(), child.name()),
    }
}

impl SequentialProcess {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: ComponentCore::new(name),
            children: Arc::new(Mutex::new(Vec::new())),
            started: Mutex::new(Vec::new()),
        }
    }

    pub fn append(&self, child: Arc<dyn ProcessComponent>) -> Result<(), ComponentError> {
        push_child(&self.core, &self.children, child)
    }

    pub fn appender(&self) -> ChildAppender {
        ChildAppender {
            children: Arc::downgrade(&self.children),
            parent: Arc::downgrade(&self.core),
        }
    }

    pub fn children(&self) -> Vec<Arc<dyn ProcessComponent>> {
        self.children.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.children.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn started(&self) -> Vec<Arc<dyn ProcessComponent>> {
        self.started.lock().clone()
    }

    fn for_each_live_child(&self, f: impl Fn(&dyn ProcessComponent) -> Result<(), ComponentError>) {
        for child in self.started() {
            if child.state().is_terminal() {
                continue;
            }
            if let Err(e) = f(child.as_ref()) {
                debug!(child = %child.name(), error = %e, "Propagation to child skipped");
            }
        }
    }

    async fn run_child(&self, child: &Arc<dyn ProcessComponent>) -> Result<(), ComponentError> {
        let mut run = child.start();
        tokio::select! {
            biased;
            result = &mut run => result,
            _ = self.core.cancelled() => {
                // Cancelled through the parent link; the child has not seen it yet.
                if let Err(e) = child.cancel(self.core.cancelled_reason()) {
                    debug!(child = %child.name(), error = %e, "Child cancel skipped");
                }
                run.await
            }
        }
    }

    async fn compensate_children(&self, reason: &RollbackReason) {
        for child in self.started().iter().rev() {
            self.core.wait_while_paused().await;
            if child.state() == ProcessState::Succeeded {
                debug!(parent = %self.core.name(), child = %child.name(), "Compensating child");
                child.compensate(reason).await;
            }
        }
    }
}

#[async_trait]
impl ProcessComponent for SequentialProcess {
    fn core(&self) -> &Arc<ComponentCore> {
        &self.core
    }

    fn progress(&self) -> f64 {
        let children = self.children.lock();
        if children.is_empty() {
            return if self.core.state() == ProcessState::Succeeded {
                1.0
            } else {
                0.0
            };
        }
        let done = children
            .iter()
            .filter(|c| c.state() == ProcessState::Succeeded)
            .count();
        done as f64 / children.len() as f64
    }

    async fn do_execute(&self) -> Result<(), RollbackReason> {
        let mut index = 0;
        loop {
            self.core.checkpoint().await?;
            let next = self.children.lock().get(index).cloned();
            let Some(child) = next else {
                break;
            };
            index += 1;

            self.started.lock().push(child.clone());
            self.run_child(&child)
                .await
                .map_err(|e| child_failure(child.as_ref(), e))?;
        }

        for child in self.started() {
            tokio::select! {
                biased;
                settled = child.await_settled() => {
                    settled.map_err(|e| child_failure(child.as_ref(), e))?;
                }
                _ = self.core.cancelled() => return Err(self.core.cancelled_reason()),
            }
        }
        Ok(())
    }

    async fn do_rollback(&self, reason: &RollbackReason) {
        self.for_each_live_child(|child| child.cancel(reason.clone()));
        for child in self.started() {
            // Outcome already recorded by the child itself.
            let _ = child.await_settled().await;
        }
        self.compensate_children(reason).await;
    }

    fn on_pause(&self) {
        self.for_each_live_child(|child| child.pause());
    }

    fn on_resume(&self) {
        self.for_each_live_child(|child| child.resume());
    }

    fn on_cancel(&self, reason: &RollbackReason) {
        self.for_each_live_child(|child| child.cancel(reason.clone()));
    }

    async fn compensate(&self, reason: &RollbackReason) {
        self.compensate_children(reason).await;
    }
}
