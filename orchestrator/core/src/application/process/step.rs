// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Leaf components.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::application::process::{ComponentCore, ProcessComponent};
use crate::domain::process::{ProcessExecutionError, RollbackReason};

/// Business logic of a leaf: do the work, and know how to undo it.
#[async_trait]
pub trait ProcessStep: Send + Sync {
    async fn execute(&self) -> Result<(), ProcessExecutionError>;

    async fn rollback(&self, _reason: &RollbackReason) {}
}

/// Adapts a [`ProcessStep`] to the component lifecycle.
///
/// The step's rollback only runs if its `execute` returned `Ok`, and at most
/// once.
pub struct StepComponent<S> {
    core: Arc<ComponentCore>,
    step: S,
    completed: AtomicBool,
}

impl<S: ProcessStep + 'static> StepComponent<S> {
    pub fn new(name: impl Into<String>, step: S) -> Self {
        Self {
            core: ComponentCore::new(name),
            step,
            completed: AtomicBool::new(false),
        }
    }

    pub fn shared(name: impl Into<String>, step: S) -> Arc<dyn ProcessComponent> {
        Arc::new(Self::new(name, step))
    }

    pub fn step(&self) -> &S {
        &self.step
    }
}

#[async_trait]
impl<S: ProcessStep + 'static> ProcessComponent for StepComponent<S> {
    fn core(&self) -> &Arc<ComponentCore> {
        &self.core
    }

    async fn do_execute(&self) -> Result<(), RollbackReason> {
        self.step
            .execute()
            .await
            .map_err(|e| e.into_reason(self.core.id(), self.core.name()))?;
        self.completed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn do_rollback(&self, reason: &RollbackReason) {
        if self.completed.swap(false, Ordering::SeqCst) {
            self.step.rollback(reason).await;
        }
    }
}
