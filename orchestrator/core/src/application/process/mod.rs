// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Process Framework
//!
//! Composable, pausable, cancellable units of work with automatic rollback.
//!
//! ```text
//! ProcessComponent (trait)
//!   ├── StepComponent<S: ProcessStep>   leaf wrapping business logic
//!   ├── SequentialProcess               ordered composite, reverse compensation
//!   └── AsyncComponent                  runs a component on its own task
//! ```
//!
//! Every component delegates its lifecycle to a [`ComponentCore`]. Driving a
//! component is `start().await`, which returns `Ok(())` once it SUCCEEDED or
//! `Err(ComponentError::Failed(reason))` once it has rolled back to FAILED.
//! Pausing and cancelling are cooperative: they take effect at the next
//! checkpoint of the executing task.

pub mod async_component;
pub mod component_core;
pub mod listeners;
pub mod sequential;
pub mod step;

pub use self::async_component::AsyncComponent;
pub use self::component_core::ComponentCore;
pub use self::listeners::{ListenerRegistry, Outcome};
pub use self::sequential::{ChildAppender, SequentialProcess};
pub use self::step::{ProcessStep, StepComponent};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::listener::ProcessListener;
use crate::domain::process::{ComponentError, ProcessId, ProcessState, RollbackReason};

#[async_trait]
pub trait ProcessComponent: Send + Sync {
    fn core(&self) -> &Arc<ComponentCore>;

    /// Forward work. Runs at most once, after the component entered RUNNING.
    async fn do_execute(&self) -> Result<(), RollbackReason>;

    /// Undo own effects after a failure or cancellation of this component.
    async fn do_rollback(&self, reason: &RollbackReason);

    fn id(&self) -> ProcessId {
        self.core().id()
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    fn state(&self) -> ProcessState {
        self.core().state()
    }

    fn progress(&self) -> f64 {
        if self.state() == ProcessState::Succeeded {
            1.0
        } else {
            0.0
        }
    }

    async fn start(&self) -> Result<(), ComponentError> {
        run_component(self).await
    }

    fn pause(&self) -> Result<(), ComponentError> {
        self.core().pause()?;
        self.on_pause();
        Ok(())
    }

    fn resume(&self) -> Result<(), ComponentError> {
        self.core().resume()?;
        self.on_resume();
        Ok(())
    }

    fn cancel(&self, reason: RollbackReason) -> Result<(), ComponentError> {
        self.core().cancel(reason.clone())?;
        self.on_cancel(&reason);
        Ok(())
    }

    fn attach_listener(&self, listener: Arc<dyn ProcessListener>) {
        self.core().attach_listener(listener);
    }

    fn detach_listener(&self, listener: &Arc<dyn ProcessListener>) -> bool {
        self.core().listeners().detach(listener)
    }

    fn attach_parent(&self, parent: &Arc<ComponentCore>) {
        self.core().set_parent(parent);
    }

    fn on_pause(&self) {}

    fn on_resume(&self) {}

    fn on_cancel(&self, _reason: &RollbackReason) {}

    /// Undo the effects of this SUCCEEDED component on behalf of its parent.
    ///
    /// The component stays SUCCEEDED; compensation is the parent's action.
    async fn compensate(&self, reason: &RollbackReason) {
        self.do_rollback(reason).await;
    }

    /// Wait for detached work started by this component.
    async fn await_settled(&self) -> Result<(), ComponentError> {
        Ok(())
    }
}

/// READY -> RUNNING, then drive the component to a terminal state.
pub async fn run_component<C>(component: &C) -> Result<(), ComponentError>
where
    C: ProcessComponent + ?Sized,
{
    component.core().begin()?;
    drive_component(component).await
}

/// Execute an already RUNNING component; roll it back on failure or cancellation.
pub(crate) async fn drive_component<C>(component: &C) -> Result<(), ComponentError>
where
    C: ProcessComponent + ?Sized,
{
    let core = component.core().clone();
    debug!(process_id = %core.id(), name = %core.name(), "Process started");

    let executed = match core.checkpoint().await {
        Ok(()) => component.do_execute().await,
        Err(reason) => Err(reason),
    };

    let failure = match executed {
        Ok(()) => match core.settle_success().await {
            Ok(()) => {
                debug!(process_id = %core.id(), name = %core.name(), "Process succeeded");
                return Ok(());
            }
            Err(reason) => reason,
        },
        Err(reason) => reason,
    };

    let reason = core.enter_rollback(failure);
    warn!(
        process_id = %core.id(),
        name = %core.name(),
        category = %reason.category(),
        hint = %reason.hint,
        "Process rolling back"
    );
    core.wait_while_paused().await;
    component.do_rollback(&reason).await;
    core.settle_failure(&reason).await;
    Err(ComponentError::Failed(reason))
}
