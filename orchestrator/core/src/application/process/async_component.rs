// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Decorator that runs a component on its own tokio task.
//!
//! `start()` returns as soon as the wrapped component is RUNNING. State,
//! listeners, pause, resume and cancel are those of the wrapped component. If
//! the wrapped component fails, the decorator cancels its parent with the same
//! reason; the parent joins the task through `await_settled` before it
//! finishes either way.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::application::process::{drive_component, ComponentCore, ProcessComponent};
use crate::domain::process::{ComponentError, ProcessState, RollbackReason};

pub struct AsyncComponent {
    inner: Arc<dyn ProcessComponent>,
    handle: tokio::sync::Mutex<Option<JoinHandle<Result<(), ComponentError>>>>,
    settled: Mutex<Option<Result<(), ComponentError>>>,
}

impl AsyncComponent {
    pub fn new(inner: Arc<dyn ProcessComponent>) -> Self {
        Self {
            inner,
            handle: tokio::sync::Mutex::new(None),
            settled: Mutex::new(None),
        }
    }

    pub fn wrap(inner: Arc<dyn ProcessComponent>) -> Arc<dyn ProcessComponent> {
        Arc::new(Self::new(inner))
    }

    pub fn inner(&self) -> &Arc<dyn ProcessComponent> {
        &self.inner
    }
}

#[async_trait]
impl ProcessComponent for AsyncComponent {
    fn core(&self) -> &Arc<ComponentCore> {
        self.inner.core()
    }

    async fn do_execute(&self) -> Result<(), RollbackReason> {
        self.inner.do_execute().await
    }

    async fn do_rollback(&self, reason: &RollbackReason) {
        self.inner.do_rollback(reason).await;
    }

    fn progress(&self) -> f64 {
        self.inner.progress()
    }

    async fn start(&self) -> Result<(), ComponentError> {
        let mut handle = self.handle.lock().await;
        // Enter RUNNING before returning so pause/cancel from the parent apply.
        self.inner.core().begin()?;

        let inner = self.inner.clone();
        *handle = Some(tokio::spawn(async move {
            let result = drive_component(inner.as_ref()).await;
            if let Err(ComponentError::Failed(reason)) = &result {
                match inner.core().parent() {
                    Some(parent) => {
                        warn!(
                            process_id = %inner.id(),
                            parent = %parent.name(),
                            "Async component failed, cancelling parent"
                        );
                        if let Err(e) = parent.cancel(reason.clone()) {
                            debug!(parent = %parent.name(), error = %e, "Parent already past cancellation");
                        }
                    }
                    None => debug!(process_id = %inner.id(), "Async component failed without parent"),
                }
            }
            result
        }));
        Ok(())
    }

    fn pause(&self) -> Result<(), ComponentError> {
        self.inner.pause()
    }

    fn resume(&self) -> Result<(), ComponentError> {
        self.inner.resume()
    }

    fn cancel(&self, reason: RollbackReason) -> Result<(), ComponentError> {
        self.inner.cancel(reason)
    }

    fn attach_parent(&self, parent: &Arc<ComponentCore>) {
        self.inner.attach_parent(parent);
    }

    async fn compensate(&self, reason: &RollbackReason) {
        if self.inner.state() == ProcessState::Succeeded {
            self.inner.compensate(reason).await;
        }
    }

    async fn await_settled(&self) -> Result<(), ComponentError> {
        let mut guard = self.handle.lock().await;
        if let Some(handle) = guard.as_mut() {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_error) => Err(ComponentError::Failed(
                    RollbackReason::new(format!("Async task of '{}' aborted: {}", self.inner.name(), join_error))
                        .with_component(self.inner.id(), self.inner.name()),
                )),
            };
            *guard = None;
            *self.settled.lock() = Some(result);
        }
        self.settled.lock().clone().unwrap_or(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::process::{ProcessStep, SequentialProcess, StepComponent};
    use crate::domain::process::ProcessExecutionError;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct Gated {
        gate: Arc<Notify>,
        fail: bool,
    }

    #[async_trait]
    impl ProcessStep for Gated {
        async fn execute(&self) -> Result<(), ProcessExecutionError> {
            self.gate.notified().await;
            if self.fail {
                Err(ProcessExecutionError::failed("background work failed"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_start_returns_before_completion() {
        let gate = Arc::new(Notify::new());
        let component = AsyncComponent::new(StepComponent::shared(
            "bg",
            Gated { gate: gate.clone(), fail: false },
        ));

        component.start().await.unwrap();
        assert_eq!(component.state(), ProcessState::Running);

        gate.notify_one();
        component.await_settled().await.unwrap();
        assert_eq!(component.state(), ProcessState::Succeeded);
    }

    #[tokio::test]
    async fn test_failure_fails_parent_with_same_reason() {
        let gate = Arc::new(Notify::new());
        let parent = SequentialProcess::new("parent");
        parent
            .append(AsyncComponent::wrap(StepComponent::shared(
                "bg",
                Gated { gate: gate.clone(), fail: true },
            )))
            .unwrap();

        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            gate.notify_one();
        });

        let err = parent.start().await.unwrap_err();
        releaser.await.unwrap();

        assert_eq!(err.reason().unwrap().hint, "background work failed");
        assert_eq!(parent.state(), ProcessState::Failed);
        assert_eq!(parent.children()[0].state(), ProcessState::Failed);
    }
}
