// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Process Registry
//!
//! Tracks the root processes running on a node. A registry is constructed
//! explicitly by whoever hosts the session and shared by `Arc`; there is no
//! process-wide instance.
//!
//! `submit` registers a component, spawns its execution and returns a
//! [`ProcessHandle`]. The component is removed from the registry once it has
//! reached a terminal state. When an [`EventBus`] is configured, lifecycle
//! events of every submitted process are published on it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::application::process::ProcessComponent;
use crate::domain::events::ProcessEvent;
use crate::domain::listener::ProcessListener;
use crate::domain::process::{ComponentError, ProcessId, RollbackReason};
use crate::infrastructure::event_bus::EventBus;

type ActiveProcesses = Arc<RwLock<HashMap<ProcessId, Arc<dyn ProcessComponent>>>>;

/// Handle to a submitted process.
pub struct ProcessHandle {
    id: ProcessId,
    join: JoinHandle<Result<(), ComponentError>>,
}

impl ProcessHandle {
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Wait for the process to reach a terminal state.
    pub async fn wait(self) -> Result<(), ComponentError> {
        match self.join.await {
            Ok(result) => result,
            Err(join_error) => Err(ComponentError::Failed(RollbackReason::new(format!(
                "Process task aborted: {}",
                join_error
            )))),
        }
    }
}

/// Publishes the outcome of a process on the event bus.
pub struct EventBusListener {
    event_bus: EventBus,
}

impl EventBusListener {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }
}

impl ProcessListener for EventBusListener {
    fn on_succeeded(&self, process: ProcessId) {
        self.event_bus
            .publish_process_event(ProcessEvent::ProcessSucceeded {
                process_id: process,
                succeeded_at: Utc::now(),
            });
    }

    fn on_failed(&self, process: ProcessId, reason: &RollbackReason) {
        self.event_bus.publish_process_event(ProcessEvent::ProcessFailed {
            process_id: process,
            reason: reason.clone(),
            failed_at: Utc::now(),
        });
    }

    fn on_finished(&self, process: ProcessId) {
        self.event_bus.publish_process_event(ProcessEvent::ProcessFinished {
            process_id: process,
            finished_at: Utc::now(),
        });
    }
}

#[derive(Default)]
pub struct ProcessRegistry {
    active: ActiveProcesses,
    event_bus: Option<EventBus>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_bus(event_bus: EventBus) -> Self {
        Self {
            active: ActiveProcesses::default(),
            event_bus: Some(event_bus),
        }
    }

    pub fn event_bus(&self) -> Option<&EventBus> {
        self.event_bus.as_ref()
    }

    /// Register the component and start it on a new task.
    pub fn submit(&self, component: Arc<dyn ProcessComponent>) -> ProcessHandle {
        let id = component.id();
        let name = component.name().to_string();
        self.active.write().insert(id, component.clone());

        if let Some(event_bus) = &self.event_bus {
            component.attach_listener(Arc::new(EventBusListener::new(event_bus.clone())));
            event_bus.publish_process_event(ProcessEvent::ProcessStarted {
                process_id: id,
                name: name.clone(),
                started_at: Utc::now(),
            });
        }
        info!(process_id = %id, name = %name, "Process submitted");

        let active = self.active.clone();
        let join = tokio::spawn(async move {
            let result = match component.start().await {
                Ok(()) => component.await_settled().await,
                Err(e) => Err(e),
            };
            active.write().remove(&id);

            match &result {
                Ok(()) => {
                    metrics::counter!("peerhive_process_finished_total", "outcome" => "succeeded")
                        .increment(1);
                    info!(process_id = %id, name = %name, "Process succeeded");
                }
                Err(e) => {
                    metrics::counter!("peerhive_process_finished_total", "outcome" => "failed")
                        .increment(1);
                    warn!(process_id = %id, name = %name, error = %e, "Process failed");
                }
            }
            result
        });

        ProcessHandle { id, join }
    }

    pub fn get(&self, id: ProcessId) -> Option<Arc<dyn ProcessComponent>> {
        self.active.read().get(&id).cloned()
    }

    pub fn active_ids(&self) -> Vec<ProcessId> {
        self.active.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.active.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn ProcessComponent>> {
        self.active.read().values().cloned().collect()
    }

    /// Pause every running process. Returns how many were paused.
    pub fn pause_all(&self) -> usize {
        self.snapshot().iter().filter(|p| p.pause().is_ok()).count()
    }

    /// Resume every paused process. Returns how many were resumed.
    pub fn resume_all(&self) -> usize {
        self.snapshot().iter().filter(|p| p.resume().is_ok()).count()
    }

    /// Cancel every process that can still be cancelled.
    pub fn cancel_all(&self, reason: RollbackReason) -> usize {
        self.snapshot()
            .iter()
            .filter(|p| p.cancel(reason.clone()).is_ok())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::process::{ProcessStep, StepComponent};
    use crate::domain::process::{ProcessExecutionError, ProcessState};
    use crate::infrastructure::event_bus::DomainEvent;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    struct Waiting(Arc<Notify>);

    #[async_trait]
    impl ProcessStep for Waiting {
        async fn execute(&self) -> Result<(), ProcessExecutionError> {
            self.0.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_submit_tracks_and_deregisters() {
        let gate = Arc::new(Notify::new());
        let registry = ProcessRegistry::new();
        let component = StepComponent::shared("wait", Waiting(gate.clone()));

        let handle = registry.submit(component.clone());
        assert_eq!(registry.active_ids(), vec![handle.id()]);
        assert!(registry.get(handle.id()).is_some());

        gate.notify_one();
        handle.wait().await.unwrap();

        assert!(registry.is_empty());
        assert_eq!(component.state(), ProcessState::Succeeded);
    }

    #[tokio::test]
    async fn test_cancel_all_fails_running_processes() {
        let gate = Arc::new(Notify::new());
        let registry = ProcessRegistry::new();
        let component = StepComponent::shared("wait", Waiting(gate.clone()));
        let handle = registry.submit(component.clone());

        while component.state() != ProcessState::Running {
            tokio::task::yield_now().await;
        }
        assert_eq!(registry.pause_all(), 1);
        assert_eq!(registry.cancel_all(RollbackReason::new("shutdown")), 1);
        assert_eq!(component.state(), ProcessState::Rollbacking);

        // The step observes the cancellation once its current work returns.
        gate.notify_one();
        let err = handle.wait().await.unwrap_err();

        assert_eq!(err.reason().unwrap().hint, "shutdown");
        assert_eq!(component.state(), ProcessState::Failed);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_events_are_published() {
        let event_bus = EventBus::new(16);
        let mut receiver = event_bus.subscribe();
        let registry = ProcessRegistry::with_event_bus(event_bus);
        let gate = Arc::new(Notify::new());
        gate.notify_one();

        let handle = registry.submit(StepComponent::shared("quick", Waiting(gate)));
        let id = handle.id();
        handle.wait().await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(DomainEvent::Process(event)) = receiver.try_recv() {
            assert_eq!(event.process_id(), id);
            kinds.push(match event {
                ProcessEvent::ProcessStarted { .. } => "started",
                ProcessEvent::ProcessSucceeded { .. } => "succeeded",
                ProcessEvent::ProcessFailed { .. } => "failed",
                ProcessEvent::ProcessFinished { .. } => "finished",
            });
        }
        assert_eq!(kinds, vec!["started", "succeeded", "finished"]);
    }
}
