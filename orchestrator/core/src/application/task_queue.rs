// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # User Profile Task Queue
//!
//! Sending puts a task under the recipient's location; the recipient drains
//! its own queue oldest-first. Each drain cycle is one [`ConsumeTaskStep`]:
//!
//! 1. fetch the oldest task (done when there is none),
//! 2. apply it to the own profile through the profile manager,
//! 3. remove it from the queue,
//! 4. append the next cycle to the running drain process.
//!
//! The id of every applied task is recorded in the profile in the same put
//! that applies it, so a task whose removal failed is skipped, not applied
//! twice, on the next drain.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::application::process::{
    AsyncComponent, ChildAppender, ProcessComponent, ProcessStep, SequentialProcess, StepComponent,
};
use crate::application::user_profile_manager::UserProfileManager;
use crate::domain::crypto::CryptoProvider;
use crate::domain::events::ProfileEvent;
use crate::domain::node_config::TaskQueueConfig;
use crate::domain::process::{ProcessExecutionError, RollbackReason};
use crate::domain::session::UserId;
use crate::domain::store::{
    ContentKey, DataManager, StoreError, StoreKey, USER_PROFILE_TASK_DOMAIN,
};
use crate::domain::user_profile_task::{TaskPayload, UserProfileTask};
use crate::infrastructure::event_bus::EventBus;

/// Attempts at finding a free content key when two tasks share a timestamp.
const MAX_KEY_COLLISIONS: u32 = 3;

/// Counters of one drain run.
#[derive(Debug, Default)]
pub struct DrainStats {
    applied: AtomicUsize,
    skipped: AtomicUsize,
    cycles: AtomicUsize,
}

impl DrainStats {
    /// Tasks whose effect was committed by this drain.
    pub fn applied(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }

    /// Tasks removed without re-applying them (already in the history).
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Consume cycles that found a task.
    pub fn cycles(&self) -> usize {
        self.cycles.load(Ordering::SeqCst)
    }
}

/// A drain process and the counters it fills.
pub struct DrainProcess {
    pub process: Arc<dyn ProcessComponent>,
    pub stats: Arc<DrainStats>,
}

struct DrainContext {
    manager: Arc<UserProfileManager>,
    store: Arc<dyn DataManager>,
    config: TaskQueueConfig,
    event_bus: Option<EventBus>,
    stats: Arc<DrainStats>,
}

pub struct UserProfileTaskQueue {
    manager: Arc<UserProfileManager>,
    store: Arc<dyn DataManager>,
    crypto: Arc<dyn CryptoProvider>,
    config: TaskQueueConfig,
    event_bus: Option<EventBus>,
}

impl UserProfileTaskQueue {
    pub fn new(
        manager: Arc<UserProfileManager>,
        store: Arc<dyn DataManager>,
        crypto: Arc<dyn CryptoProvider>,
        config: TaskQueueConfig,
    ) -> Self {
        Self {
            manager,
            store,
            crypto,
            config,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn config(&self) -> &TaskQueueConfig {
        &self.config
    }

    /// Build a task from this session's user to `recipient`, with fresh protection keys.
    pub fn create_task(&self, recipient: UserId, payload: TaskPayload) -> UserProfileTask {
        UserProfileTask::new(
            self.manager.user_id().clone(),
            recipient,
            payload,
            self.crypto.generate_key_pair(),
        )
    }

    /// Leaf that delivers `task` to its recipient's queue.
    pub fn create_send_process(&self, task: UserProfileTask) -> Arc<dyn ProcessComponent> {
        let name = format!("send-task:{}:{}", task.recipient, task.payload.kind());
        StepComponent::shared(name, SendTaskStep::new(self.store.clone(), task))
    }

    /// Drain the own queue until it is empty (or the per-drain bound is hit).
    pub fn create_drain_process(&self) -> DrainProcess {
        let stats = Arc::new(DrainStats::default());
        let context = Arc::new(DrainContext {
            manager: self.manager.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
            event_bus: self.event_bus.clone(),
            stats: stats.clone(),
        });

        let process = Arc::new(SequentialProcess::new(format!(
            "drain-tasks:{}",
            self.manager.user_id()
        )));
        let seed = ConsumeTaskStep::new(context, process.appender());
        // A fresh process is never terminal, so the seed is always accepted.
        if let Err(e) = process.append(StepComponent::shared("consume-task", seed)) {
            warn!(error = %e, "Failed to seed drain process");
        }

        DrainProcess { process, stats }
    }

    /// Same as [`create_drain_process`](Self::create_drain_process), running on its own task.
    pub fn create_async_drain_process(&self) -> DrainProcess {
        let DrainProcess { process, stats } = self.create_drain_process();
        DrainProcess {
            process: AsyncComponent::wrap(process),
            stats,
        }
    }

    /// Content keys of the tasks waiting in the own queue, oldest first.
    pub async fn pending_tasks(&self) -> Result<Vec<ContentKey>, StoreError> {
        self.store
            .list_content_keys(self.manager.user_id().as_str(), USER_PROFILE_TASK_DOMAIN)
            .await
    }
}

/// Puts a task into the recipient's queue; rollback takes it out again.
pub struct SendTaskStep {
    store: Arc<dyn DataManager>,
    task: Mutex<UserProfileTask>,
    stored_at: Mutex<Option<StoreKey>>,
}

impl SendTaskStep {
    pub fn new(store: Arc<dyn DataManager>, task: UserProfileTask) -> Self {
        Self {
            store,
            task: Mutex::new(task),
            stored_at: Mutex::new(None),
        }
    }

    pub fn task(&self) -> UserProfileTask {
        self.task.lock().clone()
    }
}

#[async_trait]
impl ProcessStep for SendTaskStep {
    async fn execute(&self) -> Result<(), ProcessExecutionError> {
        let mut collisions = 0;
        loop {
            let task = self.task();
            let key = task.store_key();
            let bytes = serde_json::to_vec(&task).map_err(|e| {
                ProcessExecutionError::failed(format!("Failed to encode task {}: {}", task.id, e))
            })?;

            match self.store.put(&key, bytes, None, &task.protection_keys).await {
                Ok(_) => {
                    info!(
                        task_id = %task.id,
                        recipient = %task.recipient,
                        kind = task.payload.kind(),
                        key = %key,
                        "Task sent"
                    );
                    *self.stored_at.lock() = Some(key);
                    return Ok(());
                }
                Err(StoreError::VersionFork { .. }) if collisions < MAX_KEY_COLLISIONS => {
                    collisions += 1;
                    debug!(task_id = %task.id, key = %key, "Content key taken, re-keying task");
                    self.task.lock().content_key = ContentKey::from_timestamp(Utc::now());
                }
                Err(e) => {
                    return Err(ProcessExecutionError::put_failed(format!(
                        "Failed to send task {} to '{}': {}",
                        task.id, task.recipient, e
                    )));
                }
            }
        }
    }

    async fn rollback(&self, reason: &RollbackReason) {
        let Some(key) = self.stored_at.lock().take() else {
            return;
        };
        let keys = self.task.lock().protection_keys.clone();
        match self.store.remove(&key, None, &keys).await {
            Ok(()) => info!(key = %key, reason = %reason, "Sent task withdrawn"),
            Err(e) => warn!(key = %key, error = %e, "Failed to withdraw sent task"),
        }
    }
}

/// One drain cycle; appends its successor while tasks remain.
pub struct ConsumeTaskStep {
    context: Arc<DrainContext>,
    appender: ChildAppender,
}

impl ConsumeTaskStep {
    fn new(context: Arc<DrainContext>, appender: ChildAppender) -> Self {
        Self { context, appender }
    }

    fn publish(&self, event: ProfileEvent) {
        if let Some(event_bus) = &self.context.event_bus {
            event_bus.publish_profile_event(event);
        }
    }
}

#[async_trait]
impl ProcessStep for ConsumeTaskStep {
    async fn execute(&self) -> Result<(), ProcessExecutionError> {
        let context = &self.context;
        let user_id = context.manager.user_id().clone();

        if let Some(limit) = context.config.max_tasks_per_drain {
            if context.stats.cycles() >= limit {
                info!(user_id = %user_id, limit, "Drain limit reached");
                return Ok(());
            }
        }

        let oldest = context
            .store
            .get_oldest(user_id.as_str(), USER_PROFILE_TASK_DOMAIN)
            .await
            .map_err(|e| {
                ProcessExecutionError::get_failed(format!("Failed to fetch next task: {}", e))
            })?;
        let Some((content_key, stored)) = oldest else {
            debug!(user_id = %user_id, "Task queue drained");
            return Ok(());
        };

        let task: UserProfileTask = serde_json::from_slice(&stored.content).map_err(|e| {
            ProcessExecutionError::failed(format!("Failed to decode task at {}: {}", content_key, e))
        })?;
        context.stats.cycles.fetch_add(1, Ordering::SeqCst);

        let history = context.manager.config().applied_task_history;
        let already_applied = AtomicBool::new(false);
        context
            .manager
            .modify_and_put(&format!("apply task {}", task.id), |profile| {
                if profile.has_applied_task(&task.id) {
                    already_applied.store(true, Ordering::SeqCst);
                    return Ok(profile);
                }
                already_applied.store(false, Ordering::SeqCst);
                let mut profile = task.apply(profile)?;
                profile.record_applied_task(task.id, history);
                Ok(profile)
            })
            .await?;

        if already_applied.load(Ordering::SeqCst) {
            context.stats.skipped.fetch_add(1, Ordering::SeqCst);
            info!(task_id = %task.id, "Task already applied, removing it");
        } else {
            context.stats.applied.fetch_add(1, Ordering::SeqCst);
            metrics::counter!("peerhive_tasks_applied_total").increment(1);
            info!(
                user_id = %user_id,
                task_id = %task.id,
                sender = %task.sender,
                kind = task.payload.kind(),
                "Task applied"
            );
            self.publish(ProfileEvent::TaskApplied {
                user_id: user_id.clone(),
                task_id: task.id,
                kind: task.payload.kind().to_string(),
                applied_at: Utc::now(),
            });
        }

        let key = StoreKey::new(user_id.as_str(), USER_PROFILE_TASK_DOMAIN, content_key);
        context
            .store
            .remove(&key, Some(&stored.version), &task.protection_keys)
            .await
            .map_err(|e| {
                ProcessExecutionError::failed(format!(
                    "Task {} was applied but could not be removed from {}: {}",
                    task.id, key, e
                ))
            })?;

        let next = ConsumeTaskStep::new(context.clone(), self.appender.clone());
        self.appender
            .append(StepComponent::shared("consume-task", next))
            .map_err(|e| ProcessExecutionError::failed(format!("Failed to continue drain: {}", e)))
    }

    async fn rollback(&self, reason: &RollbackReason) {
        // The effect is committed to the profile and the task is gone.
        info!(reason = %reason, "Consumed task is not compensated");
    }
}
