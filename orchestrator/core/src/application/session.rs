// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Per-login wiring of the profile services.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::application::process::ProcessComponent;
use crate::application::process_registry::{ProcessHandle, ProcessRegistry};
use crate::application::task_queue::{DrainStats, UserProfileTaskQueue};
use crate::application::use_cases::ProcessFactory;
use crate::application::user_profile_manager::UserProfileManager;
use crate::domain::crypto::{CryptoProvider, KeyPair};
use crate::domain::node_config::NodeConfigSpec;
use crate::domain::session::SessionIdentity;
use crate::domain::store::DataManager;
use crate::domain::user_profile::{UserProfile, VersionedProfile};

/// The drain started by [`Session::login`].
pub struct LoginDrain {
    pub handle: ProcessHandle,
    pub stats: Arc<DrainStats>,
}

pub struct Session {
    manager: Arc<UserProfileManager>,
    task_queue: Arc<UserProfileTaskQueue>,
    factory: ProcessFactory,
    registry: Arc<ProcessRegistry>,
    drain_on_login: bool,
}

impl Session {
    pub fn new(
        identity: SessionIdentity,
        keys: KeyPair,
        store: Arc<dyn DataManager>,
        crypto: Arc<dyn CryptoProvider>,
        config: &NodeConfigSpec,
        registry: Arc<ProcessRegistry>,
    ) -> Self {
        let mut manager =
            UserProfileManager::new(identity, store.clone(), keys, config.user_profile.clone());
        if let Some(event_bus) = registry.event_bus() {
            manager = manager.with_event_bus(event_bus.clone());
        }
        let manager = Arc::new(manager);

        let mut task_queue =
            UserProfileTaskQueue::new(manager.clone(), store, crypto, config.task_queue.clone());
        if let Some(event_bus) = registry.event_bus() {
            task_queue = task_queue.with_event_bus(event_bus.clone());
        }
        let task_queue = Arc::new(task_queue);

        Self {
            factory: ProcessFactory::new(manager.clone(), task_queue.clone()),
            manager,
            task_queue,
            registry,
            drain_on_login: config.task_queue.drain_on_login,
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        self.manager.identity()
    }

    pub fn profile_manager(&self) -> &Arc<UserProfileManager> {
        &self.manager
    }

    pub fn task_queue(&self) -> &Arc<UserProfileTaskQueue> {
        &self.task_queue
    }

    pub fn processes(&self) -> &ProcessFactory {
        &self.factory
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn submit(&self, component: Arc<dyn ProcessComponent>) -> ProcessHandle {
        self.registry.submit(component)
    }

    /// Make sure the profile exists, then start draining the own task queue.
    pub async fn login(&self) -> Result<Option<LoginDrain>> {
        let profile = self.ensure_profile().await?;
        info!(
            user_id = %self.identity().user_id,
            node = %self.identity().node_address,
            version = %profile.version,
            "Session logged in"
        );

        if !self.drain_on_login {
            return Ok(None);
        }
        let drain = self.task_queue.create_async_drain_process();
        Ok(Some(LoginDrain {
            handle: self.registry.submit(drain.process),
            stats: drain.stats,
        }))
    }

    /// Create the profile only when the store confirms it is missing.
    async fn ensure_profile(&self) -> Result<VersionedProfile> {
        let existing = self
            .manager
            .fetch_profile()
            .await
            .context("Failed to load profile")?;
        if let Some(profile) = existing {
            return Ok(profile);
        }
        info!(user_id = %self.identity().user_id, "No profile stored, creating one");
        let fresh = UserProfile::new(self.identity().user_id.clone(), self.manager.public_key());
        self.manager
            .create_profile(fresh)
            .await
            .context("Failed to create profile")
    }
}
