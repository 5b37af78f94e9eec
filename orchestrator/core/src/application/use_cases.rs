// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Process trees for the user-facing profile operations.
//!
//! Each `create_*` call returns an unstarted component; callers start it
//! directly or hand it to a `ProcessRegistry`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use crate::application::process::{
    AsyncComponent, ProcessComponent, ProcessStep, SequentialProcess, StepComponent,
};
use crate::application::task_queue::UserProfileTaskQueue;
use crate::application::user_profile_manager::UserProfileManager;
use crate::domain::process::{ComponentError, ProcessExecutionError, RollbackReason};
use crate::domain::session::UserId;
use crate::domain::user_profile::{IndexNode, Permission, ProfileError, UserProfile};
use crate::domain::user_profile_task::TaskPayload;

pub struct ProcessFactory {
    manager: Arc<UserProfileManager>,
    task_queue: Arc<UserProfileTaskQueue>,
}

impl ProcessFactory {
    pub fn new(manager: Arc<UserProfileManager>, task_queue: Arc<UserProfileTaskQueue>) -> Self {
        Self {
            manager,
            task_queue,
        }
    }

    pub fn create_add_folder_process(&self, path: &str) -> Arc<dyn ProcessComponent> {
        StepComponent::shared(
            format!("add-folder:{}", path),
            AddFolderStep {
                manager: self.manager.clone(),
                path: path.to_string(),
                created: AtomicBool::new(false),
            },
        )
    }

    /// Share `path` with `friend`: mark it shared in the own profile, then tell the friend.
    pub fn create_share_folder_process(
        &self,
        path: &str,
        friend: UserId,
        permission: Permission,
    ) -> Result<Arc<dyn ProcessComponent>, ComponentError> {
        let process = SequentialProcess::new(format!("share-folder:{}:{}", path, friend));
        process.append(StepComponent::shared(
            "mark-shared",
            ShareFolderStep {
                manager: self.manager.clone(),
                path: path.to_string(),
                friend: friend.clone(),
                permission,
                previous: Mutex::new(None),
            },
        ))?;

        let task = self.task_queue.create_task(
            friend,
            TaskPayload::FolderShared {
                folder: path.to_string(),
                permission,
            },
        );
        process.append(AsyncComponent::wrap(self.task_queue.create_send_process(task)))?;
        Ok(Arc::new(process))
    }

    /// Revoke `friend`'s access to `path` and tell the friend.
    pub fn create_unshare_folder_process(
        &self,
        path: &str,
        friend: UserId,
    ) -> Result<Arc<dyn ProcessComponent>, ComponentError> {
        let process = SequentialProcess::new(format!("unshare-folder:{}:{}", path, friend));
        process.append(StepComponent::shared(
            "mark-unshared",
            UnshareFolderStep {
                manager: self.manager.clone(),
                path: path.to_string(),
                friend: friend.clone(),
                revoked: Mutex::new(None),
            },
        ))?;

        let task = self.task_queue.create_task(
            friend,
            TaskPayload::FolderUnshared {
                folder: path.to_string(),
            },
        );
        process.append(AsyncComponent::wrap(self.task_queue.create_send_process(task)))?;
        Ok(Arc::new(process))
    }
}

fn require_folder(profile: &UserProfile, path: &str) -> Result<(), ProcessExecutionError> {
    match profile.find(path) {
        Some(IndexNode::Folder(_)) => Ok(()),
        Some(IndexNode::File(_)) => Err(ProfileError::NotAFolder(path.to_string()).into()),
        None => Err(ProcessExecutionError::parent_not_found(format!(
            "Folder '{}' does not exist",
            path
        ))),
    }
}

struct AddFolderStep {
    manager: Arc<UserProfileManager>,
    path: String,
    /// Whether this step created the folder (rather than finding it).
    created: AtomicBool,
}

#[async_trait]
impl ProcessStep for AddFolderStep {
    async fn execute(&self) -> Result<(), ProcessExecutionError> {
        let created = AtomicBool::new(false);
        self.manager
            .modify_and_put(&format!("add folder {}", self.path), |mut profile| {
                created.store(!profile.contains(&self.path), Ordering::SeqCst);
                profile.add_folder(&self.path)?;
                Ok(profile)
            })
            .await?;
        self.created
            .store(created.load(Ordering::SeqCst), Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self, _reason: &RollbackReason) {
        if !self.created.swap(false, Ordering::SeqCst) {
            return;
        }
        let removed = self
            .manager
            .modify_and_put(&format!("remove folder {}", self.path), |mut profile| {
                match profile.remove(&self.path) {
                    Ok(_) | Err(ProfileError::NotFound(_)) => Ok(profile),
                    Err(e) => Err(e.into()),
                }
            })
            .await;
        if let Err(e) = removed {
            warn!(path = %self.path, error = %e, "Failed to undo folder creation");
        }
    }
}

struct ShareFolderStep {
    manager: Arc<UserProfileManager>,
    path: String,
    friend: UserId,
    permission: Permission,
    /// Permission the friend held before this share, restored on rollback.
    previous: Mutex<Option<Permission>>,
}

#[async_trait]
impl ProcessStep for ShareFolderStep {
    async fn execute(&self) -> Result<(), ProcessExecutionError> {
        let owner = self.manager.user_id().clone();
        let previous = Mutex::new(None);
        self.manager
            .modify_and_put(
                &format!("share {} with {}", self.path, self.friend),
                |mut profile| {
                    require_folder(&profile, &self.path)?;
                    *previous.lock() = profile
                        .shared_folder(&self.path)
                        .and_then(|s| s.members.get(&self.friend).copied());
                    profile.share(&self.path, owner.clone(), self.friend.clone(), self.permission)?;
                    Ok(profile)
                },
            )
            .await?;
        *self.previous.lock() = previous.into_inner();
        Ok(())
    }

    async fn rollback(&self, _reason: &RollbackReason) {
        let previous = self.previous.lock().take();
        let owner = self.manager.user_id().clone();
        let undone = self
            .manager
            .modify_and_put(
                &format!("undo share {} with {}", self.path, self.friend),
                |mut profile| {
                    match previous {
                        Some(permission) => {
                            profile.share(&self.path, owner.clone(), self.friend.clone(), permission)?
                        }
                        None => match profile.unshare(&self.path, &self.friend) {
                            Ok(()) | Err(ProfileError::NotFound(_)) => {}
                            Err(e) => return Err(e.into()),
                        },
                    }
                    Ok(profile)
                },
            )
            .await;
        if let Err(e) = undone {
            warn!(path = %self.path, friend = %self.friend, error = %e, "Failed to undo share");
        }
    }
}

struct UnshareFolderStep {
    manager: Arc<UserProfileManager>,
    path: String,
    friend: UserId,
    /// Permission the friend held, restored on rollback.
    revoked: Mutex<Option<Permission>>,
}

#[async_trait]
impl ProcessStep for UnshareFolderStep {
    async fn execute(&self) -> Result<(), ProcessExecutionError> {
        let revoked = Mutex::new(None);
        self.manager
            .modify_and_put(
                &format!("unshare {} with {}", self.path, self.friend),
                |mut profile| {
                    require_folder(&profile, &self.path)?;
                    let held = profile
                        .shared_folder(&self.path)
                        .and_then(|s| s.members.get(&self.friend).copied());
                    *revoked.lock() = held;
                    if held.is_some() {
                        profile.unshare(&self.path, &self.friend)?;
                    }
                    Ok(profile)
                },
            )
            .await?;
        *self.revoked.lock() = revoked.into_inner();
        Ok(())
    }

    async fn rollback(&self, _reason: &RollbackReason) {
        let Some(permission) = self.revoked.lock().take() else {
            return;
        };
        let owner = self.manager.user_id().clone();
        let restored = self
            .manager
            .modify_and_put(
                &format!("re-share {} with {}", self.path, self.friend),
                |mut profile| {
                    profile.share(&self.path, owner.clone(), self.friend.clone(), permission)?;
                    Ok(profile)
                },
            )
            .await;
        if let Err(e) = restored {
            warn!(path = %self.path, friend = %self.friend, error = %e, "Failed to undo unshare");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::crypto::CryptoProvider;
    use crate::domain::node_config::{TaskQueueConfig, UserProfileConfig};
    use crate::domain::process::{ProcessError, ProcessState};
    use crate::domain::session::SessionIdentity;
    use crate::infrastructure::crypto::Ed25519CryptoProvider;
    use crate::infrastructure::dht::InMemoryDataManager;

    async fn factory(
        store: &InMemoryDataManager,
        user: &str,
    ) -> (ProcessFactory, Arc<UserProfileManager>, Arc<UserProfileTaskQueue>) {
        let crypto: Arc<dyn CryptoProvider> = Arc::new(Ed25519CryptoProvider::new());
        let keys = crypto.generate_key_pair();
        let manager = Arc::new(UserProfileManager::new(
            SessionIdentity::new(UserId::new(user), "127.0.0.1:4622"),
            Arc::new(store.clone()),
            keys.clone(),
            UserProfileConfig::default(),
        ));
        manager
            .create_profile(UserProfile::new(UserId::new(user), keys.public))
            .await
            .unwrap();
        let queue = Arc::new(UserProfileTaskQueue::new(
            manager.clone(),
            Arc::new(store.clone()),
            crypto,
            TaskQueueConfig::default(),
        ));
        (ProcessFactory::new(manager.clone(), queue.clone()), manager, queue)
    }

    /// Stands in for a delivery that fails after the profile was updated.
    struct FailingSend;

    #[async_trait]
    impl ProcessStep for FailingSend {
        async fn execute(&self) -> Result<(), ProcessExecutionError> {
            Err(ProcessExecutionError::put_failed("friend unreachable"))
        }
    }

    fn share_then_fail(
        manager: &Arc<UserProfileManager>,
        friend: &str,
        permission: Permission,
    ) -> SequentialProcess {
        let process = SequentialProcess::new("share-then-fail");
        process
            .append(StepComponent::shared(
                "mark-shared",
                ShareFolderStep {
                    manager: manager.clone(),
                    path: "docs".to_string(),
                    friend: UserId::new(friend),
                    permission,
                    previous: Mutex::new(None),
                },
            ))
            .unwrap();
        process
            .append(StepComponent::shared("send", FailingSend))
            .unwrap();
        process
    }

    #[tokio::test]
    async fn test_share_folder_reaches_friend() {
        let store = InMemoryDataManager::new(Arc::new(Ed25519CryptoProvider::new()));
        let (alice, alice_manager, _) = factory(&store, "alice").await;
        let (_, bob_manager, bob_queue) = factory(&store, "bob").await;

        alice.create_add_folder_process("photos").start().await.unwrap();
        let share = alice
            .create_share_folder_process("photos", UserId::new("bob"), Permission::Write)
            .unwrap();
        share.start().await.unwrap();
        assert_eq!(share.state(), ProcessState::Succeeded);

        let alice_profile = alice_manager.get_profile().await.unwrap().profile;
        let shared = alice_profile.shared_folder("photos").unwrap();
        assert_eq!(shared.members.get(&UserId::new("bob")), Some(&Permission::Write));

        bob_queue.create_drain_process().process.start().await.unwrap();
        let bob_profile = bob_manager.get_profile().await.unwrap().profile;
        assert_eq!(
            bob_profile.shared_folder("photos").unwrap().owner,
            UserId::new("alice")
        );
    }

    #[tokio::test]
    async fn test_share_of_missing_folder_is_parent_not_found() {
        let store = InMemoryDataManager::new(Arc::new(Ed25519CryptoProvider::new()));
        let (alice, _, _) = factory(&store, "alice").await;
        let (_, _, bob_queue) = factory(&store, "bob").await;

        let share = alice
            .create_share_folder_process("nowhere", UserId::new("bob"), Permission::Read)
            .unwrap();
        let err = share.start().await.unwrap_err();

        assert_eq!(err.reason().unwrap().category(), ProcessError::ParentNotFound);
        assert!(bob_queue.pending_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_folder_rollback_keeps_existing_folder() {
        let store = InMemoryDataManager::new(Arc::new(Ed25519CryptoProvider::new()));
        let (alice, manager, _) = factory(&store, "alice").await;

        alice.create_add_folder_process("docs").start().await.unwrap();
        let again = alice.create_add_folder_process("docs");
        again.start().await.unwrap();
        again.compensate(&RollbackReason::new("undo")).await;

        assert!(manager.get_profile().await.unwrap().profile.contains("docs"));
    }

    #[tokio::test]
    async fn test_unshare_revokes_membership() {
        let store = InMemoryDataManager::new(Arc::new(Ed25519CryptoProvider::new()));
        let (alice, manager, _) = factory(&store, "alice").await;
        let (_, _, bob_queue) = factory(&store, "bob").await;

        alice.create_add_folder_process("music").start().await.unwrap();
        alice
            .create_share_folder_process("music", UserId::new("bob"), Permission::Read)
            .unwrap()
            .start()
            .await
            .unwrap();
        alice
            .create_unshare_folder_process("music", UserId::new("bob"))
            .unwrap()
            .start()
            .await
            .unwrap();

        assert!(manager.get_profile().await.unwrap().profile.shared_folder("music").is_none());
        assert_eq!(bob_queue.pending_tasks().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_share_rollback_restores_previous_permission() {
        let store = InMemoryDataManager::new(Arc::new(Ed25519CryptoProvider::new()));
        let (alice, manager, _) = factory(&store, "alice").await;
        alice.create_add_folder_process("docs").start().await.unwrap();
        alice
            .create_share_folder_process("docs", UserId::new("bob"), Permission::Read)
            .unwrap()
            .start()
            .await
            .unwrap();

        let upgrade = share_then_fail(&manager, "bob", Permission::Write);
        upgrade.start().await.unwrap_err();
        assert_eq!(upgrade.state(), ProcessState::Failed);

        let profile = manager.get_profile().await.unwrap().profile;
        let shared = profile.shared_folder("docs").unwrap();
        assert_eq!(shared.members.get(&UserId::new("bob")), Some(&Permission::Read));
    }

    #[tokio::test]
    async fn test_share_rollback_removes_new_member() {
        let store = InMemoryDataManager::new(Arc::new(Ed25519CryptoProvider::new()));
        let (alice, manager, _) = factory(&store, "alice").await;
        alice.create_add_folder_process("docs").start().await.unwrap();

        share_then_fail(&manager, "carol", Permission::Read)
            .start()
            .await
            .unwrap_err();

        let profile = manager.get_profile().await.unwrap().profile;
        assert!(profile.shared_folder("docs").is_none());
    }
}
