// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # User Profile Tasks
//!
//! Cross-user effects ("you were granted access to a shared folder") packaged
//! as queued instructions. A task is stored under the recipient's location in
//! the `USER-PROFILE-TASK` domain, keyed by its creation timestamp, so the
//! recipient's queue is simply the set of stored tasks in ascending key order.
//!
//! Tasks are never mutated in place: created by the sender, fetched, applied
//! and removed by the recipient.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::crypto::KeyPair;
use crate::domain::process::ProcessExecutionError;
use crate::domain::session::UserId;
use crate::domain::store::{ContentKey, StoreKey, USER_PROFILE_TASK_DOMAIN};
use crate::domain::user_profile::{Permission, ProfileError, UserProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the recipient has to do to their own profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskPayload {
    /// The sender shared a folder with the recipient.
    FolderShared {
        folder: String,
        permission: Permission,
    },
    /// The sender revoked the recipient's access to a folder.
    FolderUnshared { folder: String },
    /// A file appeared in (or was updated in) a folder shared with the recipient.
    SharedFileAdded {
        folder: String,
        file_name: String,
        digest: String,
    },
    /// A file was deleted from a folder shared with the recipient.
    SharedFileDeleted { folder: String, file_name: String },
}

impl TaskPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskPayload::FolderShared { .. } => "folder_shared",
            TaskPayload::FolderUnshared { .. } => "folder_unshared",
            TaskPayload::SharedFileAdded { .. } => "shared_file_added",
            TaskPayload::SharedFileDeleted { .. } => "shared_file_deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfileTask {
    pub id: TaskId,
    pub sender: UserId,
    pub recipient: UserId,
    pub created_at: DateTime<Utc>,
    pub content_key: ContentKey,
    pub payload: TaskPayload,
    /// Protection keys of the stored task; the recipient uses them to remove it.
    pub protection_keys: KeyPair,
}

impl UserProfileTask {
    pub fn new(
        sender: UserId,
        recipient: UserId,
        payload: TaskPayload,
        protection_keys: KeyPair,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: TaskId::new(),
            sender,
            recipient,
            created_at,
            content_key: ContentKey::from_timestamp(created_at),
            payload,
            protection_keys,
        }
    }

    /// Where this task lives in the store.
    pub fn store_key(&self) -> StoreKey {
        StoreKey::new(
            self.recipient.as_str(),
            USER_PROFILE_TASK_DOMAIN,
            self.content_key.clone(),
        )
    }

    /// Apply the task's effect to the recipient's profile.
    pub fn apply(&self, mut profile: UserProfile) -> Result<UserProfile, ProcessExecutionError> {
        match &self.payload {
            TaskPayload::FolderShared { folder, permission } => {
                profile.add_folder(folder)?;
                profile.share(folder, self.sender.clone(), self.recipient.clone(), *permission)?;
            }
            TaskPayload::FolderUnshared { folder } => {
                match profile.remove(folder) {
                    Ok(_) | Err(ProfileError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            TaskPayload::SharedFileAdded {
                folder,
                file_name,
                digest,
            } => {
                profile.add_file(&format!("{}/{}", folder, file_name), digest.clone())?;
            }
            TaskPayload::SharedFileDeleted { folder, file_name } => {
                match profile.remove(&format!("{}/{}", folder, file_name)) {
                    Ok(_) | Err(ProfileError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(profile)
    }
}
