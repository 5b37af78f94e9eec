// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! User Profile Domain Model
//!
//! The single shared, versioned document per user: folder tree, shared-folder
//! membership, the registered content-protection key and a bounded history of
//! applied cross-user tasks.
//!
//! # Invariants
//! - Paths are `/`-separated and relative to the root folder.
//! - A node can only be added below an existing folder.
//! - A shared path always references an existing folder.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::crypto::PublicKey;
use crate::domain::process::{ProcessError, ProcessExecutionError};
use crate::domain::session::UserId;
use crate::domain::store::VersionKey;
use crate::domain::user_profile_task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    /// Digest of the latest file version (chunks live outside the profile).
    pub digest: String,
    pub version_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FolderNode {
    pub name: String,
    pub children: BTreeMap<String, IndexNode>,
}

impl FolderNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexNode {
    Folder(FolderNode),
    File(FileNode),
}

impl IndexNode {
    pub fn is_folder(&self) -> bool {
        matches!(self, IndexNode::Folder(_))
    }
}

/// Membership of a shared folder as seen from this profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedFolder {
    pub owner: UserId,
    pub members: BTreeMap<UserId, Permission>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    #[error("Parent folder of '{0}' does not exist")]
    ParentNotFound(String),

    #[error("'{0}' does not exist")]
    NotFound(String),

    #[error("'{0}' is not a folder")]
    NotAFolder(String),

    #[error("Invalid path '{0}'")]
    InvalidPath(String),
}

impl From<ProfileError> for ProcessExecutionError {
    fn from(err: ProfileError) -> Self {
        let category = match err {
            ProfileError::ParentNotFound(_) => ProcessError::ParentNotFound,
            _ => ProcessError::Failed,
        };
        ProcessExecutionError::new(category, err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    /// Public key registered against the profile location; puts must be signed with its pair.
    pub protection_key: PublicKey,
    pub root: FolderNode,
    #[serde(default)]
    pub shares: BTreeMap<String, SharedFolder>,
    #[serde(default)]
    applied_tasks: VecDeque<TaskId>,
}

/// A profile together with the version it was fetched at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedProfile {
    pub profile: UserProfile,
    pub version: VersionKey,
}

fn split_path(path: &str) -> Result<Vec<&str>, ProfileError> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() || parts.iter().any(|p| *p == "." || *p == "..") {
        return Err(ProfileError::InvalidPath(path.to_string()));
    }
    Ok(parts)
}

impl UserProfile {
    pub fn new(user_id: UserId, protection_key: PublicKey) -> Self {
        Self {
            user_id,
            protection_key,
            root: FolderNode::new(""),
            shares: BTreeMap::new(),
            applied_tasks: VecDeque::new(),
        }
    }

    pub fn find(&self, path: &str) -> Option<&IndexNode> {
        let parts = split_path(path).ok()?;
        let (last, parents) = parts.split_last()?;
        let mut folder = &self.root;
        for part in parents {
            match folder.children.get(*part) {
                Some(IndexNode::Folder(f)) => folder = f,
                _ => return None,
            }
        }
        folder.children.get(*last)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.find(path).is_some()
    }

    fn parent_mut(&mut self, path: &str) -> Result<(&mut FolderNode, String), ProfileError> {
        let parts = split_path(path)?;
        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| ProfileError::InvalidPath(path.to_string()))?;
        let mut folder = &mut self.root;
        for part in parents {
            match folder.children.get_mut(*part) {
                Some(IndexNode::Folder(f)) => folder = f,
                _ => return Err(ProfileError::ParentNotFound(path.to_string())),
            }
        }
        Ok((folder, last.to_string()))
    }

    /// Add a folder. Adding an existing folder is a no-op.
    pub fn add_folder(&mut self, path: &str) -> Result<(), ProfileError> {
        let (parent, name) = self.parent_mut(path)?;
        match parent.children.get(&name) {
            Some(IndexNode::Folder(_)) => Ok(()),
            Some(IndexNode::File(_)) => Err(ProfileError::NotAFolder(path.to_string())),
            None => {
                parent
                    .children
                    .insert(name.clone(), IndexNode::Folder(FolderNode::new(name)));
                Ok(())
            }
        }
    }

    /// Add a file or record a new version of an existing one.
    pub fn add_file(&mut self, path: &str, digest: impl Into<String>) -> Result<(), ProfileError> {
        let digest = digest.into();
        let (parent, name) = self.parent_mut(path)?;
        match parent.children.get_mut(&name) {
            Some(IndexNode::File(file)) => {
                file.digest = digest;
                file.version_count += 1;
                Ok(())
            }
            Some(IndexNode::Folder(_)) => Err(ProfileError::InvalidPath(path.to_string())),
            None => {
                parent.children.insert(
                    name.clone(),
                    IndexNode::File(FileNode {
                        name,
                        digest,
                        version_count: 1,
                    }),
                );
                Ok(())
            }
        }
    }

    /// Remove a node and any share rooted at or below it.
    pub fn remove(&mut self, path: &str) -> Result<IndexNode, ProfileError> {
        let (parent, name) = self.parent_mut(path)?;
        let removed = parent
            .children
            .remove(&name)
            .ok_or_else(|| ProfileError::NotFound(path.to_string()))?;
        let normalized = split_path(path)?.join("/");
        self.shares
            .retain(|shared, _| shared != &normalized && !shared.starts_with(&format!("{}/", normalized)));
        Ok(removed)
    }

    /// Grant `member` access to the folder at `path`.
    pub fn share(
        &mut self,
        path: &str,
        owner: UserId,
        member: UserId,
        permission: Permission,
    ) -> Result<(), ProfileError> {
        match self.find(path) {
            Some(IndexNode::Folder(_)) => {}
            Some(IndexNode::File(_)) => return Err(ProfileError::NotAFolder(path.to_string())),
            None => return Err(ProfileError::NotFound(path.to_string())),
        }
        let key = split_path(path)?.join("/");
        self.shares
            .entry(key)
            .or_insert_with(|| SharedFolder {
                owner,
                members: BTreeMap::new(),
            })
            .members
            .insert(member, permission);
        Ok(())
    }

    /// Revoke `member`'s access; the share disappears with its last member.
    pub fn unshare(&mut self, path: &str, member: &UserId) -> Result<(), ProfileError> {
        let key = split_path(path)?.join("/");
        let shared = self
            .shares
            .get_mut(&key)
            .ok_or_else(|| ProfileError::NotFound(path.to_string()))?;
        shared.members.remove(member);
        if shared.members.is_empty() {
            self.shares.remove(&key);
        }
        Ok(())
    }

    pub fn shared_folder(&self, path: &str) -> Option<&SharedFolder> {
        let key = split_path(path).ok()?.join("/");
        self.shares.get(&key)
    }

    pub fn has_applied_task(&self, id: &TaskId) -> bool {
        self.applied_tasks.contains(id)
    }

    /// Remember an applied task, keeping at most `history` entries.
    pub fn record_applied_task(&mut self, id: TaskId, history: usize) {
        self.applied_tasks.push_back(id);
        while self.applied_tasks.len() > history.max(1) {
            self.applied_tasks.pop_front();
        }
    }

    pub fn applied_task_count(&self) -> usize {
        self.applied_tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> UserProfile {
        UserProfile::new(UserId::new("alice"), PublicKey(vec![1, 2, 3]))
    }

    #[test]
    fn test_add_folder_requires_parent() {
        let mut p = profile();
        assert_eq!(
            p.add_folder("docs/reports"),
            Err(ProfileError::ParentNotFound("docs/reports".to_string()))
        );
        p.add_folder("docs").unwrap();
        p.add_folder("docs/reports").unwrap();
        assert!(p.find("docs/reports").unwrap().is_folder());
    }

    #[test]
    fn test_add_file_bumps_version() {
        let mut p = profile();
        p.add_folder("docs").unwrap();
        p.add_file("docs/a.txt", "d1").unwrap();
        p.add_file("docs/a.txt", "d2").unwrap();
        match p.find("docs/a.txt") {
            Some(IndexNode::File(f)) => {
                assert_eq!(f.digest, "d2");
                assert_eq!(f.version_count, 2);
            }
            other => panic!("unexpected node: {:?}", other),
        }
    }

    #[test]
    fn test_share_and_unshare() {
        let mut p = profile();
        p.add_folder("music").unwrap();
        p.share("music", UserId::new("alice"), UserId::new("bob"), Permission::Write)
            .unwrap();
        assert_eq!(
            p.shared_folder("/music/").unwrap().members.get(&UserId::new("bob")),
            Some(&Permission::Write)
        );

        p.unshare("music", &UserId::new("bob")).unwrap();
        assert!(p.shared_folder("music").is_none());
    }

    #[test]
    fn test_remove_drops_nested_shares() {
        let mut p = profile();
        p.add_folder("a").unwrap();
        p.add_folder("a/b").unwrap();
        p.share("a/b", UserId::new("alice"), UserId::new("bob"), Permission::Read)
            .unwrap();
        p.remove("a").unwrap();
        assert!(p.shares.is_empty());
        assert!(!p.contains("a/b"));
    }

    #[test]
    fn test_applied_task_history_is_bounded() {
        let mut p = profile();
        let ids: Vec<TaskId> = (0..5).map(|_| TaskId::new()).collect();
        for id in &ids {
            p.record_applied_task(*id, 3);
        }
        assert_eq!(p.applied_task_count(), 3);
        assert!(!p.has_applied_task(&ids[0]));
        assert!(p.has_applied_task(&ids[4]));
    }

    #[test]
    fn test_parent_not_found_maps_to_category() {
        let err: ProcessExecutionError = ProfileError::ParentNotFound("x/y".into()).into();
        assert_eq!(err.category, ProcessError::ParentNotFound);
    }
}
