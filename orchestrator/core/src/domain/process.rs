// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Process Value Types
//!
//! Identifiers, lifecycle states and the failure vocabulary shared by every
//! process component.
//!
//! | Type | Role |
//! |------|------|
//! | [`ProcessId`] | Opaque component identity |
//! | [`ProcessState`] | Lifecycle state of a component |
//! | [`ProcessError`] | Machine-readable error category |
//! | [`RollbackReason`] | Why a component entered rollback |
//! | [`ProcessExecutionError`] | Business failure raised by a leaf step |
//! | [`ComponentError`] | Error returned to whoever drives a component |

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Value Objects: Identifiers
// ============================================================================

/// Unique identifier of a process component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(pub Uuid);

impl ProcessId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// The phase a paused component returns to on `resume()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivePhase {
    Running,
    Rollbacking,
}

impl From<ActivePhase> for ProcessState {
    fn from(phase: ActivePhase) -> Self {
        match phase {
            ActivePhase::Running => ProcessState::Running,
            ActivePhase::Rollbacking => ProcessState::Rollbacking,
        }
    }
}

/// Lifecycle state of a process component.
///
/// ```text
/// READY --start--> RUNNING --done--> SUCCEEDED
///                     |  ^
///          failure/   |  | resume
///          cancel     v  |
///                  PAUSED(previous)
///                     |  ^
///                     v  |
///                 ROLLBACKING --done--> FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessState {
    Ready,
    Running,
    Rollbacking,
    Paused { previous: ActivePhase },
    Succeeded,
    Failed,
}

impl ProcessState {
    /// SUCCEEDED and FAILED are never left once reached.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Succeeded | ProcessState::Failed)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, ProcessState::Paused { .. })
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Ready => write!(f, "READY"),
            ProcessState::Running => write!(f, "RUNNING"),
            ProcessState::Rollbacking => write!(f, "ROLLBACKING"),
            ProcessState::Paused { previous: ActivePhase::Running } => write!(f, "PAUSED(RUNNING)"),
            ProcessState::Paused { previous: ActivePhase::Rollbacking } => {
                write!(f, "PAUSED(ROLLBACKING)")
            }
            ProcessState::Succeeded => write!(f, "SUCCEEDED"),
            ProcessState::Failed => write!(f, "FAILED"),
        }
    }
}

// ============================================================================
// Failure vocabulary
// ============================================================================

/// Machine-readable error category carried through the rollback path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessError {
    Failed,
    PutFailed,
    GetFailed,
    ParentNotFound,
    VersionFork,
}

impl ProcessError {
    /// Whether the caller may reasonably retry the whole use case.
    ///
    /// Only a version fork is transient; everything else is structural.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessError::VersionFork)
    }
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessError::Failed => "FAILED",
            ProcessError::PutFailed => "PUT_FAILED",
            ProcessError::GetFailed => "GET_FAILED",
            ProcessError::ParentNotFound => "PARENT_NOT_FOUND",
            ProcessError::VersionFork => "VERSION_FORK",
        };
        write!(f, "{}", s)
    }
}

/// Immutable record of why a component entered rollback.
///
/// Created once at the point of first failure and handed unmodified to every
/// ancestor's rollback and to every listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReason {
    pub hint: String,
    pub component: Option<ProcessId>,
    pub component_name: Option<String>,
    pub cause: Option<ProcessError>,
}

impl RollbackReason {
    pub fn new(hint: impl Into<String>) -> Self {
        Self {
            hint: hint.into(),
            component: None,
            component_name: None,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: ProcessError) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn with_component(mut self, id: ProcessId, name: impl Into<String>) -> Self {
        self.component = Some(id);
        self.component_name = Some(name.into());
        self
    }

    /// Category of the failure; a reason without explicit cause counts as generic.
    pub fn category(&self) -> ProcessError {
        self.cause.unwrap_or(ProcessError::Failed)
    }
}

impl std::fmt::Display for RollbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.component_name {
            Some(name) => write!(f, "[{}] {} (in '{}')", self.category(), self.hint, name),
            None => write!(f, "[{}] {}", self.category(), self.hint),
        }
    }
}

/// Business failure raised by a leaf step that cannot fulfil its contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{category}: {hint}")]
pub struct ProcessExecutionError {
    pub category: ProcessError,
    pub hint: String,
}

impl ProcessExecutionError {
    pub fn new(category: ProcessError, hint: impl Into<String>) -> Self {
        Self {
            category,
            hint: hint.into(),
        }
    }

    pub fn failed(hint: impl Into<String>) -> Self {
        Self::new(ProcessError::Failed, hint)
    }

    pub fn put_failed(hint: impl Into<String>) -> Self {
        Self::new(ProcessError::PutFailed, hint)
    }

    pub fn get_failed(hint: impl Into<String>) -> Self {
        Self::new(ProcessError::GetFailed, hint)
    }

    pub fn parent_not_found(hint: impl Into<String>) -> Self {
        Self::new(ProcessError::ParentNotFound, hint)
    }

    pub fn version_fork(hint: impl Into<String>) -> Self {
        Self::new(ProcessError::VersionFork, hint)
    }

    /// Translate into the rollback record, stamping the originating component.
    pub fn into_reason(self, component: ProcessId, name: &str) -> RollbackReason {
        RollbackReason::new(self.hint)
            .with_cause(self.category)
            .with_component(component, name)
    }
}

/// Errors returned by the component driving interface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComponentError {
    /// Operation attempted in a state that forbids it. Caller error, never retried.
    #[error("Cannot {operation} a component in state {state}")]
    InvalidState {
        operation: &'static str,
        state: ProcessState,
    },

    /// The component rolled back; carries the reason from the first failure.
    #[error("Process failed: {0}")]
    Failed(RollbackReason),

    /// The composite a child was appended to no longer exists.
    #[error("Parent process '{0}' is gone")]
    Detached(String),
}

impl ComponentError {
    pub fn reason(&self) -> Option<&RollbackReason> {
        match self {
            ComponentError::Failed(reason) => Some(reason),
            ComponentError::InvalidState { .. } | ComponentError::Detached(_) => None,
        }
    }
}
