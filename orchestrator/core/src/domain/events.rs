// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::process::{ProcessId, RollbackReason};
use crate::domain::session::UserId;
use crate::domain::user_profile_task::TaskId;
use crate::domain::store::VersionKey;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProcessEvent {
    ProcessStarted {
        process_id: ProcessId,
        name: String,
        started_at: DateTime<Utc>,
    },
    ProcessSucceeded {
        process_id: ProcessId,
        succeeded_at: DateTime<Utc>,
    },
    ProcessFailed {
        process_id: ProcessId,
        reason: RollbackReason,
        failed_at: DateTime<Utc>,
    },
    ProcessFinished {
        process_id: ProcessId,
        finished_at: DateTime<Utc>,
    },
}

impl ProcessEvent {
    pub fn process_id(&self) -> ProcessId {
        match self {
            ProcessEvent::ProcessStarted { process_id, .. }
            | ProcessEvent::ProcessSucceeded { process_id, .. }
            | ProcessEvent::ProcessFailed { process_id, .. }
            | ProcessEvent::ProcessFinished { process_id, .. } => *process_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProfileEvent {
    ProfileCommitted {
        user_id: UserId,
        version: VersionKey,
        attempts: u32,
        committed_at: DateTime<Utc>,
    },
    VersionForkDetected {
        user_id: UserId,
        attempt: u32,
        detected_at: DateTime<Utc>,
    },
    TaskApplied {
        user_id: UserId,
        task_id: TaskId,
        kind: String,
        applied_at: DateTime<Utc>,
    },
}
