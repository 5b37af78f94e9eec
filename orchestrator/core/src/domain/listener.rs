// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::process::{ProcessId, RollbackReason};

/// Observer of a single process component's outcome.
///
/// Every attached listener receives exactly one of `on_succeeded` /
/// `on_failed`, followed by exactly one `on_finished`. Callbacks run
/// synchronously on the task that completed the component and must not block.
pub trait ProcessListener: Send + Sync {
    fn on_succeeded(&self, _process: ProcessId) {}

    fn on_failed(&self, _process: ProcessId, _reason: &RollbackReason) {}

    fn on_finished(&self, _process: ProcessId) {}
}
