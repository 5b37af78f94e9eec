// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod process;
pub mod process_registry;
pub mod session;
pub mod task_queue;
pub mod use_cases;
pub mod user_profile_manager;

// Re-export the entry points for convenience
pub use process::{AsyncComponent, ProcessComponent, ProcessStep, SequentialProcess, StepComponent};
pub use process_registry::{ProcessHandle, ProcessRegistry};
pub use session::{LoginDrain, Session};
pub use task_queue::{DrainProcess, DrainStats, UserProfileTaskQueue};
pub use use_cases::ProcessFactory;
pub use user_profile_manager::UserProfileManager;
