// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod crypto;
pub mod events;
pub mod listener;
pub mod node_config;
pub mod process;
pub mod session;
pub mod store;
pub mod user_profile;
pub mod user_profile_task;
