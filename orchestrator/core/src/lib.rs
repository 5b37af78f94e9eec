// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Peerhive Core
//!
//! Process orchestration and user-profile synchronization for a peer-to-peer
//! file sharing node.
//!
//! # Architecture
//!
//! - **domain:** value types, the user profile model and the boundary traits
//!   (`DataManager`, `CryptoProvider`)
//! - **application:** the process framework, the profile manager, the task
//!   queue and the use-case factories
//! - **infrastructure:** in-memory store, ed25519 crypto, event bus, telemetry

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
