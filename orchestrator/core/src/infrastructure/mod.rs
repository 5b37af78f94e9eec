// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod crypto;
pub mod dht;
pub mod event_bus;
pub mod telemetry;

pub use crypto::Ed25519CryptoProvider;
pub use dht::InMemoryDataManager;
pub use event_bus::{DomainEvent, EventBus};
