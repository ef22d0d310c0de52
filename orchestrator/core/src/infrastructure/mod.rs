// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod store;
pub mod port_allocator;
pub mod process;
pub mod transport;
pub mod repositories;
pub mod event_bus;

pub use event_bus::{DomainEvent, EventBus, EventReceiver};
pub use port_allocator::PortAllocator;
pub use store::LockGuardedStore;
