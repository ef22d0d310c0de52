// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Chorus Rust SDK
//!
//! Build an agent that the Chorus registry can find and the orchestrator can
//! talk to:
//!
//! 1. implement [`AgentHandler`]
//! 2. serve it with [`AgentServer`] on a listener you own, or
//! 3. let [`SelfRegistration`] allocate a port, bind, register, heartbeat and
//!    deregister on shutdown.
//!
//! Routing headers added by the orchestrator never reach the handler.

pub mod handler;
pub mod registration;
pub mod server;

pub use handler::{AgentHandler, IncomingMessage, Reply, ReplyChunk, ReplyStream};
pub use registration::{RunningAgent, SelfRegistration};
pub use server::AgentServer;
