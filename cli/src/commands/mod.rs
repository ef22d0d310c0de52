// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Chorus CLI

pub mod config;
pub mod registry;
pub mod sundown;
pub mod sunrise;
pub mod team_chat;

pub use self::config::ConfigCommand;
pub use self::registry::RegistryCommand;
pub use self::sundown::SundownArgs;
pub use self::sunrise::SunriseArgs;
pub use self::team_chat::TeamChatArgs;

use chrono::{DateTime, Utc};

/// "42s ago", "3m ago", "2h ago", "5d ago".
pub(crate) fn ago(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - at).num_seconds().max(0);
    match seconds {
        s if s < 60 => format!("{}s ago", s),
        s if s < 3_600 => format!("{}m ago", s / 60),
        s if s < 86_400 => format!("{}h ago", s / 3_600),
        s => format!("{}d ago", s / 86_400),
    }
}
