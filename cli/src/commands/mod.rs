// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the automa CLI

pub mod agent;
pub mod config;
pub mod daemon;
pub mod job;
pub mod maintenance;

pub use self::agent::AgentCommand;
pub use self::config::ConfigCommand;
pub use self::job::JobCommand;
pub use self::maintenance::MaintenanceCommand;
