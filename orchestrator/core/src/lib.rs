// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Automa scheduling core
//!
//! Runs user scripts in resource-limited containers, either to completion on
//! a schedule (jobs) or as long-lived detached processes (agents).
//!
//! # Architecture
//!
//! - **domain:** entities, schedules, and the repository/engine/audit ports
//! - **application:** sandbox runner, job scheduler, agent lifecycle, recovery
//! - **infrastructure:** Docker engine, PostgreSQL and in-memory storage,
//!   audit sinks

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
