// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain model: aggregates, value objects and the ports the application
//! layer drives.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Entities and interfaces with no infrastructure dependencies

pub mod agent;
pub mod audit;
pub mod execution;
pub mod job;
pub mod node_config;
pub mod repository;
pub mod runtime;
pub mod schedule;
