// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod audit;
pub mod db;
pub mod repositories;
pub mod runtime;

pub use audit::{PostgresAuditSink, TracingAuditSink};
pub use runtime::DockerEngine;
