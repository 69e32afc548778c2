// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod dispatch;
pub mod job_service;
pub mod lifecycle;
pub mod recovery;
pub mod repository_factory;
pub mod retry;
pub mod sandbox;
pub mod scheduler;
pub mod service_host;

pub use job_service::{JobService, StandardJobService};
pub use lifecycle::{Actor, AgentLifecycleService, StandardAgentLifecycleService};
pub use service_host::ServiceHost;
