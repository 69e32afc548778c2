// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Audit trail port.
//!
//! Recording is fire-and-forget: implementations must not block the caller
//! and must swallow (and log) their own failures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Agent,
    Job,
    System,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Agent => "agent",
            ResourceType::Job => "job",
            ResourceType::System => "system",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// `None` for transitions the system makes on its own (recovery,
    /// scheduled dispatch).
    pub user_id: Option<UserId>,
    pub action: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub details: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        user_id: Option<UserId>,
        action: impl Into<String>,
        resource_type: ResourceType,
        resource_id: impl ToString,
        details: serde_json::Value,
    ) -> Self {
        Self {
            user_id,
            action: action.into(),
            resource_type,
            resource_id: resource_id.to_string(),
            details,
            recorded_at: Utc::now(),
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}
