//! Authorization module - policy model, store adapter and enforcer
//!
//! This module implements the RBAC core with support for:
//! - Role-based allow/deny rules over (object, action) pairs
//! - Many-to-many user/role assignments
//! - Exact and subtree (`/*`) object patterns
//! - Atomic, snapshot-based reloads driven by a single change notification

mod enforcer;
mod matcher;
mod store;
mod sync;

pub use enforcer::{PolicyEnforcer, Snapshot, SnapshotStats};
pub use matcher::ObjectPattern;
pub use store::{MemoryPolicyStore, PolicyStore, RoleGrant, SqlitePolicyStore};
pub use sync::{PolicyChange, PolicyStatus, PolicySync};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("policy store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("invalid policy record: {0}")]
    InvalidRecord(String),
}

impl From<sqlx::Error> for PolicyError {
    fn from(err: sqlx::Error) -> Self {
        PolicyError::StoreUnavailable(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Effect {
    type Err = PolicyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(Effect::Allow),
            "deny" => Ok(Effect::Deny),
            other => Err(PolicyError::InvalidRecord(format!("unknown effect `{other}`"))),
        }
    }
}

/// An (role, object, action, effect) authorization fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyRule {
    pub role: String,
    pub object: String,
    pub action: String,
    pub effect: Effect,
}

impl PolicyRule {
    pub fn allow(role: impl Into<String>, object: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            object: object.into(),
            action: action.into(),
            effect: Effect::Allow,
        }
    }

    pub fn deny(role: impl Into<String>, object: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            effect: Effect::Deny,
            ..Self::allow(role, object, action)
        }
    }
}

/// A (user, role) membership fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub subject: String,
    pub role: String,
}

impl RoleAssignment {
    pub fn new(subject: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            role: role.into(),
        }
    }
}

/// Everything the store returns in one load. Rule order is load order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySet {
    pub rules: Vec<PolicyRule>,
    pub assignments: Vec<RoleAssignment>,
}

impl PolicySet {
    pub fn new(rules: Vec<PolicyRule>, assignments: Vec<RoleAssignment>) -> Self {
        Self { rules, assignments }
    }
}
