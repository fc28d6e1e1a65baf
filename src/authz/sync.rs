use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use super::enforcer::{PolicyEnforcer, SnapshotStats};
use super::store::PolicyStore;
use super::PolicyError;
use crate::utils::utc_now;

/// Why the policy is being reloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyChange {
    Startup,
    Menu { id: i64 },
    Role { id: i64 },
    User { id: i64 },
    Manual,
}

impl fmt::Display for PolicyChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyChange::Startup => f.write_str("startup"),
            PolicyChange::Menu { id } => write!(f, "menu:{id}"),
            PolicyChange::Role { id } => write!(f, "role:{id}"),
            PolicyChange::User { id } => write!(f, "user:{id}"),
            PolicyChange::Manual => f.write_str("manual"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PolicyStatus {
    pub generation: u64,
    pub rules: usize,
    pub assignments: usize,
    pub last_reload_at: Option<DateTime<Utc>>,
    pub last_change: Option<PolicyChange>,
    pub last_error: Option<String>,
}

/// Single entry point for "the policy store changed".
///
/// Each notification loads the full set from the store and publishes it to
/// the enforcer. Notifications are serialized so an older load can never be
/// published over a newer one. A failed load leaves the previous snapshot in
/// place and is recorded in [`PolicyStatus::last_error`].
pub struct PolicySync {
    store: Arc<dyn PolicyStore>,
    enforcer: Arc<PolicyEnforcer>,
    writer: Mutex<()>,
    status: RwLock<PolicyStatus>,
}

impl PolicySync {
    pub fn new(store: Arc<dyn PolicyStore>, enforcer: Arc<PolicyEnforcer>) -> Self {
        Self {
            store,
            enforcer,
            writer: Mutex::new(()),
            status: RwLock::new(PolicyStatus::default()),
        }
    }

    pub fn enforcer(&self) -> &Arc<PolicyEnforcer> {
        &self.enforcer
    }

    /// First load. Callers treat an error here as fatal.
    pub async fn initialize(&self) -> Result<SnapshotStats, PolicyError> {
        self.policy_changed(PolicyChange::Startup).await
    }

    pub async fn policy_changed(&self, change: PolicyChange) -> Result<SnapshotStats, PolicyError> {
        let _writer = self.writer.lock().await;

        match self.store.load_all_policy().await {
            Ok(set) => {
                let stats = self.enforcer.reload(&set.rules, &set.assignments);
                tracing::info!(change = %change, generation = stats.generation, "policy reloaded");

                let mut status = self.status.write().unwrap_or_else(|poisoned| poisoned.into_inner());
                *status = PolicyStatus {
                    generation: stats.generation,
                    rules: stats.rules,
                    assignments: stats.assignments,
                    last_reload_at: Some(utc_now()),
                    last_change: Some(change),
                    last_error: None,
                };
                Ok(stats)
            }
            Err(err) => {
                tracing::error!(
                    change = %change,
                    error = %err,
                    generation = self.enforcer.generation(),
                    "policy reload failed, previous snapshot stays in effect"
                );

                let mut status = self.status.write().unwrap_or_else(|poisoned| poisoned.into_inner());
                status.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    pub fn status(&self) -> PolicyStatus {
        self.status
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
