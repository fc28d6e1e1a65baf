use std::sync::Arc;

use axum::extract::Request;

use super::{request_path, Gate};
use crate::authz::PolicyEnforcer;
use crate::errors::AppError;
use crate::jwt::AuthUser;

/// Checks (subject, path, method) against the current policy snapshot.
pub struct AuthorizationGate {
    enforcer: Arc<PolicyEnforcer>,
}

impl AuthorizationGate {
    pub fn new(enforcer: Arc<PolicyEnforcer>) -> Self {
        Self { enforcer }
    }
}

impl Gate for AuthorizationGate {
    fn name(&self) -> &'static str {
        "authorization"
    }

    fn check(&self, request: &mut Request) -> Result<(), AppError> {
        let Some(user) = request.extensions().get::<AuthUser>() else {
            return Err(AppError::MissingCredential);
        };

        // Policy objects are full paths.
        let object = request_path(request);
        let action = request.method().as_str();

        let snapshot = self.enforcer.snapshot();
        if snapshot.enforce(&user.username, object, action) {
            tracing::debug!(
                subject = %user.username,
                object = %object,
                action = %action,
                generation = snapshot.generation(),
                "access granted"
            );
            return Ok(());
        }

        tracing::warn!(
            target: "audit",
            subject = %user.username,
            object = %object,
            action = %action,
            roles = ?snapshot.roles_for(&user.username),
            generation = snapshot.generation(),
            "permission denied"
        );
        Err(AppError::permission_denied(user.username.as_str(), object, action))
    }
}
