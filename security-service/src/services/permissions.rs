//! Role and per-user permission evaluation.
//!
//! Order: admin bypass, explicit `permission: true` grant, role default
//! table. Every lookup failure denies.

use std::sync::Arc;

use super::error::ServiceError;
use crate::models::{Identity, Permission, PermissionMap, Role};
use crate::store::IdentityStore;

/// Evaluate `permission` against an already loaded identity.
pub fn evaluate(identity: &Identity, permission: &str) -> bool {
    if identity.role.map_or(false, |r| r.is_privileged()) {
        return true;
    }
    let Ok(parsed) = permission.parse::<Permission>() else {
        return false;
    };
    if identity.explicitly_granted(parsed.as_str()) {
        return true;
    }
    identity
        .role
        .map_or(false, |role| Permission::defaults_for(role).contains(&parsed))
}

/// Every vocabulary permission the identity currently holds.
pub fn effective_permissions(identity: &Identity) -> Vec<Permission> {
    Permission::ALL
        .iter()
        .copied()
        .filter(|p| evaluate(identity, p.as_str()))
        .collect()
}

#[derive(Clone)]
pub struct PermissionResolver {
    identities: Arc<dyn IdentityStore>,
}

impl PermissionResolver {
    pub fn new(identities: Arc<dyn IdentityStore>) -> Self {
        Self { identities }
    }

    async fn load(&self, user_id: &str) -> Option<Identity> {
        match self.identities.find_identity(user_id).await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(error = %e, user_id, "Identity lookup failed, denying");
                None
            }
        }
    }

    pub async fn has_permission(&self, user_id: &str, permission: &str) -> bool {
        match self.load(user_id).await {
            Some(identity) => evaluate(&identity, permission),
            None => false,
        }
    }

    pub async fn has_all_permissions(&self, user_id: &str, permissions: &[&str]) -> bool {
        let Some(identity) = self.load(user_id).await else {
            return false;
        };
        permissions.iter().all(|p| evaluate(&identity, p))
    }

    pub async fn has_any_permission(&self, user_id: &str, permissions: &[&str]) -> bool {
        let Some(identity) = self.load(user_id).await else {
            return false;
        };
        permissions.iter().any(|p| evaluate(&identity, p))
    }

    pub async fn has_role(&self, user_id: &str, allowed: &[Role]) -> bool {
        self.load(user_id)
            .await
            .and_then(|i| i.role)
            .map_or(false, |role| allowed.contains(&role))
    }

    /// Set `permission: true` in the user's explicit map. Last writer wins.
    pub async fn grant_permission(
        &self,
        user_id: &str,
        permission: Permission,
    ) -> Result<PermissionMap, ServiceError> {
        self.modify(user_id, |map| {
            map.insert(permission.as_str().to_string(), true);
        })
        .await
    }

    /// Drop the explicit entry; the role default still applies afterwards.
    pub async fn revoke_permission(
        &self,
        user_id: &str,
        permission: Permission,
    ) -> Result<PermissionMap, ServiceError> {
        self.modify(user_id, |map| {
            map.remove(permission.as_str());
        })
        .await
    }

    async fn modify(
        &self,
        user_id: &str,
        change: impl FnOnce(&mut PermissionMap),
    ) -> Result<PermissionMap, ServiceError> {
        let identity = self
            .identities
            .find_identity(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)?;
        let mut map = identity.permissions.unwrap_or_default();
        change(&mut map);
        self.identities.update_permissions(user_id, &map).await?;
        Ok(map)
    }
}
