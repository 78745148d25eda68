//! Identity model - the slice of a user profile the security layer reasons about.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Explicit per-user permission grants, `permission string -> granted`.
pub type PermissionMap = HashMap<String, bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Builder,
    Buyer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Builder => "builder",
            Role::Buyer => "buyer",
        }
    }

    /// The privileged role bypasses every permission check.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "builder" => Ok(Role::Builder),
            "buyer" => Ok(Role::Buyer),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// Authenticated principal. Owned by the identity store; only the explicit
/// permission map is ever written back from here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<Role>,
    #[serde(default)]
    pub permissions: Option<PermissionMap>,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            role: None,
            permissions: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_permissions(mut self, permissions: PermissionMap) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Parse a stored role column. Unrecognised values mean "no role".
    pub fn parse_role(raw: Option<&str>) -> Option<Role> {
        raw.and_then(|r| r.parse().ok())
    }

    pub fn explicitly_granted(&self, permission: &str) -> bool {
        self.permissions
            .as_ref()
            .and_then(|map| map.get(permission))
            .copied()
            .unwrap_or(false)
    }
}
