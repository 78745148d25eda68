//! Permission vocabulary and the static role -> permission table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::identity::Role;

/// A `resource:action` permission token from the fixed vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "property:create")]
    PropertyCreate,
    #[serde(rename = "property:read")]
    PropertyRead,
    #[serde(rename = "property:update")]
    PropertyUpdate,
    #[serde(rename = "property:delete")]
    PropertyDelete,
    #[serde(rename = "lead:view")]
    LeadView,
    #[serde(rename = "lead:create")]
    LeadCreate,
    #[serde(rename = "lead:update")]
    LeadUpdate,
    #[serde(rename = "lead:delete")]
    LeadDelete,
    #[serde(rename = "lead:export")]
    LeadExport,
    #[serde(rename = "analytics:view")]
    AnalyticsView,
    #[serde(rename = "payment:create")]
    PaymentCreate,
    #[serde(rename = "payment:view")]
    PaymentView,
    #[serde(rename = "user:manage")]
    UserManage,
    #[serde(rename = "admin:settings")]
    AdminSettings,
    #[serde(rename = "security:manage")]
    SecurityManage,
}

const BUILDER_PERMISSIONS: &[Permission] = &[
    Permission::PropertyCreate,
    Permission::PropertyRead,
    Permission::PropertyUpdate,
    Permission::PropertyDelete,
    Permission::LeadView,
    Permission::LeadUpdate,
    Permission::LeadExport,
    Permission::AnalyticsView,
    Permission::PaymentCreate,
    Permission::PaymentView,
];

const BUYER_PERMISSIONS: &[Permission] = &[
    Permission::PropertyRead,
    Permission::LeadCreate,
    Permission::PaymentCreate,
];

impl Permission {
    pub const ALL: &'static [Permission] = &[
        Permission::PropertyCreate,
        Permission::PropertyRead,
        Permission::PropertyUpdate,
        Permission::PropertyDelete,
        Permission::LeadView,
        Permission::LeadCreate,
        Permission::LeadUpdate,
        Permission::LeadDelete,
        Permission::LeadExport,
        Permission::AnalyticsView,
        Permission::PaymentCreate,
        Permission::PaymentView,
        Permission::UserManage,
        Permission::AdminSettings,
        Permission::SecurityManage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::PropertyCreate => "property:create",
            Permission::PropertyRead => "property:read",
            Permission::PropertyUpdate => "property:update",
            Permission::PropertyDelete => "property:delete",
            Permission::LeadView => "lead:view",
            Permission::LeadCreate => "lead:create",
            Permission::LeadUpdate => "lead:update",
            Permission::LeadDelete => "lead:delete",
            Permission::LeadExport => "lead:export",
            Permission::AnalyticsView => "analytics:view",
            Permission::PaymentCreate => "payment:create",
            Permission::PaymentView => "payment:view",
            Permission::UserManage => "user:manage",
            Permission::AdminSettings => "admin:settings",
            Permission::SecurityManage => "security:manage",
        }
    }

    /// Default permission set of a role. Admin maps to the whole vocabulary,
    /// though the resolver grants it before consulting this table.
    pub fn defaults_for(role: Role) -> &'static [Permission] {
        match role {
            Role::Admin => Permission::ALL,
            Role::Builder => BUILDER_PERMISSIONS,
            Role::Buyer => BUYER_PERMISSIONS,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("Unknown permission: {}", s))
    }
}
