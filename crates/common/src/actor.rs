//! Authenticated actors and their roles.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::UserId;

/// Role assigned to an actor by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Retailer,
    Admin,
    WarehouseManager,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Retailer => "retailer",
            Role::Admin => "admin",
            Role::WarehouseManager => "warehouse_manager",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Role::Customer),
            "retailer" => Ok(Role::Retailer),
            "admin" => Ok(Role::Admin),
            "warehouse_manager" => Ok(Role::WarehouseManager),
            other => Err(ParseEnumError::new("role", other)),
        }
    }
}

/// The caller of an operation, as established by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
    /// Compliance verification tier; gates wallet daily limits.
    #[serde(default)]
    pub kyc_level: u8,
}

impl Actor {
    pub fn new(id: UserId, role: Role) -> Self {
        Self {
            id,
            role,
            kyc_level: 0,
        }
    }

    pub fn with_kyc_level(mut self, kyc_level: u8) -> Self {
        self.kyc_level = kyc_level;
        self
    }

    /// The coordinator acting on its own behalf (recovery, compensation).
    pub fn system() -> Self {
        Self::new(UserId::from_uuid(Uuid::nil()), Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
