use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Role name the backend assigns to administrators.
const ADMIN_ROLE: &str = "ADMIN";

/// Authenticated user for the current process.
///
/// Loaded once at startup and saved once after login/logout; everything else
/// receives it by reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: Option<u64>,
    pub username: String,
    pub full_name: Option<String>,
    pub role: Role,
    /// Backend module names the role may access (e.g. `COSTOS`).
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Admin,
    Other(String),
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case(ADMIN_ROLE) {
            Role::Admin
        } else {
            Role::Other(value)
        }
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        match value {
            Role::Admin => ADMIN_ROLE.to_string(),
            Role::Other(name) => name,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => f.write_str(ADMIN_ROLE),
            Role::Other(name) => f.write_str(name),
        }
    }
}

/// Something a command needs permission to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    ViewCosts,
    EditCosts,
    ViewReports,
    ViewOrders,
}

impl Capability {
    /// Backend permission module granting this capability to non-admin roles.
    /// `None` means admin only.
    fn module(&self) -> Option<&'static str> {
        match self {
            Capability::ViewCosts => Some("COSTOS"),
            Capability::EditCosts => None,
            Capability::ViewReports => Some("REPORTES"),
            Capability::ViewOrders => Some("PEDIDOS"),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Capability::ViewCosts => "view costs",
            Capability::EditCosts => "edit costs",
            Capability::ViewReports => "view reports",
            Capability::ViewOrders => "view orders",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("not logged in")]
    NotLoggedIn,
    #[error("role {role} may not {}", .capability.label())]
    Forbidden { role: Role, capability: Capability },
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.user.role == Role::Admin
    }

    pub fn can(&self, capability: Capability) -> bool {
        if self.is_admin() {
            return true;
        }
        capability.module().is_some_and(|module| {
            self.user
                .permissions
                .iter()
                .any(|granted| granted.eq_ignore_ascii_case(module))
        })
    }

    pub fn require(&self, capability: Capability) -> Result<(), AccessError> {
        if self.can(capability) {
            Ok(())
        } else {
            Err(AccessError::Forbidden {
                role: self.user.role.clone(),
                capability,
            })
        }
    }
}

/// Access check performed once before a command runs.
pub fn authorize(session: Option<&Session>, capability: Capability) -> Result<&Session, AccessError> {
    let session = session.ok_or(AccessError::NotLoggedIn)?;
    session.require(capability)?;
    Ok(session)
}
