use std::collections::{BTreeSet, HashSet};

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use fieldbook_core::IdError;

use crate::{Permission, Role};

/// Opaque identity of an authenticated principal, as issued by the identity
/// provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    /// Wraps an identifier without validating it. Prefer `str::parse` for
    /// untrusted input.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl core::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PrincipalId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(IdError::Empty { kind: "PrincipalId" });
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Presentation-only attributes. Never consulted for authorization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayAttributes {
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// The authenticated actor and its claim sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    #[serde(default)]
    pub display: DisplayAttributes,
    #[serde(default)]
    pub roles: BTreeSet<Role>,
    #[serde(default)]
    pub permissions: BTreeSet<Permission>,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

fn active_by_default() -> bool {
    true
}

impl Principal {
    /// An active principal with no roles or permissions.
    pub fn new(id: PrincipalId) -> Self {
        Self {
            id,
            display: DisplayAttributes::default(),
            roles: BTreeSet::new(),
            permissions: BTreeSet::new(),
            active: true,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display.display_name = name.into();
        self
    }

    pub fn with_roles<I, R>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Role>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn with_permissions<I, P>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Permission>,
    {
        self.permissions
            .extend(permissions.into_iter().map(Into::into));
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    /// Lower-cased role names.
    pub fn normalized_roles(&self) -> HashSet<String> {
        self.roles.iter().map(Role::normalized).collect()
    }

    /// Lower-cased permission names.
    pub fn normalized_permissions(&self) -> HashSet<String> {
        self.permissions.iter().map(Permission::normalized).collect()
    }

    pub fn has_role(&self, role: &Role) -> bool {
        let wanted = role.normalized();
        self.roles.iter().any(|r| r.normalized() == wanted)
    }

    pub fn has_permission(&self, permission: &Permission) -> bool {
        let wanted = permission.normalized();
        self.permissions.iter().any(|p| p.normalized() == wanted)
    }

    /// True when anything an authorization decision depends on differs.
    ///
    /// Display attributes are ignored; casing differences are ignored.
    pub fn claims_differ(&self, other: &Principal) -> bool {
        self.active != other.active
            || self.normalized_roles() != other.normalized_roles()
            || self.normalized_permissions() != other.normalized_permissions()
    }
}
