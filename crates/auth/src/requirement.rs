//! Requirement sets and their canonical cache keys.

use std::collections::BTreeSet;

use crate::{Permission, Role};

/// Action-side authorization contract.
///
/// Implement this on commands/actions that require roles or permissions; the
/// enforcing side checks it before dispatching.
pub trait RequiresAuthorization {
    fn required_roles(&self) -> &[Role] {
        &[]
    }

    fn required_permissions(&self) -> &[Permission] {
        &[]
    }
}

/// The roles and permissions a caller demands for one action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
    roles: Vec<Role>,
    permissions: Vec<Permission>,
}

impl Requirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(roles: &[Role], permissions: &[Permission]) -> Self {
        Self {
            roles: roles.to_vec(),
            permissions: permissions.to_vec(),
        }
    }

    pub fn role(mut self, role: impl Into<Role>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn permission(mut self, permission: impl Into<Permission>) -> Self {
        self.permissions.push(permission.into());
        self
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty() && self.permissions.is_empty()
    }

    pub fn key(&self) -> RequirementKey {
        RequirementKey::from_parts(&self.roles, &self.permissions)
    }
}

impl RequiresAuthorization for Requirements {
    fn required_roles(&self) -> &[Role] {
        &self.roles
    }

    fn required_permissions(&self) -> &[Permission] {
        &self.permissions
    }
}

/// Canonical encoding of a requirement set.
///
/// Sorted, deduplicated, lower-cased union of the required names. Each name
/// carries its kind so a role and a permission with the same spelling stay
/// distinct requirements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequirementKey(Vec<String>);

impl RequirementKey {
    pub fn from_parts(roles: &[Role], permissions: &[Permission]) -> Self {
        let parts: BTreeSet<String> = roles
            .iter()
            .map(|r| format!("role:{}", r.normalized()))
            .chain(
                permissions
                    .iter()
                    .map(|p| format!("perm:{}", p.normalized())),
            )
            .collect();
        Self(parts.into_iter().collect())
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl core::fmt::Display for RequirementKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn roles(names: &[&str]) -> Vec<Role> {
        names.iter().map(|n| Role::new(n.to_string())).collect()
    }

    fn perms(names: &[&str]) -> Vec<Permission> {
        names.iter().map(|n| Permission::new(n.to_string())).collect()
    }

    #[test]
    fn key_ignores_order_case_and_duplicates() {
        let a = RequirementKey::from_parts(&roles(&["admin", "Inspector"]), &perms(&["edit_users"]));
        let b = RequirementKey::from_parts(
            &roles(&["INSPECTOR", "admin", "Admin"]),
            &perms(&["Edit_Users", "edit_users"]),
        );
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "perm:edit_users,role:admin,role:inspector");
    }

    #[test]
    fn role_and_permission_with_same_name_do_not_collide() {
        let as_role = RequirementKey::from_parts(&roles(&["audit"]), &[]);
        let as_perm = RequirementKey::from_parts(&[], &perms(&["audit"]));
        assert_ne!(as_role, as_perm);
    }

    #[test]
    fn builder_matches_from_parts() {
        let built = Requirements::new().role("admin").permission("edit_users");
        assert_eq!(
            built.key(),
            RequirementKey::from_parts(&roles(&["admin"]), &perms(&["edit_users"]))
        );
        assert!(!built.is_empty());
        assert!(Requirements::new().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: reordering and re-casing the required names never
        /// changes the key.
        #[test]
        fn key_is_invariant_under_permutation_and_case(
            names in prop::collection::vec("[a-z_]{1,12}", 0..8),
            upper_mask in prop::collection::vec(any::<bool>(), 8),
        ) {
            let original: Vec<Role> = names.iter().map(|n| Role::new(n.clone())).collect();

            let mut shuffled: Vec<Role> = names
                .iter()
                .zip(upper_mask.iter())
                .map(|(n, upper)| {
                    if *upper { Role::new(n.to_uppercase()) } else { Role::new(n.clone()) }
                })
                .collect();
            shuffled.reverse();

            prop_assert_eq!(
                RequirementKey::from_parts(&original, &[]),
                RequirementKey::from_parts(&shuffled, &[])
            );
        }
    }
}
