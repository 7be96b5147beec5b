//! Role → capability permission matrix
//!
//! The matrix is built once at start-up and shared read-only. Every role has
//! an explicit entry for every capability; anything that is not in the table
//! is denied.

use crate::auth::Role;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

/// Named capabilities checked by handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    CanViewAllLeads,
    CanViewAllDeals,
    CanConvertLeads,
    CanConvertAllLeads,
    CanUpdateAllLeads,
    CanDeleteAnyData,
    CanManageUsers,
    CanManageSettings,
    CanExportData,
    CanAccessReports,
    CanAccessUserManagement,
}

impl Capability {
    pub const ALL: [Capability; 11] = [
        Capability::CanViewAllLeads,
        Capability::CanViewAllDeals,
        Capability::CanConvertLeads,
        Capability::CanConvertAllLeads,
        Capability::CanUpdateAllLeads,
        Capability::CanDeleteAnyData,
        Capability::CanManageUsers,
        Capability::CanManageSettings,
        Capability::CanExportData,
        Capability::CanAccessReports,
        Capability::CanAccessUserManagement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::CanViewAllLeads => "canViewAllLeads",
            Capability::CanViewAllDeals => "canViewAllDeals",
            Capability::CanConvertLeads => "canConvertLeads",
            Capability::CanConvertAllLeads => "canConvertAllLeads",
            Capability::CanUpdateAllLeads => "canUpdateAllLeads",
            Capability::CanDeleteAnyData => "canDeleteAnyData",
            Capability::CanManageUsers => "canManageUsers",
            Capability::CanManageSettings => "canManageSettings",
            Capability::CanExportData => "canExportData",
            Capability::CanAccessReports => "canAccessReports",
            Capability::CanAccessUserManagement => "canAccessUserManagement",
        }
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("Unknown capability: {}", s))
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference grant for each role. The match is exhaustive over both enums,
/// so adding a role or capability fails to compile until it is assigned.
fn reference_grant(role: Role, capability: Capability) -> bool {
    use Capability::*;

    match role {
        Role::Admin => true,
        Role::Manager => match capability {
            CanViewAllLeads | CanViewAllDeals | CanConvertLeads | CanConvertAllLeads
            | CanUpdateAllLeads | CanExportData | CanAccessReports | CanAccessUserManagement => true,
            CanDeleteAnyData | CanManageUsers | CanManageSettings => false,
        },
        Role::Sales => match capability {
            CanConvertLeads | CanAccessReports => true,
            CanViewAllLeads | CanViewAllDeals | CanConvertAllLeads | CanUpdateAllLeads
            | CanDeleteAnyData | CanManageUsers | CanManageSettings | CanExportData
            | CanAccessUserManagement => false,
        },
        Role::Support => match capability {
            CanViewAllLeads => true,
            CanViewAllDeals | CanConvertLeads | CanConvertAllLeads | CanUpdateAllLeads
            | CanDeleteAnyData | CanManageUsers | CanManageSettings | CanExportData
            | CanAccessReports | CanAccessUserManagement => false,
        },
    }
}

/// Immutable role → capability table
#[derive(Debug, Clone)]
pub struct PermissionMatrix {
    grants: HashMap<Role, HashMap<Capability, bool>>,
}

impl PermissionMatrix {
    /// Build the reference matrix covering every role and capability
    pub fn new() -> Self {
        let grants = Role::ALL
            .iter()
            .map(|&role| {
                let row = Capability::ALL
                    .iter()
                    .map(|&cap| (cap, reference_grant(role, cap)))
                    .collect();
                (role, row)
            })
            .collect();

        Self { grants }
    }

    pub fn has_permission(&self, role: Role, capability: Capability) -> bool {
        self.grants
            .get(&role)
            .and_then(|row| row.get(&capability))
            .copied()
            .unwrap_or(false)
    }

    /// String-keyed lookup; unknown roles or capability names are denied
    pub fn has_permission_named(&self, role: &str, capability: &str) -> bool {
        match (role.parse::<Role>(), capability.parse::<Capability>()) {
            (Ok(role), Ok(capability)) => self.has_permission(role, capability),
            _ => false,
        }
    }

    /// Full grant row for a role, in a stable order
    pub fn grants_for(&self, role: Role) -> BTreeMap<Capability, bool> {
        Capability::ALL
            .iter()
            .map(|&cap| (cap, self.has_permission(role, cap)))
            .collect()
    }
}

impl Default for PermissionMatrix {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn every_role_has_an_explicit_entry_for_every_capability() {
        let matrix = PermissionMatrix::new();
        for role in Role::ALL {
            let row = matrix.grants.get(&role).expect("role row present");
            for cap in Capability::ALL {
                assert!(row.contains_key(&cap), "{role} is missing {cap}");
            }
            assert_eq!(row.len(), Capability::ALL.len());
        }
    }

    #[test]
    fn admin_holds_every_capability() {
        let matrix = PermissionMatrix::new();
        assert!(Capability::ALL
            .iter()
            .all(|&cap| matrix.has_permission(Role::Admin, cap)));
    }

    #[test]
    fn sales_cannot_view_all_leads_but_manager_can() {
        let matrix = PermissionMatrix::new();
        assert!(!matrix.has_permission(Role::Sales, Capability::CanViewAllLeads));
        assert!(matrix.has_permission(Role::Manager, Capability::CanViewAllLeads));
    }

    #[test]
    fn only_admin_manages_users_and_deletes_data() {
        let matrix = PermissionMatrix::new();
        for role in [Role::Manager, Role::Sales, Role::Support] {
            assert!(!matrix.has_permission(role, Capability::CanManageUsers));
            assert!(!matrix.has_permission(role, Capability::CanDeleteAnyData));
        }
    }

    #[test]
    fn named_lookup_fails_closed() {
        let matrix = PermissionMatrix::new();
        assert!(matrix.has_permission_named("admin", "canManageUsers"));
        assert!(!matrix.has_permission_named("superuser", "canManageUsers"));
        assert!(!matrix.has_permission_named("admin", "canLaunchRockets"));
        assert!(!matrix.has_permission_named("", ""));
    }

    #[test]
    fn missing_row_denies() {
        let mut matrix = PermissionMatrix::new();
        matrix.grants.remove(&Role::Admin);
        assert!(!matrix.has_permission(Role::Admin, Capability::CanViewAllLeads));
    }

    #[test]
    fn capability_names_round_trip_through_serde() {
        let json = serde_json::to_string(&Capability::CanAccessUserManagement).unwrap();
        assert_eq!(json, "\"canAccessUserManagement\"");
        assert_eq!(
            "canExportData".parse::<Capability>().unwrap(),
            Capability::CanExportData
        );
    }

    #[test]
    fn grant_row_for_support() {
        let matrix = PermissionMatrix::new();
        let row = matrix.grants_for(Role::Support);
        let granted: Vec<_> = row.into_iter().filter(|(_, v)| *v).map(|(k, _)| k).collect();
        assert_eq!(granted, vec![Capability::CanViewAllLeads]);
    }
}
