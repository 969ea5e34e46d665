//! Role definitions and permission checks.
//!
//! The same mapping backs permission enforcement on the API and the effective
//! permission list returned by the profile endpoint for frontend gating.

use std::collections::BTreeSet;

/// Role that every new account starts with.
pub const DEFAULT_ROLE: &str = "viewer";

/// Role that short-circuits all permission checks.
pub const ADMIN_ROLE: &str = "admin";

/// Static role -> permission mapping.
///
/// Permission strings are `category:action` pairs; `category:*` grants every
/// action in the category.
pub const ROLE_PERMISSIONS: &[(&str, &[&str])] = &[
    (
        "admin",
        &[
            "admin:*",
            "incidents:read",
            "incidents:manage",
            "traffic:read",
            "reports:read",
            "reports:generate",
            "reports:export",
            "control:read",
            "control:write",
        ],
    ),
    ("traffic_analyst", &["traffic:read", "reports:read", "reports:generate"]),
    (
        "traffic_controller",
        &["traffic:read", "incidents:read", "incidents:manage", "control:read", "control:write", "reports:read"],
    ),
    ("incident_manager", &["incidents:read", "incidents:manage", "reports:read"]),
    ("viewer", &["traffic:read", "reports:read", "incidents:read"]),
];

/// All defined role names.
pub fn role_names() -> Vec<&'static str> {
    ROLE_PERMISSIONS.iter().map(|(name, _)| *name).collect()
}

/// Whether `role` is a defined role.
pub fn is_valid_role(role: &str) -> bool {
    ROLE_PERMISSIONS.iter().any(|(name, _)| *name == role)
}

/// Deduplicated, sorted effective permissions for a set of roles.
pub fn effective_permissions(roles: &[String]) -> Vec<&'static str> {
    let mut perms = BTreeSet::new();

    for role in roles {
        if let Some((_, role_perms)) = ROLE_PERMISSIONS.iter().find(|(name, _)| name == role) {
            perms.extend(role_perms.iter().copied());
        }
    }

    perms.into_iter().collect()
}

/// Check whether a user with `roles` satisfies `required`.
///
/// Semantics follow the permission layer this backend enforces everywhere:
/// - a user holding the admin role is always allowed;
/// - an empty requirement set allows any authenticated user;
/// - otherwise, any one required permission must be held directly or covered
///   by a category wildcard (`incidents:*` covers `incidents:read`).
pub fn has_permission(roles: &[String], required: &[&str]) -> bool {
    if roles.iter().any(|r| r == ADMIN_ROLE) {
        return true;
    }

    if required.is_empty() {
        return true;
    }

    let held = effective_permissions(roles);

    for needed in required {
        if held.contains(needed) {
            return true;
        }

        if let Some((category, _)) = needed.split_once(':') {
            let prefix = format!("{category}:");
            if held.iter().any(|p| p.starts_with(&prefix) && p.ends_with('*')) {
                return true;
            }
        }
    }

    false
}

// Tests.
