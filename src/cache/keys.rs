//! Cache key convention: `{prefix}:{parts joined by ':'}`.

pub const USER_ROLES: &str = "user:roles";
pub const USER_PERMISSIONS: &str = "user:permissions";
pub const ROLE_USERS: &str = "role:users";
pub const PERMISSION_USERS: &str = "permission:users";

/// Build a key from a prefix and any number of parts.
pub fn build(prefix: &str, parts: &[&str]) -> String {
    let mut key = String::with_capacity(prefix.len() + parts.iter().map(|p| p.len() + 1).sum::<usize>());
    key.push_str(prefix);
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}

/// Glob matching every key under `prefix`.
pub fn family_pattern(prefix: &str) -> String {
    format!("{prefix}:*")
}

pub fn user_roles(user_id: &str) -> String {
    build(USER_ROLES, &[user_id])
}

pub fn user_permissions(user_id: &str) -> String {
    build(USER_PERMISSIONS, &[user_id])
}

pub fn role_users(role_code: &str) -> String {
    build(ROLE_USERS, &[role_code])
}

pub fn permission_users(permission_code: &str) -> String {
    build(PERMISSION_USERS, &[permission_code])
}
