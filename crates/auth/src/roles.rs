use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::permissions::{self, Permission};

/// Role identifier carried in access tokens.
///
/// Roles stay opaque strings on the wire; `granted_permissions` is the single
/// place that maps the well-known ones onto job permissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    /// Site administrator: every permission.
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));
    /// Worker engine: claims jobs and reports their progress.
    pub const ENGINE: Role = Role(Cow::Borrowed("engine"));
    /// Regular researcher: submits and inspects jobs.
    pub const USER: Role = Role(Cow::Borrowed("user"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Permissions granted by this role. Unknown roles grant nothing.
    pub fn granted_permissions(&self) -> Vec<Permission> {
        match self.as_str() {
            "admin" => vec![Permission::wildcard()],
            "engine" => vec![
                permissions::JOBS_READ.clone(),
                permissions::JOBS_CLAIM.clone(),
                permissions::JOBS_UPDATE.clone(),
            ],
            "user" => vec![
                permissions::JOBS_READ.clone(),
                permissions::JOBS_CREATE.clone(),
            ],
            _ => Vec::new(),
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_cannot_retry_or_reap() {
        let granted = Role::ENGINE.granted_permissions();
        assert!(granted.contains(&permissions::JOBS_CLAIM));
        assert!(!granted.contains(&permissions::JOBS_RETRY));
        assert!(!granted.contains(&permissions::JOBS_REAP));
    }

    #[test]
    fn unknown_role_grants_nothing() {
        assert!(Role::new("auditor").granted_permissions().is_empty());
    }

    #[test]
    fn role_serializes_as_plain_string() {
        let json = serde_json::to_string(&Role::ADMIN).unwrap();
        assert_eq!(json, "\"admin\"");
    }
}
