use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are opaque dotted strings (e.g. "jobs.claim"). The wildcard
/// `"*"` grants everything and is only handed out by the admin role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn wildcard() -> Self {
        Self::from_static("*")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

pub const JOBS_READ: Permission = Permission::from_static("jobs.read");
pub const JOBS_CREATE: Permission = Permission::from_static("jobs.create");
pub const JOBS_CLAIM: Permission = Permission::from_static("jobs.claim");
pub const JOBS_UPDATE: Permission = Permission::from_static("jobs.update");
pub const JOBS_RETRY: Permission = Permission::from_static("jobs.retry");
pub const JOBS_REAP: Permission = Permission::from_static("jobs.reap");
