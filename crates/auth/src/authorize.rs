use thiserror::Error;

use crate::{Permission, Principal};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Operations that declare the permissions a caller must hold.
///
/// The API layer checks these before touching the queue.
pub trait RequiresPermissions {
    fn required_permissions(&self) -> &[Permission];
}

/// Authorize a principal for a single permission.
///
/// - No IO
/// - No panics
/// - Pure policy check
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    let granted = principal
        .permissions
        .iter()
        .any(|p| p.is_wildcard() || p == required);

    if granted {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

/// Authorize every permission an operation requires.
pub fn authorize_all<R: RequiresPermissions + ?Sized>(
    principal: &Principal,
    operation: &R,
) -> Result<(), AuthzError> {
    for perm in operation.required_permissions() {
        authorize(principal, perm)?;
    }
    Ok(())
}
