//! API-side authorization guard for queue operations.
//!
//! This enforces authorization at the HTTP boundary (before the queue is
//! touched), while keeping the queue itself auth-agnostic.

use labstore_auth::{AuthzError, Principal, RequiresPermissions, authorize_all};

use crate::context::PrincipalContext;

/// Check authorization for an operation in the current request context.
pub fn authorize_operation<R: RequiresPermissions + ?Sized>(
    principal: &PrincipalContext,
    operation: &R,
) -> Result<(), AuthzError> {
    let principal = Principal::new(principal.principal_id(), principal.roles().to_vec());
    authorize_all(&principal, operation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use labstore_auth::permissions::{JOBS_CLAIM, JOBS_CREATE, JOBS_REAP};
    use labstore_auth::{Permission, PrincipalId, Role};

    struct Op(Vec<Permission>);

    impl RequiresPermissions for Op {
        fn required_permissions(&self) -> &[Permission] {
            &self.0
        }
    }

    fn ctx(roles: Vec<Role>) -> PrincipalContext {
        PrincipalContext::new(PrincipalId::new(), roles)
    }

    #[test]
    fn role_permissions_gate_operations() {
        let claim = Op(vec![JOBS_CLAIM]);
        assert!(authorize_operation(&ctx(vec![Role::ENGINE]), &claim).is_ok());
        assert!(authorize_operation(&ctx(vec![Role::USER]), &claim).is_err());
        assert!(authorize_operation(&ctx(vec![Role::ADMIN]), &Op(vec![JOBS_REAP])).is_ok());
    }

    #[test]
    fn unknown_roles_grant_nothing() {
        let err = authorize_operation(&ctx(vec![Role::new("viewer")]), &Op(vec![JOBS_CREATE]))
            .unwrap_err();
        assert_eq!(err, AuthzError::Forbidden("jobs.create".to_string()));
    }
}
