use axum::http::StatusCode;

use labstore_auth::{Permission, RequiresPermissions};

use crate::app::errors;
use crate::context::PrincipalContext;

/// Small helper wrapper to associate required permissions with a queue operation.
pub struct OpAuth {
    pub operation: &'static str,
    pub required: Vec<Permission>,
}

impl OpAuth {
    pub fn new(operation: &'static str, required: Permission) -> Self {
        Self {
            operation,
            required: vec![required],
        }
    }
}

impl RequiresPermissions for OpAuth {
    fn required_permissions(&self) -> &[Permission] {
        &self.required
    }
}

/// Reject the request with 403 unless the principal holds every permission `op` needs.
pub fn check(principal: &PrincipalContext, op: &OpAuth) -> Result<(), axum::response::Response> {
    crate::authz::authorize_operation(principal, op).map_err(|e| {
        tracing::debug!(operation = op.operation, error = %e, "operation denied");
        errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string())
    })
}
