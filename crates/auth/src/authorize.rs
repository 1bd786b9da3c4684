use std::collections::HashSet;

use thiserror::Error;

use funil_core::TenantId;

use crate::{Permission, PrincipalId, TenantMembership};

/// A fully resolved principal for authorization decisions.
///
/// Construction of this object is intentionally decoupled from storage and
/// transport: the API derives memberships from claims and a policy source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub active_tenant_id: TenantId,
    pub membership: TenantMembership,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Authorize a principal within its active tenant context.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.active_tenant_id != principal.membership.tenant_id {
        return Err(AuthzError::TenantMismatch);
    }

    let perms: HashSet<&str> = principal
        .membership
        .permissions
        .iter()
        .map(|p| p.as_str())
        .collect();

    if perms.contains("*") || perms.contains(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;

    fn principal(perms: Vec<Permission>) -> Principal {
        let tenant_id = TenantId::new();
        Principal {
            principal_id: PrincipalId::new(),
            active_tenant_id: tenant_id,
            membership: TenantMembership {
                tenant_id,
                roles: vec![Role::new("rep")],
                permissions: perms,
            },
        }
    }

    #[test]
    fn wildcard_grants_everything() {
        let p = principal(vec![Permission::new("*")]);
        assert!(authorize(&p, &Permission::new("organizations.merge")).is_ok());
    }

    #[test]
    fn explicit_permission_grants() {
        let p = principal(vec![Permission::new("deals.update")]);
        assert!(authorize(&p, &Permission::new("deals.update")).is_ok());
    }

    #[test]
    fn missing_permission_is_forbidden() {
        let p = principal(vec![Permission::new("deals.read")]);
        let err = authorize(&p, &Permission::new("campaigns.send")).unwrap_err();
        assert_eq!(err, AuthzError::Forbidden("campaigns.send".to_string()));
    }

    #[test]
    fn tenant_mismatch_is_rejected_before_permissions() {
        let mut p = principal(vec![Permission::new("*")]);
        p.active_tenant_id = TenantId::new();
        let err = authorize(&p, &Permission::new("deals.read")).unwrap_err();
        assert_eq!(err, AuthzError::TenantMismatch);
    }
}
