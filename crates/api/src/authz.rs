//! API-side authorization guard.
//!
//! Enforced at the route boundary, before any store call; domain and infra
//! stay auth-agnostic.

use funil_auth::{authorize, AuthzError, Permission, Principal, TenantMembership};

use crate::context::{PrincipalContext, TenantContext};

/// Check one permission in the current request context.
pub fn require(
    tenant: &TenantContext,
    principal: &PrincipalContext,
    permission: &'static str,
) -> Result<(), AuthzError> {
    let membership = TenantMembership {
        tenant_id: tenant.tenant_id(),
        roles: principal.roles().to_vec(),
        permissions: permissions_from_roles(principal.roles()),
    };

    let principal = Principal {
        principal_id: principal.principal_id(),
        active_tenant_id: tenant.tenant_id(),
        membership,
    };

    authorize(&principal, &Permission::new(permission))
}

/// Role→permission mapping.
///
/// `admin` holds the wildcard; `manager` adds merging, enrichment, AI
/// drafting and reporting on top of the rep set; `rep` covers day-to-day
/// record keeping. Campaign sending stays admin-only.
fn permissions_from_roles(roles: &[funil_auth::Role]) -> Vec<Permission> {
    let mut perms: Vec<Permission> = Vec::new();

    for role in roles {
        match role.as_str() {
            "admin" => return vec![Permission::new("*")],
            "manager" => {
                perms.extend(rep_permissions());
                perms.extend(
                    [
                        "organizations.merge",
                        "organizations.delete",
                        "people.merge",
                        "people.delete",
                        "deals.delete",
                        "enrichment.run",
                        "mail.draft",
                        "mail.send",
                        "reports.read",
                        "campaigns.manage",
                        "tags.manage",
                        "export.run",
                    ]
                    .map(Permission::new),
                );
            }
            "rep" => perms.extend(rep_permissions()),
            _ => {}
        }
    }

    perms
}

fn rep_permissions() -> Vec<Permission> {
    [
        "organizations.read",
        "organizations.create",
        "organizations.update",
        "people.read",
        "people.create",
        "people.update",
        "deals.read",
        "deals.create",
        "deals.update",
        "activities.manage",
        "notes.manage",
        "files.manage",
        "tags.read",
        "inbox.read",
        "inbox.send",
        "profiles.manage",
    ]
    .map(Permission::new)
    .to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use funil_auth::{PrincipalId, Role};
    use funil_core::TenantId;

    fn contexts(role: &'static str) -> (TenantContext, PrincipalContext) {
        (
            TenantContext::new(TenantId::new()),
            PrincipalContext::new(PrincipalId::new(), vec![Role::new(role)]),
        )
    }

    #[test]
    fn admin_can_send_campaigns() {
        let (tenant, principal) = contexts("admin");
        assert!(require(&tenant, &principal, "campaigns.send").is_ok());
    }

    #[test]
    fn manager_cannot_send_campaigns_but_can_merge() {
        let (tenant, principal) = contexts("manager");
        assert!(require(&tenant, &principal, "campaigns.send").is_err());
        assert!(require(&tenant, &principal, "organizations.merge").is_ok());
    }

    #[test]
    fn rep_cannot_merge_or_delete() {
        let (tenant, principal) = contexts("rep");
        assert!(require(&tenant, &principal, "organizations.merge").is_err());
        assert!(require(&tenant, &principal, "organizations.delete").is_err());
        assert!(require(&tenant, &principal, "organizations.create").is_ok());
    }

    #[test]
    fn unknown_roles_grant_nothing() {
        let (tenant, principal) = contexts("intern");
        assert!(require(&tenant, &principal, "organizations.read").is_err());
    }
}
