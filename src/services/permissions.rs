//! Role-to-permission expansion. A static table covers the built-in roles;
//! an optional catalog can contribute tenant-specific grants. The catalog is
//! best-effort: a miss or failure falls back to the static table alone.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// Optional dynamic grants, looked up per (tenant, role).
#[async_trait]
pub trait RoleCatalog: Send + Sync {
    async fn permissions_for_role(
        &self,
        tenant_id: Uuid,
        role: &str,
    ) -> Result<Vec<String>, anyhow::Error>;
}

fn static_permissions(role: &str) -> &'static [&'static str] {
    match role {
        "owner" => &[
            "tenant:manage",
            "users:manage",
            "billing:manage",
            "sessions:read",
            "sessions:revoke",
        ],
        "admin" => &["users:manage", "sessions:read", "sessions:revoke"],
        "member" => &["sessions:read:self", "profile:manage:self"],
        _ => &[],
    }
}

/// Expand roles into a sorted, de-duplicated permission list. Catalog
/// failures are logged and ignored.
pub async fn merge_permissions(
    catalog: &Option<Arc<dyn RoleCatalog>>,
    tenant_id: Uuid,
    roles: &[String],
) -> Vec<String> {
    let mut merged: BTreeSet<String> = BTreeSet::new();

    for role in roles {
        for perm in static_permissions(role) {
            merged.insert((*perm).to_string());
        }

        if let Some(catalog) = catalog {
            match catalog.permissions_for_role(tenant_id, role).await {
                Ok(extra) => merged.extend(extra),
                Err(e) => {
                    tracing::warn!(role = %role, "Role catalog lookup failed: {}", e);
                }
            }
        }
    }

    merged.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedCatalog;

    #[async_trait]
    impl RoleCatalog for FixedCatalog {
        async fn permissions_for_role(
            &self,
            _tenant_id: Uuid,
            role: &str,
        ) -> Result<Vec<String>, anyhow::Error> {
            if role == "member" {
                Ok(vec!["reports:read".to_string()])
            } else {
                Err(anyhow::anyhow!("unknown role"))
            }
        }
    }

    #[tokio::test]
    async fn test_static_table_alone() {
        let perms = merge_permissions(&None, Uuid::new_v4(), &["member".to_string()]).await;
        assert_eq!(perms, vec!["profile:manage:self", "sessions:read:self"]);
    }

    #[tokio::test]
    async fn test_catalog_merges_and_failures_are_ignored() {
        let catalog: Option<Arc<dyn RoleCatalog>> = Some(Arc::new(FixedCatalog));
        let roles = vec!["member".to_string(), "admin".to_string()];
        let perms = merge_permissions(&catalog, Uuid::new_v4(), &roles).await;

        assert!(perms.contains(&"reports:read".to_string()));
        // The catalog errored for "admin"; static grants still apply.
        assert!(perms.contains(&"users:manage".to_string()));
        // Sorted and unique.
        let mut sorted = perms.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(perms, sorted);
    }

    #[tokio::test]
    async fn test_unknown_role_yields_nothing() {
        let perms = merge_permissions(&None, Uuid::new_v4(), &["visitor".to_string()]).await;
        assert!(perms.is_empty());
    }
}
