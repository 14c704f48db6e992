use crate::session::SessionContext;
use crate::storage::{PersistedStorage, TENANT_ID_KEY};

/// Where a resolved tenant id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantSource {
    Session,
    Storage,
    Fallback,
}

/// Resolve the tenant id for an outbound request.
///
/// Precedence: the live session value, then the persisted value under
/// [`TENANT_ID_KEY`], then `fallback`. Empty strings are skipped.
#[must_use]
pub fn resolve_tenant_id(
    session: &SessionContext,
    storage: Option<&dyn PersistedStorage>,
    fallback: &str,
) -> (String, TenantSource) {
    if let Some(tenant) = session.tenant() {
        return (tenant.to_owned(), TenantSource::Session);
    }

    if let Some(tenant) = storage
        .and_then(|s| s.get(TENANT_ID_KEY))
        .filter(|t| !t.is_empty())
    {
        return (tenant, TenantSource::Storage);
    }

    (fallback.to_owned(), TenantSource::Fallback)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::DEFAULT_TENANT_FALLBACK;
    use crate::storage::MemoryStorage;

    fn storage_with(value: &str) -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage.set(TENANT_ID_KEY, value).unwrap();
        storage
    }

    #[test]
    fn session_value_wins() {
        let storage = storage_with("456");
        let resolved = resolve_tenant_id(
            &SessionContext::for_tenant("123"),
            Some(&storage),
            DEFAULT_TENANT_FALLBACK,
        );
        assert_eq!(resolved, ("123".to_owned(), TenantSource::Session));
    }

    #[test]
    fn storage_used_without_session_value() {
        let storage = storage_with("456");
        let resolved = resolve_tenant_id(
            &SessionContext::default(),
            Some(&storage),
            DEFAULT_TENANT_FALLBACK,
        );
        assert_eq!(resolved, ("456".to_owned(), TenantSource::Storage));
    }

    #[test]
    fn fallback_when_nothing_known() {
        let storage = MemoryStorage::new();
        let resolved = resolve_tenant_id(
            &SessionContext::default(),
            Some(&storage),
            DEFAULT_TENANT_FALLBACK,
        );
        assert_eq!(resolved, ("0".to_owned(), TenantSource::Fallback));

        let resolved = resolve_tenant_id(&SessionContext::default(), None, "0");
        assert_eq!(resolved.0, "0");
    }

    #[test]
    fn empty_values_fall_through() {
        let storage = storage_with("");
        let resolved = resolve_tenant_id(
            &SessionContext::for_tenant(""),
            Some(&storage),
            DEFAULT_TENANT_FALLBACK,
        );
        assert_eq!(resolved, ("0".to_owned(), TenantSource::Fallback));
    }
}
