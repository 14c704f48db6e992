use crate::session::{SessionEvent, SessionStore};

/// Ask the store to load the current user, unless the application was
/// opened on the public privacy-policy page.
///
/// Returns whether the event was dispatched. Query strings and fragments
/// of `current_path` are ignored.
pub fn fetch_current_user_on_startup(
    store: &dyn SessionStore,
    current_path: &str,
    privacy_policy_path: &str,
) -> bool {
    let path = current_path.split(['?', '#']).next().unwrap_or(current_path);
    if path == privacy_policy_path {
        tracing::debug!(path, "public page, current user not fetched");
        return false;
    }

    store.dispatch(SessionEvent::FetchCurrentUser);
    true
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::session::InMemorySessionStore;
    use crate::storage::MemoryStorage;
    use std::sync::Arc;

    fn store() -> InMemorySessionStore {
        InMemorySessionStore::new(Arc::new(MemoryStorage::new()))
    }

    #[test]
    fn dispatches_on_regular_pages() {
        let store = store();
        let mut events = store.subscribe();

        assert!(fetch_current_user_on_startup(&store, "/dashboard", "/privacy-policy"));
        assert_eq!(events.try_recv().unwrap(), SessionEvent::FetchCurrentUser);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn skipped_on_privacy_policy() {
        let store = store();
        let mut events = store.subscribe();

        assert!(!fetch_current_user_on_startup(&store, "/privacy-policy", "/privacy-policy"));
        assert!(!fetch_current_user_on_startup(
            &store,
            "/privacy-policy?lang=de",
            "/privacy-policy"
        ));
        assert!(events.try_recv().is_err());
    }
}
