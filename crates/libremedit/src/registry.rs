use dashmap::DashMap;
use std::sync::Arc;

use remedit_protocol::{RemoteSession, SessionId};

use crate::cache_root::CacheRoot;
use crate::mappings::PathMappingTable;

/// One [`PathMappingTable`] per session, created on first lookup.
///
/// Tables outlive their sessions: cached files stay valid by path.
pub struct SessionRegistry {
    cache_root: Arc<CacheRoot>,
    tables: DashMap<SessionId, Arc<PathMappingTable>>,
}

impl SessionRegistry {
    pub fn new(cache_root: Arc<CacheRoot>) -> Self {
        Self {
            cache_root,
            tables: DashMap::new(),
        }
    }

    pub fn get_table(&self, session: &RemoteSession) -> Arc<PathMappingTable> {
        self.tables
            .entry(session.id.clone())
            .or_insert_with(|| {
                Arc::new(PathMappingTable::new(
                    session.connection.clone(),
                    Arc::clone(&self.cache_root),
                ))
            })
            .clone()
    }

    /// Existing table for `session_id`, without creating one.
    pub fn find_table(&self, session_id: &str) -> Option<Arc<PathMappingTable>> {
        self.tables.get(session_id).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remedit_protocol::SessionLocation;

    #[test]
    fn tables_are_created_once_per_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = SessionRegistry::new(Arc::new(CacheRoot::new(dir.path())));
        let a = RemoteSession::new("a", SessionLocation::Remote, "hostA");
        let b = RemoteSession::new("b", SessionLocation::Remote, "hostB");

        assert!(registry.find_table("a").is_none());
        let first = registry.get_table(&a);
        let again = registry.get_table(&a);
        assert!(Arc::ptr_eq(&first, &again));

        let other = registry.get_table(&b);
        assert!(!Arc::ptr_eq(&first, &other));
        assert!(Arc::ptr_eq(&other, &registry.find_table("b").expect("table b")));
    }

    #[test]
    fn sessions_do_not_share_mappings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = SessionRegistry::new(Arc::new(CacheRoot::new(dir.path())));
        let a = RemoteSession::new("a", SessionLocation::Remote, "hostA");
        let b = RemoteSession::new("b", SessionLocation::Remote, "hostB");

        let local_a = registry
            .get_table(&a)
            .get_mapped_path("/etc/foo.txt")
            .expect("mapped");
        let local_b = registry
            .get_table(&b)
            .get_mapped_path("/etc/foo.txt")
            .expect("mapped");
        assert_ne!(local_a, local_b);

        // b's table has never seen a's local path.
        assert_eq!(registry.get_table(&b).get_mapped_path(&local_a), None);
    }
}
