use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::cache_root::{CacheRoot, split_remote_path};

#[derive(Default)]
struct MappingState {
    /// Lowercased path -> counterpart, filled in both directions.
    mappings: HashMap<String, String>,
    opened: BTreeSet<PathBuf>,
}

/// Bidirectional remote/local path map of one session, plus the set of local
/// paths materialized for it.
///
/// A remote path counts as opened when its local counterpart is in the
/// opened set.
pub struct PathMappingTable {
    connection: String,
    cache_root: Arc<CacheRoot>,
    state: Mutex<MappingState>,
}

impl PathMappingTable {
    pub fn new(connection: impl Into<String>, cache_root: Arc<CacheRoot>) -> Self {
        Self {
            connection: connection.into(),
            cache_root,
            state: Mutex::new(MappingState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MappingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Counterpart of `path`. An unmapped remote path gets a fresh local
    /// path; an unmapped path under the cache root has no counterpart.
    pub fn get_mapped_path(&self, path: &str) -> Option<String> {
        if let Some(mapped) = self.state().mappings.get(&path.to_lowercase()) {
            return Some(mapped.clone());
        }
        if self.cache_root.contains(path) {
            return None;
        }

        // Directory creation happens outside the lock.
        let (remote_dir, file_name) = split_remote_path(path);
        let local = match self
            .cache_root
            .allocate_local_path(remote_dir, file_name, &self.connection)
        {
            Ok(local) => local.to_string_lossy().into_owned(),
            Err(err) => {
                warn!(path = %path, err = %err, "could not allocate local cache path");
                return None;
            }
        };

        let mut state = self.state();
        if let Some(mapped) = state.mappings.get(&path.to_lowercase()) {
            return Some(mapped.clone());
        }
        insert_mapping(&mut state, path, &local);
        debug!(remote = %path, local = %local, connection = %self.connection, "path mapped");
        Some(local)
    }

    /// Cache location for a remote path. Paths already on the cache side,
    /// and counterparts that fall outside it, yield `None`.
    pub fn local_path_for(&self, remote_path: &str) -> Option<PathBuf> {
        if self.cache_root.contains(remote_path) {
            return None;
        }
        self.get_mapped_path(remote_path)
            .filter(|local| self.cache_root.contains(local))
            .map(PathBuf::from)
    }

    pub fn add_opened_local_path(&self, path: &Path) {
        self.state().opened.insert(path.to_path_buf());
    }

    pub fn is_remote_opened(&self, remote_path: &str) -> bool {
        let state = self.state();
        state
            .mappings
            .get(&remote_path.to_lowercase())
            .is_some_and(|local| state.opened.contains(Path::new(local)))
    }

    /// Snapshot of the opened local paths, in path order.
    pub fn opened_paths(&self) -> Vec<PathBuf> {
        self.state().opened.iter().cloned().collect()
    }
}

fn insert_mapping(state: &mut MappingState, remote_path: &str, local_path: &str) {
    state
        .mappings
        .insert(local_path.to_lowercase(), remote_path.to_string());
    state
        .mappings
        .insert(remote_path.to_lowercase(), local_path.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_root::path_bucket;

    fn table(root: &Path, connection: &str) -> PathMappingTable {
        PathMappingTable::new(connection, Arc::new(CacheRoot::new(root)))
    }

    #[test]
    fn mapping_is_memoized() {
        let dir = tempfile::tempdir().expect("tempdir");
        let t = table(dir.path(), "hostA");
        let first = t.get_mapped_path("/etc/foo.txt").expect("mapped");
        let second = t.get_mapped_path("/etc/foo.txt").expect("mapped");
        assert_eq!(first, second);
        assert_eq!(
            PathBuf::from(&first),
            dir.path().join(path_bucket("/etc")).join("hostA").join("foo.txt")
        );
    }

    #[test]
    fn mapping_is_bidirectional_and_case_insensitive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let t = table(dir.path(), "hostA");
        let local = t.get_mapped_path("/etc/Foo.txt").expect("mapped");
        assert_eq!(t.get_mapped_path(&local).as_deref(), Some("/etc/Foo.txt"));
        assert_eq!(t.get_mapped_path("/ETC/FOO.TXT"), Some(local));
    }

    #[test]
    fn unknown_cache_path_is_not_synthesized() {
        let dir = tempfile::tempdir().expect("tempdir");
        let t = table(dir.path(), "hostA");
        let orphan = dir.path().join("orphan.txt");
        assert_eq!(t.get_mapped_path(&orphan.to_string_lossy()), None);
    }

    #[test]
    fn opened_tracks_local_counterpart() {
        let dir = tempfile::tempdir().expect("tempdir");
        let t = table(dir.path(), "hostA");
        let local = t.get_mapped_path("/etc/foo.txt").expect("mapped");
        assert!(!t.is_remote_opened("/etc/foo.txt"));

        t.add_opened_local_path(Path::new(&local));
        t.add_opened_local_path(Path::new(&local));

        assert!(t.is_remote_opened("/etc/foo.txt"));
        assert!(!t.is_remote_opened("/etc/bar.txt"));
        assert_eq!(t.opened_paths(), vec![PathBuf::from(local)]);
    }

    #[test]
    fn cache_side_paths_have_no_local_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let t = table(dir.path(), "hostA");
        let local = t.local_path_for("/etc/foo.txt").expect("local path");
        assert!(local.starts_with(dir.path()));

        // The cache copy maps back to "/etc/foo.txt", which must not be used
        // as a place to write.
        assert_eq!(t.local_path_for(&local.to_string_lossy()), None);
        assert_eq!(
            t.local_path_for(&dir.path().join("elsewhere.txt").to_string_lossy()),
            None
        );
    }

    #[test]
    fn racing_lookups_agree_on_one_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let t = Arc::new(table(dir.path(), "hostA"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = Arc::clone(&t);
                std::thread::spawn(move || t.get_mapped_path("/srv/app/config.yml"))
            })
            .collect();
        let results: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("join").expect("mapped"))
            .collect();
        assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    }
}
