use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use remedit_protocol::{RemoteEvent, RemoteSession, SessionTransition};

use crate::bridge::EventBridge;
use crate::cache_root::CacheRoot;
use crate::config::RemoteFileConfig;
use crate::fetcher::{self, RemoteFileFetcher};
use crate::host::{CommandExecutor, EditorOperations, EventSource};
use crate::lifecycle::LifecycleCoordinator;
use crate::registry::SessionRegistry;

/// Host services the manager talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub executor: Arc<dyn CommandExecutor>,
    pub events: Arc<dyn EventSource>,
    pub editor: Arc<dyn EditorOperations>,
}

/// Entry point for editor front-ends: maps remote paths into the local cache
/// and keeps the edit hook in step with the active session.
pub struct RemoteFileManager {
    cache_root: Arc<CacheRoot>,
    registry: Arc<SessionRegistry>,
    fetcher: Arc<RemoteFileFetcher>,
    bridge: Arc<EventBridge>,
    lifecycle: LifecycleCoordinator,
}

impl RemoteFileManager {
    /// Build the manager and reset its cache root. Anything left there by an
    /// earlier process is deleted.
    pub fn new(config: &RemoteFileConfig, collaborators: Collaborators) -> Self {
        let cache_root = Arc::new(CacheRoot::new(config.cache_root_path()));
        cache_root.reset();
        info!(root = %cache_root.path().display(), "remote file cache ready");

        let registry = Arc::new(SessionRegistry::new(Arc::clone(&cache_root)));
        let fetcher = Arc::new(RemoteFileFetcher::new(
            Arc::clone(&registry),
            Arc::clone(&collaborators.executor),
        ));
        let bridge = Arc::new(EventBridge::new(
            config,
            Arc::clone(&fetcher),
            collaborators.executor,
            collaborators.events,
            Arc::clone(&collaborators.editor),
        ));
        let lifecycle = LifecycleCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&bridge),
            collaborators.editor,
        );

        Self {
            cache_root,
            registry,
            fetcher,
            bridge,
            lifecycle,
        }
    }

    /// Like [`RemoteFileManager::new`], also installing the hook on the
    /// session that is already active.
    pub async fn start(
        config: &RemoteFileConfig,
        collaborators: Collaborators,
        current: Option<&RemoteSession>,
    ) -> Self {
        let manager = Self::new(config, collaborators);
        if let Some(session) = current {
            manager.bridge.install(session).await;
        }
        manager
    }

    pub fn cache_root(&self) -> &Path {
        self.cache_root.path()
    }

    pub async fn fetch_remote_file(
        &self,
        remote_path: &str,
        session: &RemoteSession,
    ) -> Option<PathBuf> {
        self.fetcher.fetch(remote_path, session).await
    }

    /// Write `contents` directly under the cache root and treat it as opened
    /// by `session`.
    pub async fn create_temporary_file(
        &self,
        name: &str,
        contents: &[u8],
        session: &RemoteSession,
    ) -> Option<PathBuf> {
        let path = self.cache_root.temporary_path(name);
        if let Err(err) = fetcher::write_file(&path, contents).await {
            error!(session_id = %session.id, path = %path.display(), err = %err, "failed to create temporary file");
            return None;
        }
        self.registry
            .get_table(session)
            .add_opened_local_path(&path);
        Some(path)
    }

    pub fn get_mapped_path(&self, path: &str, session: &RemoteSession) -> Option<String> {
        self.registry.get_table(session).get_mapped_path(path)
    }

    pub fn is_under_cache_root(&self, path: &str) -> bool {
        self.cache_root.contains(path)
    }

    pub fn is_remote_opened(&self, remote_path: &str, session: &RemoteSession) -> bool {
        self.registry
            .find_table(&session.id)
            .is_some_and(|table| table.is_remote_opened(remote_path))
    }

    pub fn opened_paths(&self, session: &RemoteSession) -> Vec<PathBuf> {
        self.registry
            .find_table(&session.id)
            .map(|table| table.opened_paths())
            .unwrap_or_default()
    }

    pub async fn handle_transition(&self, transition: &SessionTransition) {
        self.lifecycle.on_transition(transition).await;
    }

    pub async fn handle_event(&self, session: &RemoteSession, event: RemoteEvent) {
        self.bridge.handle_event(session, event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::EventBroker;
    use crate::host::HostError;
    use async_trait::async_trait;
    use remedit_protocol::{CommandOutput, CommandRequest, SessionLocation};

    struct NoopHost;

    #[async_trait]
    impl CommandExecutor for NoopHost {
        async fn execute(
            &self,
            _session: &RemoteSession,
            _request: CommandRequest,
        ) -> Result<Vec<CommandOutput>, HostError> {
            Ok(vec![CommandOutput::Text("remote text".into())])
        }
    }

    #[async_trait]
    impl EditorOperations for NoopHost {
        async fn open_file(&self, _path: &Path) -> Result<(), HostError> {
            Ok(())
        }

        async fn close_file(&self, _path: &Path) -> Result<(), HostError> {
            Ok(())
        }
    }

    fn collaborators() -> Collaborators {
        Collaborators {
            executor: Arc::new(NoopHost),
            events: Arc::new(EventBroker::new()),
            editor: Arc::new(NoopHost),
        }
    }

    #[tokio::test]
    async fn construction_resets_cache_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("cache");
        std::fs::create_dir_all(root.join("stale")).expect("mkdir");
        std::fs::write(root.join("stale/file.txt"), b"old").expect("write");

        let manager = RemoteFileManager::new(&RemoteFileConfig::with_cache_root(&root), collaborators());

        assert!(manager.cache_root().is_dir());
        assert_eq!(std::fs::read_dir(&root).expect("read_dir").count(), 0);
    }

    #[tokio::test]
    async fn temporary_file_is_direct_child_and_opened() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager =
            RemoteFileManager::new(&RemoteFileConfig::with_cache_root(dir.path()), collaborators());
        let session = RemoteSession::new("s", SessionLocation::Remote, "hostA");

        let path = manager
            .create_temporary_file("untitled-1.ps1", b"Get-Date", &session)
            .await
            .expect("temp file");

        assert_eq!(path, dir.path().join("untitled-1.ps1"));
        assert_eq!(std::fs::read(&path).expect("read"), b"Get-Date");
        assert_eq!(manager.opened_paths(&session), vec![path.clone()]);
        assert!(manager.is_under_cache_root(&path.to_string_lossy()));
    }

    #[tokio::test]
    async fn temporary_file_failure_is_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager =
            RemoteFileManager::new(&RemoteFileConfig::with_cache_root(dir.path()), collaborators());
        let session = RemoteSession::new("s", SessionLocation::Remote, "hostA");
        std::fs::create_dir(dir.path().join("taken")).expect("mkdir");

        assert!(manager.create_temporary_file("taken", b"x", &session).await.is_none());
        assert!(manager.opened_paths(&session).is_empty());
    }

    #[tokio::test]
    async fn fetch_and_mapping_go_through_the_same_table() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager =
            RemoteFileManager::new(&RemoteFileConfig::with_cache_root(dir.path()), collaborators());
        let session = RemoteSession::new("s", SessionLocation::Remote, "hostA");

        assert!(!manager.is_remote_opened("/etc/motd", &session));
        let local = manager
            .fetch_remote_file("/etc/motd", &session)
            .await
            .expect("fetched");
        assert!(manager.is_remote_opened("/etc/motd", &session));
        assert_eq!(
            manager.get_mapped_path(&local.to_string_lossy(), &session).as_deref(),
            Some("/etc/motd")
        );
    }
}
