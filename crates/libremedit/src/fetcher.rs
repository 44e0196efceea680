use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, warn};

use remedit_protocol::{CommandOutput, CommandRequest, RemoteCommand, RemoteSession};

use crate::error::RemoteFileError;
use crate::host::CommandExecutor;
use crate::mappings::PathMappingTable;
use crate::registry::SessionRegistry;

/// Pulls remote file content into the cache on demand.
pub struct RemoteFileFetcher {
    registry: Arc<SessionRegistry>,
    executor: Arc<dyn CommandExecutor>,
}

impl RemoteFileFetcher {
    pub fn new(registry: Arc<SessionRegistry>, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { registry, executor }
    }

    /// Local copy of `remote_path`, fetching it once per session.
    /// Failures are logged and yield `None`.
    pub async fn fetch(&self, remote_path: &str, session: &RemoteSession) -> Option<PathBuf> {
        if remote_path.is_empty() {
            return None;
        }

        match self.try_fetch(remote_path, session).await {
            Ok(local) => Some(local),
            Err(RemoteFileError::EmptyContent(path)) => {
                warn!(session_id = %session.id, path = %path, "could not load contents of remote file");
                None
            }
            Err(err @ RemoteFileError::CachePath(_)) => {
                warn!(session_id = %session.id, err = %err, "refusing to fetch");
                None
            }
            Err(err) => {
                error!(session_id = %session.id, path = %remote_path, err = %err, "failed to fetch remote file");
                None
            }
        }
    }

    async fn try_fetch(
        &self,
        remote_path: &str,
        session: &RemoteSession,
    ) -> Result<PathBuf, RemoteFileError> {
        let table = self.registry.get_table(session);
        let local = resolve_local(&table, remote_path)?;

        if table.is_remote_opened(remote_path) {
            debug!(session_id = %session.id, path = %remote_path, "remote file already cached");
            return Ok(local);
        }

        if tokio::fs::try_exists(&local).await? {
            table.add_opened_local_path(&local);
            return Ok(local);
        }

        // No lock is held across the remote call.
        let outputs = self
            .executor
            .execute(
                session,
                CommandRequest::shared(RemoteCommand::ReadFileBytes {
                    path: remote_path.to_string(),
                }),
            )
            .await?;
        let content = first_content(outputs)
            .ok_or_else(|| RemoteFileError::EmptyContent(remote_path.to_string()))?;

        write_file(&local, &content).await?;
        table.add_opened_local_path(&local);
        debug!(session_id = %session.id, path = %remote_path, local = %local.display(), bytes = content.len(), "remote file fetched");
        Ok(local)
    }

    /// Write content received for `remote_path` to its mapped location and
    /// mark it opened, overwriting any earlier copy.
    pub async fn store(
        &self,
        remote_path: &str,
        content: &[u8],
        session: &RemoteSession,
    ) -> Result<PathBuf, RemoteFileError> {
        let table = self.registry.get_table(session);
        let local = resolve_local(&table, remote_path)?;
        write_file(&local, content).await?;
        table.add_opened_local_path(&local);
        Ok(local)
    }
}

fn first_content(outputs: Vec<CommandOutput>) -> Option<Vec<u8>> {
    match outputs.into_iter().next()? {
        CommandOutput::Bytes(bytes) if !bytes.is_empty() => Some(bytes),
        CommandOutput::Text(text) if !text.is_empty() => Some(text.into_bytes()),
        _ => None,
    }
}

fn resolve_local(table: &PathMappingTable, remote_path: &str) -> Result<PathBuf, RemoteFileError> {
    table
        .local_path_for(remote_path)
        .ok_or_else(|| RemoteFileError::CachePath(remote_path.to_string()))
}

/// Write the whole file to a uniquely named sibling, then move it into place.
/// Concurrent writers each persist a complete file; a failed write never
/// leaves a partial file at `path`.
pub(crate) async fn write_file(path: &Path, content: &[u8]) -> io::Result<()> {
    let path = path.to_path_buf();
    let content = content.to_vec();
    tokio::task::spawn_blocking(move || write_file_blocking(&path, &content))
        .await
        .map_err(io::Error::other)?
}

fn write_file_blocking(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".remedit-")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    tmp.write_all(content)?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}
