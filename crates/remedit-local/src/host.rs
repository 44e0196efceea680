//! Execution host backing the manager inside the daemon.

use async_trait::async_trait;
use dashmap::DashMap;
use libremedit::{CommandExecutor, EditorOperations, HostError};
use remedit_protocol::{
    CommandOutput, CommandRequest, EditHook, EditorEvent, RemoteCommand, RemoteSession, SessionId,
};
use std::collections::HashMap;
use std::path::Path;
use tokio::process::Command;
use tokio::sync::broadcast;
use tracing::debug;

/// Runs commands for sessions: reads files directly for local sessions, and
/// through the connection's configured transport for the rest.
pub struct LocalHost {
    transports: HashMap<String, Vec<String>>,
    hooks: DashMap<SessionId, EditHook>,
}

impl LocalHost {
    pub fn new(transports: HashMap<String, Vec<String>>) -> Self {
        Self {
            transports,
            hooks: DashMap::new(),
        }
    }

    pub fn hook(&self, session_id: &str) -> Option<EditHook> {
        self.hooks.get(session_id).map(|hook| hook.value().clone())
    }

    /// Drop whatever the closed session left defined.
    pub fn forget(&self, session_id: &str) {
        self.hooks.remove(session_id);
    }

    async fn read_file(&self, session: &RemoteSession, path: &str) -> Result<Vec<u8>, HostError> {
        if session.location.is_local() {
            return Ok(tokio::fs::read(path).await?);
        }

        let prefix = self
            .transports
            .get(&session.connection)
            .filter(|prefix| !prefix.is_empty())
            .ok_or_else(|| HostError::SessionUnavailable(session.connection.clone()))?;
        let output = Command::new(&prefix[0])
            .args(&prefix[1..])
            .args(["cat", "--", path])
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            return Err(HostError::command(format!(
                "{} exited with {}: {}",
                prefix[0],
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl CommandExecutor for LocalHost {
    async fn execute(
        &self,
        session: &RemoteSession,
        request: CommandRequest,
    ) -> Result<Vec<CommandOutput>, HostError> {
        debug!(session_id = %session.id, dispatch = ?request.dispatch, "executing command");
        match request.command {
            RemoteCommand::ReadFileBytes { path } => {
                let bytes = self.read_file(session, &path).await?;
                Ok(vec![CommandOutput::Bytes(bytes)])
            }
            RemoteCommand::InstallEditHook { hook } => {
                // An existing definition is left in place.
                self.hooks.entry(session.id.clone()).or_insert(hook);
                Ok(Vec::new())
            }
            RemoteCommand::RemoveEditHook { .. } => {
                self.hooks.remove(&session.id);
                Ok(Vec::new())
            }
        }
    }
}

/// Editor front-end made of every connected client.
pub struct EditorBus {
    tx: broadcast::Sender<EditorEvent>,
}

impl EditorBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EditorEvent> {
        self.tx.subscribe()
    }

    fn emit(&self, event: EditorEvent) {
        if self.tx.send(event).is_err() {
            debug!("no editor client connected");
        }
    }
}

#[async_trait]
impl EditorOperations for EditorBus {
    async fn open_file(&self, path: &Path) -> Result<(), HostError> {
        self.emit(EditorEvent::OpenFile {
            path: path.to_path_buf(),
        });
        Ok(())
    }

    async fn close_file(&self, path: &Path) -> Result<(), HostError> {
        self.emit(EditorEvent::CloseFile {
            path: path.to_path_buf(),
        });
        Ok(())
    }
}
