//! Interfaces of the collaborators this crate drives: the command channel of
//! a session, its event channel, and the editor front-end.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio::sync::broadcast;

use remedit_protocol::{CommandOutput, CommandRequest, RemoteEvent, RemoteSession, SessionState};

#[derive(Error, Debug)]
pub enum HostError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("command failed: {message}")]
    Command { message: String },
}

impl HostError {
    pub fn command(message: impl Into<String>) -> Self {
        HostError::Command {
            message: message.into(),
        }
    }
}

/// Runs commands against a session and returns their typed results.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(
        &self,
        session: &RemoteSession,
        request: CommandRequest,
    ) -> Result<Vec<CommandOutput>, HostError>;
}

/// Per-session event channel.
pub trait EventSource: Send + Sync {
    /// Receiver for events raised on `session`, or `None` once its channel is gone.
    fn subscribe(&self, session: &RemoteSession) -> Option<broadcast::Receiver<RemoteEvent>>;

    fn state(&self, session: &RemoteSession) -> SessionState;
}

/// File operations of the editor front-end.
#[async_trait]
pub trait EditorOperations: Send + Sync {
    async fn open_file(&self, path: &Path) -> Result<(), HostError>;

    async fn close_file(&self, path: &Path) -> Result<(), HostError>;
}
