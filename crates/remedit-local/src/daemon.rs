use anyhow::Result;
use dashmap::DashMap;
use libremedit::hook::{collect_edit_targets, edit_events};
use libremedit::{
    Collaborators, CommandExecutor, EditorOperations, EventBroker, EventSource, RemoteFileManager,
};
use remedit_protocol::{
    ErrorCode, RemoteSession, Request, SessionId, SessionState, SessionTransition,
};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::RuntimeConfig;
use crate::host::{EditorBus, LocalHost};

const EDITOR_EVENT_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session already exists: {0}")]
    SessionAlreadyExists(String),

    #[error("no active session")]
    NoActiveSession,

    #[error("edit function is not installed in session {0}")]
    HookNotInstalled(String),
}

impl DaemonError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DaemonError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            DaemonError::SessionAlreadyExists(_) => ErrorCode::SessionAlreadyExists,
            DaemonError::NoActiveSession => ErrorCode::NoActiveSession,
            DaemonError::HookNotInstalled(_) => ErrorCode::HookNotInstalled,
        }
    }
}

pub fn error_code(err: &anyhow::Error) -> ErrorCode {
    err.downcast_ref::<DaemonError>()
        .map(DaemonError::code)
        .unwrap_or(ErrorCode::ServerError)
}

/// Sessions known to the daemon plus the manager that serves them.
pub struct Daemon {
    manager: RemoteFileManager,
    host: Arc<LocalHost>,
    broker: Arc<EventBroker>,
    editor: Arc<EditorBus>,
    sessions: DashMap<SessionId, RemoteSession>,
    /// Entered sessions, innermost last. Held across a transition so
    /// transitions are handled one at a time.
    stack: Mutex<Vec<SessionId>>,
}

impl Daemon {
    pub fn new(cfg: &RuntimeConfig) -> Self {
        let host = Arc::new(LocalHost::new(cfg.transports.clone()));
        let broker = Arc::new(EventBroker::new());
        let editor = Arc::new(EditorBus::new(EDITOR_EVENT_CAPACITY));
        let manager = RemoteFileManager::new(
            &cfg.manager,
            Collaborators {
                executor: Arc::clone(&host) as Arc<dyn CommandExecutor>,
                events: Arc::clone(&broker) as Arc<dyn EventSource>,
                editor: Arc::clone(&editor) as Arc<dyn EditorOperations>,
            },
        );
        Self {
            manager,
            host,
            broker,
            editor,
            sessions: DashMap::new(),
            stack: Mutex::new(Vec::new()),
        }
    }

    pub fn editor(&self) -> &EditorBus {
        &self.editor
    }

    pub fn cache_root(&self) -> &Path {
        self.manager.cache_root()
    }

    /// Handle everything except `shutdown`, which belongs to the connection
    /// loop.
    pub async fn handle(&self, req: Request) -> Result<Option<Value>> {
        match req {
            Request::SessionOpen { session } => {
                let session_id = session.id.clone();
                self.open_session(session)?;
                Ok(Some(json!({"session_id": session_id})))
            }
            Request::SessionClose { session_id } => {
                self.close_session(&session_id).await?;
                Ok(Some(json!({"session_id": session_id})))
            }
            Request::Enter { session_id } => {
                self.enter(&session_id).await?;
                Ok(Some(json!({"session_id": session_id})))
            }
            Request::Exit => {
                let left = self.exit().await?;
                Ok(Some(json!({"session_id": left})))
            }
            Request::Fetch { session_id, path } => {
                let session = self.session(&session_id)?;
                let local = self.manager.fetch_remote_file(&path, &session).await;
                Ok(Some(json!({"local_path": local})))
            }
            Request::CreateTemp {
                session_id,
                name,
                contents,
            } => {
                let session = self.session(&session_id)?;
                let local = self
                    .manager
                    .create_temporary_file(&name, contents.as_bytes(), &session)
                    .await;
                Ok(Some(json!({"local_path": local})))
            }
            Request::MappedPath { session_id, path } => {
                let session = self.session(&session_id)?;
                let mapped = self.manager.get_mapped_path(&path, &session);
                Ok(Some(json!({"path": mapped})))
            }
            Request::IsUnderCacheRoot { path } => Ok(Some(
                json!({"under_cache_root": self.manager.is_under_cache_root(&path)}),
            )),
            Request::Edit {
                session_id,
                patterns,
            } => {
                let files = self.edit(&session_id, patterns).await?;
                Ok(Some(json!({"files": files})))
            }
            Request::Shutdown => Ok(None),
        }
    }

    fn session(&self, session_id: &str) -> Result<RemoteSession, DaemonError> {
        self.sessions
            .get(session_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| DaemonError::SessionNotFound(session_id.to_string()))
    }

    fn open_session(&self, session: RemoteSession) -> Result<(), DaemonError> {
        if self.sessions.contains_key(&session.id) {
            return Err(DaemonError::SessionAlreadyExists(session.id));
        }
        self.broker.register(&session.id);
        info!(session_id = %session.id, location = ?session.location, connection = %session.connection, "session opened");
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn close_session(&self, session_id: &str) -> Result<(), DaemonError> {
        let (_, session) = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| DaemonError::SessionNotFound(session_id.to_string()))?;
        self.broker.set_state(session_id, SessionState::Closed);

        let mut stack = self.stack.lock().await;
        if stack.last().map(String::as_str) == Some(session_id) {
            stack.pop();
            let current = self.top(&stack);
            self.manager
                .handle_transition(&SessionTransition::exit(Some(session), current))
                .await;
        } else {
            stack.retain(|id| id != session_id);
        }
        drop(stack);

        self.broker.remove(session_id);
        self.host.forget(session_id);
        info!(session_id = %session_id, "session closed");
        Ok(())
    }

    async fn enter(&self, session_id: &str) -> Result<(), DaemonError> {
        let session = self.session(session_id)?;
        let mut stack = self.stack.lock().await;
        let previous = self.top(&stack);
        stack.push(session.id.clone());
        self.manager
            .handle_transition(&SessionTransition::enter(previous, session))
            .await;
        Ok(())
    }

    async fn exit(&self) -> Result<SessionId, DaemonError> {
        let mut stack = self.stack.lock().await;
        let left = stack.pop().ok_or(DaemonError::NoActiveSession)?;
        let previous = self.session(&left).ok();
        let current = self.top(&stack);
        self.manager
            .handle_transition(&SessionTransition::exit(previous, current))
            .await;
        Ok(left)
    }

    fn top(&self, stack: &[SessionId]) -> Option<RemoteSession> {
        stack.last().and_then(|id| self.session(id).ok())
    }

    /// Run the edit function in `session_id`: raise one open-file event per
    /// readable file matching `patterns`.
    async fn edit(&self, session_id: &str, patterns: Vec<String>) -> Result<Vec<String>> {
        self.session(session_id)?;
        let hook = self
            .host
            .hook(session_id)
            .ok_or_else(|| DaemonError::HookNotInstalled(session_id.to_string()))?;

        let targets = tokio::task::spawn_blocking(move || collect_edit_targets(&patterns)).await?;
        let files: Vec<String> = targets
            .iter()
            .map(|target| target.path.to_string_lossy().into_owned())
            .collect();
        for event in edit_events(&hook.source_identifier, targets) {
            self.broker.publish(session_id, event);
        }
        Ok(files)
    }
}
