use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use remedit_protocol::{EventArg, RemoteEvent, RemoteSession, SessionId, SessionState};

use crate::config::RemoteFileConfig;
use crate::error::RemoteFileError;
use crate::fetcher::RemoteFileFetcher;
use crate::hook::HookShape;
use crate::host::{CommandExecutor, EditorOperations, EventSource};

/// Live subscription to a session's open-file events. Dropping it stops the
/// forwarding task.
pub struct HookSubscription {
    task: JoinHandle<()>,
}

impl Drop for HookSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct OpenFileHandler {
    fetcher: Arc<RemoteFileFetcher>,
    editor: Arc<dyn EditorOperations>,
    source_identifier: String,
}

impl OpenFileHandler {
    async fn handle(&self, session: &RemoteSession, event: RemoteEvent) {
        if !event
            .source_identifier
            .eq_ignore_ascii_case(&self.source_identifier)
        {
            return;
        }

        let local = match self.resolve(session, event.args).await {
            Ok(local) => local,
            Err(err) => {
                warn!(session_id = %session.id, err = %err, "dropping open-file event");
                return;
            }
        };

        if let Err(err) = self.editor.open_file(&local).await {
            warn!(session_id = %session.id, path = %local.display(), err = %err, "editor failed to open file");
        }
    }

    async fn resolve(
        &self,
        session: &RemoteSession,
        args: Vec<EventArg>,
    ) -> Result<PathBuf, RemoteFileError> {
        let remote_path = args
            .first()
            .and_then(EventArg::as_text)
            .ok_or(RemoteFileError::MissingPathArgument)?
            .to_string();
        let content = args.into_iter().nth(1);

        if HookShape::for_session(session).opens_paths_directly() {
            return Ok(PathBuf::from(remote_path));
        }

        let bytes = match content {
            None => Vec::new(),
            Some(EventArg::Bytes(bytes)) => bytes,
            Some(_) => return Err(RemoteFileError::UnreadableContent(remote_path)),
        };
        self.fetcher.store(&remote_path, &bytes, session).await
    }
}

/// Bridges open-file events raised by the edit hook on a session into editor
/// `open_file` calls.
pub struct EventBridge {
    handler: Arc<OpenFileHandler>,
    executor: Arc<dyn CommandExecutor>,
    events: Arc<dyn EventSource>,
    edit_function: String,
    subscriptions: DashMap<SessionId, HookSubscription>,
}

impl EventBridge {
    pub fn new(
        config: &RemoteFileConfig,
        fetcher: Arc<RemoteFileFetcher>,
        executor: Arc<dyn CommandExecutor>,
        events: Arc<dyn EventSource>,
        editor: Arc<dyn EditorOperations>,
    ) -> Self {
        Self {
            handler: Arc::new(OpenFileHandler {
                fetcher,
                editor,
                source_identifier: config.source_identifier.clone(),
            }),
            executor,
            events,
            edit_function: config.edit_function.clone(),
            subscriptions: DashMap::new(),
        }
    }

    /// Subscribe to `session`'s events and install the edit hook there.
    /// Returns whether the install command succeeded; failures are logged.
    pub async fn install(&self, session: &RemoteSession) -> bool {
        match self.events.subscribe(session) {
            Some(rx) => {
                let subscription = self.spawn_forwarder(session.clone(), rx);
                // Replacing an older subscription drops it, so a re-entered
                // session keeps exactly one handler.
                self.subscriptions.insert(session.id.clone(), subscription);
            }
            None => {
                warn!(session_id = %session.id, "session has no event channel, open-file events will not arrive");
            }
        }

        let shape = HookShape::for_session(session);
        let request = shape.install_request(&self.handler.source_identifier, &self.edit_function);
        match self.executor.execute(session, request).await {
            Ok(_) => {
                info!(session_id = %session.id, shape = ?shape, "edit hook installed");
                true
            }
            Err(err) => {
                warn!(session_id = %session.id, err = %err, "could not create edit function");
                false
            }
        }
    }

    /// Drop the local subscription and, if the session is still connected,
    /// remove the hook from it. Never fails; problems are logged.
    pub async fn uninstall(&self, session: &RemoteSession) {
        if self.subscriptions.remove(&session.id).is_some() {
            debug!(session_id = %session.id, "open-file subscription released");
        }

        if self.events.state(session) != SessionState::Opened {
            debug!(session_id = %session.id, "session not connected, skipping hook removal");
            return;
        }

        let request = HookShape::for_session(session)
            .remove_request(&self.handler.source_identifier, &self.edit_function);
        if let Err(err) = self.executor.execute(session, request).await {
            warn!(session_id = %session.id, err = %err, "could not remove edit function");
        }
    }

    /// Handle one event raised on `session`.
    pub async fn handle_event(&self, session: &RemoteSession, event: RemoteEvent) {
        self.handler.handle(session, event).await;
    }

    pub fn is_subscribed(&self, session_id: &str) -> bool {
        self.subscriptions.contains_key(session_id)
    }

    fn spawn_forwarder(
        &self,
        session: RemoteSession,
        mut rx: tokio::sync::broadcast::Receiver<RemoteEvent>,
    ) -> HookSubscription {
        let handler = Arc::clone(&self.handler);
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler.handle(&session, event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(session_id = %session.id, skipped, "open-file events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        HookSubscription { task }
    }
}
