use std::sync::Arc;
use tracing::{debug, warn};

use remedit_protocol::{RemoteSession, SessionTransition, TransitionAction};

use crate::bridge::EventBridge;
use crate::host::EditorOperations;
use crate::registry::SessionRegistry;

/// Reacts to the host entering or leaving a session.
///
/// Entering installs the edit hook on the new session. Leaving closes every
/// editor buffer the session opened and then removes the hook.
pub struct LifecycleCoordinator {
    registry: Arc<SessionRegistry>,
    bridge: Arc<EventBridge>,
    editor: Arc<dyn EditorOperations>,
}

impl LifecycleCoordinator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        bridge: Arc<EventBridge>,
        editor: Arc<dyn EditorOperations>,
    ) -> Self {
        Self {
            registry,
            bridge,
            editor,
        }
    }

    pub async fn on_transition(&self, transition: &SessionTransition) {
        match transition.action {
            TransitionAction::Enter => match &transition.current {
                Some(session) => {
                    self.bridge.install(session).await;
                }
                None => warn!("enter transition without a current session"),
            },
            TransitionAction::Exit => match &transition.previous {
                Some(session) => self.leave(session).await,
                None => debug!("exit transition without a previous session"),
            },
        }
    }

    async fn leave(&self, session: &RemoteSession) {
        if let Some(table) = self.registry.find_table(&session.id) {
            for path in table.opened_paths() {
                if let Err(err) = self.editor.close_file(&path).await {
                    warn!(session_id = %session.id, path = %path.display(), err = %err, "editor failed to close file");
                }
            }
        }
        self.bridge.uninstall(session).await;
    }
}
