use dashmap::DashMap;
use tokio::sync::broadcast;

use remedit_protocol::{RemoteEvent, RemoteSession, SessionId, SessionState};

use crate::host::EventSource;

struct Channel {
    tx: broadcast::Sender<RemoteEvent>,
    state: SessionState,
}

/// In-process event channels, one per registered session.
pub struct EventBroker {
    channels: DashMap<SessionId, Channel>,
    capacity: usize,
}

impl EventBroker {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Create the channel for `session_id`, replacing any previous one.
    pub fn register(&self, session_id: &str) -> broadcast::Sender<RemoteEvent> {
        let (tx, _rx) = broadcast::channel(self.capacity);
        self.channels.insert(
            session_id.to_string(),
            Channel {
                tx: tx.clone(),
                state: SessionState::Opened,
            },
        );
        tx
    }

    /// Deliver `event` to subscribers of `session_id`. Returns how many received it.
    pub fn publish(&self, session_id: &str, event: RemoteEvent) -> usize {
        self.channels
            .get(session_id)
            .and_then(|channel| channel.tx.send(event).ok())
            .unwrap_or(0)
    }

    pub fn set_state(&self, session_id: &str, state: SessionState) {
        if let Some(mut channel) = self.channels.get_mut(session_id) {
            channel.state = state;
        }
    }

    /// Drop the channel; subscribers observe the close.
    pub fn remove(&self, session_id: &str) {
        self.channels.remove(session_id);
    }
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource for EventBroker {
    fn subscribe(&self, session: &RemoteSession) -> Option<broadcast::Receiver<RemoteEvent>> {
        self.channels
            .get(&session.id)
            .map(|channel| channel.tx.subscribe())
    }

    fn state(&self, session: &RemoteSession) -> SessionState {
        self.channels
            .get(&session.id)
            .map(|channel| channel.state)
            .unwrap_or(SessionState::Closed)
    }
}
