pub mod paths;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for a session.
pub type SessionId = String;

/// Protocol version announced in the daemon's hello.
pub const PROTOCOL_VERSION: u32 = 1;

/// Event source identifier raised by the edit function on the remote side.
pub const REMOTE_SESSION_OPEN_FILE: &str = "PSESRemoteSessionOpenFile";

/// Name of the remote-invocable edit function.
pub const EDIT_FUNCTION_NAME: &str = "psedit";

/// Maximum size of a single JSON line. File contents travel inline as base64.
pub const MAX_JSON_LINE_BYTES: usize = 64 * 1024 * 1024;

/// Where a session executes relative to this process.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionLocation {
    /// Runs directly in this process.
    Local,
    /// Runs in a local subprocess.
    LocalProcess,
    /// Runs on a remote host.
    Remote,
    /// Attached to a nested or already-running host.
    Attached,
}

impl SessionLocation {
    /// Files seen by a local session are readable here without a transfer.
    pub fn is_local(self) -> bool {
        matches!(self, SessionLocation::Local | SessionLocation::LocalProcess)
    }
}

/// Identity of a session as seen by this subsystem.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteSession {
    pub id: SessionId,
    pub location: SessionLocation,
    /// Connection descriptor, e.g. a computer name. Disambiguates cached files.
    pub connection: String,
}

impl RemoteSession {
    pub fn new(
        id: impl Into<SessionId>,
        location: SessionLocation,
        connection: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            location,
            connection: connection.into(),
        }
    }
}

/// Liveness of a session's connection.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Opened,
    Closed,
    Broken,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransitionAction {
    Enter,
    Exit,
}

/// Notification that the active session changed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionTransition {
    pub previous: Option<RemoteSession>,
    pub current: Option<RemoteSession>,
    pub action: TransitionAction,
}

impl SessionTransition {
    pub fn enter(previous: Option<RemoteSession>, current: RemoteSession) -> Self {
        Self {
            previous,
            current: Some(current),
            action: TransitionAction::Enter,
        }
    }

    pub fn exit(previous: Option<RemoteSession>, current: Option<RemoteSession>) -> Self {
        Self {
            previous,
            current,
            action: TransitionAction::Exit,
        }
    }
}

/// How a command reaches the session.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Dispatch {
    /// Through the execution context shared with the user's own commands.
    Shared,
    /// Through a pipeline created only for this command.
    Dedicated,
}

/// Registration of the edit function and its event emitter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EditHook {
    pub source_identifier: String,
    pub function_name: String,
    /// Forward raised events to the caller's event channel.
    pub forward: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum RemoteCommand {
    /// Read the whole file as raw bytes.
    ReadFileBytes { path: String },
    /// Register the emitter, then define the edit function unless it already exists.
    InstallEditHook { hook: EditHook },
    /// Remove the edit function if defined and every subscriber of the source.
    RemoveEditHook {
        source_identifier: String,
        function_name: String,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: RemoteCommand,
    pub dispatch: Dispatch,
}

impl CommandRequest {
    pub fn shared(command: RemoteCommand) -> Self {
        Self {
            command,
            dispatch: Dispatch::Shared,
        }
    }

    pub fn dedicated(command: RemoteCommand) -> Self {
        Self {
            command,
            dispatch: Dispatch::Dedicated,
        }
    }
}

/// One typed result produced by a command.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CommandOutput {
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    Text(String),
    Null,
}

/// Argument carried by a remote event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EventArg {
    Text(String),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    Null,
}

impl EventArg {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            EventArg::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Event raised on a session's event channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoteEvent {
    pub source_identifier: String,
    pub args: Vec<EventArg>,
}

impl RemoteEvent {
    pub fn new(source_identifier: impl Into<String>, args: Vec<EventArg>) -> Self {
        Self {
            source_identifier: source_identifier.into(),
            args,
        }
    }
}

/// Instruction for the editor front-end.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EditorEvent {
    OpenFile { path: PathBuf },
    CloseFile { path: PathBuf },
}

/// Client-to-daemon requests sent as JSON lines over the Unix socket.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    SessionOpen {
        session: RemoteSession,
    },
    SessionClose {
        session_id: SessionId,
    },
    Enter {
        session_id: SessionId,
    },
    Exit,
    Fetch {
        session_id: SessionId,
        path: String,
    },
    CreateTemp {
        session_id: SessionId,
        name: String,
        contents: String,
    },
    MappedPath {
        session_id: SessionId,
        path: String,
    },
    IsUnderCacheRoot {
        path: String,
    },
    Edit {
        session_id: SessionId,
        patterns: Vec<String>,
    },
    Shutdown,
}

/// Daemon-to-client responses.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// First line on every connection.
    Hello {
        protocol_version: u32,
        cache_root: PathBuf,
    },
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    Error {
        message: String,
        code: ErrorCode,
    },
    Editor {
        event: EditorEvent,
    },
}

impl Response {
    pub fn hello(cache_root: impl Into<PathBuf>) -> Self {
        Response::Hello {
            protocol_version: PROTOCOL_VERSION,
            cache_root: cache_root.into(),
        }
    }

    pub fn ok(data: Option<serde_json::Value>) -> Self {
        Response::Ok { data }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
            code,
        }
    }
}

/// Error codes for structured error handling.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    SessionNotFound,
    SessionAlreadyExists,
    NoActiveSession,
    HookNotInstalled,
    InvalidRequest,
    ServerError,
}

/// Base64 encoding for byte arrays in JSON.
mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
