use std::path::PathBuf;
use tracing::warn;

use remedit_protocol::{
    CommandRequest, EditHook, EventArg, RemoteCommand, RemoteEvent, RemoteSession,
    SessionLocation,
};

/// Shape of the edit hook for a session, one case per location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookShape {
    /// Events are raised on our own channel; nothing to forward.
    Local,
    LocalProcess,
    Remote,
    /// Nested host: installed through the shared execution context.
    Attached,
}

impl HookShape {
    pub fn for_session(session: &RemoteSession) -> Self {
        match session.location {
            SessionLocation::Local => HookShape::Local,
            SessionLocation::LocalProcess => HookShape::LocalProcess,
            SessionLocation::Remote => HookShape::Remote,
            SessionLocation::Attached => HookShape::Attached,
        }
    }

    pub fn forwards_events(self) -> bool {
        !matches!(self, HookShape::Local)
    }

    /// Paths named by events are readable here as they are.
    pub fn opens_paths_directly(self) -> bool {
        matches!(self, HookShape::Local | HookShape::LocalProcess)
    }

    pub fn install_request(self, source_identifier: &str, function_name: &str) -> CommandRequest {
        let command = RemoteCommand::InstallEditHook {
            hook: EditHook {
                source_identifier: source_identifier.to_string(),
                function_name: function_name.to_string(),
                forward: self.forwards_events(),
            },
        };
        match self {
            HookShape::Attached => CommandRequest::shared(command),
            HookShape::Local | HookShape::LocalProcess | HookShape::Remote => {
                CommandRequest::dedicated(command)
            }
        }
    }

    pub fn remove_request(self, source_identifier: &str, function_name: &str) -> CommandRequest {
        CommandRequest::dedicated(RemoteCommand::RemoveEditHook {
            source_identifier: source_identifier.to_string(),
            function_name: function_name.to_string(),
        })
    }
}

/// A file picked by the edit function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditTarget {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

/// Body of the edit function for hosts that run it against a filesystem they
/// can read: expand every pattern, skip directories, read each match raw.
pub fn collect_edit_targets(patterns: &[String]) -> Vec<EditTarget> {
    let mut targets = Vec::new();
    for pattern in patterns {
        let matches = match glob::glob(pattern) {
            Ok(matches) => matches,
            Err(err) => {
                warn!(pattern = %pattern, err = %err, "invalid edit pattern");
                continue;
            }
        };
        for entry in matches {
            let path = match entry {
                Ok(path) => path,
                Err(err) => {
                    warn!(pattern = %pattern, err = %err, "unreadable edit match");
                    continue;
                }
            };
            if path.is_dir() {
                continue;
            }
            let path = std::fs::canonicalize(&path).unwrap_or(path);
            match std::fs::read(&path) {
                Ok(bytes) => targets.push(EditTarget { path, bytes }),
                Err(err) => warn!(path = %path.display(), err = %err, "could not read edit target"),
            }
        }
    }
    targets
}

/// Events the edit function raises for `targets`: `(full path, bytes)` each.
pub fn edit_events(source_identifier: &str, targets: Vec<EditTarget>) -> Vec<RemoteEvent> {
    targets
        .into_iter()
        .map(|target| {
            RemoteEvent::new(
                source_identifier,
                vec![
                    EventArg::Text(target.path.to_string_lossy().into_owned()),
                    EventArg::Bytes(target.bytes),
                ],
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use remedit_protocol::{Dispatch, REMOTE_SESSION_OPEN_FILE};

    fn session(location: SessionLocation) -> RemoteSession {
        RemoteSession::new("s", location, "host")
    }

    #[test]
    fn shape_per_location() {
        let cases = [
            (SessionLocation::Local, HookShape::Local, false, Dispatch::Dedicated),
            (
                SessionLocation::LocalProcess,
                HookShape::LocalProcess,
                true,
                Dispatch::Dedicated,
            ),
            (SessionLocation::Remote, HookShape::Remote, true, Dispatch::Dedicated),
            (SessionLocation::Attached, HookShape::Attached, true, Dispatch::Shared),
        ];
        for (location, shape, forward, dispatch) in cases {
            let actual = HookShape::for_session(&session(location));
            assert_eq!(actual, shape);
            let request = actual.install_request(REMOTE_SESSION_OPEN_FILE, "psedit");
            assert_eq!(request.dispatch, dispatch, "{location:?}");
            match request.command {
                RemoteCommand::InstallEditHook { hook } => {
                    assert_eq!(hook.forward, forward, "{location:?}");
                    assert_eq!(hook.function_name, "psedit");
                }
                other => panic!("unexpected command {other:?}"),
            }
        }
    }

    #[test]
    fn removal_always_uses_a_dedicated_pipeline() {
        let request = HookShape::Attached.remove_request(REMOTE_SESSION_OPEN_FILE, "psedit");
        assert_eq!(request.dispatch, Dispatch::Dedicated);
        assert_eq!(
            request.command,
            RemoteCommand::RemoveEditHook {
                source_identifier: REMOTE_SESSION_OPEN_FILE.to_string(),
                function_name: "psedit".to_string(),
            }
        );
    }

    #[test]
    fn collects_files_and_skips_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.log"), b"alpha").expect("write");
        std::fs::write(dir.path().join("b.log"), b"beta").expect("write");
        std::fs::create_dir(dir.path().join("c.log")).expect("mkdir");

        let pattern = dir.path().join("*.log").to_string_lossy().into_owned();
        let mut targets = collect_edit_targets(&[pattern]);
        targets.sort_by(|a, b| a.path.cmp(&b.path));

        assert_eq!(targets.len(), 2);
        assert!(targets[0].path.ends_with("a.log"));
        assert_eq!(targets[0].bytes, b"alpha");
        assert_eq!(targets[1].bytes, b"beta");
    }

    #[test]
    fn literal_path_and_bad_pattern() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("single.txt");
        std::fs::write(&file, b"one").expect("write");

        let targets = collect_edit_targets(&[
            "[".to_string(),
            file.to_string_lossy().into_owned(),
        ]);
        assert_eq!(targets.len(), 1);

        let events = edit_events(REMOTE_SESSION_OPEN_FILE, targets);
        assert_eq!(events[0].source_identifier, REMOTE_SESSION_OPEN_FILE);
        assert_eq!(events[0].args[1], EventArg::Bytes(b"one".to_vec()));
        assert!(events[0].args[0].as_text().is_some_and(|p| p.ends_with("single.txt")));
    }
}
