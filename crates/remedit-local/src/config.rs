use anyhow::{Context, Result};
use libremedit::RemoteFileConfig;
use remedit_protocol::paths;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::Args;

const DEFAULT_OUTBOUND_QUEUE: usize = 1024;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub socket_path: PathBuf,
    pub outbound_queue: usize,
    pub allowed_uid: u32,
    pub manager: RemoteFileConfig,
    /// Connection descriptor to the argv prefix that runs a command there.
    pub transports: HashMap<String, Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    socket_path: Option<PathBuf>,
    outbound_queue: Option<usize>,
    #[serde(default)]
    manager: RemoteFileConfig,
    #[serde(default)]
    transports: HashMap<String, Vec<String>>,
}

pub fn load_runtime_config(args: &Args) -> Result<RuntimeConfig> {
    let file_cfg = match &args.config {
        Some(path) => read_file_config(path)?,
        None => {
            let default = paths::config_path();
            if default.exists() {
                read_file_config(&default)?
            } else {
                FileConfig::default()
            }
        }
    };

    let mut manager = file_cfg.manager;
    if let Some(root) = &args.cache_root {
        manager.cache_root = Some(root.clone());
    }

    let socket_path = args
        .socket
        .clone()
        .or(file_cfg.socket_path)
        .unwrap_or_else(paths::default_socket_path);

    // SAFETY: geteuid() has no preconditions and cannot fail.
    let allowed_uid = unsafe { libc::geteuid() };

    Ok(RuntimeConfig {
        socket_path,
        outbound_queue: file_cfg.outbound_queue.unwrap_or(DEFAULT_OUTBOUND_QUEUE),
        allowed_uid,
        manager,
        transports: file_cfg.transports,
    })
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str::<FileConfig>(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(config: Option<PathBuf>) -> Args {
        Args {
            socket: None,
            config,
            cache_root: None,
        }
    }

    #[test]
    fn file_config_reads_all_tables() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("remedit.toml");
        fs::write(
            &path,
            r#"
socket_path = "/tmp/custom.sock"
outbound_queue = 16

[manager]
cache_root = "/tmp/remedit-cache"
edit_function = "redit"

[transports]
hostA = ["ssh", "-T", "hostA"]
"#,
        )
        .expect("write config");

        let cfg = load_runtime_config(&args(Some(path))).expect("load");
        assert_eq!(cfg.socket_path, PathBuf::from("/tmp/custom.sock"));
        assert_eq!(cfg.outbound_queue, 16);
        assert_eq!(cfg.manager.cache_root_path(), PathBuf::from("/tmp/remedit-cache"));
        assert_eq!(cfg.manager.edit_function, "redit");
        assert_eq!(cfg.manager.source_identifier, "PSESRemoteSessionOpenFile");
        assert_eq!(
            cfg.transports.get("hostA"),
            Some(&vec!["ssh".to_string(), "-T".to_string(), "hostA".to_string()])
        );
    }

    #[test]
    fn flags_override_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("remedit.toml");
        fs::write(&path, "socket_path = \"/tmp/from-file.sock\"\n").expect("write config");

        let mut args = args(Some(path));
        args.socket = Some(PathBuf::from("/tmp/from-flag.sock"));
        args.cache_root = Some(PathBuf::from("/tmp/flag-cache"));
        let cfg = load_runtime_config(&args).expect("load");

        assert_eq!(cfg.socket_path, PathBuf::from("/tmp/from-flag.sock"));
        assert_eq!(cfg.manager.cache_root_path(), PathBuf::from("/tmp/flag-cache"));
        assert_eq!(cfg.outbound_queue, DEFAULT_OUTBOUND_QUEUE);
    }

    #[test]
    fn unreadable_config_is_an_error() {
        let err = load_runtime_config(&args(Some(PathBuf::from("/nonexistent/remedit.toml"))))
            .expect_err("missing file should fail");
        assert!(err.to_string().contains("failed to read config"));
    }
}
