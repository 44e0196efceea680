use std::path::PathBuf;

/// Returns the default cache root for this process.
pub fn default_cache_root() -> PathBuf {
    std::env::temp_dir().join(format!("remedit-{}", std::process::id()))
}

/// Returns the default socket path for the remedit daemon.
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("remedit.sock")
    } else {
        // SAFETY: getuid() is always safe to call and has no preconditions
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/remedit-{uid}.sock"))
    }
}

/// Returns the config directory path for remedit.
pub fn dirs_path() -> PathBuf {
    if let Ok(config_dir) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(config_dir).join("remedit")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config").join("remedit")
    } else {
        PathBuf::from("/tmp/remedit")
    }
}

/// Returns the config file path for the remedit daemon.
pub fn config_path() -> PathBuf {
    dirs_path().join("config.toml")
}
