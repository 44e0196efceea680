use serde::Deserialize;
use std::path::PathBuf;

use remedit_protocol::{EDIT_FUNCTION_NAME, REMOTE_SESSION_OPEN_FILE, paths};

/// Settings for a [`crate::RemoteFileManager`].
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RemoteFileConfig {
    /// Overrides the per-process cache root under the temp directory.
    pub cache_root: Option<PathBuf>,
    pub source_identifier: String,
    pub edit_function: String,
}

impl RemoteFileConfig {
    pub fn with_cache_root(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: Some(cache_root.into()),
            ..Self::default()
        }
    }

    pub fn cache_root_path(&self) -> PathBuf {
        self.cache_root
            .clone()
            .unwrap_or_else(paths::default_cache_root)
    }
}

impl Default for RemoteFileConfig {
    fn default() -> Self {
        Self {
            cache_root: None,
            source_identifier: REMOTE_SESSION_OPEN_FILE.to_string(),
            edit_function: EDIT_FUNCTION_NAME.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RemoteFileConfig;
    use std::path::PathBuf;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: RemoteFileConfig =
            toml::from_str(r#"cache_root = "/var/tmp/remedit-test""#).expect("parse config");
        assert_eq!(cfg.cache_root_path(), PathBuf::from("/var/tmp/remedit-test"));
        assert_eq!(cfg.source_identifier, "PSESRemoteSessionOpenFile");
        assert_eq!(cfg.edit_function, "psedit");
    }

    #[test]
    fn default_root_is_process_scoped() {
        let cfg = RemoteFileConfig::default();
        let root = cfg.cache_root_path();
        let name = root.file_name().and_then(|n| n.to_str()).expect("root name");
        assert_eq!(name, format!("remedit-{}", std::process::id()));
    }
}
