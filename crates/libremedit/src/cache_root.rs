use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Process-lifetime directory tree holding local copies of remote files.
///
/// Remote files land at `<root>/<bucket>/<connection>/<file name>`, where
/// `bucket` is a stable hash of the remote file's directory. Temporary files
/// are direct children of the root.
#[derive(Debug, Clone)]
pub struct CacheRoot {
    root: PathBuf,
}

impl CacheRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Delete whatever a previous process left behind and recreate the root.
    /// Failures are logged; later directory creation surfaces its own errors.
    pub fn reset(&self) {
        if self.root.exists() {
            if let Err(err) = std::fs::remove_dir_all(&self.root) {
                error!(path = %self.root.display(), err = %err, "could not delete cache root");
            }
        }
        if let Err(err) = std::fs::create_dir_all(&self.root) {
            error!(path = %self.root.display(), err = %err, "could not create cache root");
            return;
        }
        debug!(path = %self.root.display(), "cache root reset");
    }

    /// Local path for `file_name` fetched from `remote_dir` over `connection`.
    /// Creates the containing directories.
    pub fn allocate_local_path(
        &self,
        remote_dir: &str,
        file_name: &str,
        connection: &str,
    ) -> io::Result<PathBuf> {
        let dir = self
            .root
            .join(path_bucket(remote_dir))
            .join(path_component(connection));
        std::fs::create_dir_all(&dir)?;
        Ok(dir.join(path_component(file_name)))
    }

    /// Location of a temporary file named `name` directly under the root.
    pub fn temporary_path(&self, name: &str) -> PathBuf {
        self.root.join(path_component(name))
    }

    /// Case-insensitive test whether `path` lies under the root.
    pub fn contains(&self, path: &str) -> bool {
        let root = self.root.to_string_lossy().to_lowercase();
        let root = root.trim_end_matches(is_separator);
        let candidate = path.to_lowercase();
        match candidate.strip_prefix(root) {
            Some(rest) => rest.is_empty() || rest.starts_with(is_separator),
            None => false,
        }
    }
}

/// Stable bucket name for a remote directory.
pub fn path_bucket(remote_dir: &str) -> String {
    let digest = Sha256::digest(remote_dir.as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

/// Split a remote path into its directory and file name. Remote hosts may
/// use either separator, so both are honored.
pub fn split_remote_path(remote_path: &str) -> (&str, &str) {
    match remote_path.rfind(is_separator) {
        Some(idx) => (&remote_path[..idx], &remote_path[idx + 1..]),
        None => ("", remote_path),
    }
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Make `raw` safe to use as a single path component.
fn path_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            other => other,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
