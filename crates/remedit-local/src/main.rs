mod config;
mod connection;
mod daemon;
mod host;

use anyhow::{Context, Result, ensure};
use clap::Parser;
use remedit_protocol::PROTOCOL_VERSION;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::{RuntimeConfig, load_runtime_config};
use crate::daemon::Daemon;

#[derive(Parser, Debug)]
#[command(author, version, about = "remote file cache daemon for editor sessions")]
pub struct Args {
    /// Unix socket to listen on.
    #[arg(long)]
    socket: Option<PathBuf>,
    /// TOML config file. Defaults to the user config file when it exists.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory holding local copies of remote files. Wiped at startup.
    #[arg(long)]
    cache_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "remedit_local=info,libremedit=info".into()),
        )
        .init();

    let args = Args::parse();
    let cfg = load_runtime_config(&args)?;
    let daemon = Arc::new(Daemon::new(&cfg));
    let listener = bind_socket(&cfg.socket_path)?;

    info!(
        pid = std::process::id(),
        socket = %cfg.socket_path.display(),
        cache_root = %daemon.cache_root().display(),
        protocol_version = PROTOCOL_VERSION,
        "remedit-local started"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut clients = JoinSet::new();
    serve_clients(&listener, &daemon, &cfg, shutdown_rx, &shutdown_tx, &mut clients).await;

    clients.shutdown().await;
    let _ = fs::remove_file(&cfg.socket_path);
    Ok(())
}

/// Bind the daemon socket, replacing a leftover one, readable only by the owner.
fn bind_socket(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    match fs::remove_file(path) {
        Ok(()) => info!(socket = %path.display(), "removed stale socket"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to remove stale socket {}", path.display()));
        }
    }
    let listener =
        UnixListener::bind(path).with_context(|| format!("failed to bind {}", path.display()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(listener)
}

async fn serve_clients(
    listener: &UnixListener,
    daemon: &Arc<Daemon>,
    cfg: &RuntimeConfig,
    mut shutdown_rx: watch::Receiver<bool>,
    shutdown_tx: &watch::Sender<bool>,
    clients: &mut JoinSet<()>,
) {
    loop {
        let stream = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("shutdown requested, no longer accepting clients");
                    return;
                }
                continue;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(err) => {
                    warn!("accept failed: {err}");
                    continue;
                }
            },
            Some(_) = clients.join_next(), if !clients.is_empty() => continue,
        };

        if let Err(err) = verify_peer_uid(&stream, cfg.allowed_uid) {
            warn!("rejected client: {err}");
            continue;
        }
        clients.spawn(connection::serve(
            stream,
            Arc::clone(daemon),
            cfg.outbound_queue,
            shutdown_tx.clone(),
        ));
    }
}

fn verify_peer_uid(stream: &UnixStream, allowed_uid: u32) -> Result<()> {
    let uid = stream
        .peer_cred()
        .context("failed to query peer credentials")?
        .uid();
    ensure!(uid == allowed_uid, "peer uid {uid} is not allowed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_socket_replaces_leftover_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run").join("remedit.sock");
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, b"stale").expect("write");
        let _listener = bind_socket(&path).expect("bind over stale file");

        let mode = fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn bind_socket_creates_missing_parent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a").join("b").join("remedit.sock");
        let listener = bind_socket(&path).expect("bind");
        let client = tokio::spawn({
            let path = path.clone();
            async move { UnixStream::connect(&path).await.expect("connect") }
        });
        listener.accept().await.expect("accept");
        client.await.expect("join client");
    }

    #[tokio::test]
    async fn verify_peer_uid_checks_credentials() {
        let (server, _client) = UnixStream::pair().expect("socket pair");

        // SAFETY: geteuid() has no preconditions.
        let uid = unsafe { libc::geteuid() };
        verify_peer_uid(&server, uid).expect("matching uid passes");
        let err = verify_peer_uid(&server, uid.wrapping_add(1)).expect_err("other uid fails");
        assert!(err.to_string().contains("not allowed"));
    }

    #[test]
    fn args_parse_flags() {
        let args = Args::try_parse_from([
            "remedit-local",
            "--socket",
            "/tmp/r.sock",
            "--cache-root",
            "/tmp/r-cache",
        ])
        .expect("parse");
        assert_eq!(args.socket, Some(PathBuf::from("/tmp/r.sock")));
        assert_eq!(args.cache_root, Some(PathBuf::from("/tmp/r-cache")));
        assert!(args.config.is_none());
    }
}
