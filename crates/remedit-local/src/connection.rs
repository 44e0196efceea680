//! One client connection: a JSON-lines reader, a queued writer, and a feed of
//! editor events shared by every client.

use anyhow::{Result, anyhow};
use futures_util::{SinkExt, StreamExt};
use remedit_protocol::{ErrorCode, MAX_JSON_LINE_BYTES, Request, Response};
use serde_json::json;
use std::sync::Arc;
use tokio::net::UnixStream;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, error, warn};

use crate::daemon::{Daemon, error_code};

/// What a request line asks of the connection.
enum Step {
    Reply(Response),
    Shutdown,
}

/// Outbound half of a connection.
struct Outbound {
    tx: mpsc::Sender<Response>,
    writer: JoinHandle<()>,
    editor_feed: JoinHandle<()>,
}

impl Outbound {
    /// Start the writer, greet the client and begin relaying editor events.
    /// The editor subscription is taken before the hello is queued.
    fn open(write_half: OwnedWriteHalf, daemon: &Daemon, queue: usize) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Response>(queue);
        let writer = tokio::spawn(write_lines(write_half, rx));

        let mut editor_rx = daemon.editor().subscribe();
        if let Err(err) = enqueue_response(&tx, Response::hello(daemon.cache_root())) {
            writer.abort();
            return Err(err);
        }

        let feed_tx = tx.clone();
        let editor_feed = tokio::spawn(async move {
            loop {
                match editor_rx.recv().await {
                    Ok(event) => {
                        if enqueue_response(&feed_tx, Response::Editor { event }).is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "editor client lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Ok(Self {
            tx,
            writer,
            editor_feed,
        })
    }

    fn send(&self, response: Response) -> Result<()> {
        enqueue_response(&self.tx, response)
    }

    /// Stop the feed and let the writer drain what is already queued.
    async fn close(self) {
        self.editor_feed.abort();
        drop(self.tx);
        let _ = self.writer.await;
    }
}

async fn write_lines(write_half: OwnedWriteHalf, mut rx: mpsc::Receiver<Response>) {
    let mut writer = FramedWrite::new(
        write_half,
        LinesCodec::new_with_max_length(MAX_JSON_LINE_BYTES),
    );
    while let Some(resp) = rx.recv().await {
        let line = match serde_json::to_string(&resp) {
            Ok(line) => line,
            Err(err) => {
                error!("failed to encode response: {err}");
                continue;
            }
        };
        if let Err(err) = writer.send(line).await {
            warn!("socket write failed: {err}");
            break;
        }
    }
}

/// Serve one client until it disconnects, its queue overflows, or it asks
/// the daemon to shut down.
pub async fn serve(
    stream: UnixStream,
    daemon: Arc<Daemon>,
    outbound_queue: usize,
    shutdown_tx: watch::Sender<bool>,
) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(
        read_half,
        LinesCodec::new_with_max_length(MAX_JSON_LINE_BYTES),
    );
    let outbound = match Outbound::open(write_half, &daemon, outbound_queue) {
        Ok(outbound) => outbound,
        Err(err) => {
            debug!("client gone before hello: {err}");
            return;
        }
    };

    while let Some(line) = reader.next().await {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!("socket read failed: {err}");
                break;
            }
        };
        match step(&daemon, &line).await {
            Step::Reply(response) => {
                if outbound.send(response).is_err() {
                    break;
                }
            }
            Step::Shutdown => {
                let _ = outbound.send(Response::ok(Some(json!({"shutdown": true}))));
                shutdown_tx.send_replace(true);
                break;
            }
        }
    }

    outbound.close().await;
}

async fn step(daemon: &Daemon, line: &str) -> Step {
    let req: Request = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(err) => {
            return Step::Reply(Response::error(
                ErrorCode::InvalidRequest,
                format!("invalid request: {err}"),
            ));
        }
    };
    if matches!(req, Request::Shutdown) {
        return Step::Shutdown;
    }
    match daemon.handle(req).await {
        Ok(data) => Step::Reply(Response::ok(data)),
        Err(err) => Step::Reply(Response::error(error_code(&err), err.to_string())),
    }
}

fn enqueue_response(out_tx: &mpsc::Sender<Response>, response: Response) -> Result<()> {
    match out_tx.try_send(response) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(_)) => Err(anyhow!("client outbound queue full")),
        Err(mpsc::error::TrySendError::Closed(_)) => Err(anyhow!("connection closed")),
    }
}
