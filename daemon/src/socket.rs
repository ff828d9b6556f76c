//! Unix socket server for IPC

use crate::alert::AlertPayload;
use crate::cache::OwnerId;
use crate::protocol::{Request, Response};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

const OUTBOX_CAPACITY: usize = 32;

static ANONYMOUS_CONNECTIONS: AtomicU64 = AtomicU64::new(0);

pub struct SocketServer {
    path: PathBuf,
    listener: UnixListener,
    alerts_tx: broadcast::Sender<AlertPayload>,
}

impl SocketServer {
    pub async fn bind(path: &Path) -> std::io::Result<Self> {
        let _ = std::fs::remove_file(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(path)?;
        let (alerts_tx, _) = broadcast::channel(100);
        info!("Socket server listening on {:?}", path);
        Ok(Self { path: path.to_path_buf(), listener, alerts_tx })
    }

    pub fn alert_sender(&self) -> broadcast::Sender<AlertPayload> {
        self.alerts_tx.clone()
    }

    pub async fn accept(&self) -> std::io::Result<UnixStream> {
        let (stream, _) = self.listener.accept().await?;
        Ok(stream)
    }

    pub fn socket_path() -> PathBuf {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/run/user/{}/hostguard.sock", uid))
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Per-connection context handed to the request handler.
#[derive(Clone)]
pub struct ClientContext {
    /// Identity keying this caller's cached query results.
    pub owner: OwnerId,
    /// Pushes unsolicited responses (live status updates) to this client only.
    pub outbox: mpsc::Sender<Response>,
}

fn owner_of(stream: &UnixStream) -> OwnerId {
    match stream.peer_cred() {
        Ok(cred) => OwnerId::uid(cred.uid()),
        Err(e) => {
            let n = ANONYMOUS_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
            warn!("Peer credentials unavailable ({}), treating as anonymous", e);
            OwnerId(format!("conn:{}", n))
        }
    }
}

async fn write_response(writer: &mut OwnedWriteHalf, response: &Response) -> std::io::Result<()> {
    let json = serde_json::to_string(response).map_err(std::io::Error::other)? + "\n";
    writer.write_all(json.as_bytes()).await
}

pub async fn handle_client<H>(
    stream: UnixStream,
    mut alerts_rx: broadcast::Receiver<AlertPayload>,
    handler: Arc<H>,
) where
    H: RequestHandler + Send + Sync + 'static,
{
    let owner = owner_of(&stream);
    let (outbox, mut inbox) = mpsc::channel(OUTBOX_CAPACITY);
    let client = ClientContext { owner: owner.clone(), outbox };
    debug!(owner = %owner, "Client connected");

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        tokio::select! {
            result = reader.read_line(&mut line) => {
                match result {
                    Ok(0) => break,
                    Ok(_) => {
                        let response = match serde_json::from_str::<Request>(&line) {
                            Ok(request) => handler.handle(request, &client).await,
                            Err(e) => {
                                warn!("Invalid request: {}", e);
                                Response::error(e.to_string())
                            }
                        };
                        line.clear();
                        if let Err(e) = write_response(&mut writer, &response).await {
                            error!("Failed to write response: {}", e);
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Read error: {}", e);
                        break;
                    }
                }
            }
            Some(pushed) = inbox.recv() => {
                if let Err(e) = write_response(&mut writer, &pushed).await {
                    error!("Failed to push update: {}", e);
                    break;
                }
            }
            result = alerts_rx.recv() => {
                match result {
                    Ok(payload) => {
                        if let Err(e) = write_response(&mut writer, &Response::Alert { data: payload }).await {
                            error!("Failed to broadcast: {}", e);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Client lagging behind alert broadcast");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    debug!(owner = %owner, "Client disconnected");
}

#[async_trait::async_trait]
pub trait RequestHandler {
    async fn handle(&self, request: Request, client: &ClientContext) -> Response;
}
