use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Bytes, Message, Utf8Bytes};
use tracing::{debug, error, info, warn};

use super::actor::{HubCommand, HubHandle, hub_actor};
use super::messages::ClientMessage;
use super::types::{ClientId, ConnectionId, OutboundMessage, PeerInfo, SignalingError};

pub const DEFAULT_SIGNALING_PORT: u16 = 8080;
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// The signaling hub: accepts WebSocket connections and relays between them.
pub struct SignalingServer {
    handle: HubHandle,
}

impl Default for SignalingServer {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalingServer {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<HubCommand>(1024);
        tokio::spawn(hub_actor(rx));

        Self {
            handle: HubHandle { tx },
        }
    }

    pub fn handle(&self) -> HubHandle {
        self.handle.clone()
    }

    pub async fn run(&self, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Signaling hub listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            let handle = self.handle.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, handle).await {
                    error!("Connection error from {}: {}", addr, e);
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    handle: HubHandle,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = stream.peer_addr()?;
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let conn = ConnectionId::next();
    info!("New client connected from {} ({})", addr, conn);

    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Message>();

    let mut client_id: Option<ClientId> = None;
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    let mut waiting_for_pong = false;
    let mut pong_deadline: Option<tokio::time::Instant> = None;

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    let ws_msg = Message::Text(msg.into_inner());
                    if ws_tx.send(ws_msg).await.is_err() {
                        break;
                    }
                }
                Some(ctrl_msg) = ctrl_rx.recv() => {
                    if ws_tx.send(ctrl_msg).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    loop {
        let pong_timeout = async {
            match pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = ping_interval.tick() => {
                if waiting_for_pong {
                    warn!("No Pong received, disconnecting {}", conn);
                    break;
                }
                if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                    break;
                }
                waiting_for_pong = true;
                pong_deadline = Some(tokio::time::Instant::now() + PONG_TIMEOUT);
                debug!("Ping sent to {}", conn);
            }

            _ = pong_timeout => {
                warn!("Pong timeout, disconnecting {}", conn);
                break;
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error on {}: {}", conn, e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        if let Err(e) = handle_text_message(text, conn, &tx, &handle, &mut client_id).await {
                            warn!("Message handling error: {}", e);
                        }
                    }
                    Message::Pong(_) => {
                        waiting_for_pong = false;
                        pong_deadline = None;
                        debug!("Pong received from {}", conn);
                    }
                    Message::Close(_) => {
                        debug!("Close received from {}", conn);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    if let Some(id) = client_id {
        handle.unregister(id, conn).await?;
    }

    send_task.abort();
    info!("WebSocket disconnected: {} ({})", addr, conn);

    Ok(())
}

async fn handle_text_message(
    text: Utf8Bytes,
    conn: ConnectionId,
    tx: &mpsc::UnboundedSender<OutboundMessage>,
    handle: &HubHandle,
    client_id: &mut Option<ClientId>,
) -> Result<(), SignalingError> {
    let client_msg: ClientMessage = match serde_json::from_str(text.as_str()) {
        Ok(m) => m,
        Err(e) => {
            debug!("Ignoring unrecognized message on {}: {}", conn, e);
            return Ok(());
        }
    };

    match client_msg {
        ClientMessage::Register {
            role,
            client_id: new_id,
        } => {
            if let Some(previous) = client_id.take() {
                if previous != new_id {
                    handle.unregister(previous, conn).await?;
                }
            }

            let info = PeerInfo {
                id: new_id.clone(),
                role,
            };
            handle.register(info, conn, tx.clone()).await?;
            *client_id = Some(new_id);
        }

        ClientMessage::Offer(relay)
        | ClientMessage::Answer(relay)
        | ClientMessage::IceCandidate(relay) => match relay.to {
            Some(to) => handle.route(to, OutboundMessage::new(text)).await?,
            None => debug!("Dropping directed message without `to` on {}", conn),
        },
    }

    Ok(())
}
