use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::Signaling;
use crate::config::ChannelConfig;
use crate::signaling::{
    ClientId, ClientMessage, IceCandidate, PeerInfo, Relay, Role, ServerMessage, SessionDescription,
};

/// Typed events decoded from the hub
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The hub acknowledged our registration
    Registered,
    PeerJoined(PeerInfo),
    PeerLeft(PeerInfo),
    SdpOffer {
        description: SessionDescription,
        from: ClientId,
    },
    SdpAnswer {
        description: SessionDescription,
        from: ClientId,
    },
    IceCandidate {
        candidate: IceCandidate,
        from: ClientId,
    },
    /// Transport level error; does not by itself close the channel
    Error(String),
    /// The connection to the hub closed
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    /// Waiting out the delay before reconnect attempt `attempt`
    Reconnecting { attempt: u32 },
    Closed,
}

/// Reconnecting connection from one endpoint to the hub.
///
/// Sends are fire-and-forget: anything sent while the connection is not
/// open is dropped.
pub struct SignalingChannel {
    inner: Arc<Inner>,
}

struct Inner {
    config: ChannelConfig,
    state: watch::Sender<ChannelState>,
    attempts: AtomicU32,
    /// Bumped whenever the current connection is shut down
    generation: AtomicU64,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    events: async_channel::Sender<ChannelEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SignalingChannel {
    pub fn new(config: ChannelConfig) -> (Self, async_channel::Receiver<ChannelEvent>) {
        let (events_tx, events_rx) = async_channel::unbounded();
        let (state, _) = watch::channel(ChannelState::Closed);

        let inner = Inner {
            config,
            state,
            attempts: AtomicU32::new(0),
            generation: AtomicU64::new(0),
            outbound: Mutex::new(None),
            driver: Mutex::new(None),
            events: events_tx,
        };

        (
            Self {
                inner: Arc::new(inner),
            },
            events_rx,
        )
    }

    /// Connect (or reconnect) to the hub, resetting the attempt counter
    pub fn open(&self) {
        let mut driver = lock(&self.inner.driver);
        self.inner.shutdown(&mut driver);

        self.inner.attempts.store(0, Ordering::SeqCst);
        self.inner.state.send_replace(ChannelState::Connecting);
        let generation = self.inner.generation.load(Ordering::SeqCst);
        *driver = Some(tokio::spawn(drive(self.inner.clone(), generation)));
    }

    /// Stop the connection without further reconnects. Idempotent.
    pub fn close(&self) {
        let mut driver = lock(&self.inner.driver);
        self.inner.shutdown(&mut driver);
        self.inner.state.send_replace(ChannelState::Closed);
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }

    /// Consecutive reconnect attempts since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn role(&self) -> Role {
        self.inner.config.role
    }

    pub fn send_offer(&self, offer: &SessionDescription, to: &ClientId) {
        let relay = Relay::new(offer, to, &self.inner.config.client_id);
        self.inner.send(&ClientMessage::Offer(relay));
    }

    pub fn send_answer(&self, answer: &SessionDescription, to: &ClientId) {
        let relay = Relay::new(answer, to, &self.inner.config.client_id);
        self.inner.send(&ClientMessage::Answer(relay));
    }

    pub fn send_ice_candidate(&self, candidate: &IceCandidate, to: &ClientId) {
        let relay = Relay::new(candidate, to, &self.inner.config.client_id);
        self.inner.send(&ClientMessage::IceCandidate(relay));
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl Signaling for SignalingChannel {
    fn client_id(&self) -> &ClientId {
        &self.inner.config.client_id
    }

    fn open(&self) {
        SignalingChannel::open(self);
    }

    fn close(&self) {
        SignalingChannel::close(self);
    }

    fn send_offer(&self, offer: &SessionDescription, to: &ClientId) {
        SignalingChannel::send_offer(self, offer, to);
    }

    fn send_answer(&self, answer: &SessionDescription, to: &ClientId) {
        SignalingChannel::send_answer(self, answer, to);
    }

    fn send_ice_candidate(&self, candidate: &IceCandidate, to: &ClientId) {
        SignalingChannel::send_ice_candidate(self, candidate, to);
    }
}

impl Inner {
    fn emit(&self, event: ChannelEvent) {
        let _ = self.events.try_send(event);
    }

    fn send(&self, msg: &ClientMessage) {
        let outbound = lock(&self.outbound);
        let Some(tx) = outbound.as_ref() else {
            debug!("Channel not open, dropping {}", message_kind(msg));
            return;
        };
        match serde_json::to_string(msg) {
            Ok(json) => {
                let _ = tx.send(Message::Text(Utf8Bytes::from(json)));
            }
            Err(e) => warn!("Failed to encode {}: {}", message_kind(msg), e),
        }
    }

    /// Stop the current connection, if any. Caller holds the driver lock.
    fn shutdown(&self, driver: &mut Option<JoinHandle<()>>) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = lock(&self.outbound).take() {
            let _ = tx.send(Message::Close(None));
        }
        if let Some(task) = driver.take() {
            task.abort();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Publish `tx` as the live sender unless the session was shut down
    /// after `generation` started.
    fn install_outbound(&self, generation: u64, tx: mpsc::UnboundedSender<Message>) -> bool {
        let mut outbound = lock(&self.outbound);
        if !self.is_current(generation) {
            return false;
        }
        *outbound = Some(tx);
        true
    }

    async fn run_session(&self, ws: WebSocketStream<MaybeTlsStream<TcpStream>>, generation: u64) {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let send_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if ws_tx.send(msg).await.is_err() || closing {
                    break;
                }
            }
        });

        if !self.install_outbound(generation, tx) {
            debug!("Dropping connection of a replaced session");
            send_task.abort();
            return;
        }
        self.state.send_replace(ChannelState::Open);
        self.send(&ClientMessage::Register {
            role: self.config.role,
            client_id: self.config.client_id.clone(),
        });

        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(Message::Text(text)) => self.dispatch(text.as_str()),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Signaling connection error: {}", e);
                    self.emit(ChannelEvent::Error(e.to_string()));
                    break;
                }
            }
        }

        {
            let mut outbound = lock(&self.outbound);
            if self.is_current(generation) {
                outbound.take();
            }
        }
        send_task.abort();
    }

    fn dispatch(&self, text: &str) {
        let msg: ServerMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                debug!("Ignoring unrecognized message from hub: {}", e);
                return;
            }
        };

        let event = match msg {
            ServerMessage::Registered => ChannelEvent::Registered,
            ServerMessage::PeerJoined { peer } => ChannelEvent::PeerJoined(peer),
            ServerMessage::PeerLeft { peer } => ChannelEvent::PeerLeft(peer),
            ServerMessage::Offer(relay) => match relay.into_payload() {
                Ok((description, from)) => ChannelEvent::SdpOffer { description, from },
                Err(e) => {
                    debug!("Ignoring offer: {}", e);
                    return;
                }
            },
            ServerMessage::Answer(relay) => match relay.into_payload() {
                Ok((description, from)) => ChannelEvent::SdpAnswer { description, from },
                Err(e) => {
                    debug!("Ignoring answer: {}", e);
                    return;
                }
            },
            ServerMessage::IceCandidate(relay) => match relay.into_payload() {
                Ok((candidate, from)) => ChannelEvent::IceCandidate { candidate, from },
                Err(e) => {
                    debug!("Ignoring ice candidate: {}", e);
                    return;
                }
            },
        };

        self.emit(event);
    }
}

fn message_kind(msg: &ClientMessage) -> &'static str {
    match msg {
        ClientMessage::Register { .. } => "register",
        ClientMessage::Offer(_) => "offer",
        ClientMessage::Answer(_) => "answer",
        ClientMessage::IceCandidate(_) => "ice-candidate",
    }
}

/// Connection loop: one session per successful open, then a delayed retry
/// until the attempt budget runs out.
async fn drive(inner: Arc<Inner>, generation: u64) {
    let url = inner.config.url.clone();
    let max_attempts = inner.config.max_reconnect_attempts;

    while inner.is_current(generation) {
        inner.state.send_replace(ChannelState::Connecting);

        let connected = tokio_tungstenite::connect_async(url.as_str()).await;
        if !inner.is_current(generation) {
            break;
        }

        match connected {
            Ok((ws, _)) => {
                inner.attempts.store(0, Ordering::SeqCst);
                info!("Signaling channel connected to {}", url);
                inner.run_session(ws, generation).await;
                if !inner.is_current(generation) {
                    break;
                }
                info!("Signaling channel to {} closed", url);
                inner.emit(ChannelEvent::Closed);
            }
            Err(e) => {
                warn!("Error connecting to {}: {}", url, e);
                inner.emit(ChannelEvent::Error(e.to_string()));
            }
        }

        let attempt = inner.attempts.load(Ordering::SeqCst);
        if attempt >= max_attempts {
            warn!("Giving up on {} after {} reconnect attempts", url, attempt);
            inner.state.send_replace(ChannelState::Closed);
            break;
        }

        let attempt = attempt + 1;
        inner.attempts.store(attempt, Ordering::SeqCst);
        info!("Attempting to reconnect ({}/{})...", attempt, max_attempts);
        inner.state.send_replace(ChannelState::Reconnecting { attempt });
        tokio::time::sleep(inner.config.reconnect_delay).await;
    }
}
