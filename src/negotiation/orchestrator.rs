use std::collections::HashMap;
use std::ops::ControlFlow;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::error::NegotiationError;
use super::media::{CaptureConstraints, MediaCapture, MediaStream};
use super::peer::{PeerRecord, PeerState, Step, StepOutcome};
use super::transport::{
    PeerUpdate, TaggedEvent, TransportError, TransportEvent, TransportEvents, TransportFactory,
};
use crate::client::{ChannelEvent, Signaling, SignalingChannel};
use crate::config::{ChannelConfig, TransportConfig};
use crate::signaling::{ClientId, IceCandidate, Role, SessionDescription};

const COMMAND_BUFFER: usize = 64;

/// What the orchestrator reports to its owner (typically the rendering layer)
#[derive(Debug)]
pub enum OrchestratorEvent {
    /// The hub acknowledged our registration
    Registered,
    /// Remote media arrived from `peer_id`
    Stream { stream: MediaStream, peer_id: ClientId },
    /// The connection to `peer_id` is gone
    StreamRemoved { peer_id: ClientId },
    /// The peer transport rejected a step; the peer has been closed
    NegotiationFailed { peer_id: ClientId, error: TransportError },
    ChannelError(String),
}

enum Command {
    StartStreaming {
        stream: MediaStream,
        reply: oneshot::Sender<()>,
    },
    PeerState {
        peer_id: ClientId,
        reply: oneshot::Sender<Option<PeerState>>,
    },
    Peers {
        reply: oneshot::Sender<Vec<(ClientId, PeerState)>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// Runs one negotiation state machine per remote peer for a local endpoint.
///
/// A single task owns the peer map and handles signaling events, transport
/// updates and commands from [`OrchestratorHandle`] one at a time. Calls
/// into a peer's transport run on that peer's worker and report back as
/// updates, so a stalled peer never holds up the others.
pub struct NegotiationOrchestrator<S, F: TransportFactory> {
    role: Role,
    signaling: S,
    factory: F,
    config: TransportConfig,
    peers: HashMap<ClientId, PeerRecord>,
    local_stream: Option<MediaStream>,
    next_serial: u64,
    transport_tx: mpsc::UnboundedSender<TaggedEvent>,
    events: async_channel::Sender<OrchestratorEvent>,
}

impl<F: TransportFactory> NegotiationOrchestrator<SignalingChannel, F> {
    /// Connect to the hub described by `channel` and start negotiating
    pub fn connect(
        channel: ChannelConfig,
        factory: F,
        config: TransportConfig,
    ) -> (OrchestratorHandle, async_channel::Receiver<OrchestratorEvent>) {
        let role = channel.role;
        let (signaling, signaling_events) = SignalingChannel::new(channel);
        Self::spawn(role, signaling, signaling_events, factory, config)
    }
}

impl<S: Signaling, F: TransportFactory> NegotiationOrchestrator<S, F> {
    /// Open `signaling` and run the orchestrator on its own task
    pub fn spawn(
        role: Role,
        signaling: S,
        signaling_events: async_channel::Receiver<ChannelEvent>,
        factory: F,
        config: TransportConfig,
    ) -> (OrchestratorHandle, async_channel::Receiver<OrchestratorEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = async_channel::unbounded();

        let handle = OrchestratorHandle {
            tx: cmd_tx,
            client_id: signaling.client_id().clone(),
            role,
        };

        let orchestrator = Self {
            role,
            signaling,
            factory,
            config,
            peers: HashMap::new(),
            local_stream: None,
            next_serial: 0,
            transport_tx,
            events: events_tx,
        };

        orchestrator.signaling.open();
        tokio::spawn(orchestrator.run(cmd_rx, signaling_events, transport_rx));

        (handle, events_rx)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        signaling_events: async_channel::Receiver<ChannelEvent>,
        mut transport_rx: mpsc::UnboundedReceiver<TaggedEvent>,
    ) {
        loop {
            // Inbound network and transport events win over local commands
            // that were issued after them.
            tokio::select! {
                biased;

                Some(tagged) = transport_rx.recv() => self.handle_update(tagged).await,

                Ok(event) = signaling_events.recv() => self.handle_signaling(event).await,

                cmd = commands.recv() => {
                    let flow = match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            self.disconnect().await;
                            ControlFlow::Break(())
                        }
                    };
                    if flow.is_break() {
                        break;
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) -> ControlFlow<()> {
        match cmd {
            Command::StartStreaming { stream, reply } => {
                self.start_streaming(stream);
                let _ = reply.send(());
            }
            Command::PeerState { peer_id, reply } => {
                let _ = reply.send(self.peers.get(&peer_id).map(|r| r.state));
            }
            Command::Peers { reply } => {
                let mut peers: Vec<(ClientId, PeerState)> = self
                    .peers
                    .iter()
                    .map(|(id, record)| (id.clone(), record.state))
                    .collect();
                peers.sort_by(|a, b| a.0.cmp(&b.0));
                let _ = reply.send(peers);
            }
            Command::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn handle_signaling(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Registered => {
                info!("{} registered with hub", self.signaling.client_id());
                self.emit(OrchestratorEvent::Registered);
            }

            ChannelEvent::PeerJoined(peer) => {
                info!("Peer joined: {} ({})", peer.id, peer.role);
                if self.role == Role::Master {
                    if let Err(e) = self.begin_offer(&peer.id).await {
                        self.fail(&peer.id, e).await;
                    }
                }
            }

            ChannelEvent::PeerLeft(peer) => {
                info!("Peer left: {} ({})", peer.id, peer.role);
                self.teardown(&peer.id).await;
            }

            ChannelEvent::SdpOffer { description, from } => {
                if self.role != Role::Viewer {
                    debug!("Ignoring offer from {}: only viewers answer", from);
                    return;
                }
                if let Err(e) = self.answer_offer(&from, description).await {
                    self.fail(&from, e).await;
                }
            }

            ChannelEvent::SdpAnswer { description, from } => match self.peers.get(&from) {
                Some(record) => record.submit(Step::ApplyAnswer(description)),
                None => debug!("No peer connection for {}, dropping answer", from),
            },

            ChannelEvent::IceCandidate { candidate, from } => self.add_remote_candidate(&from, candidate),

            ChannelEvent::Error(message) => {
                warn!("Signaling error: {}", message);
                self.emit(OrchestratorEvent::ChannelError(message));
            }

            ChannelEvent::Closed => {
                info!("Signaling channel closed with {} peers active", self.peers.len());
            }
        }
    }

    async fn handle_update(&mut self, tagged: TaggedEvent) {
        let TaggedEvent {
            peer_id,
            serial,
            event,
        } = tagged;

        if self.peers.get(&peer_id).map(|r| r.serial) != Some(serial) {
            debug!("Ignoring update from a closed transport for {}", peer_id);
            return;
        }

        match event {
            PeerUpdate::Transport(event) => self.handle_transport(peer_id, event).await,
            PeerUpdate::Step(outcome) => self.handle_step(peer_id, outcome).await,
        }
    }

    async fn handle_transport(&mut self, peer_id: ClientId, event: TransportEvent) {
        match event {
            TransportEvent::Track(stream) => {
                info!("Received stream {} from peer {}", stream.id(), peer_id);
                self.emit(OrchestratorEvent::Stream { stream, peer_id });
            }

            TransportEvent::IceCandidate(candidate) => {
                self.signaling.send_ice_candidate(&candidate, &peer_id);
            }

            TransportEvent::Connectivity(state) => {
                debug!("ICE connection state with {}: {}", peer_id, state);
                if state.is_terminal() {
                    self.teardown(&peer_id).await;
                } else if state.is_established() {
                    if let Some(record) = self.peers.get_mut(&peer_id) {
                        if record.state == PeerState::AnswerSent {
                            record.state = PeerState::Connected;
                        }
                    }
                }
            }
        }
    }

    async fn handle_step(&mut self, peer_id: ClientId, outcome: StepOutcome) {
        let Some(record) = self.peers.get_mut(&peer_id) else {
            return;
        };

        match outcome {
            StepOutcome::Offer(offer) => {
                self.signaling.send_offer(&offer, &peer_id);
                record.state = PeerState::OfferSent;
                debug!(
                    "Sent offer to {} (local tracks: {})",
                    peer_id,
                    record.has_local_tracks()
                );
            }
            StepOutcome::Answer(answer) => {
                self.signaling.send_answer(&answer, &peer_id);
                record.state = PeerState::AnswerSent;
                debug!("Sent answer to {}", peer_id);
            }
            StepOutcome::AnswerApplied => {
                record.state = PeerState::Connected;
                info!("Connected to {}", peer_id);
            }
            StepOutcome::Failed(error) => self.fail(&peer_id, error).await,
        }
    }

    /// Create a fresh transport for `peer_id`, closing any previous one
    async fn insert_peer(&mut self, peer_id: &ClientId) -> Result<(), TransportError> {
        self.next_serial += 1;
        let serial = self.next_serial;
        let events = TransportEvents::new(peer_id.clone(), serial, self.transport_tx.clone());
        let transport = self.factory.create(peer_id, &self.config, events)?;
        let record = PeerRecord::spawn(transport, peer_id.clone(), serial, self.transport_tx.clone());

        if let Some(previous) = self.peers.insert(peer_id.clone(), record) {
            debug!("Replacing peer connection for {}", peer_id);
            previous.close().await;
        }
        Ok(())
    }

    async fn begin_offer(&mut self, peer_id: &ClientId) -> Result<(), TransportError> {
        self.insert_peer(peer_id).await?;

        if let Some(record) = self.peers.get_mut(peer_id) {
            let attach = self
                .local_stream
                .as_ref()
                .map(|stream| (stream.clone(), record.missing_tracks(stream)));
            record.submit(Step::Offer { attach });
        }
        Ok(())
    }

    async fn answer_offer(&mut self, peer_id: &ClientId, offer: SessionDescription) -> Result<(), TransportError> {
        if !self.peers.contains_key(peer_id) {
            self.insert_peer(peer_id).await?;
        }
        if let Some(record) = self.peers.get(peer_id) {
            record.submit(Step::Answer(offer));
        }
        Ok(())
    }

    fn add_remote_candidate(&mut self, peer_id: &ClientId, candidate: IceCandidate) {
        match self.peers.get(peer_id) {
            Some(record) => record.submit(Step::AddCandidate(candidate)),
            None => debug!("No peer connection for {}, dropping ice candidate", peer_id),
        }
    }

    fn start_streaming(&mut self, stream: MediaStream) {
        info!(
            "Streaming {} ({} tracks) as {}",
            stream.id(),
            stream.tracks().len(),
            self.role
        );

        if self.role == Role::Master {
            let active = self
                .peers
                .values_mut()
                .filter(|r| matches!(r.state, PeerState::OfferSent | PeerState::Connected));

            for record in active {
                let tracks = record.missing_tracks(&stream);
                if !tracks.is_empty() {
                    record.submit(Step::Offer {
                        attach: Some((stream.clone(), tracks)),
                    });
                }
            }
        }

        self.local_stream = Some(stream);
    }

    async fn fail(&mut self, peer_id: &ClientId, error: TransportError) {
        warn!("Negotiation with {} failed: {}", peer_id, error);
        self.emit(OrchestratorEvent::NegotiationFailed {
            peer_id: peer_id.clone(),
            error,
        });
        self.teardown(peer_id).await;
    }

    async fn teardown(&mut self, peer_id: &ClientId) {
        if let Some(record) = self.peers.remove(peer_id) {
            record.close().await;
            info!("Closed peer connection with {}", peer_id);
            self.emit(OrchestratorEvent::StreamRemoved {
                peer_id: peer_id.clone(),
            });
        }
    }

    async fn disconnect(&mut self) {
        if let Some(stream) = self.local_stream.take() {
            stream.stop();
        }
        for (_, record) in self.peers.drain() {
            record.close().await;
        }
        self.signaling.close();
        info!("{} disconnected", self.signaling.client_id());
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.events.try_send(event);
    }
}

/// Cloneable handle to a running [`NegotiationOrchestrator`]
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<Command>,
    client_id: ClientId,
    role: Role,
}

impl OrchestratorHandle {
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Use `stream` as the local media; a master renegotiates with every
    /// active peer that lacks its tracks.
    pub async fn start_streaming(&self, stream: MediaStream) -> Result<(), NegotiationError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::StartStreaming {
                stream,
                reply: reply_tx,
            })
            .await
            .map_err(|_| NegotiationError::Disconnected)?;
        reply_rx.await.map_err(|_| NegotiationError::Disconnected)
    }

    /// Capture local media with `capture` and stream it
    pub async fn capture_and_stream<C: MediaCapture>(
        &self,
        capture: &C,
        constraints: &CaptureConstraints,
    ) -> Result<MediaStream, NegotiationError> {
        let stream = capture.capture(constraints).await?;
        self.start_streaming(stream.clone()).await?;
        Ok(stream)
    }

    /// `None` if there is no live negotiation with `peer_id`
    pub async fn peer_state(&self, peer_id: &ClientId) -> Option<PeerState> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let cmd = Command::PeerState {
            peer_id: peer_id.clone(),
            reply: reply_tx,
        };
        self.tx.send(cmd).await.ok()?;
        reply_rx.await.ok().flatten()
    }

    pub async fn peers(&self) -> Vec<(ClientId, PeerState)> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::Peers { reply: reply_tx }).await.is_err() {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    /// Stop local tracks, close every peer and the signaling channel.
    /// Further calls do nothing.
    pub async fn disconnect(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::Disconnect { reply: reply_tx }).await.is_ok() {
            let _ = reply_rx.await;
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.tx.is_closed()
    }
}
