use std::fmt;
use std::future::Future;

use tokio::sync::mpsc;

use super::media::{MediaStream, MediaTrack};
use super::peer::StepOutcome;
use crate::config::TransportConfig;
use crate::signaling::{ClientId, IceCandidate, SessionDescription};

#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransportErrorKind {
    #[error("peer connection error")]
    PeerConnectionError,
    #[error("local description error")]
    LocalDescriptionError,
    #[error("remote description error")]
    RemoteDescriptionError,
    #[error("ice candidate error")]
    ICECandidateError,
    #[error("track error")]
    TrackError,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// ICE connectivity as reported by the peer transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectivityState {
    /// States after which the peer connection is torn down
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }

    pub fn is_established(self) -> bool {
        matches!(self, Self::Connected | Self::Completed)
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Checking => "checking",
            Self::Connected => "connected",
            Self::Completed => "completed",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Something a peer transport reports back on its own schedule
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Track(MediaStream),
    IceCandidate(IceCandidate),
    Connectivity(ConnectivityState),
}

#[derive(Debug)]
pub(crate) enum PeerUpdate {
    /// Callback raised by the transport itself
    Transport(TransportEvent),
    /// Result of a step run by the peer's worker
    Step(StepOutcome),
}

/// An update bound to one transport instance of one peer
#[derive(Debug)]
pub(crate) struct TaggedEvent {
    pub peer_id: ClientId,
    pub serial: u64,
    pub event: PeerUpdate,
}

/// Where a transport sends its callbacks.
///
/// Each sink is bound to one transport instance; events from a transport
/// that has since been replaced or closed are discarded by the orchestrator.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    peer_id: ClientId,
    serial: u64,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl TransportEvents {
    pub(crate) fn new(peer_id: ClientId, serial: u64, tx: mpsc::UnboundedSender<TaggedEvent>) -> Self {
        Self { peer_id, serial, tx }
    }

    pub fn peer_id(&self) -> &ClientId {
        &self.peer_id
    }

    pub fn track(&self, stream: MediaStream) {
        self.emit(TransportEvent::Track(stream));
    }

    pub fn ice_candidate(&self, candidate: IceCandidate) {
        self.emit(TransportEvent::IceCandidate(candidate));
    }

    pub fn connectivity(&self, state: ConnectivityState) {
        self.emit(TransportEvent::Connectivity(state));
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.tx.send(TaggedEvent {
            peer_id: self.peer_id.clone(),
            serial: self.serial,
            event: PeerUpdate::Transport(event),
        });
    }
}

/// One peer-to-peer media connection
pub trait PeerTransport: Send + 'static {
    fn add_track(&mut self, track: &MediaTrack, stream: &MediaStream) -> Result<(), TransportError>;

    fn create_offer(&mut self) -> impl Future<Output = Result<SessionDescription, TransportError>> + Send;

    fn create_answer(&mut self) -> impl Future<Output = Result<SessionDescription, TransportError>> + Send;

    fn set_local_description(
        &mut self,
        description: SessionDescription,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn add_ice_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn close(&mut self);
}

/// Builds a transport for each remote peer
pub trait TransportFactory: Send + Sync + 'static {
    type Transport: PeerTransport;

    fn create(
        &self,
        peer_id: &ClientId,
        config: &TransportConfig,
        events: TransportEvents,
    ) -> Result<Self::Transport, TransportError>;
}
