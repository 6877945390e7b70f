//! Per-peer offer/answer negotiation on top of the signaling channel

mod error;
mod media;
#[cfg(test)]
mod mock;
mod orchestrator;
mod peer;
mod transport;

pub use error::NegotiationError;
pub use media::{CaptureConstraints, CaptureError, MediaCapture, MediaStream, MediaTrack, TrackKind};
pub use orchestrator::{NegotiationOrchestrator, OrchestratorEvent, OrchestratorHandle};
pub use peer::PeerState;
pub use transport::{
    ConnectivityState, PeerTransport, TransportError, TransportErrorKind, TransportEvent, TransportEvents,
    TransportFactory,
};
