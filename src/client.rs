//! Endpoint side of the signaling protocol

mod channel;

pub use channel::{ChannelEvent, ChannelState, SignalingChannel};

use crate::signaling::{ClientId, IceCandidate, SessionDescription};

/// Outbound half of a signaling connection as seen by the negotiation layer.
///
/// All sends are fire-and-forget.
pub trait Signaling: Send + Sync + 'static {
    fn client_id(&self) -> &ClientId;

    fn open(&self);

    fn close(&self);

    fn send_offer(&self, offer: &SessionDescription, to: &ClientId);

    fn send_answer(&self, answer: &SessionDescription, to: &ClientId);

    fn send_ice_candidate(&self, candidate: &IceCandidate, to: &ClientId);
}
