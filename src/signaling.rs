//! WebSocket signaling hub: membership registry and message relay

mod actor;
mod messages;
mod registry;
mod server;
mod types;

pub use actor::{HubHandle, HubSnapshot};
pub use messages::{ClientMessage, IceCandidate, Relay, SdpType, ServerMessage, SessionDescription};
pub use registry::{Registration, RelayRegistry};
pub use server::{DEFAULT_SIGNALING_PORT, SignalingServer};
pub use types::{ClientId, ConnectionId, OutboundMessage, PeerInfo, Role, SignalingError};
