pub mod client;
pub mod config;
pub mod negotiation;
pub mod signaling;
