//! Recording doubles for the peer transport and the signaling channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use super::media::{MediaStream, MediaTrack};
use super::transport::{PeerTransport, TransportError, TransportErrorKind, TransportEvents, TransportFactory};
use crate::client::Signaling;
use crate::config::TransportConfig;
use crate::signaling::{ClientId, IceCandidate, SdpType, SessionDescription};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    AddTrack(String),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType, String),
    SetRemote(SdpType, String),
    AddCandidate(String),
    Close,
}

#[derive(Default)]
struct FactoryLog {
    calls: HashMap<ClientId, Vec<Call>>,
    events: HashMap<ClientId, TransportEvents>,
    created: HashMap<ClientId, usize>,
    configs: Vec<TransportConfig>,
}

#[derive(Clone, Default)]
pub(crate) struct MockFactory {
    log: Arc<Mutex<FactoryLog>>,
}

impl MockFactory {
    pub fn calls(&self, peer: &str) -> Vec<Call> {
        let log = self.log.lock().unwrap();
        log.calls.get(&ClientId::from(peer)).cloned().unwrap_or_default()
    }

    /// Callback sink of the most recent transport created for `peer`
    pub fn events(&self, peer: &str) -> TransportEvents {
        let log = self.log.lock().unwrap();
        log.events[&ClientId::from(peer)].clone()
    }

    pub fn created(&self, peer: &str) -> usize {
        let log = self.log.lock().unwrap();
        log.created.get(&ClientId::from(peer)).copied().unwrap_or(0)
    }

    pub fn configs(&self) -> Vec<TransportConfig> {
        self.log.lock().unwrap().configs.clone()
    }
}

impl TransportFactory for MockFactory {
    type Transport = MockTransport;

    fn create(
        &self,
        peer_id: &ClientId,
        config: &TransportConfig,
        events: TransportEvents,
    ) -> Result<MockTransport, TransportError> {
        let mut log = self.log.lock().unwrap();
        *log.created.entry(peer_id.clone()).or_default() += 1;
        log.events.insert(peer_id.clone(), events);
        log.configs.push(config.clone());

        Ok(MockTransport {
            peer_id: peer_id.clone(),
            offers: 0,
            answers: 0,
            log: self.log.clone(),
        })
    }
}

/// Records every call. Descriptions containing `incompatible` and
/// candidates containing `bad` are rejected; offers for a peer id
/// containing `STALL` never complete.
pub(crate) struct MockTransport {
    peer_id: ClientId,
    offers: u32,
    answers: u32,
    log: Arc<Mutex<FactoryLog>>,
}

impl MockTransport {
    fn record(&self, call: Call) {
        let mut log = self.log.lock().unwrap();
        log.calls.entry(self.peer_id.clone()).or_default().push(call);
    }
}

impl PeerTransport for MockTransport {
    fn add_track(&mut self, track: &MediaTrack, _stream: &MediaStream) -> Result<(), TransportError> {
        self.record(Call::AddTrack(track.id().to_owned()));
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<SessionDescription, TransportError> {
        self.record(Call::CreateOffer);
        if self.peer_id.as_str().contains("STALL") {
            std::future::pending::<()>().await;
        }
        self.offers += 1;
        Ok(SessionDescription::offer(format!("offer-{}-{}", self.peer_id, self.offers)))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, TransportError> {
        self.record(Call::CreateAnswer);
        self.answers += 1;
        Ok(SessionDescription::answer(format!("answer-{}-{}", self.peer_id, self.answers)))
    }

    async fn set_local_description(&mut self, description: SessionDescription) -> Result<(), TransportError> {
        self.record(Call::SetLocal(description.kind, description.sdp));
        Ok(())
    }

    async fn set_remote_description(&mut self, description: SessionDescription) -> Result<(), TransportError> {
        let rejected = description.sdp.contains("incompatible");
        self.record(Call::SetRemote(description.kind, description.sdp));
        if rejected {
            return Err(TransportError::new(
                TransportErrorKind::RemoteDescriptionError,
                "incompatible session description",
            ));
        }
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), TransportError> {
        let rejected = candidate.candidate.contains("bad");
        self.record(Call::AddCandidate(candidate.candidate));
        if rejected {
            return Err(TransportError::new(TransportErrorKind::ICECandidateError, "malformed candidate"));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.record(Call::Close);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Sent {
    pub kind: &'static str,
    pub to: ClientId,
    pub payload: Value,
}

#[derive(Default)]
struct SignalingLog {
    sent: Vec<Sent>,
    opened: u32,
    closed: u32,
}

#[derive(Clone)]
pub(crate) struct RecordingSignaling {
    id: ClientId,
    log: Arc<Mutex<SignalingLog>>,
}

impl RecordingSignaling {
    pub fn new(id: &str) -> Self {
        Self {
            id: ClientId::from(id),
            log: Arc::default(),
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.log.lock().unwrap().sent.clone()
    }

    pub fn sent_to(&self, kind: &str, to: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|s| s.kind == kind && s.to.as_str() == to)
            .map(|s| s.payload)
            .collect()
    }

    pub fn opened(&self) -> u32 {
        self.log.lock().unwrap().opened
    }

    pub fn closed(&self) -> u32 {
        self.log.lock().unwrap().closed
    }

    fn push(&self, kind: &'static str, payload: Value, to: &ClientId) {
        self.log.lock().unwrap().sent.push(Sent {
            kind,
            to: to.clone(),
            payload,
        });
    }
}

impl Signaling for RecordingSignaling {
    fn client_id(&self) -> &ClientId {
        &self.id
    }

    fn open(&self) {
        self.log.lock().unwrap().opened += 1;
    }

    fn close(&self) {
        self.log.lock().unwrap().closed += 1;
    }

    fn send_offer(&self, offer: &SessionDescription, to: &ClientId) {
        self.push("offer", serde_json::to_value(offer).unwrap(), to);
    }

    fn send_answer(&self, answer: &SessionDescription, to: &ClientId) {
        self.push("answer", serde_json::to_value(answer).unwrap(), to);
    }

    fn send_ice_candidate(&self, candidate: &IceCandidate, to: &ClientId) {
        self.push("ice-candidate", serde_json::to_value(candidate).unwrap(), to);
    }
}
