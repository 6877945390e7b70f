use std::collections::HashSet;
use std::fmt;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use super::media::{MediaStream, MediaTrack};
use super::transport::{PeerTransport, PeerUpdate, TaggedEvent, TransportError};
use crate::signaling::{ClientId, IceCandidate, SessionDescription};

/// Negotiation progress with one remote peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Idle,
    OfferSent,
    AnswerSent,
    Connected,
    /// Terminal; the record is dropped on reaching it
    Closed,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeerState::Idle => "idle",
            PeerState::OfferSent => "offer-sent",
            PeerState::AnswerSent => "answer-sent",
            PeerState::Connected => "connected",
            PeerState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Transport work queued for a peer's worker, run strictly in order
#[derive(Debug)]
pub(crate) enum Step {
    /// Attach the given tracks, then create and apply a local offer
    Offer {
        attach: Option<(MediaStream, Vec<MediaTrack>)>,
    },
    /// Apply a remote offer, then create and apply the answer
    Answer(SessionDescription),
    ApplyAnswer(SessionDescription),
    AddCandidate(IceCandidate),
}

/// What a finished step reports back to the orchestrator
#[derive(Debug)]
pub(crate) enum StepOutcome {
    /// Local offer applied and ready to send
    Offer(SessionDescription),
    /// Local answer applied and ready to send
    Answer(SessionDescription),
    AnswerApplied,
    Failed(TransportError),
}

/// Everything an orchestrator keeps about one remote peer.
///
/// The transport itself lives on a worker task so a slow or stalled call
/// only holds up this peer.
pub(crate) struct PeerRecord {
    pub state: PeerState,
    /// Identifies the transport among all transports ever created for this peer id
    pub serial: u64,
    attached: HashSet<String>,
    steps: mpsc::UnboundedSender<Step>,
    close_tx: oneshot::Sender<()>,
    worker: JoinHandle<()>,
}

impl PeerRecord {
    /// Move `transport` onto its own worker; results come back on `updates`
    pub fn spawn<T: PeerTransport>(
        transport: T,
        peer_id: ClientId,
        serial: u64,
        updates: mpsc::UnboundedSender<TaggedEvent>,
    ) -> Self {
        let (steps, steps_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        let worker = tokio::spawn(run_worker(transport, steps_rx, close_rx, peer_id, serial, updates));

        Self {
            state: PeerState::Idle,
            serial,
            attached: HashSet::new(),
            steps,
            close_tx,
            worker,
        }
    }

    pub fn has_local_tracks(&self) -> bool {
        !self.attached.is_empty()
    }

    /// Tracks of `stream` not yet attached, marking them attached
    pub fn missing_tracks(&mut self, stream: &MediaStream) -> Vec<MediaTrack> {
        stream
            .tracks()
            .iter()
            .filter(|track| self.attached.insert(track.id().to_owned()))
            .cloned()
            .collect()
    }

    pub fn submit(&self, step: Step) {
        let _ = self.steps.send(step);
    }

    /// Abandon any in-flight step, close the transport and wait for the worker
    pub async fn close(self) {
        let Self { close_tx, worker, .. } = self;
        let _ = close_tx.send(());
        let _ = worker.await;
    }
}

async fn run_worker<T: PeerTransport>(
    mut transport: T,
    mut steps: mpsc::UnboundedReceiver<Step>,
    mut closed: oneshot::Receiver<()>,
    peer_id: ClientId,
    serial: u64,
    updates: mpsc::UnboundedSender<TaggedEvent>,
) {
    loop {
        let step = tokio::select! {
            biased;
            _ = &mut closed => break,
            step = steps.recv() => match step {
                Some(step) => step,
                None => break,
            },
        };

        let result = tokio::select! {
            biased;
            _ = &mut closed => {
                debug!("Abandoning pending transport step for {}", peer_id);
                break;
            }
            result = execute(&mut transport, step) => result,
        };

        let outcome = match result {
            Ok(Some(outcome)) => outcome,
            Ok(None) => continue,
            Err(e) => StepOutcome::Failed(e),
        };

        let update = TaggedEvent {
            peer_id: peer_id.clone(),
            serial,
            event: PeerUpdate::Step(outcome),
        };
        if updates.send(update).is_err() {
            break;
        }
    }

    transport.close();
}

async fn execute<T: PeerTransport>(transport: &mut T, step: Step) -> Result<Option<StepOutcome>, TransportError> {
    match step {
        Step::Offer { attach } => {
            if let Some((stream, tracks)) = attach {
                for track in &tracks {
                    transport.add_track(track, &stream)?;
                }
            }
            let offer = transport.create_offer().await?;
            transport.set_local_description(offer.clone()).await?;
            Ok(Some(StepOutcome::Offer(offer)))
        }
        Step::Answer(offer) => {
            transport.set_remote_description(offer).await?;
            let answer = transport.create_answer().await?;
            transport.set_local_description(answer.clone()).await?;
            Ok(Some(StepOutcome::Answer(answer)))
        }
        Step::ApplyAnswer(answer) => {
            transport.set_remote_description(answer).await?;
            Ok(Some(StepOutcome::AnswerApplied))
        }
        Step::AddCandidate(candidate) => {
            transport.add_ice_candidate(candidate).await?;
            Ok(None)
        }
    }
}
