use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Handle to a captured or received media track.
///
/// Clones share the same stop flag.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    stopped: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    /// A stream without tracks, as a viewer passes when it has nothing to send
    pub fn empty(id: impl Into<String>) -> Self {
        Self::new(id, Vec::new())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// What to ask the capture device for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    /// Ideal frame width in pixels
    pub width: u32,
    /// Ideal frame height in pixels
    pub height: u32,
    pub audio: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            audio: true,
        }
    }
}

#[derive(Debug, Error)]
#[error("media capture failed: {0}")]
pub struct CaptureError(pub String);

/// Source of local media, e.g. a camera and microphone
pub trait MediaCapture {
    fn capture(
        &self,
        constraints: &CaptureConstraints,
    ) -> impl Future<Output = Result<MediaStream, CaptureError>> + Send;
}
