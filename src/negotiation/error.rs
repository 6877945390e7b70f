use thiserror::Error;

use super::media::CaptureError;

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("orchestrator is disconnected")]
    Disconnected,
}
